use axum::{
    extract::{rejection::JsonRejection, Json, Path, State},
    http::StatusCode,
};
use lxc_common::validate::{ensure_container_name, ensure_image_name, ensure_rule_name};
use lxc_common::{
    parse_container_address, parse_container_listing, parse_image_listing, CommandResult, LxcError,
};
use lxc_executor::{Script, CREATE_SCRIPT_TIMEOUT, DEFAULT_SCRIPT_TIMEOUT};
use serde_json::json;
use std::time::Duration;
use tracing::{info, instrument};

use crate::error::{ApiError, Result};
use crate::events::Payload;
use crate::types::{
    ConnectionInfo, ContainerCreated, ContainerList, CreateContainerRequest, HealthResponse,
    ImageList, MessageResponse, PortForwardRequest,
};
use crate::AppState;

pub const API_VERSION: &str = env!("CARGO_PKG_VERSION");

fn payload(value: serde_json::Value) -> Payload {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Payload::new(),
    }
}

/// A state-changing script run bracketed by `<event>_start` and
/// `<event>_success` / `<event>_error` broadcasts.
struct Operation<'a> {
    event: &'a str,
    script: Script,
    args: Vec<&'a str>,
    timeout: Duration,
    /// Sent with `_start` and `_success`
    payload: Payload,
    /// Sent with `_error`, alongside the `error` detail
    subject: Payload,
}

impl Operation<'_> {
    async fn run(self, state: &AppState) -> CommandResult {
        state
            .events
            .broadcast(&format!("{}_start", self.event), self.payload.clone());

        let result = state
            .scripts
            .run_script(self.script, &self.args, self.timeout)
            .await;

        if result.succeeded {
            state
                .events
                .broadcast(&format!("{}_success", self.event), self.payload);
        } else {
            let mut data = self.subject;
            data.insert("error".to_string(), json!(result.stderr));
            state.events.broadcast(&format!("{}_error", self.event), data);
        }

        result
    }
}

fn ensure_succeeded(result: CommandResult, message: &str) -> Result<CommandResult> {
    if result.succeeded {
        Ok(result)
    } else {
        Err(ApiError::execution(message, result.stderr))
    }
}

pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        version: API_VERSION.to_string(),
    })
}

#[instrument(skip(state))]
pub async fn list_containers_handler(State(state): State<AppState>) -> Result<Json<ContainerList>> {
    let result = state
        .scripts
        .run_script(Script::List, &[], DEFAULT_SCRIPT_TIMEOUT)
        .await;
    let result = ensure_succeeded(result, "Failed to list containers")?;

    let containers = parse_container_listing(&result.stdout);
    Ok(Json(ContainerList {
        count: containers.len(),
        containers,
    }))
}

#[instrument(skip(state, body))]
pub async fn create_container_handler(
    State(state): State<AppState>,
    body: std::result::Result<Json<CreateContainerRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ContainerCreated>)> {
    let missing = || LxcError::MissingFields("fields: image, name".to_string());
    let Json(request) = body.map_err(|_| missing())?;
    let (Some(name), Some(image)) = (request.name, request.image) else {
        return Err(missing().into());
    };

    // Present but not a string counts as invalid, not missing.
    let name = name.as_str().ok_or(LxcError::InvalidContainerName)?.to_string();
    ensure_container_name(&name)?;
    let image = image.as_str().ok_or(LxcError::InvalidImageName)?.to_string();
    ensure_image_name(&image)?;

    let result = Operation {
        event: "container_create",
        script: Script::Create,
        args: vec![image.as_str(), name.as_str()],
        timeout: CREATE_SCRIPT_TIMEOUT,
        payload: payload(json!({ "name": name, "image": image })),
        subject: payload(json!({ "name": name })),
    }
    .run(&state)
    .await;
    ensure_succeeded(result, "Failed to create container")?;

    info!("Container {} created from {}", name, image);
    Ok((
        StatusCode::CREATED,
        Json(ContainerCreated {
            message: format!("Container {name} created successfully"),
            name,
            image,
        }),
    ))
}

#[instrument(skip(state))]
pub async fn delete_container_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<MessageResponse>> {
    ensure_container_name(&name)?;

    let result = Operation {
        event: "container_delete",
        script: Script::Delete,
        args: vec![name.as_str()],
        timeout: DEFAULT_SCRIPT_TIMEOUT,
        payload: payload(json!({ "name": name })),
        subject: payload(json!({ "name": name })),
    }
    .run(&state)
    .await;
    ensure_succeeded(result, "Failed to delete container")?;

    Ok(Json(MessageResponse {
        message: format!("Container {name} deleted successfully"),
    }))
}

#[instrument(skip(state))]
pub async fn restart_container_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<MessageResponse>> {
    ensure_container_name(&name)?;

    let result = Operation {
        event: "container_restart",
        script: Script::Restart,
        args: vec![name.as_str()],
        timeout: DEFAULT_SCRIPT_TIMEOUT,
        payload: payload(json!({ "name": name })),
        subject: payload(json!({ "name": name })),
    }
    .run(&state)
    .await;
    ensure_succeeded(result, "Failed to restart container")?;

    Ok(Json(MessageResponse {
        message: format!("Container {name} restarted successfully"),
    }))
}

#[instrument(skip(state))]
pub async fn connection_info_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ConnectionInfo>> {
    ensure_container_name(&name)?;

    let result = state.scripts.run_command(&["lxc", "info", name.as_str()], None).await;
    let result = ensure_succeeded(result, "Failed to get container info")?;

    let ip_address = parse_container_address(&result.stdout);
    Ok(Json(ConnectionInfo::new(&name, ip_address)))
}

#[instrument(skip(state))]
pub async fn list_images_handler(State(state): State<AppState>) -> Result<Json<ImageList>> {
    let result = state
        .scripts
        .run_script(Script::ListImages, &[], DEFAULT_SCRIPT_TIMEOUT)
        .await;
    let result = ensure_succeeded(result, "Failed to list images")?;

    let images = parse_image_listing(&result.stdout);
    Ok(Json(ImageList {
        count: images.len(),
        images,
    }))
}

#[instrument(skip(state))]
pub async fn setup_network_handler(State(state): State<AppState>) -> Result<Json<MessageResponse>> {
    let result = Operation {
        event: "network_setup",
        script: Script::SetupNetwork,
        args: Vec::new(),
        timeout: DEFAULT_SCRIPT_TIMEOUT,
        payload: Payload::new(),
        subject: Payload::new(),
    }
    .run(&state)
    .await;
    ensure_succeeded(result, "Failed to setup network")?;

    Ok(Json(MessageResponse {
        message: "Network setup completed successfully".to_string(),
    }))
}

#[instrument(skip(state))]
pub async fn deploy_key_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<MessageResponse>> {
    ensure_container_name(&name)?;

    let result = Operation {
        event: "authkey_deploy",
        script: Script::DeployKey,
        args: vec![name.as_str()],
        timeout: DEFAULT_SCRIPT_TIMEOUT,
        payload: payload(json!({ "name": name })),
        subject: payload(json!({ "name": name })),
    }
    .run(&state)
    .await;
    ensure_succeeded(result, "Failed to deploy SSH keys")?;

    Ok(Json(MessageResponse {
        message: format!("SSH keys deployed to {name} successfully"),
    }))
}

#[instrument(skip(state, body))]
pub async fn port_forward_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: std::result::Result<Json<PortForwardRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>> {
    ensure_container_name(&name)?;

    let missing = || LxcError::MissingFields("field: name".to_string());
    let Json(request) = body.map_err(|_| missing())?;
    let rule = request.name.ok_or_else(missing)?;
    let rule = rule.as_str().ok_or(LxcError::InvalidRuleName)?.to_string();
    ensure_rule_name(&rule)?;

    let result = Operation {
        event: "portforward_create",
        script: Script::PortForward,
        args: vec![name.as_str(), rule.as_str()],
        timeout: DEFAULT_SCRIPT_TIMEOUT,
        payload: payload(json!({ "container": name, "rule": rule })),
        subject: payload(json!({ "container": name })),
    }
    .run(&state)
    .await;
    ensure_succeeded(result, "Failed to create port forward")?;

    Ok(Json(MessageResponse {
        message: format!("Port forward rule {rule} created for {name}"),
    }))
}
