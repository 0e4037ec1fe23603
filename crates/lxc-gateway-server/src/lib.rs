pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod types;

use axum::{
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use lxc_executor::{ProcessExecutor, ScriptRunner};
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::error::ApiError;
use crate::events::EventBroadcaster;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub scripts: ScriptRunner,
    pub events: Arc<EventBroadcaster>,
}

impl AppState {
    pub fn new(scripts: ScriptRunner, events: Arc<EventBroadcaster>) -> Self {
        Self { scripts, events }
    }
}

pub fn create_app(state: AppState) -> Router {
    use handlers::*;

    Router::new()
        .route("/api/health", get(health_handler))
        // Containers
        .route(
            "/api/containers",
            get(list_containers_handler).post(create_container_handler),
        )
        .route("/api/containers/:name", delete(delete_container_handler))
        .route("/api/containers/:name/restart", post(restart_container_handler))
        .route("/api/containers/:name/connect", post(connection_info_handler))
        .route("/api/containers/:name/authkey", post(deploy_key_handler))
        .route("/api/containers/:name/portforward", post(port_forward_handler))
        // Images and host network
        .route("/api/images", get(list_images_handler))
        .route("/api/network/setup", post(setup_network_handler))
        // Lifecycle events
        .route("/ws", get(events::ws_handler))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Graceful-shutdown future for `axum::serve`: waits for `signal`, then
/// sends SIGTERM to every running subprocess so the in-flight requests
/// waiting on them can complete and the drain finishes.
pub async fn shutdown_on<F>(signal: F, executor: Arc<ProcessExecutor>)
where
    F: Future<Output = ()>,
{
    signal.await;
    let terminated = executor.terminate_all();
    info!("Shutting down, terminated {} running subprocesses", terminated);
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    ApiError::Internal(format!("handler panicked: {detail}")).into_response()
}
