use lxc_common::{ContainerRecord, ImageRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST /api/containers`. Fields are kept as raw JSON so that an
/// absent field and a field of the wrong type can be told apart.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CreateContainerRequest {
    pub name: Option<Value>,
    pub image: Option<Value>,
}

/// Body of `POST /api/containers/:name/portforward`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PortForwardRequest {
    /// Rule name handed to `pflx`
    pub name: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ContainerList {
    pub containers: Vec<ContainerRecord>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImageList {
    pub images: Vec<ImageRecord>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ContainerCreated {
    pub message: String,
    pub name: String,
    pub image: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub name: String,
    pub ip_address: Option<String>,
    pub connection_command: String,
    pub ssh_command: Option<String>,
}

impl ConnectionInfo {
    pub fn new(name: &str, ip_address: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            connection_command: format!("lxc exec {name} -- /bin/bash"),
            ssh_command: ip_address.as_ref().map(|ip| format!("ssh root@{ip}")),
            ip_address,
        }
    }
}
