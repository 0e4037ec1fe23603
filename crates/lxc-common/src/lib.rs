use std::fmt::Display;

// Re-export dependencies used in public interfaces of common types
pub use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod parse;
pub mod validate;

pub use parse::{parse_container_address, parse_container_listing, parse_image_listing};
pub use validate::{validate_container_name, validate_image_name, validate_rule_name};

#[derive(Error, Debug)]
pub enum LxcError {
    #[error("Invalid container name")]
    InvalidContainerName,

    #[error("Invalid image name")]
    InvalidImageName,

    #[error("Invalid rule name")]
    InvalidRuleName,

    #[error("Missing required {0}")]
    MissingFields(String),

    #[error("Script {0} not found")]
    ScriptNotFound(String),

    #[error("Script {0} is not executable")]
    ScriptNotExecutable(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
}

impl LxcError {
    /// Whether the error was caused by the client's input rather than the host.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            LxcError::InvalidContainerName
                | LxcError::InvalidImageName
                | LxcError::InvalidRuleName
                | LxcError::MissingFields(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, LxcError>;

/// Container state as printed in the `STATE` column of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContainerState {
    Running,
    Stopped,
    Frozen,
    Unknown,
}

impl ContainerState {
    /// Matches the column case-insensitively; anything unrecognised is `Unknown`.
    pub fn from_column(column: &str) -> Self {
        match column.trim().to_ascii_lowercase().as_str() {
            "running" => ContainerState::Running,
            "stopped" => ContainerState::Stopped,
            "frozen" => ContainerState::Frozen,
            _ => ContainerState::Unknown,
        }
    }
}

impl Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContainerState::Running => "RUNNING",
            ContainerState::Stopped => "STOPPED",
            ContainerState::Frozen => "FROZEN",
            ContainerState::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// One row of the container listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub name: String,
    pub state: ContainerState,
    pub ipv4: String,
    pub ipv6: String,
    /// `container` or `virtual-machine`
    #[serde(rename = "type")]
    pub kind: String,
}

/// One row of the image listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub alias: String,
    pub fingerprint: String,
    pub public: String,
    pub description: String,
    pub architecture: String,
    pub size: String,
}

/// Outcome of a single subprocess invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CommandResult {
    pub succeeded: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(stderr: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn timed_out() -> Self {
        Self::failure("Command timed out")
    }
}

impl Display for CommandResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CommandResult(succeeded: {}, stdout: {:?}, stderr: {:?})",
            self.succeeded, self.stdout, self.stderr
        )
    }
}

/// Payload of a `container_update` broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Map<String, serde_json::Value>,
    pub timestamp: String,
}

impl LifecycleEvent {
    pub fn new(
        event_type: impl Into<String>,
        data: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_state_from_column() {
        assert_eq!(ContainerState::from_column("RUNNING"), ContainerState::Running);
        assert_eq!(ContainerState::from_column(" stopped "), ContainerState::Stopped);
        assert_eq!(ContainerState::from_column("Frozen"), ContainerState::Frozen);
        assert_eq!(ContainerState::from_column("ERROR"), ContainerState::Unknown);
        assert_eq!(ContainerState::from_column(""), ContainerState::Unknown);
    }

    #[test]
    fn test_serialization() {
        let record = ContainerRecord {
            name: "web1".to_string(),
            state: ContainerState::Running,
            ipv4: "10.0.0.5 (eth0)".to_string(),
            ipv6: String::new(),
            kind: "container".to_string(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["state"], "RUNNING");
        assert_eq!(json["type"], "container");
        assert_eq!(json["ipv6"], "");
        assert!(json.get("kind").is_none());
    }

    #[test]
    fn test_lifecycle_event_wire_shape() {
        let mut data = serde_json::Map::new();
        data.insert("name".to_string(), serde_json::json!("web1"));
        let event = LifecycleEvent::new("container_delete_start", data);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "container_delete_start");
        assert_eq!(json["data"]["name"], "web1");
        assert!(chrono::DateTime::parse_from_rfc3339(json["timestamp"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_client_errors() {
        assert!(LxcError::InvalidContainerName.is_client_error());
        assert!(LxcError::MissingFields("field: name".to_string()).is_client_error());
        assert!(!LxcError::ScriptNotFound("lx".to_string()).is_client_error());
        assert_eq!(
            LxcError::ScriptNotExecutable("rmlx".to_string()).to_string(),
            "Script rmlx is not executable"
        );
    }
}
