use lxc_common::{LxcError, Result};
use std::path::PathBuf;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_LOG_FILE: &str = "lxc-api.log";

/// Server configuration, read once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub debug: bool,
    /// Directory holding the automation scripts; also the working directory
    /// of every subprocess.
    pub install_root: PathBuf,
    /// `None` logs to stdout only.
    pub log_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            debug: false,
            install_root: PathBuf::from("."),
            log_file: Some(PathBuf::from(DEFAULT_LOG_FILE)),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let port = match lookup("LXC_API_PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| LxcError::Config(format!("LXC_API_PORT is not a port: {raw}")))?,
            None => defaults.port,
        };

        let log_file = match lookup("LXC_API_LOG_FILE") {
            Some(path) if path.is_empty() => None,
            Some(path) => Some(PathBuf::from(path)),
            None => defaults.log_file,
        };

        Ok(Self {
            host: lookup("LXC_API_HOST").unwrap_or(defaults.host),
            port,
            debug: lookup("LXC_API_DEBUG")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            install_root: lookup("LXC_API_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.install_root),
            log_file,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
