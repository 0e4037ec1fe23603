use crate::executor::{CommandExecutor, Invocation, DEFAULT_COMMAND_TIMEOUT};
use lxc_common::{CommandResult, LxcError};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, instrument};

/// Budget for scripts unless the caller asks for more.
pub const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Budget for container creation, which may have to download an image.
pub const CREATE_SCRIPT_TIMEOUT: Duration = Duration::from_secs(120);

/// Automation scripts shipped in the installation root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Script {
    /// `lx`: container listing table
    List,
    /// `newlx <image> <name>`
    Create,
    /// `rmlx <name>`
    Delete,
    /// `redolx <name>`
    Restart,
    /// `lstImages`: image listing table
    ListImages,
    /// `setupNetwork`: host macvlan bridge
    SetupNetwork,
    /// `authkey <name>`: push SSH keys into the container
    DeployKey,
    /// `pflx <name> <rule>`
    PortForward,
}

impl Script {
    pub const ALL: [Script; 8] = [
        Script::List,
        Script::Create,
        Script::Delete,
        Script::Restart,
        Script::ListImages,
        Script::SetupNetwork,
        Script::DeployKey,
        Script::PortForward,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            Script::List => "lx",
            Script::Create => "newlx",
            Script::Delete => "rmlx",
            Script::Restart => "redolx",
            Script::ListImages => "lstImages",
            Script::SetupNetwork => "setupNetwork",
            Script::DeployKey => "authkey",
            Script::PortForward => "pflx",
        }
    }

    /// Scripts that touch host networking or the privileged image store.
    pub fn requires_elevation(self) -> bool {
        matches!(self, Script::ListImages | Script::SetupNetwork)
    }
}

/// Resolves scripts under the installation root and hands them to a [`CommandExecutor`].
#[derive(Clone)]
pub struct ScriptRunner {
    root: PathBuf,
    executor: Arc<dyn CommandExecutor>,
}

impl ScriptRunner {
    pub fn new(root: impl AsRef<Path>, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            executor,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of `script`, provided it exists and has an execute bit set.
    pub async fn resolve(&self, script: Script) -> lxc_common::Result<PathBuf> {
        let name = script.file_name();
        let path = self.root.join(name);

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Err(LxcError::ScriptNotFound(name.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LxcError::ScriptNotFound(name.to_string()))
            }
            Err(e) => return Err(LxcError::Io(e)),
        };

        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(LxcError::ScriptNotExecutable(name.to_string()));
        }

        Ok(path)
    }

    #[instrument(skip(self))]
    pub async fn run_script(&self, script: Script, args: &[&str], timeout: Duration) -> CommandResult {
        let path = match self.resolve(script).await {
            Ok(path) => path,
            Err(e) => {
                error!("Cannot run {}: {}", script.file_name(), e);
                return CommandResult::failure(e.to_string());
            }
        };

        let argv = std::iter::once(path.to_string_lossy().into_owned())
            .chain(args.iter().map(|arg| arg.to_string()));

        self.executor
            .execute(
                Invocation::new(argv)
                    .with_timeout(timeout)
                    .elevated(script.requires_elevation()),
            )
            .await
    }

    /// Runs a CLI command directly, without elevation.
    pub async fn run_command(&self, argv: &[&str], timeout: Option<Duration>) -> CommandResult {
        let timeout = timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT);
        self.executor
            .execute(Invocation::new(argv.iter().copied()).with_timeout(timeout))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elevation_allow_list() {
        let elevated: Vec<_> = Script::ALL
            .iter()
            .filter(|s| s.requires_elevation())
            .map(|s| s.file_name())
            .collect();
        assert_eq!(elevated, vec!["lstImages", "setupNetwork"]);
    }

    #[test]
    fn test_file_names_are_unique() {
        let mut names: Vec<_> = Script::ALL.iter().map(|s| s.file_name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Script::ALL.len());
    }
}
