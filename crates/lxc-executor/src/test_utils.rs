/// Test utilities: a recording executor and stub script installation
use crate::executor::{CommandExecutor, Invocation};
use crate::script::Script;
use async_trait::async_trait;
use lxc_common::CommandResult;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

type Responder = dyn Fn(&Invocation) -> CommandResult + Send + Sync;

/// Executor that never spawns anything: it records each invocation and
/// answers from a responder closure.
#[derive(Clone)]
pub struct StubExecutor {
    invocations: Arc<Mutex<Vec<Invocation>>>,
    responder: Arc<Responder>,
}

impl StubExecutor {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&Invocation) -> CommandResult + Send + Sync + 'static,
    {
        Self {
            invocations: Arc::new(Mutex::new(Vec::new())),
            responder: Arc::new(responder),
        }
    }

    /// Every invocation succeeds with `stdout`.
    pub fn succeeding(stdout: impl Into<String>) -> Self {
        let stdout = stdout.into();
        Self::new(move |_| CommandResult::success(stdout.clone()))
    }

    /// Every invocation fails with `stderr`.
    pub fn failing(stderr: impl Into<String>) -> Self {
        let stderr = stderr.into();
        Self::new(move |_| CommandResult::failure(stderr.clone()))
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations().len()
    }
}

#[async_trait]
impl CommandExecutor for StubExecutor {
    async fn execute(&self, invocation: Invocation) -> CommandResult {
        let result = (self.responder)(&invocation);
        self.invocations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(invocation);
        result
    }
}

/// Writes an executable `#!/bin/sh` script called `script` into `root`.
pub fn write_script(root: &Path, script: Script, body: &str) -> std::io::Result<PathBuf> {
    let path = root.join(script.file_name());
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n"))?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

/// Installs a no-op executable for every script.
pub fn install_stub_scripts(root: &Path) -> std::io::Result<()> {
    for script in Script::ALL {
        write_script(root, script, "exit 0")?;
    }
    Ok(())
}
