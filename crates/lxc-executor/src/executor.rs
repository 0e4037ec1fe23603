//! Subprocess execution without a shell.
//!
//! Every command is spawned from a discrete argument vector in its own
//! process group, so a timeout can take down the whole tree the command
//! started. Failures of any kind come back as a [`CommandResult`].

use async_trait::async_trait;
use dashmap::DashMap;
use lxc_common::CommandResult;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

/// Prefix used to run a command with elevated privileges.
pub const ELEVATION_PREFIX: &str = "sudo";

/// Budget for direct CLI calls such as `lxc info`.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Time between SIGTERM and SIGKILL once a command has timed out. Also how
/// long output may stay open after the command itself has exited.
pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_secs(2);

/// A single command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub argv: Vec<String>,
    pub timeout: Duration,
    pub elevate: bool,
}

impl Invocation {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
            elevate: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn elevated(mut self, elevate: bool) -> Self {
        self.elevate = elevate;
        self
    }

    /// The argument vector that is actually spawned, elevation prefix included.
    pub fn command_line(&self) -> Vec<String> {
        let already_elevated = self
            .argv
            .first()
            .is_some_and(|program| program == ELEVATION_PREFIX);

        if self.elevate && !already_elevated {
            std::iter::once(ELEVATION_PREFIX.to_string())
                .chain(self.argv.iter().cloned())
                .collect()
        } else {
            self.argv.clone()
        }
    }
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, invocation: Invocation) -> CommandResult;
}

/// Runs commands as child processes of the service.
pub struct ProcessExecutor {
    working_dir: PathBuf,
    termination_grace: Duration,
    /// pid -> command line of every child still running
    active: Arc<DashMap<u32, String>>,
}

impl ProcessExecutor {
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            termination_grace: DEFAULT_TERMINATION_GRACE,
            active: Arc::new(DashMap::new()),
        }
    }

    pub fn with_termination_grace(mut self, grace: Duration) -> Self {
        self.termination_grace = grace;
        self
    }

    /// Snapshot of the children currently running.
    pub fn active_processes(&self) -> Vec<(u32, String)> {
        self.active
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Sends SIGTERM to the process group of every tracked child.
    ///
    /// Returns how many groups were signalled. The owning `execute` calls
    /// still reap their children.
    pub fn terminate_all(&self) -> usize {
        let mut signalled = 0;
        for entry in self.active.iter() {
            info!("Terminating {} (pid {})", entry.value(), entry.key());
            if signal_group(*entry.key(), libc::SIGTERM) {
                signalled += 1;
            }
        }
        signalled
    }

    async fn stop(&self, pid: Option<u32>, child: &mut Child, command: &str) {
        match pid {
            Some(pid) => self.terminate(pid, child, command).await,
            None => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill {}: {}", command, e);
                }
            }
        }
    }

    /// SIGTERM to the group, a grace period for the direct child, then
    /// SIGKILL to whatever is left in the group.
    async fn terminate(&self, pid: u32, child: &mut Child, command: &str) {
        signal_group(pid, libc::SIGTERM);
        if tokio::time::timeout(self.termination_grace, child.wait())
            .await
            .is_err()
        {
            warn!("{} ignored SIGTERM, sending SIGKILL", command);
        }
        signal_group(pid, libc::SIGKILL);
        if let Err(e) = child.wait().await {
            warn!("Failed to reap {}: {}", command, e);
        }
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(&self, invocation: Invocation) -> CommandResult {
        let argv = invocation.command_line();
        let Some((program, args)) = argv.split_first() else {
            return CommandResult::failure("Empty command");
        };
        let command = argv.join(" ");
        info!("Executing command: {}", command);

        let mut std_command = std::process::Command::new(program);
        std_command.args(args).process_group(0);

        let spawned = Command::from(std_command)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                error!("Command execution error: {}: {}", command, e);
                return CommandResult::failure(e.to_string());
            }
        };

        // Taken before the child can be reaped; `Child::id` is `None` afterwards.
        let pid = child.id();
        let _tracked = pid.map(|pid| TrackedProcess::register(&self.active, pid, &command));

        let stdout_reader = tokio::spawn(read_stream(child.stdout.take()));
        let stderr_reader = tokio::spawn(read_stream(child.stderr.take()));
        let readers = [stdout_reader.abort_handle(), stderr_reader.abort_handle()];

        let status = match tokio::time::timeout(invocation.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                error!("Command execution error: {}: {}", command, e);
                self.stop(pid, &mut child, &command).await;
                readers.iter().for_each(AbortHandle::abort);
                return CommandResult::failure(e.to_string());
            }
            Err(_) => {
                error!("Command timed out: {}", command);
                self.stop(pid, &mut child, &command).await;
                readers.iter().for_each(AbortHandle::abort);
                return CommandResult::timed_out();
            }
        };

        // The direct child is gone, but anything it left running in the
        // background may still hold the pipes open.
        let output = async { tokio::join!(stdout_reader, stderr_reader) };
        tokio::pin!(output);

        let drained = match tokio::time::timeout(self.termination_grace, &mut output).await {
            Ok(output) => Some(output),
            Err(_) => {
                warn!("{} left processes holding its output, killing its group", command);
                if let Some(pid) = pid {
                    signal_group(pid, libc::SIGKILL);
                }
                tokio::time::timeout(self.termination_grace, &mut output)
                    .await
                    .ok()
            }
        };

        let (stdout, stderr) = match drained {
            Some((stdout, stderr)) => (stdout.unwrap_or_default(), stderr.unwrap_or_default()),
            None => {
                error!("Output of {} never closed", command);
                readers.iter().for_each(AbortHandle::abort);
                (String::new(), String::new())
            }
        };

        let result = CommandResult {
            succeeded: status.success(),
            stdout: stdout.trim().to_string(),
            stderr: stderr.trim().to_string(),
        };
        if !result.succeeded {
            error!("Command failed: {} ({}), stderr: {}", command, status, result.stderr);
        }
        result
    }
}

/// Keeps a pid in the process table for as long as it is alive.
struct TrackedProcess<'a> {
    table: &'a DashMap<u32, String>,
    pid: u32,
}

impl<'a> TrackedProcess<'a> {
    fn register(table: &'a DashMap<u32, String>, pid: u32, command: &str) -> Self {
        table.insert(pid, command.to_string());
        Self { table, pid }
    }
}

impl Drop for TrackedProcess<'_> {
    fn drop(&mut self) {
        self.table.remove(&self.pid);
    }
}

async fn read_stream<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            debug!("Output stream closed early: {}", e);
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Children are spawned as group leaders, so the pid doubles as the group id.
fn signal_group(pid: u32, signal: libc::c_int) -> bool {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: kill(2) takes plain integers and touches no memory of ours.
    unsafe { libc::kill(-pgid, signal) == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elevation_prefix() {
        let plain = Invocation::new(["lxc", "info", "web1"]);
        assert_eq!(plain.command_line(), vec!["lxc", "info", "web1"]);

        let elevated = Invocation::new(["/opt/lxc/setupNetwork"]).elevated(true);
        assert_eq!(elevated.command_line(), vec!["sudo", "/opt/lxc/setupNetwork"]);

        let already = Invocation::new(["sudo", "lxc", "list"]).elevated(true);
        assert_eq!(already.command_line(), vec!["sudo", "lxc", "list"]);
    }

    #[test]
    fn test_invocation_defaults() {
        let inv = Invocation::new(Vec::<String>::new());
        assert_eq!(inv.timeout, DEFAULT_COMMAND_TIMEOUT);
        assert!(!inv.elevate);
        assert!(inv.command_line().is_empty());
    }

    #[tokio::test]
    async fn test_empty_argv() {
        let executor = ProcessExecutor::new(".");
        let result = executor.execute(Invocation::new(Vec::<String>::new())).await;
        assert_eq!(result, CommandResult::failure("Empty command"));
    }

    #[test]
    fn test_tracked_process_is_removed_on_drop() {
        let table = DashMap::new();
        {
            let _tracked = TrackedProcess::register(&table, 4242, "sleep 1");
            assert_eq!(table.get(&4242).map(|e| e.value().clone()), Some("sleep 1".to_string()));
        }
        assert!(table.is_empty());
    }
}
