//! Spawning and terminating MCP server child processes.

use std::{collections::BTreeMap, io, process::Stdio, time::Duration};

use tokio::{
    process::{Child, ChildStderr, ChildStdin, ChildStdout, Command},
    sync::Mutex,
    time,
};
use tracing::debug;

use crate::error::McpError;

/// Grace period between the termination request and the hard kill.
pub(crate) const STOP_GRACE: Duration = Duration::from_secs(5);

/// Launchers that need shell resolution on Windows.
#[cfg(windows)]
const SHELL_LAUNCHERS: &[&str] = &["npx", "npm", "node", "yarn"];

/// One spawned child and its pipes, before the session takes them over.
pub(crate) struct SpawnedChild {
    pub handle: ChildHandle,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Owning handle for a spawned child. Dropping it kills the process, which
/// closes the pipes and lets the monitor tasks observe end-of-stream.
pub(crate) struct ChildHandle {
    child: Mutex<Option<Child>>,
    pid: Option<u32>,
}

pub(crate) fn spawn(
    argv: &[String],
    env: &BTreeMap<String, String>,
) -> Result<SpawnedChild, McpError> {
    let mut command = build_command(argv)?;
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in env {
        command.env(key, value);
    }

    let command_debug = argv.join(" ");
    let mut child = command.spawn().map_err(|source| McpError::Spawn {
        command: command_debug.clone(),
        source,
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| McpError::Transport("child stdin unavailable".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| McpError::Transport("child stdout unavailable".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| McpError::Transport("child stderr unavailable".into()))?;

    let pid = child.id();
    debug!(command = %command_debug, ?pid, "spawned server process");

    Ok(SpawnedChild {
        handle: ChildHandle {
            child: Mutex::new(Some(child)),
            pid,
        },
        stdin,
        stdout,
        stderr,
    })
}

fn build_command(argv: &[String]) -> Result<Command, McpError> {
    let Some(program) = argv.first() else {
        return Err(McpError::Spawn {
            command: String::new(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "empty command"),
        });
    };

    #[cfg(windows)]
    if SHELL_LAUNCHERS.contains(&program.as_str()) {
        let mut command = Command::new("cmd");
        command.arg("/C").arg(argv.join(" "));
        return Ok(command);
    }

    let mut command = Command::new(program);
    command.args(&argv[1..]);
    Ok(command)
}

impl ChildHandle {
    pub(crate) fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Request termination, wait out the grace period, then kill.
    ///
    /// Idempotent: a second call (or a call after the child already exited)
    /// is a no-op.
    pub(crate) async fn stop(&self) {
        let mut guard = self.child.lock().await;
        let Some(mut child) = guard.take() else {
            return;
        };

        if let Ok(Some(_)) = child.try_wait() {
            return;
        }

        terminate(&mut child);
        if time::timeout(STOP_GRACE, child.wait()).await.is_err() {
            debug!(pid = ?self.pid, "server ignored termination request, killing");
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    use nix::{
        sys::signal::{kill, Signal},
        unistd::Pid,
    };

    match child.id() {
        Some(pid) => {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
        None => {
            let _ = child.start_kill();
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}

impl Drop for ChildHandle {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(mut child) = guard.take() {
                let _ = child.start_kill();
            }
        }
    }
}
