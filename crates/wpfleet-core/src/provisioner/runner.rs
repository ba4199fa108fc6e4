// External command execution.
//
// `CommandRunner` is the seam between the compose provisioner and the
// host. `TokioCommandRunner` runs real processes with a hard timeout and
// kills the child when it fires; tests substitute a recording runner.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tracing::debug;

use super::ProvisionError;

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program args...` in `cwd`, killing it after `timeout`.
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        timeout: Duration,
    ) -> Result<CommandOutput, ProvisionError>;
}

/// Production runner backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioCommandRunner;

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        timeout: Duration,
    ) -> Result<CommandOutput, ProvisionError> {
        let command_line = display_command(program, args);
        debug!(command = %command_line, cwd = %cwd.display(), "spawning");

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProvisionError::io(format!("failed to spawn `{command_line}`"), e))?;

        let mut stdout_handle = child.stdout.take();
        let mut stderr_handle = child.stderr.take();

        tokio::select! {
            result = async {
                let (status, stdout, stderr) = tokio::join!(
                    child.wait(),
                    read_all(stdout_handle.as_mut()),
                    read_all(stderr_handle.as_mut()),
                );
                let status = status
                    .map_err(|e| ProvisionError::io(format!("waiting for `{command_line}`"), e))?;
                Ok(CommandOutput {
                    success: status.success(),
                    code: status.code(),
                    stdout,
                    stderr,
                })
            } => result,
            () = tokio::time::sleep(timeout) => {
                let _ = child.kill().await;
                Err(ProvisionError::CommandTimeout {
                    command: command_line,
                    timeout_secs: timeout.as_secs(),
                })
            }
        }
    }
}

async fn read_all<R: tokio::io::AsyncRead + Unpin>(handle: Option<&mut R>) -> String {
    let mut buf = Vec::new();
    if let Some(h) = handle {
        let _ = h.read_to_end(&mut buf).await;
    }
    String::from_utf8_lossy(&buf).into_owned()
}

pub(crate) fn display_command(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}
