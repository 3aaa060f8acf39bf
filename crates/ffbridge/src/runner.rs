//! Subprocess runner shared by all adapter operations.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

use crate::{Error, Result};

/// Maximum number of stderr characters kept in a process failure.
const STDERR_LIMIT: usize = 500;

/// Run a tool to completion under a deadline, returning captured stdout.
///
/// stdout and stderr are drained concurrently with the wait so large probe
/// output cannot fill the pipe and stall the child. When the deadline
/// expires the child is killed and a Timeout error is returned; the
/// kill-on-drop flag covers callers that drop the future mid-flight.
pub(crate) async fn run_tool(
    tool: &str,
    args: &[String],
    op: &str,
    limit: Duration,
) -> Result<Vec<u8>> {
    debug!("running: {} {}", tool, args.join(" "));

    let mut command = Command::new(tool);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(windows)]
    command.creation_flags(0x0800_0000); // CREATE_NO_WINDOW

    let mut child = command.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::ToolNotFound {
            tool: tool.to_string(),
        },
        _ => Error::Io(e),
    })?;

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let run = async {
        let drain_stdout = async {
            let mut buf = Vec::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                pipe.read_to_end(&mut buf).await?;
            }
            std::io::Result::Ok(buf)
        };
        let drain_stderr = async {
            let mut buf = Vec::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                pipe.read_to_end(&mut buf).await?;
            }
            std::io::Result::Ok(buf)
        };
        let (stdout, stderr, status) = tokio::join!(drain_stdout, drain_stderr, child.wait());
        std::io::Result::Ok((stdout?, stderr?, status?))
    };

    match tokio::time::timeout(limit, run).await {
        Ok(Ok((stdout, stderr, status))) => {
            if status.success() {
                debug!("{} completed successfully", op);
                Ok(stdout)
            } else {
                let stderr: String = String::from_utf8_lossy(&stderr)
                    .chars()
                    .take(STDERR_LIMIT)
                    .collect();
                Err(Error::Process {
                    op: op.to_string(),
                    stderr,
                })
            }
        }
        Ok(Err(e)) => Err(Error::Io(e)),
        Err(_) => {
            let _ = child.kill().await;
            Err(Error::Timeout {
                op: op.to_string(),
                limit_secs: limit.as_secs(),
            })
        }
    }
}
