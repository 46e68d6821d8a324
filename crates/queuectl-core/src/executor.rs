//! Runs a single claimed job to terminal outcome.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::timeout as tokio_timeout;

#[cfg(unix)]
use std::os::unix::process::CommandExt;

/// Output captured beyond this many bytes per stream is truncated with a
/// marker appended, per the captured-output bound.
const MAX_CAPTURED_BYTES: usize = 64 * 1024;

/// Grace window between SIGTERM and SIGKILL when a job times out.
const KILL_GRACE: Duration = Duration::from_millis(500);

/// The terminal outcome of running one command.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub spawn_error: Option<String>,
}

impl ExecutionOutcome {
    /// True when the worker should call `Store::complete`.
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.spawn_error.is_none() && self.exit_code == Some(0)
    }

    /// The exit code to persist via `Store::fail`. Spawn failure never
    /// produces a process exit code, but spec.md §4.2 requires `fail` to be
    /// called with `exit_code=-1` in that case rather than `NULL`.
    pub fn exit_code_for_store(&self) -> Option<i64> {
        if self.spawn_error.is_some() {
            Some(-1)
        } else {
            self.exit_code.map(|c| c as i64)
        }
    }

    /// Human-readable failure summary for `Store::fail`'s `error` column.
    pub fn error_summary(&self) -> String {
        if self.timed_out {
            "timeout".to_string()
        } else if let Some(err) = &self.spawn_error {
            err.clone()
        } else {
            match self.exit_code {
                Some(code) => format!("exit code {code}"),
                None => "terminated by signal".to_string(),
            }
        }
    }
}

/// Runs shell commands and enforces a wall-clock timeout.
pub struct Executor;

impl Executor {
    /// Run `command` via `sh -c`, capturing stdout/stderr and enforcing
    /// `timeout`. Never propagates a command's own failure as an `Err` —
    /// only spawn failure (the shell itself couldn't start) is surfaced,
    /// as `spawn_error` inside a successfully-returned outcome.
    pub async fn execute(command: &str, timeout: Duration) -> ExecutionOutcome {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                // Give the shell its own process group so a timeout can kill
                // the whole subtree (pipelines, backgrounded children) with
                // one killpg instead of only the immediate `sh` PID.
                if libc::setpgid(0, 0) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(command, error = %e, "failed to spawn job command");
                return ExecutionOutcome {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: String::new(),
                    timed_out: false,
                    spawn_error: Some(e.to_string()),
                };
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let run = async {
            let stdout_fut = read_bounded(stdout);
            let stderr_fut = read_bounded(stderr);
            let (status, stdout, stderr) = tokio::join!(child.wait(), stdout_fut, stderr_fut);
            (status, stdout, stderr)
        };

        match tokio_timeout(timeout, run).await {
            Ok((status, stdout, stderr)) => {
                let status = match status {
                    Ok(status) => status,
                    Err(e) => {
                        return ExecutionOutcome {
                            exit_code: None,
                            stdout,
                            stderr,
                            timed_out: false,
                            spawn_error: Some(format!("failed to wait for child: {e}")),
                        };
                    }
                };
                ExecutionOutcome {
                    exit_code: status.code(),
                    stdout,
                    stderr,
                    timed_out: false,
                    spawn_error: None,
                }
            }
            Err(_) => {
                tracing::warn!(command, "job exceeded timeout, terminating process group");
                let (stdout, stderr) = kill_and_drain(&mut child).await;
                ExecutionOutcome {
                    exit_code: None,
                    stdout,
                    stderr,
                    timed_out: true,
                    spawn_error: None,
                }
            }
        }
    }
}

async fn read_bounded<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if buf.len() < MAX_CAPTURED_BYTES {
                    let remaining = MAX_CAPTURED_BYTES - buf.len();
                    buf.extend_from_slice(&chunk[..n.min(remaining)]);
                }
            }
            Err(_) => break,
        }
    }
    let mut text = String::from_utf8_lossy(&buf).into_owned();
    if buf.len() >= MAX_CAPTURED_BYTES {
        text.push_str(&format!(
            "\n... [truncated, output exceeded {MAX_CAPTURED_BYTES} bytes]\n"
        ));
    }
    text
}

#[cfg(unix)]
async fn kill_and_drain(child: &mut Child) -> (String, String) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::killpg(pid as i32, libc::SIGTERM);
        }
        tokio::time::sleep(KILL_GRACE).await;
        unsafe {
            libc::killpg(pid as i32, libc::SIGKILL);
        }
    }
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (stdout, stderr) = tokio::join!(read_bounded(stdout), read_bounded(stderr));
    let _ = child.wait().await;
    (stdout, stderr)
}

#[cfg(not(unix))]
async fn kill_and_drain(child: &mut Child) -> (String, String) {
    let _ = child.kill().await;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (stdout, stderr) = tokio::join!(read_bounded(stdout), read_bounded(stderr));
    (stdout, stderr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_command_captures_stdout() {
        let outcome = Executor::execute("echo hello", Duration::from_secs(5)).await;
        assert!(outcome.succeeded());
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(outcome.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_not_success() {
        let outcome = Executor::execute("exit 7", Duration::from_secs(5)).await;
        assert!(!outcome.succeeded());
        assert_eq!(outcome.exit_code, Some(7));
        assert_eq!(outcome.error_summary(), "exit code 7");
    }

    #[tokio::test]
    async fn spawn_error_normalizes_to_exit_code_minus_one() {
        let outcome = ExecutionOutcome {
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: false,
            spawn_error: Some("No such file or directory".to_string()),
        };
        assert_eq!(outcome.exit_code_for_store(), Some(-1));
        assert_eq!(outcome.error_summary(), "No such file or directory");
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let outcome = Executor::execute("sleep 5", Duration::from_millis(200)).await;
        assert!(outcome.timed_out);
        assert!(!outcome.succeeded());
        assert_eq!(outcome.error_summary(), "timeout");
    }

    #[tokio::test]
    async fn spawn_error_is_captured() {
        let outcome = Executor::execute("", Duration::from_secs(1)).await;
        // An empty command still spawns `sh -c ''` successfully and exits 0;
        // this asserts the happy path doesn't misreport a spawn error.
        assert!(outcome.spawn_error.is_none());
    }
}
