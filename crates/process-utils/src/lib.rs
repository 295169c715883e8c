//! Bounded execution of external tools.
//!
//! Commands are always built from an argument vector (never a shell string),
//! are killed when their handle is dropped, and can be cancelled through a
//! [`CancellationToken`].

use std::collections::VecDeque;
use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Number of stderr lines kept for diagnostics.
pub const STDERR_TAIL_LINES: usize = 20;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` ready for [`run_to_exit`].
///
/// stdin is closed, stdout/stderr are piped and the child is killed if the
/// owning future is dropped.
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Errors from running an external process.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} was cancelled")]
    Cancelled { program: String },

    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Captured result of a finished process.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    /// Last [`STDERR_TAIL_LINES`] lines of stderr.
    pub stderr_tail: Vec<String>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Exit code, `None` when terminated by a signal.
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }

    /// The stderr tail joined for log and error messages.
    pub fn stderr_summary(&self) -> String {
        self.stderr_tail.join(" | ")
    }
}

/// Spawn `cmd` and wait for it to exit, collecting stdout and a stderr tail.
///
/// If `cancel` fires first the child is killed and [`ProcessError::Cancelled`]
/// is returned.
pub async fn run_to_exit(
    mut cmd: tokio::process::Command,
    cancel: &CancellationToken,
) -> Result<ProcessOutput, ProcessError> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();

    let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;
    debug!(program = %program, pid = ?child.id(), "Spawned process");

    let mut stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_task = async {
        let mut buf = String::new();
        if let Some(out) = stdout.as_mut() {
            let _ = out.read_to_string(&mut buf).await;
        }
        buf
    };

    let stderr_task = async {
        let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
        if let Some(err) = stderr {
            let mut lines = BufReader::new(err).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                trace!(program = %program, "{}", line);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        }
        tail
    };

    let collected = async {
        let (stdout, stderr_tail) = tokio::join!(stdout_task, stderr_task);
        let status = child.wait().await;
        (stdout, stderr_tail, status)
    };

    tokio::select! {
        _ = cancel.cancelled() => {
            // `collected` borrows the child; it is dropped when select returns,
            // and kill_on_drop takes care of the process.
            debug!(program = %program, "Process cancelled");
            Err(ProcessError::Cancelled { program: program.clone() })
        }
        (stdout, stderr_tail, status) = collected => {
            let status = status.map_err(|source| ProcessError::Wait {
                program: program.clone(),
                source,
            })?;
            Ok(ProcessOutput {
                status,
                stdout,
                stderr_tail: stderr_tail.into_iter().collect(),
            })
        }
    }
}

/// Check whether `program` can be started, returning the first line of its
/// `--version` output.
pub async fn probe_version(program: impl AsRef<OsStr>) -> Option<String> {
    let mut cmd = tokio_command(program);
    cmd.arg("--version");
    let output = run_to_exit(cmd, &CancellationToken::new()).await.ok()?;
    if !output.success() {
        return None;
    }
    output.stdout.lines().next().map(|l| l.trim().to_string())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_to_exit_collects_stdout() {
        let mut cmd = tokio_command("sh");
        cmd.args(["-c", "echo hello; echo oops >&2"]);
        let output = run_to_exit(cmd, &CancellationToken::new()).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr_tail, vec!["oops".to_string()]);
    }

    #[tokio::test]
    async fn test_run_to_exit_reports_failure_code() {
        let mut cmd = tokio_command("sh");
        cmd.args(["-c", "exit 3"]);
        let output = run_to_exit(cmd, &CancellationToken::new()).await.unwrap();
        assert!(!output.success());
        assert_eq!(output.code(), Some(3));
    }

    #[tokio::test]
    async fn test_run_to_exit_cancellation_kills_child() {
        let mut cmd = tokio_command("sleep");
        cmd.arg("30");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = run_to_exit(cmd, &cancel).await;
        assert!(matches!(result, Err(ProcessError::Cancelled { .. })));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_spawn_missing_binary() {
        let cmd = tokio_command("definitely-not-a-real-binary-4821");
        let result = run_to_exit(cmd, &CancellationToken::new()).await;
        assert!(matches!(result, Err(ProcessError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_stderr_tail_is_bounded() {
        let mut cmd = tokio_command("sh");
        cmd.args(["-c", "i=0; while [ $i -lt 50 ]; do echo line$i >&2; i=$((i+1)); done"]);
        let output = run_to_exit(cmd, &CancellationToken::new()).await.unwrap();
        assert_eq!(output.stderr_tail.len(), STDERR_TAIL_LINES);
        assert_eq!(output.stderr_tail.last().map(String::as_str), Some("line49"));
    }
}
