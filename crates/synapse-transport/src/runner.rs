//! Short-lived helper process execution.
//!
//! Transport calls that go through an external helper (posting a
//! notification, invoking the automation host) run one process per call.
//! The [`CommandRunner`] seam keeps the adapters testable without spawning
//! anything.

use std::time::Instant;

use async_trait::async_trait;
use synapse_core::{Result, SyncError};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// One helper invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to execute.
    pub program: String,
    /// Arguments, already split.
    pub args: Vec<String>,
    /// Wall-clock budget in milliseconds.
    pub timeout_ms: u64,
}

impl CommandSpec {
    /// Spec with the default 10s helper budget.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout_ms: 10_000,
        }
    }
}

/// Captured output of a helper invocation.
#[derive(Clone, Debug, Default)]
pub struct CommandOutput {
    /// Captured stdout, lossily decoded.
    pub stdout: String,
    /// Captured stderr, lossily decoded.
    pub stderr: String,
    /// Process exit code (-1 when killed).
    pub exit_code: i32,
    /// Whether the timeout fired.
    pub timed_out: bool,
}

impl CommandOutput {
    /// Whether the helper exited zero within budget.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Seam for spawning short-lived helpers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run one helper to completion (or timeout) and capture its output.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Real subprocess execution backed by `tokio::process::Command`.
pub struct TokioCommandRunner;

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let start = Instant::now();

        let mut cmd = tokio::process::Command::new(&spec.program);
        let _ = cmd
            .args(&spec.args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        debug!(program = %spec.program, "spawning helper");

        let mut child = cmd
            .spawn()
            .map_err(|e| SyncError::Helper(format!("failed to spawn {}: {e}", spec.program)))?;

        // Take ownership of pipes before the select so we can kill the child
        // on timeout without wait_with_output() consuming it.
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let stdout_handle = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut pipe) = stdout_pipe {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });
        let stderr_handle = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut pipe) = stderr_pipe {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        let timeout = std::time::Duration::from_millis(spec.timeout_ms);
        tokio::select! {
            status = child.wait() => {
                let status = status
                    .map_err(|e| SyncError::Helper(format!("helper wait failed: {e}")))?;
                let stdout_bytes = stdout_handle.await.unwrap_or_default();
                let stderr_bytes = stderr_handle.await.unwrap_or_default();
                let exit_code = status.code().unwrap_or(-1);
                debug!(program = %spec.program, exit_code,
                    duration_ms = start.elapsed().as_millis() as u64, "helper completed");
                Ok(CommandOutput {
                    stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
                    exit_code,
                    timed_out: false,
                })
            }
            () = tokio::time::sleep(timeout) => {
                let _ = child.kill().await;
                stdout_handle.abort();
                stderr_handle.abort();
                warn!(program = %spec.program, timeout_ms = spec.timeout_ms, "helper timed out");
                Ok(CommandOutput {
                    stdout: String::new(),
                    stderr: "helper timed out".into(),
                    exit_code: -1,
                    timed_out: true,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_captures_stdout_and_exit_code() {
        let runner = TokioCommandRunner;
        let out = runner
            .run(&CommandSpec::new(
                "/bin/sh",
                vec!["-c".into(), "echo hello".into()],
            ))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 0);
        assert_eq!(out.stdout.trim(), "hello");
        assert!(out.success());
    }

    #[tokio::test]
    async fn run_captures_stderr_and_nonzero_exit() {
        let runner = TokioCommandRunner;
        let out = runner
            .run(&CommandSpec::new(
                "/bin/sh",
                vec!["-c".into(), "echo err >&2; exit 3".into()],
            ))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stderr.trim(), "err");
        assert!(!out.success());
    }

    #[tokio::test]
    async fn run_times_out_and_kills() {
        let runner = TokioCommandRunner;
        let mut spec = CommandSpec::new("/bin/sh", vec!["-c".into(), "sleep 30".into()]);
        spec.timeout_ms = 50;

        let start = Instant::now();
        let out = runner.run(&spec).await.unwrap();
        assert!(out.timed_out);
        assert!(!out.success());
        assert!(
            start.elapsed().as_millis() < 2_000,
            "timeout should not wait for sleep 30"
        );
    }

    #[tokio::test]
    async fn run_missing_program_is_helper_error() {
        let runner = TokioCommandRunner;
        let err = runner
            .run(&CommandSpec::new("/nonexistent/helper", vec![]))
            .await;
        assert!(matches!(err, Err(SyncError::Helper(_))));
    }
}
