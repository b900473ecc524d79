//! Long-lived helper process supervision.
//!
//! A [`HelperSupervisor`] owns one long-lived helper (e.g. the notification
//! listener): it spawns the process, tails its stdout into an append-only
//! line queue, watches for exit, and relaunches on unexpected death under
//! capped exponential backoff. The subscription set is encoded in the
//! helper's command line, so relaunching with the current spec re-establishes
//! every registration; [`HelperSupervisor::update_spec`] restarts with a new
//! spec when registrations change.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStdout;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A helper run that survives at least this long resets the backoff.
const STABLE_RUN: Duration = Duration::from_secs(5);

/// Command line for a long-lived helper. The argument vector carries the
/// full subscription set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HelperSpec {
    /// Program to execute.
    pub program: String,
    /// Arguments, already split.
    pub args: Vec<String>,
}

/// Capped exponential relaunch backoff.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// First-delay base.
    pub base: Duration,
    /// Upper bound on the delay.
    pub cap: Duration,
}

impl BackoffPolicy {
    /// Delay before relaunch attempt `attempt` (0-based): `base * 2^attempt`,
    /// capped.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base.saturating_mul(factor).min(self.cap)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(250),
            cap: Duration::from_secs(10),
        }
    }
}

struct Inner {
    spec: RwLock<HelperSpec>,
    line_tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    restart: Notify,
    relaunches: AtomicU64,
    running: AtomicBool,
    backoff: BackoffPolicy,
}

/// Supervised-restart wrapper around one long-lived helper process.
pub struct HelperSupervisor {
    inner: Arc<Inner>,
    lines: Mutex<mpsc::UnboundedReceiver<String>>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl HelperSupervisor {
    /// Create a supervisor. No process is spawned until [`start`](Self::start).
    #[must_use]
    pub fn new(spec: HelperSpec, backoff: BackoffPolicy) -> Self {
        let (line_tx, line_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                spec: RwLock::new(spec),
                line_tx,
                cancel: CancellationToken::new(),
                restart: Notify::new(),
                relaunches: AtomicU64::new(0),
                running: AtomicBool::new(false),
                backoff,
            }),
            lines: Mutex::new(line_rx),
            task: Mutex::new(None),
        }
    }

    /// Spawn the helper and the watch loop. Idempotent.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(run_loop(inner)));
    }

    /// Whether the watch loop has been started.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Replace the helper command line and restart with it, re-establishing
    /// every registration the new spec encodes.
    pub fn update_spec(&self, spec: HelperSpec) {
        *self.inner.spec.write() = spec;
        self.inner.restart.notify_one();
    }

    /// Current helper command line.
    #[must_use]
    pub fn spec(&self) -> HelperSpec {
        self.inner.spec.read().clone()
    }

    /// Drain stdout lines accumulated since the last drain. Non-blocking;
    /// tailing continues independently of any in-flight transport call.
    pub fn drain_lines(&self) -> Vec<String> {
        let mut rx = self.lines.lock();
        let mut out = Vec::new();
        while let Ok(line) = rx.try_recv() {
            out.push(line);
        }
        out
    }

    /// Number of crash-triggered relaunch attempts so far.
    #[must_use]
    pub fn relaunch_count(&self) -> u64 {
        self.inner.relaunches.load(Ordering::Relaxed)
    }

    /// Whether a helper process is currently alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Relaxed)
    }

    /// Kill the helper and stop the watch loop. Best-effort; always returns.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "helper watch task panicked during shutdown");
            }
        }
    }
}

async fn run_loop(inner: Arc<Inner>) {
    let mut consecutive_failures: u32 = 0;
    loop {
        if inner.cancel.is_cancelled() {
            break;
        }
        let spec = inner.spec.read().clone();

        let mut cmd = tokio::process::Command::new(&spec.program);
        let _ = cmd
            .args(&spec.args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %spec.program, error = %e, "failed to spawn helper");
                let _ = inner.relaunches.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("synapse_helper_relaunches_total").increment(1);
                let delay = inner.backoff.delay(consecutive_failures);
                consecutive_failures = consecutive_failures.saturating_add(1);
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = inner.cancel.cancelled() => break,
                }
                continue;
            }
        };

        inner.running.store(true, Ordering::Relaxed);
        debug!(program = %spec.program, "helper spawned");
        let started = std::time::Instant::now();

        let tail = tokio::spawn(tail_lines(child.stdout.take(), inner.line_tx.clone()));

        tokio::select! {
            status = child.wait() => {
                inner.running.store(false, Ordering::Relaxed);
                // The pipe is at EOF once the child exits; awaiting the tail
                // drains any lines still buffered.
                let _ = tail.await;
                if inner.cancel.is_cancelled() {
                    break;
                }
                let code = status.ok().and_then(|s| s.code());
                warn!(program = %spec.program, ?code, "helper exited unexpectedly, relaunching");
                let _ = inner.relaunches.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("synapse_helper_relaunches_total").increment(1);
                if started.elapsed() >= STABLE_RUN {
                    consecutive_failures = 0;
                }
                let delay = inner.backoff.delay(consecutive_failures);
                consecutive_failures = consecutive_failures.saturating_add(1);
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = inner.cancel.cancelled() => break,
                }
            }
            () = inner.restart.notified() => {
                let _ = child.kill().await;
                let _ = tail.await;
                inner.running.store(false, Ordering::Relaxed);
                info!(program = %spec.program, "restarting helper with updated registrations");
                consecutive_failures = 0;
            }
            () = inner.cancel.cancelled() => {
                let _ = child.kill().await;
                let _ = tail.await;
                inner.running.store(false, Ordering::Relaxed);
                break;
            }
        }
    }
    debug!("helper watch loop stopped");
}

async fn tail_lines(stdout: Option<ChildStdout>, tx: mpsc::UnboundedSender<String>) {
    let Some(stdout) = stdout else { return };
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let _ = tx.send(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_backoff() -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(10),
            cap: Duration::from_millis(40),
        }
    }

    fn sh(script: &str) -> HelperSpec {
        HelperSpec {
            program: "/bin/sh".into(),
            args: vec!["-c".into(), script.into()],
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(100),
            cap: Duration::from_millis(500),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(policy.delay(3), Duration::from_millis(500));
        assert_eq!(policy.delay(30), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn tails_stdout_into_line_queue() {
        let supervisor = HelperSupervisor::new(sh("echo one; echo two; sleep 30"), fast_backoff());
        supervisor.start();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let lines = supervisor.drain_lines();
        assert_eq!(lines, vec!["one", "two"]);
        assert!(supervisor.is_running());
        assert_eq!(supervisor.relaunch_count(), 0);

        supervisor.shutdown().await;
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn crashed_helper_is_relaunched() {
        // Helper exits almost immediately; the supervisor must respawn it.
        let supervisor = HelperSupervisor::new(sh("echo alive; sleep 0.02"), fast_backoff());
        supervisor.start();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(supervisor.relaunch_count() >= 1, "expected at least one relaunch");
        let lines = supervisor.drain_lines();
        assert!(
            lines.iter().filter(|l| l.as_str() == "alive").count() >= 2,
            "respawned helper should announce itself again: {lines:?}"
        );

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn update_spec_restarts_with_new_registrations() {
        let supervisor = HelperSupervisor::new(sh("echo old; sleep 30"), fast_backoff());
        supervisor.start();
        tokio::time::sleep(Duration::from_millis(200)).await;

        supervisor.update_spec(sh("echo new; sleep 30"));
        tokio::time::sleep(Duration::from_millis(300)).await;

        let lines = supervisor.drain_lines();
        assert!(lines.contains(&"old".to_string()));
        assert!(lines.contains(&"new".to_string()));
        assert_eq!(supervisor.spec(), sh("echo new; sleep 30"));
        assert!(supervisor.is_running());

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn spawn_failure_backs_off_instead_of_spinning() {
        let supervisor = HelperSupervisor::new(
            HelperSpec {
                program: "/nonexistent/helper".into(),
                args: vec![],
            },
            fast_backoff(),
        );
        supervisor.start();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let attempts = supervisor.relaunch_count();
        assert!(attempts >= 2, "should keep retrying");
        // With a 10ms..40ms capped backoff, 300ms cannot hold hundreds of
        // attempts — the backoff is actually sleeping.
        assert!(attempts < 40, "relaunch loop must not spin: {attempts} attempts");
        assert!(!supervisor.is_running());

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_kills_child() {
        let supervisor = HelperSupervisor::new(sh("sleep 30"), fast_backoff());
        supervisor.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(supervisor.is_running());

        supervisor.shutdown().await;
        assert!(!supervisor.is_running());
        // Second shutdown is a no-op.
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let supervisor = HelperSupervisor::new(sh("echo once; sleep 30"), fast_backoff());
        supervisor.start();
        supervisor.start();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(supervisor.drain_lines(), vec!["once"]);
        supervisor.shutdown().await;
    }
}
