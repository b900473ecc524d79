//! Per-adapter transport serialization.
//!
//! Transports are often backed by spawning an external process; concurrent
//! spawns against the same external resource are a correctness hazard on at
//! least one platform. All entry points that touch a transport therefore
//! acquire this gate first: at most one outstanding transport call at a
//! time, with a bounded acquisition wait that fails the caller rather than
//! deadlocking.

use std::time::Duration;

use synapse_core::{Result, SyncError};
use tokio::sync::{Mutex, MutexGuard};

/// Async mutual-exclusion region with a bounded acquisition wait.
pub struct TransportGate {
    lock: Mutex<()>,
    timeout: Duration,
}

impl TransportGate {
    /// Gate with the given acquisition timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            lock: Mutex::new(()),
            timeout,
        }
    }

    /// Acquire the gate, failing with [`SyncError::LockTimeout`] when the
    /// wait exceeds the configured bound. The guard is never force-released:
    /// an in-flight transport call always finishes.
    pub async fn acquire(&self) -> Result<MutexGuard<'_, ()>> {
        tokio::time::timeout(self.timeout, self.lock.lock())
            .await
            .map_err(|_| SyncError::LockTimeout(self.timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn serializes_callers() {
        let gate = Arc::new(TransportGate::new(Duration::from_secs(1)));
        let guard = gate.acquire().await.unwrap();

        let contender = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.acquire().await.map(|_g| ()) })
        };
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn acquisition_times_out_instead_of_deadlocking() {
        let gate = TransportGate::new(Duration::from_secs(30));
        let _guard = gate.acquire().await.unwrap();

        let err = gate.acquire().await.unwrap_err();
        assert_matches::assert_matches!(err, SyncError::LockTimeout(d) if d == Duration::from_secs(30));
    }
}
