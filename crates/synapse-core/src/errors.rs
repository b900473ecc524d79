//! Error hierarchy for context synchronization.
//!
//! Three failure classes map onto these variants:
//!
//! - [`SyncError::Unavailable`]: the preferred native transport is missing.
//!   Detected once at startup; never fatal — the coordinator degrades.
//! - [`SyncError::Transport`]: a single transport call failed. Logged and
//!   counted; the next reconciliation tick proceeds independently.
//! - [`SyncError::Init`]: initialization failed in a way the host must see
//!   (e.g. the local store dependency is missing). The only fatal class.

use std::time::Duration;

/// Convenience alias used across the synapse crates.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors produced by context synchronization.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The preferred native transport is not present on this host.
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// A single transport call failed.
    #[error("transport call `{operation}` failed: {message}")]
    Transport {
        /// Operation name (`emit`, `pull`, `subscribe`, ...).
        operation: String,
        /// Underlying failure description.
        message: String,
    },

    /// Timed out waiting for the per-adapter transport lock.
    #[error("timed out acquiring transport lock after {0:?}")]
    LockTimeout(Duration),

    /// The local context store rejected an operation.
    #[error("context store error: {0}")]
    Store(String),

    /// A helper process could not be spawned or supervised.
    #[error("helper process error: {0}")]
    Helper(String),

    /// Initialization failed; surfaced to the host.
    #[error("initialization failed: {0}")]
    Init(String),

    /// An operation was invoked in a lifecycle state that forbids it.
    #[error("invalid lifecycle state: expected {expected}, was {actual}")]
    InvalidState {
        /// State the operation requires.
        expected: &'static str,
        /// State the coordinator was actually in.
        actual: &'static str,
    },

    /// Payload (de)serialization failed.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Filesystem or pipe I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Build a [`SyncError::Transport`] from an operation name and any error.
    pub fn transport(operation: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: err.to_string(),
        }
    }

    /// Whether this error should surface to the host (only init-phase errors do).
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Init(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_helper_formats_operation() {
        let err = SyncError::transport("emit", "pipe closed");
        assert_eq!(
            err.to_string(),
            "transport call `emit` failed: pipe closed"
        );
    }

    #[test]
    fn only_init_is_fatal() {
        assert!(SyncError::Init("store missing".into()).is_fatal());
        assert!(!SyncError::Unavailable("no bus".into()).is_fatal());
        assert!(!SyncError::transport("pull", "x").is_fatal());
        assert!(!SyncError::LockTimeout(Duration::from_secs(30)).is_fatal());
    }

    #[test]
    fn serde_error_converts() {
        let parse = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: SyncError = parse.into();
        assert!(matches!(err, SyncError::Serde(_)));
    }

    #[test]
    fn lock_timeout_message_includes_duration() {
        let err = SyncError::LockTimeout(Duration::from_secs(30));
        assert!(err.to_string().contains("30s"));
    }
}
