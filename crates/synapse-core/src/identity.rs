//! Application identity and deterministic id derivation.
//!
//! Every record this agent publishes is stamped with [`APP_ID`] /
//! [`APP_NAME`] so peers (and our own pull path) can recognize it.
//! Records received from other applications get local ids derived here:
//! stable when the peer supplies a correlation id, best-effort otherwise.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

/// Bundle identifier this agent publishes under.
pub const APP_ID: &str = "com.synapse.agent";

/// Human-readable application name stamped into outbound provenance.
pub const APP_NAME: &str = "Synapse";

/// Prefix for ids of externally received records.
pub const EXTERNAL_ID_PREFIX: &str = "ext-";

/// Prefix for locally minted record ids.
pub const LOCAL_ID_PREFIX: &str = "ctx-";

/// Mint a new local record id (`ctx-` + UUIDv7, time-ordered).
#[must_use]
pub fn mint_local_id() -> String {
    format!("{LOCAL_ID_PREFIX}{}", uuid::Uuid::now_v7())
}

/// Derive the local id for an externally received record.
///
/// If the peer supplied its own correlation id, the local id is the fixed
/// prefix plus that id — stable across re-deliveries, so upserts key
/// correctly. Otherwise the id is derived from the tuple
/// (source app id, kind, timestamp). The fallback is best-effort:
/// duplicate detection is not guaranteed when a peer omits correlation ids
/// and two events share a timestamp.
#[must_use]
pub fn derive_external_id(
    correlation_id: Option<&str>,
    source_app_id: &str,
    kind: &str,
    timestamp: &str,
) -> String {
    match correlation_id {
        Some(cid) if !cid.is_empty() => format!("{EXTERNAL_ID_PREFIX}{cid}"),
        _ => {
            let mut hasher = Sha256::new();
            hasher.update(source_app_id.as_bytes());
            hasher.update(b"|");
            hasher.update(kind.as_bytes());
            hasher.update(b"|");
            hasher.update(timestamp.as_bytes());
            let digest = hasher.finalize();
            format!(
                "{EXTERNAL_ID_PREFIX}{}",
                URL_SAFE_NO_PAD.encode(&digest[..12])
            )
        }
    }
}

/// Whether an id was derived from an external event.
#[must_use]
pub fn is_external_id(id: &str) -> bool {
    id.starts_with(EXTERNAL_ID_PREFIX)
}
