//! The context record — the canonical exchanged unit.
//!
//! A [`ContextRecord`] is a structured fact (user intent, application state,
//! a detected event) shared between this agent and other applications on the
//! machine. Records are created by the local store or by conversion from an
//! external event, mutated only through [`ContextPatch`] merge updates, and
//! never change id once assigned.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity;

/// Provenance metadata carried alongside a record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Provenance {
    /// Bundle/application id of the producer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_app_id: Option<String>,
    /// Human-readable producer name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_app_name: Option<String>,
    /// Correlation id assigned by the external source, when it supplied one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

impl Provenance {
    /// Provenance for records this agent authors.
    #[must_use]
    pub fn local() -> Self {
        Self {
            source_app_id: Some(identity::APP_ID.to_string()),
            source_app_name: Some(identity::APP_NAME.to_string()),
            external_id: None,
        }
    }
}

/// The canonical shareable fact exchanged with the rest of the OS.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextRecord {
    /// Unique within this machine's exchange namespace. Immutable.
    pub id: String,
    /// Origin tag. Adapters stamp inbound conversions with their own tag so
    /// the record is recognized as externally sourced on the next outbound
    /// pass and never echoed back.
    pub source: String,
    /// Free-form classification string.
    pub kind: String,
    /// Opaque payload; schema owned by the producer.
    #[serde(default)]
    pub data: serde_json::Map<String, Value>,
    /// RFC 3339 creation/observation time.
    pub timestamp: String,
    /// Optional RFC 3339 expiry. Advisory to consumers, not enforced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    /// Reserved for future ordering.
    #[serde(default)]
    pub priority: i32,
    /// Confidence in [0, 1]. Only records at/above the push threshold are
    /// outbound-eligible. Advisory to consumers.
    pub confidence: f64,
    /// Filtering tags.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    /// Provenance metadata.
    #[serde(default)]
    pub metadata: Provenance,
}

impl ContextRecord {
    /// Create a locally authored record with a freshly minted id.
    #[must_use]
    pub fn new(source: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: identity::mint_local_id(),
            source: source.into(),
            kind: kind.into(),
            data: serde_json::Map::new(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            expires_at: None,
            priority: 0,
            confidence: 1.0,
            tags: BTreeSet::new(),
            metadata: Provenance::local(),
        }
    }

    /// Apply a merge patch: present fields overwrite, absent fields persist,
    /// `data` keys merge at the top level. The id never changes.
    pub fn apply(&mut self, patch: &ContextPatch) {
        if let Some(ref source) = patch.source {
            self.source.clone_from(source);
        }
        if let Some(ref kind) = patch.kind {
            self.kind.clone_from(kind);
        }
        if let Some(ref data) = patch.data {
            for (key, value) in data {
                let _ = self.data.insert(key.clone(), value.clone());
            }
        }
        if let Some(ref timestamp) = patch.timestamp {
            self.timestamp.clone_from(timestamp);
        }
        if let Some(ref expires_at) = patch.expires_at {
            self.expires_at = Some(expires_at.clone());
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(confidence) = patch.confidence {
            self.confidence = confidence;
        }
        if let Some(ref tags) = patch.tags {
            self.tags.clone_from(tags);
        }
        if let Some(ref metadata) = patch.metadata {
            if metadata.source_app_id.is_some() {
                self.metadata.source_app_id.clone_from(&metadata.source_app_id);
            }
            if metadata.source_app_name.is_some() {
                self.metadata.source_app_name.clone_from(&metadata.source_app_name);
            }
            if metadata.external_id.is_some() {
                self.metadata.external_id.clone_from(&metadata.external_id);
            }
        }
    }

    /// Turn this record into a patch that would reproduce it when applied to
    /// an older copy under the same id. Used by the reconciliation upsert.
    #[must_use]
    pub fn as_patch(&self) -> ContextPatch {
        ContextPatch {
            source: Some(self.source.clone()),
            kind: Some(self.kind.clone()),
            data: Some(self.data.clone()),
            timestamp: Some(self.timestamp.clone()),
            expires_at: self.expires_at.clone(),
            priority: Some(self.priority),
            confidence: Some(self.confidence),
            tags: Some(self.tags.clone()),
            metadata: Some(self.metadata.clone()),
        }
    }
}

/// Partial update with merge semantics (see [`ContextRecord::apply`]).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextPatch {
    /// New origin tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// New classification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Payload keys to merge over the existing payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Map<String, Value>>,
    /// New observation time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// New expiry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    /// New priority.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    /// New confidence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Replacement tag set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeSet<String>>,
    /// Provenance fields to overwrite (present subfields only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Provenance>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> ContextRecord {
        let mut record = ContextRecord::new("user_intent", "focus");
        let _ = record.data.insert("app".into(), json!("editor"));
        let _ = record.data.insert("file".into(), json!("main.rs"));
        record.confidence = 0.9;
        record
    }

    #[test]
    fn new_record_stamps_local_identity() {
        let record = ContextRecord::new("user_intent", "focus");
        assert!(record.id.starts_with("ctx-"));
        assert_eq!(record.source, "user_intent");
        assert_eq!(record.kind, "focus");
        assert_eq!(
            record.metadata.source_app_id.as_deref(),
            Some(crate::identity::APP_ID)
        );
        assert!(!record.timestamp.is_empty());
    }

    #[test]
    fn apply_overwrites_present_fields_only() {
        let mut record = sample();
        let original_kind = record.kind.clone();
        record.apply(&ContextPatch {
            confidence: Some(0.4),
            priority: Some(3),
            ..Default::default()
        });
        assert!((record.confidence - 0.4).abs() < f64::EPSILON);
        assert_eq!(record.priority, 3);
        // Absent fields persist.
        assert_eq!(record.kind, original_kind);
        assert_eq!(record.data.len(), 2);
    }

    #[test]
    fn apply_merges_data_keys() {
        let mut record = sample();
        let mut data = serde_json::Map::new();
        let _ = data.insert("file".into(), json!("lib.rs"));
        let _ = data.insert("line".into(), json!(42));
        record.apply(&ContextPatch {
            data: Some(data),
            ..Default::default()
        });
        // Overwritten, merged, persisted.
        assert_eq!(record.data["file"], json!("lib.rs"));
        assert_eq!(record.data["line"], json!(42));
        assert_eq!(record.data["app"], json!("editor"));
    }

    #[test]
    fn apply_never_changes_id() {
        let mut record = sample();
        let id = record.id.clone();
        record.apply(&record.clone().as_patch());
        assert_eq!(record.id, id);
    }

    #[test]
    fn apply_merges_provenance_subfields() {
        let mut record = sample();
        record.apply(&ContextPatch {
            metadata: Some(Provenance {
                external_id: Some("evt-9".into()),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(record.metadata.external_id.as_deref(), Some("evt-9"));
        // Untouched subfields persist.
        assert_eq!(
            record.metadata.source_app_id.as_deref(),
            Some(crate::identity::APP_ID)
        );
    }

    #[test]
    fn as_patch_roundtrip_reproduces_record() {
        let newer = sample();
        let mut older = ContextRecord::new("synapse.bus", "focus");
        older.id.clone_from(&newer.id);
        older.apply(&newer.as_patch());
        assert_eq!(older, newer);
    }

    #[test]
    fn serde_uses_camel_case() {
        let mut record = sample();
        record.expires_at = Some("2026-08-07T00:00:00Z".into());
        record.metadata.external_id = Some("evt-1".into());
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("expiresAt").is_some());
        assert!(json["metadata"].get("externalId").is_some());
        assert!(json["metadata"].get("sourceAppId").is_some());
        assert!(json.get("expires_at").is_none());
    }

    #[test]
    fn serde_roundtrip() {
        let record = sample();
        let json = serde_json::to_string(&record).unwrap();
        let back: ContextRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }

    #[test]
    fn minimal_json_deserializes_with_defaults() {
        let json = json!({
            "id": "ctx-1",
            "source": "user_intent",
            "kind": "focus",
            "timestamp": "2026-08-07T00:00:00Z",
            "confidence": 0.5
        });
        let record: ContextRecord = serde_json::from_value(json).unwrap();
        assert!(record.data.is_empty());
        assert!(record.tags.is_empty());
        assert_eq!(record.priority, 0);
        assert!(record.expires_at.is_none());
        assert_eq!(record.metadata, Provenance::default());
    }

    #[test]
    fn empty_tags_omitted_from_json() {
        let record = sample();
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("tags").is_none());
    }
}
