//! Query parameters for [`crate::ContextStore::query_contexts`].

use serde::{Deserialize, Serialize};
use synapse_core::ContextRecord;

/// Sort key for context queries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    /// Observation time (lexicographic on RFC 3339 strings).
    #[default]
    Timestamp,
    /// Confidence score.
    Confidence,
    /// Priority value.
    Priority,
}

/// Sort direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Smallest first.
    Ascending,
    /// Largest first.
    #[default]
    Descending,
}

/// Query parameters: confidence floor, sort, limit.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextQuery {
    /// Only records with `confidence >= min_confidence` match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f64>,
    /// Sort key.
    pub sort_by: SortBy,
    /// Sort direction.
    pub sort_order: SortOrder,
    /// Maximum number of records returned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl ContextQuery {
    /// Apply this query to a snapshot of records.
    #[must_use]
    pub fn apply(&self, mut records: Vec<ContextRecord>) -> Vec<ContextRecord> {
        if let Some(floor) = self.min_confidence {
            records.retain(|record| record.confidence >= floor);
        }
        records.sort_by(|a, b| {
            let ordering = match self.sort_by {
                SortBy::Timestamp => a.timestamp.cmp(&b.timestamp),
                SortBy::Confidence => a
                    .confidence
                    .partial_cmp(&b.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal),
                SortBy::Priority => a.priority.cmp(&b.priority),
            };
            match self.sort_order {
                SortOrder::Ascending => ordering,
                SortOrder::Descending => ordering.reverse(),
            }
        });
        if let Some(limit) = self.limit {
            records.truncate(limit);
        }
        records
    }
}
