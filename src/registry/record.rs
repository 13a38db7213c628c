//! Revision records and the closed usage-status enum.

use crate::rid::Rid;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Qualitative usage status derived from request count and last-access
/// age. A closed enum — unknown strings from a restored snapshot are
/// rejected at deserialization time rather than silently accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Hot,
    Warm,
    Cold,
}

/// One registered revision on a handler's timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionRecord {
    pub rid: Rid,
    pub path: String,
    pub content_hash: String,
    pub status: Status,
    pub request_count: u64,
    pub last_accessed_ms: i64,
    pub tags: HashSet<String>,
    pub schema_version: Option<String>,
    pub created_at_ms: i64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl RevisionRecord {
    pub fn new(path: impl Into<String>, rid: Rid, content_hash: impl Into<String>, now_ms: i64) -> Self {
        Self {
            rid,
            path: path.into(),
            content_hash: content_hash.into(),
            status: Status::Hot,
            request_count: 0,
            last_accessed_ms: now_ms,
            tags: HashSet::new(),
            schema_version: None,
            created_at_ms: now_ms,
            metadata: serde_json::Value::Null,
        }
    }
}

/// A tag label bound to exactly one revision, with provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagBinding {
    pub label: String,
    pub rid: Rid,
    pub created_at_ms: i64,
    pub created_by: Option<String>,
}
