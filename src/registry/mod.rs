//! Version Registry: per-path timelines of revisions, tags, and the
//! active/cold classification used by the lifecycle manager.

pub mod record;
pub mod timeline;

pub use record::{RevisionRecord, Status, TagBinding};
pub use timeline::Timeline;

use crate::error::{Result, TimescapeError};
use crate::rid::{is_valid_tag_label, Rid};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Mutex, RwLock};

/// Thresholds driving the hot/warm/cold classification rule.
///
/// No fixed default is named in the functional spec beyond the lifecycle
/// manager's cold threshold; the request-weighted recency thresholds here
/// are this crate's own choice, recorded in DESIGN.md.
#[derive(Debug, Clone, Copy)]
pub struct ClassificationConfig {
    pub hot_threshold: f64,
    pub warm_threshold: f64,
    pub cold_threshold_ms: i64,
    pub window_ms: i64,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            hot_threshold: 50.0,
            warm_threshold: 5.0,
            cold_threshold_ms: 7 * 24 * 3_600_000,
            window_ms: 24 * 3_600_000,
        }
    }
}

impl ClassificationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.hot_threshold < self.warm_threshold {
            return Err(TimescapeError::InvalidFormat(
                "hot_threshold must be >= warm_threshold".to_string(),
            ));
        }
        if self.cold_threshold_ms < 0 || self.window_ms < 0 {
            return Err(TimescapeError::InvalidFormat(
                "cold_threshold_ms and window_ms must be non-negative".to_string(),
            ));
        }
        Ok(())
    }

    fn classify(&self, now_ms: i64, request_count: u64, last_accessed_ms: i64) -> Status {
        let delta = (now_ms - last_accessed_ms).max(0);
        if delta >= self.cold_threshold_ms {
            return Status::Cold;
        }
        let recency = if self.window_ms <= 0 {
            0.0
        } else {
            (1.0 - (delta as f64 / self.window_ms as f64)).clamp(0.0, 1.0)
        };
        let weighted = request_count as f64 * recency;
        if weighted >= self.hot_threshold {
            Status::Hot
        } else if weighted >= self.warm_threshold {
            Status::Warm
        } else {
            Status::Cold
        }
    }
}

/// Aggregate counters returned by `usage_stats`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UsageStats {
    pub total_revisions: usize,
    pub hot: usize,
    pub warm: usize,
    pub cold: usize,
    pub total_requests: u64,
}

/// On-disk shape produced by `serialize` / consumed by `deserialize`,
/// matching the registry section of a snapshot document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryDocument {
    pub handlers: HashMap<String, Vec<RevisionRecord>>,
    pub tags: HashMap<String, TagBinding>,
    #[serde(rename = "activeVersions")]
    pub active_versions: Vec<Rid>,
    #[serde(rename = "coldVersions")]
    pub cold_versions: Vec<Rid>,
}

#[derive(Default)]
struct State {
    timelines: HashMap<String, Timeline>,
    records: HashMap<String, RevisionRecord>,
    tags: HashMap<String, TagBinding>,
}

/// Timeline-based store of revisions, keyed by handler path.
///
/// Backed by a single `RwLock` (a single coarse lock rather than
/// per-entry locking — contention is not expected to be a bottleneck at
/// this layer). A small `get_at` memoization cache lives behind its own
/// `Mutex` and is invalidated by bumping `generation` whenever the
/// registry mutates, which the resolver also reads to invalidate its own
/// cache.
pub struct VersionRegistry {
    state: RwLock<State>,
    get_at_cache: Mutex<HashMap<(String, u64), Option<Rid>>>,
    generation: AtomicU64,
    classification: ClassificationConfig,
}

impl VersionRegistry {
    pub fn new() -> Self {
        Self::with_classification(ClassificationConfig::default())
    }

    pub fn with_classification(classification: ClassificationConfig) -> Self {
        Self {
            state: RwLock::new(State::default()),
            get_at_cache: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            classification,
        }
    }

    /// Monotonically increasing counter bumped on every mutation; callers
    /// (the resolver) use this to know their own caches are stale.
    pub fn generation(&self) -> u64 {
        self.generation.load(AtomicOrdering::Acquire)
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, AtomicOrdering::AcqRel);
        self.get_at_cache.lock().expect("get_at cache poisoned").clear();
    }

    /// Register a new revision on `path`'s timeline.
    pub fn register(
        &self,
        path: impl Into<String>,
        rid: Rid,
        content_hash: impl Into<String>,
        schema_version: Option<String>,
        now_ms: i64,
    ) -> Result<()> {
        let path = path.into();
        let mut state = self.state.write().expect("registry lock poisoned");

        let mut record = RevisionRecord::new(path.clone(), rid.clone(), content_hash, now_ms);
        record.schema_version = schema_version;

        state.timelines.entry(path).or_default().insert(rid.clone());
        state.records.insert(rid.as_str().to_string(), record);
        drop(state);
        self.bump_generation();
        log::info!("revision registered: {}", rid);
        Ok(())
    }

    /// Resolve the revision active at `seconds` on `path`'s timeline.
    pub fn get_at(&self, path: &str, seconds: u64) -> Option<Rid> {
        let key = (path.to_string(), seconds);
        if let Some(hit) = self.get_at_cache.lock().expect("get_at cache poisoned").get(&key) {
            return hit.clone();
        }
        let state = self.state.read().expect("registry lock poisoned");
        let result = state.timelines.get(path).and_then(|tl| tl.get_at(seconds)).cloned();
        drop(state);
        self.get_at_cache
            .lock()
            .expect("get_at cache poisoned")
            .insert(key, result.clone());
        result
    }

    pub fn get_latest(&self, path: &str) -> Option<Rid> {
        let state = self.state.read().expect("registry lock poisoned");
        state.timelines.get(path).and_then(|tl| tl.latest()).cloned()
    }

    /// All revisions registered on `path`'s timeline, in chronological
    /// order — the version set the transformer engine chains over.
    pub fn versions_for_path(&self, path: &str) -> Vec<Rid> {
        let state = self.state.read().expect("registry lock poisoned");
        state.timelines.get(path).map(|tl| tl.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn get_by_tag(&self, label: &str) -> Result<Rid> {
        let state = self.state.read().expect("registry lock poisoned");
        state
            .tags
            .get(label)
            .map(|binding| binding.rid.clone())
            .ok_or_else(|| TimescapeError::TagNotFound(label.to_string()))
    }

    pub fn get_record(&self, rid: &Rid) -> Option<RevisionRecord> {
        let state = self.state.read().expect("registry lock poisoned");
        state.records.get(rid.as_str()).cloned()
    }

    /// Bind `label` to `rid`, rebinding (and removing the label from the
    /// previous revision's tag set) if `label` already exists.
    pub fn tag(&self, rid: &Rid, label: &str, created_by: Option<String>, now_ms: i64) -> Result<()> {
        if !is_valid_tag_label(label) {
            return Err(TimescapeError::InvalidFormat(format!("invalid tag label: {label}")));
        }
        let mut state = self.state.write().expect("registry lock poisoned");
        if !state.records.contains_key(rid.as_str()) {
            return Err(TimescapeError::VersionNotFound(rid.as_str().to_string()));
        }

        if let Some(previous) = state.tags.get(label).cloned() {
            if let Some(record) = state.records.get_mut(previous.rid.as_str()) {
                record.tags.remove(label);
            }
        }

        state.tags.insert(
            label.to_string(),
            TagBinding { label: label.to_string(), rid: rid.clone(), created_at_ms: now_ms, created_by },
        );
        if let Some(record) = state.records.get_mut(rid.as_str()) {
            record.tags.insert(label.to_string());
        }
        drop(state);
        self.bump_generation();
        log::info!("tag '{}' rebound to {}", label, rid);
        Ok(())
    }

    pub fn untag(&self, label: &str) -> Result<()> {
        let mut state = self.state.write().expect("registry lock poisoned");
        let binding = state
            .tags
            .remove(label)
            .ok_or_else(|| TimescapeError::TagNotFound(label.to_string()))?;
        if let Some(record) = state.records.get_mut(binding.rid.as_str()) {
            record.tags.remove(label);
        }
        drop(state);
        self.bump_generation();
        Ok(())
    }

    /// Record a request hit against `rid`, updating its last-access time
    /// and request count, then reclassifying it.
    pub fn record_request(&self, rid: &Rid, now_ms: i64) -> Result<()> {
        let mut state = self.state.write().expect("registry lock poisoned");
        let record = state
            .records
            .get_mut(rid.as_str())
            .ok_or_else(|| TimescapeError::VersionNotFound(rid.as_str().to_string()))?;
        record.request_count = record.request_count.saturating_add(1);
        record.last_accessed_ms = now_ms;
        record.status = self.classification.classify(now_ms, record.request_count, record.last_accessed_ms);
        Ok(())
    }

    /// Force `rid` cold regardless of its usage counters (used by the
    /// lifecycle manager's demotion pass).
    pub fn mark_cold(&self, rid: &Rid) -> Result<()> {
        let mut state = self.state.write().expect("registry lock poisoned");
        let record = state
            .records
            .get_mut(rid.as_str())
            .ok_or_else(|| TimescapeError::VersionNotFound(rid.as_str().to_string()))?;
        record.status = Status::Cold;
        Ok(())
    }

    pub fn update_status(&self, rid: &Rid, status: Status) -> Result<()> {
        let mut state = self.state.write().expect("registry lock poisoned");
        let record = state
            .records
            .get_mut(rid.as_str())
            .ok_or_else(|| TimescapeError::VersionNotFound(rid.as_str().to_string()))?;
        record.status = status;
        Ok(())
    }

    /// Re-run the classification rule over every record (used by the
    /// lifecycle manager's periodic sweep).
    pub fn reclassify_all(&self, now_ms: i64) -> Vec<Rid> {
        let mut state = self.state.write().expect("registry lock poisoned");
        let mut changed = Vec::new();
        for record in state.records.values_mut() {
            let next = self.classification.classify(now_ms, record.request_count, record.last_accessed_ms);
            if next != record.status {
                record.status = next;
                changed.push(record.rid.clone());
            }
        }
        changed
    }

    /// Revisions whose tag set contains a protected label are never
    /// eligible for demotion; this returns the candidates that are.
    pub fn demotion_candidates(&self, now_ms: i64, protected_tags: &HashSet<String>) -> Vec<Rid> {
        let state = self.state.read().expect("registry lock poisoned");
        state
            .records
            .values()
            .filter(|r| r.status != Status::Cold)
            .filter(|r| r.tags.is_disjoint(protected_tags))
            .filter(|r| {
                self.classification.classify(now_ms, r.request_count, r.last_accessed_ms) == Status::Cold
            })
            .map(|r| r.rid.clone())
            .collect()
    }

    /// Every registered revision across all handler paths, used by the
    /// lifecycle manager's periodic sweep.
    pub fn all_records(&self) -> Vec<RevisionRecord> {
        let state = self.state.read().expect("registry lock poisoned");
        state.records.values().cloned().collect()
    }

    pub fn usage_stats(&self) -> UsageStats {
        let state = self.state.read().expect("registry lock poisoned");
        let mut stats = UsageStats::default();
        for record in state.records.values() {
            stats.total_revisions += 1;
            stats.total_requests += record.request_count;
            match record.status {
                Status::Hot => stats.hot += 1,
                Status::Warm => stats.warm += 1,
                Status::Cold => stats.cold += 1,
            }
        }
        stats
    }

    pub fn serialize(&self) -> RegistryDocument {
        let state = self.state.read().expect("registry lock poisoned");
        let mut handlers: HashMap<String, Vec<RevisionRecord>> = HashMap::new();
        let mut active_versions = Vec::new();
        let mut cold_versions = Vec::new();
        for (path, timeline) in state.timelines.iter() {
            let revisions: Vec<RevisionRecord> =
                timeline.iter().filter_map(|rid| state.records.get(rid.as_str()).cloned()).collect();
            for record in &revisions {
                if record.status == Status::Cold {
                    cold_versions.push(record.rid.clone());
                } else {
                    active_versions.push(record.rid.clone());
                }
            }
            handlers.insert(path.clone(), revisions);
        }
        RegistryDocument { handlers, tags: state.tags.clone(), active_versions, cold_versions }
    }

    /// Replace all state from a previously serialized document (snapshot
    /// restore semantics: `clear()` then repopulate). Rejects documents
    /// whose active/cold membership arrays overlap.
    pub fn deserialize(&self, doc: RegistryDocument) -> Result<()> {
        let active: HashSet<&Rid> = doc.active_versions.iter().collect();
        if doc.cold_versions.iter().any(|rid| active.contains(rid)) {
            return Err(TimescapeError::InvalidFormat(
                "registry document's active and cold version sets overlap".to_string(),
            ));
        }

        let mut state = self.state.write().expect("registry lock poisoned");
        *state = State::default();
        for (path, revisions) in doc.handlers {
            let timeline = state.timelines.entry(path).or_default();
            for record in revisions {
                timeline.insert(record.rid.clone());
                state.records.insert(record.rid.as_str().to_string(), record);
            }
        }
        state.tags = doc.tags;
        drop(state);
        self.bump_generation();
        Ok(())
    }

    pub fn clear(&self) {
        let mut state = self.state.write().expect("registry lock poisoned");
        *state = State::default();
        drop(state);
        self.bump_generation();
    }
}

impl Default for VersionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
