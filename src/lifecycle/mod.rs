//! Lifecycle Manager: periodic demotion of cold or low-usage revisions.

use crate::error::{Result, TimescapeError};
use crate::registry::{Status, VersionRegistry};
use crate::rid::Rid;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// Why a revision was demoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemotionReason {
    Manual,
    Cold,
    LowUsage,
}

/// A per-RID manual override that short-circuits the decision rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Override {
    Keep,
    Deactivate,
}

/// One entry in the append-only demotion history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemotionRecord {
    pub rid: Rid,
    pub path: String,
    pub reason: DemotionReason,
    pub last_accessed_ms: i64,
    pub request_count: u64,
    pub at_ms: i64,
}

pub type DeactivationCallback = Arc<dyn Fn(&DemotionRecord) + Send + Sync>;

#[derive(Clone)]
pub struct LifecycleConfig {
    pub enabled: bool,
    pub check_interval: Duration,
    pub cold_threshold: Duration,
    pub min_request_count: u64,
    pub protected_tags: HashSet<String>,
    pub excluded_handlers: HashSet<String>,
    pub dry_run: bool,
    pub history_capacity: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: Duration::from_secs(3600),
            cold_threshold: Duration::from_secs(7 * 24 * 3600),
            min_request_count: 10,
            protected_tags: ["stable", "production", "latest"].iter().map(|s| s.to_string()).collect(),
            excluded_handlers: HashSet::new(),
            dry_run: false,
            history_capacity: 10_000,
        }
    }
}

impl LifecycleConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn with_cold_threshold(mut self, threshold: Duration) -> Self {
        self.cold_threshold = threshold;
        self
    }

    pub fn with_min_request_count(mut self, count: u64) -> Self {
        self.min_request_count = count;
        self
    }

    pub fn with_protected_tags(mut self, tags: HashSet<String>) -> Self {
        self.protected_tags = tags;
        self
    }

    pub fn with_excluded_handlers(mut self, handlers: HashSet<String>) -> Self {
        self.excluded_handlers = handlers;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.check_interval.is_zero() {
            return Err(TimescapeError::InvalidFormat("check_interval must be > 0".to_string()));
        }
        if self.history_capacity == 0 {
            return Err(TimescapeError::InvalidFormat("history_capacity must be > 0".to_string()));
        }
        Ok(())
    }
}

struct Inner {
    registry: Arc<VersionRegistry>,
    config: LifecycleConfig,
    overrides: RwLock<HashMap<Rid, Override>>,
    history: Mutex<VecDeque<DemotionRecord>>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    callback: Option<DeactivationCallback>,
}

/// Periodically scans the registry and demotes eligible revisions.
///
/// The background loop is a single `tokio::spawn`'d task holding a
/// `tokio::time::interval`, stopped by aborting a stored `JoinHandle` on
/// `stop()` or `Drop`.
pub struct LifecycleManager {
    inner: Arc<Inner>,
}

impl LifecycleManager {
    pub fn new(registry: Arc<VersionRegistry>) -> Self {
        Self::with_config(registry, LifecycleConfig::default())
    }

    pub fn with_config(registry: Arc<VersionRegistry>, config: LifecycleConfig) -> Self {
        Self::with_callback(registry, config, None)
    }

    pub fn with_callback(
        registry: Arc<VersionRegistry>,
        config: LifecycleConfig,
        callback: Option<DeactivationCallback>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                config,
                overrides: RwLock::new(HashMap::new()),
                history: Mutex::new(VecDeque::new()),
                task: Mutex::new(None),
                callback,
            }),
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.inner.config
    }

    pub fn set_override(&self, rid: Rid, over: Override) {
        self.inner.overrides.write().expect("lifecycle lock poisoned").insert(rid, over);
    }

    pub fn clear_override(&self, rid: &Rid) {
        self.inner.overrides.write().expect("lifecycle lock poisoned").remove(rid);
    }

    /// Start the periodic loop: an immediate scan, then a scan every
    /// `check_interval`. A no-op if `enabled` is false.
    pub fn start(&self) -> Result<()> {
        if !self.inner.config.enabled {
            return Ok(());
        }
        let mut task = self.inner.task.lock().expect("lifecycle lock poisoned");
        if task.is_some() {
            return Err(TimescapeError::AlreadyStarted);
        }

        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(inner.config.check_interval);
            loop {
                interval.tick().await;
                let now_ms = chrono::Utc::now().timestamp_millis();
                let demoted = run_scan(&inner, now_ms);
                if demoted > 0 {
                    log::info!("lifecycle scan demoted {} revisions", demoted);
                }
            }
        }));

        let now_ms = chrono::Utc::now().timestamp_millis();
        run_scan(&self.inner, now_ms);
        Ok(())
    }

    pub fn stop(&self) {
        if let Some(task) = self.inner.task.lock().expect("lifecycle lock poisoned").take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.task.lock().expect("lifecycle lock poisoned").is_some()
    }

    /// Run one decision+demote pass synchronously (used by tests and by
    /// `start`'s immediate first scan).
    pub fn scan_once(&self, now_ms: i64) -> usize {
        run_scan(&self.inner, now_ms)
    }

    /// Read-only equivalent of the decision rule, with no side effects.
    pub fn is_eligible(&self, record: &crate::registry::RevisionRecord, now_ms: i64) -> bool {
        decide(&self.inner, record, now_ms).is_some()
    }

    /// Move a cold revision back to warm and clear any override on it.
    pub fn reactivate(&self, rid: &Rid) -> Result<()> {
        let record = self
            .inner
            .registry
            .get_record(rid)
            .ok_or_else(|| TimescapeError::VersionNotFound(rid.as_str().to_string()))?;
        if record.status != Status::Cold {
            return Err(TimescapeError::InvalidFormat(format!("{rid} is not cold")));
        }
        self.inner.registry.update_status(rid, Status::Warm)?;
        self.clear_override(rid);
        Ok(())
    }

    pub fn history(&self) -> Vec<DemotionRecord> {
        self.inner.history.lock().expect("lifecycle lock poisoned").iter().cloned().collect()
    }
}

impl Drop for LifecycleManager {
    fn drop(&mut self) {
        if let Some(task) = self.inner.task.lock().expect("lifecycle lock poisoned").take() {
            task.abort();
        }
    }
}

fn decide(inner: &Inner, record: &crate::registry::RevisionRecord, now_ms: i64) -> Option<DemotionReason> {
    if inner.config.excluded_handlers.contains(&record.path) {
        return None;
    }
    let overrides = inner.overrides.read().expect("lifecycle lock poisoned");
    match overrides.get(&record.rid) {
        Some(Override::Keep) => return None,
        Some(Override::Deactivate) => return Some(DemotionReason::Manual),
        None => {}
    }
    drop(overrides);

    if record.tags.iter().any(|t| inner.config.protected_tags.contains(t)) {
        return None;
    }

    let delta_ms = (now_ms - record.last_accessed_ms).max(0);
    if delta_ms as u128 > inner.config.cold_threshold.as_millis() {
        return Some(DemotionReason::Cold);
    }
    if record.request_count < inner.config.min_request_count {
        return Some(DemotionReason::LowUsage);
    }
    None
}

fn run_scan(inner: &Inner, now_ms: i64) -> usize {
    let mut demoted = 0;
    for record in inner.registry.all_records() {
        if record.status == Status::Cold {
            continue;
        }
        let Some(reason) = decide(inner, &record, now_ms) else { continue };

        if inner.config.dry_run {
            log::info!("lifecycle dry-run would demote {} (reason={:?})", record.rid, reason);
            continue;
        }

        if inner.registry.mark_cold(&record.rid).is_err() {
            continue;
        }
        let entry = DemotionRecord {
            rid: record.rid.clone(),
            path: record.path.clone(),
            reason,
            last_accessed_ms: record.last_accessed_ms,
            request_count: record.request_count,
            at_ms: now_ms,
        };
        {
            let mut history = inner.history.lock().expect("lifecycle lock poisoned");
            history.push_back(entry.clone());
            while history.len() > inner.config.history_capacity {
                history.pop_front();
            }
        }
        if let Some(callback) = &inner.callback {
            callback(&entry);
        }
        demoted += 1;
    }
    demoted
}
