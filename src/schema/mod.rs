//! DB Schema Manager: coordinates database migrations in lockstep with
//! revision activation, keyed to reference counts per schema version.

use crate::error::{Result, TimescapeError};
use crate::rid::Rid;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

/// Host-provided migration/rollback driver. The manager never talks to
/// a database directly: the trait is the only seam, implementations are
/// supplied by the host. One call per script; the manager is responsible
/// for sequencing the list and reversing it on rollback.
#[async_trait]
pub trait DbExecutor: Send + Sync {
    async fn execute_migration(&self, script: &str) -> anyhow::Result<bool>;
    async fn execute_rollback(&self, script: &str) -> anyhow::Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaStatus {
    Pending,
    Applied,
    RolledBack,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaRecord {
    pub version: String,
    pub status: SchemaStatus,
    pub references: HashSet<String>,
    pub applied_at_ms: Option<i64>,
    pub compatible_with: HashSet<String>,
    pub scripts: Vec<String>,
}

impl SchemaRecord {
    fn new(version: impl Into<String>, scripts: Vec<String>) -> Self {
        Self {
            version: version.into(),
            status: SchemaStatus::Pending,
            references: HashSet::new(),
            applied_at_ms: None,
            compatible_with: HashSet::new(),
            scripts,
        }
    }
}

/// Pulls the ordered migration script list out of `metadata`'s `"scripts"`
/// array, if present. Non-string entries and a missing/malformed field
/// both yield an empty list.
fn scripts_from_metadata(metadata: &serde_json::Value) -> Vec<String> {
    metadata
        .get("scripts")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

pub type AppliedCallback = Arc<dyn Fn(&SchemaRecord) + Send + Sync>;
pub type RolledBackCallback = Arc<dyn Fn(&SchemaRecord) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct SchemaConfig {
    pub migration_timeout: Duration,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self { migration_timeout: Duration::from_secs(30) }
    }
}

impl SchemaConfig {
    pub fn with_migration_timeout(mut self, timeout: Duration) -> Self {
        self.migration_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.migration_timeout.is_zero() {
            return Err(TimescapeError::InvalidFormat("migration_timeout must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Per-schema-version apply/rollback serialization. Distinct schema
/// versions may run concurrently; the same version is always serialized
/// through its own `tokio::sync::Mutex`, looked up behind a coarse
/// `std::sync::Mutex` guarding the lookup table itself — one
/// async-friendly lock per logical resource rather than one giant lock
/// over everything.
pub struct DbSchemaManager {
    executor: Arc<dyn DbExecutor>,
    config: SchemaConfig,
    records: StdMutex<HashMap<String, SchemaRecord>>,
    version_locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    applied_callback: Option<AppliedCallback>,
    rolled_back_callback: Option<RolledBackCallback>,
}

impl DbSchemaManager {
    pub fn new(executor: Arc<dyn DbExecutor>) -> Self {
        Self::with_config(executor, SchemaConfig::default())
    }

    pub fn with_config(executor: Arc<dyn DbExecutor>, config: SchemaConfig) -> Self {
        Self {
            executor,
            config,
            records: StdMutex::new(HashMap::new()),
            version_locks: StdMutex::new(HashMap::new()),
            applied_callback: None,
            rolled_back_callback: None,
        }
    }

    pub fn with_callbacks(
        mut self,
        applied: Option<AppliedCallback>,
        rolled_back: Option<RolledBackCallback>,
    ) -> Self {
        self.applied_callback = applied;
        self.rolled_back_callback = rolled_back;
        self
    }

    fn lock_for(&self, version: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.version_locks.lock().expect("schema lock poisoned");
        locks.entry(version.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    pub fn register_schema(&self, rid: &Rid, _path: &str, version: &str, metadata: &serde_json::Value) {
        let mut records = self.records.lock().expect("schema lock poisoned");
        let record = records
            .entry(version.to_string())
            .or_insert_with(|| SchemaRecord::new(version, scripts_from_metadata(metadata)));
        record.references.insert(rid.as_str().to_string());
    }

    pub fn get(&self, version: &str) -> Option<SchemaRecord> {
        self.records.lock().expect("schema lock poisoned").get(version).cloned()
    }

    /// Run pending migration scripts for `version`, in order. Already-applied
    /// versions succeed with zero migrations executed. A failure partway
    /// through leaves the count of scripts executed so far in the error.
    pub async fn apply(&self, version: &str, _metadata: serde_json::Value) -> Result<()> {
        let version_lock = self.lock_for(version);
        let _guard = version_lock.lock().await;

        let scripts = {
            let records = self.records.lock().expect("schema lock poisoned");
            let record = records
                .get(version)
                .ok_or_else(|| TimescapeError::SchemaNotRegistered(version.to_string()))?;
            if record.status == SchemaStatus::Applied {
                return Ok(());
            }
            record.scripts.clone()
        };

        let total = scripts.len();
        for (executed, script) in scripts.iter().enumerate() {
            let result = tokio::time::timeout(self.config.migration_timeout, self.executor.execute_migration(script)).await;
            match result {
                Err(_) => {
                    self.set_status(version, SchemaStatus::Failed);
                    return Err(TimescapeError::MigrationTimeout(self.config.migration_timeout));
                }
                Ok(Err(e)) => {
                    self.set_status(version, SchemaStatus::Failed);
                    return Err(TimescapeError::MigrationFailed(format!(
                        "{version}: {executed}/{total} scripts executed before failure: {e}"
                    )));
                }
                Ok(Ok(false)) => {
                    self.set_status(version, SchemaStatus::Failed);
                    return Err(TimescapeError::MigrationFailed(format!(
                        "{version}: {executed}/{total} scripts executed, script reported failure"
                    )));
                }
                Ok(Ok(true)) => {}
            }
        }

        let now_ms = chrono::Utc::now().timestamp_millis();
        let record = {
            let mut records = self.records.lock().expect("schema lock poisoned");
            let record = records.get_mut(version).expect("schema record vanished under lock");
            record.status = SchemaStatus::Applied;
            record.applied_at_ms = Some(now_ms);
            record.clone()
        };
        if let Some(callback) = &self.applied_callback {
            callback(&record);
        }
        Ok(())
    }

    /// Run rollback scripts for `version`, in reverse order of apply.
    /// Versions that are not currently applied succeed with zero
    /// rollbacks executed. A failure partway through leaves the count of
    /// scripts executed so far in the error.
    pub async fn rollback(&self, version: &str, _metadata: serde_json::Value) -> Result<()> {
        let version_lock = self.lock_for(version);
        let _guard = version_lock.lock().await;

        let scripts = {
            let records = self.records.lock().expect("schema lock poisoned");
            let record = records
                .get(version)
                .ok_or_else(|| TimescapeError::SchemaNotRegistered(version.to_string()))?;
            if record.status != SchemaStatus::Applied {
                return Ok(());
            }
            record.scripts.clone()
        };

        let total = scripts.len();
        for (executed, script) in scripts.iter().rev().enumerate() {
            let result = tokio::time::timeout(self.config.migration_timeout, self.executor.execute_rollback(script)).await;
            match result {
                Err(_) => {
                    self.set_status(version, SchemaStatus::Failed);
                    return Err(TimescapeError::MigrationTimeout(self.config.migration_timeout));
                }
                Ok(Err(e)) => {
                    self.set_status(version, SchemaStatus::Failed);
                    return Err(TimescapeError::RollbackFailed(format!(
                        "{version}: {executed}/{total} scripts executed before failure: {e}"
                    )));
                }
                Ok(Ok(false)) => {
                    self.set_status(version, SchemaStatus::Failed);
                    return Err(TimescapeError::RollbackFailed(format!(
                        "{version}: {executed}/{total} scripts executed, script reported failure"
                    )));
                }
                Ok(Ok(true)) => {}
            }
        }

        let record = {
            let mut records = self.records.lock().expect("schema lock poisoned");
            let record = records.get_mut(version).expect("schema record vanished under lock");
            record.status = SchemaStatus::RolledBack;
            record.clone()
        };
        if let Some(callback) = &self.rolled_back_callback {
            callback(&record);
        }
        Ok(())
    }

    pub async fn activate_version(&self, rid: &Rid, path: &str, version: &str, metadata: serde_json::Value) -> Result<()> {
        self.register_schema(rid, path, version, &metadata);
        let already_applied = self.get(version).map(|r| r.status == SchemaStatus::Applied).unwrap_or(false);
        if !already_applied {
            self.apply(version, metadata).await?;
        }
        Ok(())
    }

    pub async fn deactivate_version(&self, rid: &Rid, version: &str, metadata: serde_json::Value) -> Result<()> {
        let now_empty = {
            let mut records = self.records.lock().expect("schema lock poisoned");
            match records.get_mut(version) {
                Some(record) => {
                    record.references.remove(rid.as_str());
                    record.references.is_empty()
                }
                None => return Ok(()),
            }
        };
        if now_empty {
            self.rollback(version, metadata).await?;
        }
        Ok(())
    }

    pub fn compatible(&self, a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }
        let records = self.records.lock().expect("schema lock poisoned");
        records.get(a).map(|r| r.compatible_with.contains(b)).unwrap_or(false)
            || records.get(b).map(|r| r.compatible_with.contains(a)).unwrap_or(false)
    }

    fn set_status(&self, version: &str, status: SchemaStatus) {
        let mut records = self.records.lock().expect("schema lock poisoned");
        if let Some(record) = records.get_mut(version) {
            record.status = status;
        }
    }
}
