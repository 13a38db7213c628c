//! Snapshot Manager: periodic, compressed, typed dumps of registry
//! state with retention pruning, restore, import/export, and stats.

use crate::error::{Result, TimescapeError};
use crate::registry::{RegistryDocument, VersionRegistry};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotType {
    Light,
    Heavy,
}

impl SnapshotType {
    fn as_label(&self) -> &'static str {
        match self {
            SnapshotType::Light => "light",
            SnapshotType::Heavy => "heavy",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    #[serde(rename = "timestamp")]
    pub timestamp_ms: i64,
    #[serde(rename = "type")]
    pub kind: SnapshotType,
    #[serde(rename = "registryState")]
    pub registry_state: RegistryDocument,
    /// Extra host-supplied state captured only on `heavy` snapshots
    /// (e.g. schema or transformer state); opaque to this manager.
    pub artifacts: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    pub storage_dir: PathBuf,
    pub compress: bool,
    pub light_snapshot_interval: u64,
    pub heavy_snapshot_interval: u64,
    pub retention_period_ms: i64,
}

impl SnapshotConfig {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            compress: true,
            light_snapshot_interval: 10,
            heavy_snapshot_interval: 100,
            retention_period_ms: 30 * 24 * 3_600_000,
        }
    }

    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_light_interval(mut self, interval: u64) -> Self {
        self.light_snapshot_interval = interval;
        self
    }

    pub fn with_heavy_interval(mut self, interval: u64) -> Self {
        self.heavy_snapshot_interval = interval;
        self
    }

    pub fn with_retention_period_ms(mut self, ms: i64) -> Self {
        self.retention_period_ms = ms;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.light_snapshot_interval == 0 || self.heavy_snapshot_interval == 0 {
            return Err(TimescapeError::SnapshotFailed(
                "snapshot intervals must be > 0".to_string(),
            ));
        }
        if self.retention_period_ms < 0 {
            return Err(TimescapeError::SnapshotFailed(
                "retention_period_ms must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotStats {
    pub count: usize,
    pub total_bytes: u64,
}

/// Dumps `VersionRegistry` state to durable files and restores it back.
///
/// The snapshot id embeds a CRC32 of the serialized registry state as a
/// short content fingerprint, not as a corruption check on load —
/// corruption there is caught by a failed JSON parse instead.
pub struct SnapshotManager {
    config: SnapshotConfig,
    tick_counter: AtomicU64,
}

impl SnapshotManager {
    pub fn new(config: SnapshotConfig) -> Result<Self> {
        fs::create_dir_all(&config.storage_dir)
            .map_err(|e| TimescapeError::SnapshotFailed(format!("failed to create snapshot dir: {e}")))?;
        Ok(Self { config, tick_counter: AtomicU64::new(0) })
    }

    fn extension(&self) -> &'static str {
        if self.config.compress {
            ".json.gz"
        } else {
            ".json"
        }
    }

    fn path_for_id(&self, id: &str) -> PathBuf {
        let filename = format!("{}{}", id.replace(':', "_"), self.extension());
        self.config.storage_dir.join(filename)
    }

    /// Advance the internal tick counter and report which snapshot type
    /// (if any) this tick should produce. The heavy interval takes
    /// precedence when both intervals would fire on the same tick.
    pub fn tick(&self) -> Option<SnapshotType> {
        let count = self.tick_counter.fetch_add(1, Ordering::SeqCst) + 1;
        if self.config.heavy_snapshot_interval > 0 && count % self.config.heavy_snapshot_interval == 0 {
            Some(SnapshotType::Heavy)
        } else if self.config.light_snapshot_interval > 0 && count % self.config.light_snapshot_interval == 0 {
            Some(SnapshotType::Light)
        } else {
            None
        }
    }

    fn build_id(kind: SnapshotType, now_ms: i64, registry_state: &RegistryDocument) -> Result<String> {
        let serialized = serde_json::to_vec(registry_state)
            .map_err(|e| TimescapeError::SnapshotFailed(format!("failed to serialize registry state: {e}")))?;
        let hash = crc32fast::hash(&serialized);
        Ok(format!("snap:{}-{}-{:08x}", now_ms, kind.as_label(), hash))
    }

    /// Capture the registry's current state as a new snapshot and
    /// persist it to the storage directory.
    pub fn create_snapshot(
        &self,
        registry: &VersionRegistry,
        kind: SnapshotType,
        now_ms: i64,
        artifacts: Option<serde_json::Value>,
    ) -> Result<Snapshot> {
        let registry_state = registry.serialize();
        let id = Self::build_id(kind, now_ms, &registry_state)?;
        let artifacts = if kind == SnapshotType::Heavy { artifacts } else { None };
        let snapshot = Snapshot { id, timestamp_ms: now_ms, kind, registry_state, artifacts };
        self.save(&snapshot)?;
        log::info!("snapshot written: {}", snapshot.id);
        Ok(snapshot)
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let json = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| TimescapeError::SnapshotFailed(format!("failed to serialize snapshot: {e}")))?;
        let path = self.path_for_id(&snapshot.id);
        write_snapshot_bytes(&path, &json, self.config.compress)
    }

    /// Load and parse a snapshot by id, without mutating the registry.
    pub fn load(&self, id: &str) -> Result<Snapshot> {
        let path = self.path_for_id(id);
        let json = read_snapshot_bytes(&path, self.config.compress)
            .map_err(|_| TimescapeError::VersionNotFound(id.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| TimescapeError::SnapshotFailed(format!("corrupt snapshot: {e}")))
    }

    /// Restore registry content from a snapshot, replacing current
    /// state entirely. Returns `false` if the snapshot cannot be found
    /// or parsed.
    pub fn restore(&self, id: &str, registry: &VersionRegistry) -> bool {
        match self.load(id) {
            Ok(snapshot) => match registry.deserialize(snapshot.registry_state) {
                Ok(()) => {
                    log::info!("snapshot restored: {}", id);
                    true
                }
                Err(e) => {
                    log::warn!("snapshot {} rejected: {}", id, e);
                    false
                }
            },
            Err(_) => false,
        }
    }

    /// List the ids of all snapshots present in the storage directory.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let entries = fs::read_dir(&self.config.storage_dir)
            .map_err(|e| TimescapeError::SnapshotFailed(format!("failed to read snapshot dir: {e}")))?;
        for entry in entries.flatten() {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(id) = filename_to_id(name) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let path = self.path_for_id(id);
        if path.exists() {
            fs::remove_file(&path)
                .map_err(|e| TimescapeError::SnapshotFailed(format!("failed to delete snapshot: {e}")))?;
        }
        Ok(())
    }

    /// Remove every snapshot older than `now_ms - retention_period_ms`.
    /// Returns the count pruned.
    pub fn prune(&self, now_ms: i64) -> Result<usize> {
        let mut pruned = 0;
        for id in self.list()? {
            if let Ok(snapshot) = self.load(&id) {
                if now_ms - snapshot.timestamp_ms > self.config.retention_period_ms {
                    self.delete(&id)?;
                    pruned += 1;
                }
            }
        }
        Ok(pruned)
    }

    /// Write an uncompressed JSON dump of a snapshot to an arbitrary
    /// path, independent of the manager's own storage layout.
    pub fn export(&self, id: &str, dest: &Path) -> Result<()> {
        let snapshot = self.load(id)?;
        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| TimescapeError::SnapshotFailed(format!("failed to serialize snapshot: {e}")))?;
        fs::write(dest, json).map_err(|e| TimescapeError::SnapshotFailed(format!("failed to export snapshot: {e}")))
    }

    /// Parse a previously exported JSON dump, validate required fields,
    /// and save it into this manager's storage directory.
    pub fn import(&self, src: &Path) -> Result<String> {
        let bytes = fs::read(src).map_err(|e| TimescapeError::SnapshotFailed(format!("failed to read import file: {e}")))?;
        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| TimescapeError::SnapshotFailed(format!("invalid snapshot JSON: {e}")))?;
        for field in ["id", "timestamp", "type", "registryState"] {
            if value.get(field).is_none() {
                return Err(TimescapeError::InvalidFormat(format!("snapshot import missing field '{field}'")));
            }
        }
        let snapshot: Snapshot = serde_json::from_value(value)
            .map_err(|e| TimescapeError::SnapshotFailed(format!("invalid snapshot shape: {e}")))?;
        self.save(&snapshot)?;
        Ok(snapshot.id)
    }

    pub fn stats(&self) -> Result<SnapshotStats> {
        let mut stats = SnapshotStats::default();
        for id in self.list()? {
            let path = self.path_for_id(&id);
            if let Ok(meta) = fs::metadata(&path) {
                stats.count += 1;
                stats.total_bytes += meta.len();
            }
        }
        Ok(stats)
    }
}

fn filename_to_id(filename: &str) -> Option<String> {
    let stem = filename.strip_suffix(".json.gz").or_else(|| filename.strip_suffix(".json"))?;
    if !stem.starts_with("snap_") {
        return None;
    }
    Some(stem.replacen('_', ":", 1))
}

fn write_snapshot_bytes(path: &Path, json: &[u8], compress: bool) -> Result<()> {
    if compress {
        let file = fs::File::create(path)
            .map_err(|e| TimescapeError::SnapshotFailed(format!("failed to create snapshot file: {e}")))?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder
            .write_all(json)
            .map_err(|e| TimescapeError::SnapshotFailed(format!("failed to write snapshot: {e}")))?;
        encoder
            .finish()
            .map_err(|e| TimescapeError::SnapshotFailed(format!("failed to flush snapshot: {e}")))?;
    } else {
        fs::write(path, json).map_err(|e| TimescapeError::SnapshotFailed(format!("failed to write snapshot: {e}")))?;
    }
    Ok(())
}

fn read_snapshot_bytes(path: &Path, compress: bool) -> std::io::Result<Vec<u8>> {
    if compress {
        let file = fs::File::open(path)?;
        let mut decoder = GzDecoder::new(file);
        let mut buf = Vec::new();
        decoder.read_to_end(&mut buf)?;
        Ok(buf)
    } else {
        fs::read(path)
    }
}
