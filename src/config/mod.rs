//! Aggregate configuration for the versioning core.
//!
//! Each component owns its own config struct with `Default` and a
//! `validate()`; `TimescapeConfig` bundles them for callers that wire up
//! the whole core at once. Loading configuration from files or the
//! environment is a concern of the embedding service, not of this
//! crate, so unlike some config aggregates there is no `load`/`from_file`/
//! `apply_env_vars`/`merge` here — only construction, builder overrides,
//! and validation.

use crate::error::Result;
use crate::lifecycle::LifecycleConfig;
use crate::registry::ClassificationConfig;
use crate::resolver::ResolverConfig;
use crate::schema::SchemaConfig;
use crate::snapshot::SnapshotConfig;
use crate::transformer::TransformerConfig;

/// Complete configuration for a `Timescape` instance.
///
/// `snapshot` is optional because `SnapshotConfig` requires a
/// `storage_dir`; hosts that don't need persistence can leave it unset
/// and skip wiring a `SnapshotManager` entirely.
#[derive(Debug, Clone, Default)]
pub struct TimescapeConfig {
    pub classification: ClassificationConfig,
    pub resolver: ResolverConfig,
    pub transformer: TransformerConfig,
    pub lifecycle: LifecycleConfig,
    pub schema: SchemaConfig,
    pub snapshot: Option<SnapshotConfig>,
}

impl TimescapeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_classification(mut self, classification: ClassificationConfig) -> Self {
        self.classification = classification;
        self
    }

    pub fn with_resolver(mut self, resolver: ResolverConfig) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_transformer(mut self, transformer: TransformerConfig) -> Self {
        self.transformer = transformer;
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: LifecycleConfig) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn with_schema(mut self, schema: SchemaConfig) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_snapshot(mut self, snapshot: SnapshotConfig) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Validate every sub-config. Stops at the first failure; the error
    /// it returns is whichever sub-config raised it.
    pub fn validate(&self) -> Result<()> {
        self.classification.validate()?;
        self.resolver.validate()?;
        self.transformer.validate()?;
        self.lifecycle.validate()?;
        self.schema.validate()?;
        if let Some(snapshot) = &self.snapshot {
            snapshot.validate()?;
        }
        Ok(())
    }
}
