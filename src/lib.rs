//! Timescape — the versioning core of an HTTP service framework.
//!
//! Timescape lets a single deployment expose many historical revisions
//! of the same handler at once: an incoming request selects a revision
//! by tag, timestamp, or "latest"; request and response payloads are
//! mechanically translated between the caller's revision and the
//! handler's revision through a chain of adjacent transformers; and
//! each revision's usage is tracked so rarely-used revisions can be
//! demoted and later reactivated. A schema manager applies and rolls
//! back database migrations in lockstep with revision activation, and
//! a snapshot manager periodically dumps registry state for crash
//! recovery and export/import.
//!
//! This crate is the core only — the HTTP server, routing table,
//! authentication, CLI, and the database driver itself are all external
//! collaborators, specified here only at their interface (the
//! [`schema::DbExecutor`] and [`metrics::MetricsSink`] traits).
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use timescape::config::TimescapeConfig;
//! use timescape::metrics::NoopMetricsSink;
//! use timescape::registry::VersionRegistry;
//! use timescape::resolver::VersionResolver;
//! use timescape::transformer::TransformerEngine;
//! use timescape::integration::Integration;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = TimescapeConfig::new();
//! config.validate()?;
//!
//! let registry = Arc::new(VersionRegistry::with_classification(config.classification));
//! let resolver = Arc::new(VersionResolver::with_config(config.resolver));
//! let transformer = Arc::new(TransformerEngine::with_config(config.transformer));
//! let _integration = Integration::new(registry, resolver, transformer, Arc::new(NoopMetricsSink));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod integration;
pub mod lifecycle;
pub mod metrics;
pub mod registry;
pub mod resolver;
pub mod rid;
pub mod schema;
pub mod snapshot;
pub mod transformer;

pub use error::{Result, TimescapeError};
pub use integration::Integration;
pub use lifecycle::LifecycleManager;
pub use registry::VersionRegistry;
pub use resolver::VersionResolver;
pub use rid::Rid;
pub use schema::DbSchemaManager;
pub use snapshot::SnapshotManager;
pub use transformer::TransformerEngine;

/// Convenience re-exports for callers wiring up the whole core at once.
pub mod prelude {
    pub use crate::config::TimescapeConfig;
    pub use crate::error::{Result, TimescapeError};
    pub use crate::integration::{Integration, RequestContext, ResolutionFailure};
    pub use crate::lifecycle::LifecycleManager;
    pub use crate::metrics::{MetricsSink, NoopMetricsSink};
    pub use crate::registry::VersionRegistry;
    pub use crate::resolver::VersionResolver;
    pub use crate::rid::Rid;
    pub use crate::schema::{DbExecutor, DbSchemaManager};
    pub use crate::snapshot::SnapshotManager;
    pub use crate::transformer::TransformerEngine;
}
