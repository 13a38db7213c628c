//! Closed error taxonomy for the Timescape core.
//!
//! One `thiserror` enum for the whole crate, no string-typed error
//! codes, a `Result<T>` alias used throughout.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TimescapeError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimescapeError {
    #[error("invalid version format: {0}")]
    InvalidFormat(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("version not found: {0}")]
    VersionNotFound(String),

    #[error("tag not found: {0}")]
    TagNotFound(String),

    #[error("chain too long: {length} steps exceeds maximum {max}")]
    ChainTooLong { length: usize, max: usize },

    #[error("no chain between {from} and {to}")]
    NoChain { from: String, to: String },

    #[error("no transformer registered between {from} and {to}")]
    NoTransformer { from: String, to: String },

    #[error("transformer step timed out after {0:?}")]
    TransformerTimeout(std::time::Duration),

    #[error("transformer failed: {0}")]
    TransformerFailed(String),

    #[error("migration timed out after {0:?}; database is in an unknown state")]
    MigrationTimeout(std::time::Duration),

    #[error("migration failed: {0}")]
    MigrationFailed(String),

    #[error("rollback failed: {0}")]
    RollbackFailed(String),

    #[error("transformer pair ({0}, {1}) is already registered")]
    AlreadyRegistered(String, String),

    #[error("transformer pair must be marked immutable before registration")]
    ImmutableRequired,

    #[error("lifecycle manager is already started")]
    AlreadyStarted,

    #[error("schema version {0} is not registered")]
    SchemaNotRegistered(String),

    #[error("snapshot operation failed: {0}")]
    SnapshotFailed(String),
}

impl TimescapeError {
    /// HTTP status code Integration maps this error to.
    pub fn status_code(&self) -> u16 {
        match self {
            TimescapeError::InvalidFormat(_) | TimescapeError::InvalidTimestamp(_) => 400,
            TimescapeError::VersionNotFound(_) | TimescapeError::TagNotFound(_) => 404,
            _ => 500,
        }
    }

    /// Machine-readable code, used in the `{"error": "..."}` response body.
    pub fn code(&self) -> &'static str {
        match self {
            TimescapeError::InvalidFormat(_) => "INVALID_FORMAT",
            TimescapeError::InvalidTimestamp(_) => "INVALID_TIMESTAMP",
            TimescapeError::VersionNotFound(_) => "VERSION_NOT_FOUND",
            TimescapeError::TagNotFound(_) => "TAG_NOT_FOUND",
            TimescapeError::ChainTooLong { .. } => "CHAIN_TOO_LONG",
            TimescapeError::NoChain { .. } => "VERSION_NOT_FOUND",
            TimescapeError::NoTransformer { .. } => "NO_TRANSFORMER",
            TimescapeError::TransformerTimeout(_) => "TRANSFORMER_TIMEOUT",
            TimescapeError::TransformerFailed(_) => "TRANSFORMER_FAILED",
            TimescapeError::MigrationTimeout(_) => "MIGRATION_TIMEOUT",
            TimescapeError::MigrationFailed(_) => "MIGRATION_FAILED",
            TimescapeError::RollbackFailed(_) => "ROLLBACK_FAILED",
            TimescapeError::AlreadyRegistered(..) => "ALREADY_REGISTERED",
            TimescapeError::ImmutableRequired => "IMMUTABLE_REQUIRED",
            TimescapeError::AlreadyStarted => "ALREADY_STARTED",
            TimescapeError::SchemaNotRegistered(_) => "SCHEMA_NOT_REGISTERED",
            TimescapeError::SnapshotFailed(_) => "SNAPSHOT_FAILED",
        }
    }
}
