//! Error type shared by the snapshot cache components

use std::path::PathBuf;

use thiserror::Error;

use crate::data::{EntityKey, FetchError};

/// Errors that can occur while reading, refreshing or writing snapshots
#[derive(Debug, Error)]
pub enum CacheError {
    /// Value cannot be represented as a JSON tree
    #[error("unsupported value type: {0}")]
    UnsupportedType(String),

    /// Filesystem failure; never treated as "no snapshot"
    #[error("storage error while trying to {operation} {}", path.display())]
    Storage {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A snapshot file exists but does not hold valid JSON
    #[error("corrupt snapshot {}", path.display())]
    CorruptSnapshot {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Key cannot be mapped to a snapshot file name
    #[error("invalid entity key: {0}")]
    InvalidKey(String),

    /// Upstream fetch failed and no snapshot could stand in for it
    #[error("failed to fetch {key}")]
    Fetch {
        key: EntityKey,
        #[source]
        source: FetchError,
    },

    /// Requested round is outside the league's round index
    #[error("round {requested} not found (valid rounds: {first}-{last})")]
    RoundNotFound { requested: u32, first: u32, last: u32 },

    /// Upstream payload lacks a field the cache needs to navigate
    #[error("missing expected field in {key}: {field}")]
    MissingField { key: EntityKey, field: String },

    /// Invalid freshness or cache settings
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CacheError {
    pub(crate) fn storage(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        CacheError::Storage {
            operation,
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
