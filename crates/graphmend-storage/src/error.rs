//! Storage error types for graphmend-storage.
//!
//! [`StorageError`] separates the recoverable `NotFound` signals from
//! backend I/O failures, which are fatal for the session that hit them.

use graphmend_core::CoreError;
use thiserror::Error;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// SQLite backend error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Schema migration failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A node with the given id was not found.
    #[error("node not found: {id}")]
    NodeNotFound { id: String },

    /// An edge with the given key was not found.
    #[error("edge not found: {key}")]
    EdgeNotFound { key: String },

    /// A write violated a data-model invariant.
    #[error("invariant violated: {0}")]
    Invariant(CoreError),

    /// Stored data could not be decoded.
    #[error("integrity error: {reason}")]
    IntegrityError { reason: String },
}

impl StorageError {
    /// `true` for missing-entity signals, which callers may skip over.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::NodeNotFound { .. } | StorageError::EdgeNotFound { .. }
        )
    }
}

impl From<CoreError> for StorageError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NodeNotFound { id } => StorageError::NodeNotFound { id: id.0 },
            CoreError::EdgeNotFound { key } => StorageError::EdgeNotFound {
                key: key.to_string(),
            },
            CoreError::UnknownNodeKind(_) | CoreError::UnknownEdgeType(_) => {
                StorageError::IntegrityError {
                    reason: err.to_string(),
                }
            }
            other => StorageError::Invariant(other),
        }
    }
}
