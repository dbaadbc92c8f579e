use graphmend_core::CoreError;
use graphmend_storage::StorageError;
use thiserror::Error;

/// Errors that abort a retrieval.
///
/// Recoverable conditions (no seeds, missing nodes mid-traversal) are not
/// errors; they degrade the [`RetrievalOutcome`](crate::RetrievalOutcome).
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("invalid retrieval config: {0}")]
    InvalidConfig(String),
}
