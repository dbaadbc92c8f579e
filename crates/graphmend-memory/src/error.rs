use graphmend_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// No signature can be derived from the query (e.g. it is empty).
    #[error("cannot derive a bug signature from the query")]
    InvalidSignature,

    /// Another decay pass is running against this memory.
    #[error("a decay pass is already in progress")]
    DecayInProgress,

    #[error("invalid memory config: {0}")]
    InvalidConfig(String),
}

impl MemoryError {
    /// `true` for errors a session can ignore and continue without a
    /// memory write.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, MemoryError::InvalidSignature | MemoryError::DecayInProgress)
    }
}
