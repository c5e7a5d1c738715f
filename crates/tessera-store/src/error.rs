/// Errors from state and archive store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Keys must be 1-128 chars of `[A-Za-z0-9._-]` and not start with `.`.
    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    /// Write-once violation in the archive.
    #[error("entry already exists: {0}")]
    AlreadyExists(String),

    /// Stored bytes could not be decoded by the caller.
    #[error("corrupt entry {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store lock poisoned")]
    LockPoisoned,

    /// The backend did not answer within the caller's budget.
    #[error("store did not respond within {0:?}")]
    Timeout(std::time::Duration),

    #[error("store task failed: {0}")]
    Task(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
