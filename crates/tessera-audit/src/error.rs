use std::time::Duration;

use tessera_crypto::CryptoError;
use tessera_store::StoreError;
use tessera_types::{AuditId, DataClassification};

/// Errors produced by audit ledger operations.
///
/// The write path never returns these to callers; they surface there only
/// inside [`AuditWriteOutcome::Failed`](crate::AuditWriteOutcome::Failed).
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit event not found: {0}")]
    NotFound(AuditId),

    #[error("duplicate audit id: {0}")]
    Duplicate(AuditId),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("archive error: {0}")]
    Archive(#[from] StoreError),

    #[error("archive write timed out after {0:?}")]
    ArchiveTimeout(Duration),

    #[error("repository error: {0}")]
    Repository(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("no payload protection configured for {0}")]
    NoProtection(DataClassification),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for AuditError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type AuditResult<T> = Result<T, AuditError>;
