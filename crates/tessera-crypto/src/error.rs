/// Errors from hashing, key management and envelope operations.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Authentication tag mismatch, wrong key, or wrong associated data.
    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("key management error: {0}")]
    KeyManagement(String),

    #[error("unknown key id: {0}")]
    UnknownKey(String),

    #[error("malformed envelope: {0}")]
    InvalidEnvelope(String),
}
