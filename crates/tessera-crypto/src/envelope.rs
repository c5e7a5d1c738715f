//! Envelope encryption of sensitive payloads.
//!
//! Each payload is encrypted under a fresh 256-bit data key with
//! XChaCha20-Poly1305. The data key itself is wrapped by a
//! [`KeyManagementService`], so only the wrapped form is stored next to the
//! ciphertext and revoking the master key revokes every payload.

use std::sync::Arc;

use async_trait::async_trait;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

pub const ALGORITHM: &str = "xchacha20poly1305";
const NONCE_LEN: usize = 24;

/// A data key as returned by the key-management service.
pub struct DataKey {
    pub plaintext: [u8; 32],
    pub wrapped: Vec<u8>,
}

impl Drop for DataKey {
    fn drop(&mut self) {
        self.plaintext.fill(0);
    }
}

/// Boundary to a managed key-management service (cloud KMS, vault transit).
#[async_trait]
pub trait KeyManagementService: Send + Sync {
    /// Identifier of the master key new data keys are wrapped under.
    fn key_id(&self) -> &str;

    /// Generate a data key and its wrapped form.
    async fn generate_data_key(&self) -> Result<DataKey, CryptoError>;

    /// Unwrap a previously wrapped data key.
    async fn unwrap_data_key(&self, key_id: &str, wrapped: &[u8]) -> Result<[u8; 32], CryptoError>;
}

/// Process-local key-management service holding a single master key.
///
/// Suitable for tests and single-node deployments where the master key is
/// injected from a secret store at startup.
pub struct LocalKms {
    key_id: String,
    master: XChaCha20Poly1305,
}

impl LocalKms {
    pub fn new(key_id: impl Into<String>, master_key: [u8; 32]) -> Self {
        Self {
            key_id: key_id.into(),
            master: XChaCha20Poly1305::new(Key::from_slice(&master_key)),
        }
    }

    /// A local KMS with a random master key.
    pub fn ephemeral() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill(&mut key);
        Self::new("local-ephemeral", key)
    }
}

#[async_trait]
impl KeyManagementService for LocalKms {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    async fn generate_data_key(&self) -> Result<DataKey, CryptoError> {
        let mut plaintext = [0u8; 32];
        rand::thread_rng().fill(&mut plaintext);
        let wrapped = seal_with(&self.master, &plaintext, self.key_id.as_bytes())
            .map_err(|e| CryptoError::KeyManagement(e.to_string()))?;
        Ok(DataKey { plaintext, wrapped })
    }

    async fn unwrap_data_key(&self, key_id: &str, wrapped: &[u8]) -> Result<[u8; 32], CryptoError> {
        if key_id != self.key_id {
            return Err(CryptoError::UnknownKey(key_id.to_string()));
        }
        let bytes = open_with(&self.master, wrapped, key_id.as_bytes())
            .map_err(|e| CryptoError::KeyManagement(e.to_string()))?;
        bytes
            .try_into()
            .map_err(|_| CryptoError::KeyManagement("unwrapped key has wrong length".into()))
    }
}

/// A payload sealed under an envelope. All binary fields are hex encoded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPayload {
    pub algorithm: String,
    pub key_id: String,
    pub wrapped_key: String,
    pub nonce: String,
    pub ciphertext: String,
}

/// Seals and opens payloads using data keys from a [`KeyManagementService`].
#[derive(Clone)]
pub struct EnvelopeCipher {
    kms: Arc<dyn KeyManagementService>,
}

impl EnvelopeCipher {
    pub fn new(kms: Arc<dyn KeyManagementService>) -> Self {
        Self { kms }
    }

    /// Encrypt `plaintext`, binding it to `aad` (e.g. the owning record id).
    pub async fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<SealedPayload, CryptoError> {
        let data_key = self.kms.generate_data_key().await?;
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&data_key.plaintext));
        let sealed = seal_with(&cipher, plaintext, aad)?;
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

        Ok(SealedPayload {
            algorithm: ALGORITHM.to_string(),
            key_id: self.kms.key_id().to_string(),
            wrapped_key: hex::encode(&data_key.wrapped),
            nonce: hex::encode(nonce),
            ciphertext: hex::encode(ciphertext),
        })
    }

    /// Decrypt a sealed payload. Fails if `aad` differs from the one used to seal.
    pub async fn open(&self, sealed: &SealedPayload, aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.algorithm != ALGORITHM {
            return Err(CryptoError::InvalidEnvelope(format!(
                "unsupported algorithm {}",
                sealed.algorithm
            )));
        }
        let wrapped = decode_hex("wrapped_key", &sealed.wrapped_key)?;
        let mut combined = decode_hex("nonce", &sealed.nonce)?;
        if combined.len() != NONCE_LEN {
            return Err(CryptoError::InvalidEnvelope("nonce has wrong length".into()));
        }
        combined.extend(decode_hex("ciphertext", &sealed.ciphertext)?);

        let mut key = self.kms.unwrap_data_key(&sealed.key_id, &wrapped).await?;
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&key));
        key.fill(0);
        open_with(&cipher, &combined, aad)
    }
}

/// Encrypt with a random nonce; output is `nonce || ciphertext`.
fn seal_with(cipher: &XChaCha20Poly1305, msg: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill(&mut nonce);
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), Payload { msg, aad })
        .map_err(|_| CryptoError::Encryption("aead encryption failed".into()))?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend(ciphertext);
    Ok(out)
}

fn open_with(cipher: &XChaCha20Poly1305, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < NONCE_LEN {
        return Err(CryptoError::Decryption("sealed data shorter than nonce".into()));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    cipher
        .decrypt(XNonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::Decryption("authentication failed".into()))
}

fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>, CryptoError> {
    hex::decode(value).map_err(|e| CryptoError::InvalidEnvelope(format!("{field}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> EnvelopeCipher {
        EnvelopeCipher::new(Arc::new(LocalKms::new("test-key", [7; 32])))
    }

    #[tokio::test]
    async fn seal_then_open_returns_plaintext() {
        let c = cipher();
        let sealed = c.seal(b"{\"diagnosis\":\"x\"}", b"audit-1").await.unwrap();
        assert_eq!(sealed.algorithm, ALGORITHM);
        assert_eq!(sealed.key_id, "test-key");
        assert!(!sealed.ciphertext.contains("diagnosis"));

        let opened = c.open(&sealed, b"audit-1").await.unwrap();
        assert_eq!(opened, b"{\"diagnosis\":\"x\"}");
    }

    #[tokio::test]
    async fn each_seal_uses_a_fresh_data_key() {
        let c = cipher();
        let a = c.seal(b"same", b"aad").await.unwrap();
        let b = c.seal(b"same", b"aad").await.unwrap();
        assert_ne!(a.wrapped_key, b.wrapped_key);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[tokio::test]
    async fn wrong_aad_fails_to_open() {
        let c = cipher();
        let sealed = c.seal(b"secret", b"audit-1").await.unwrap();
        let err = c.open(&sealed, b"audit-2").await.unwrap_err();
        assert!(matches!(err, CryptoError::Decryption(_)));
    }

    #[tokio::test]
    async fn tampered_ciphertext_fails_to_open() {
        let c = cipher();
        let mut sealed = c.seal(b"secret", b"aad").await.unwrap();
        let mut bytes = hex::decode(&sealed.ciphertext).unwrap();
        bytes[0] ^= 0x01;
        sealed.ciphertext = hex::encode(bytes);
        assert!(c.open(&sealed, b"aad").await.is_err());
    }

    #[tokio::test]
    async fn other_master_key_cannot_unwrap() {
        let sealed = cipher().seal(b"secret", b"aad").await.unwrap();
        let other = EnvelopeCipher::new(Arc::new(LocalKms::new("test-key", [8; 32])));
        let err = other.open(&sealed, b"aad").await.unwrap_err();
        assert!(matches!(err, CryptoError::KeyManagement(_)));
    }

    #[tokio::test]
    async fn unknown_key_id_is_reported() {
        let c = cipher();
        let mut sealed = c.seal(b"secret", b"aad").await.unwrap();
        sealed.key_id = "rotated-away".into();
        assert_eq!(
            c.open(&sealed, b"aad").await.unwrap_err(),
            CryptoError::UnknownKey("rotated-away".into())
        );
    }
}
