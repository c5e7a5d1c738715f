//! Cryptographic primitives for Tessera.
//!
//! Provides domain-separated BLAKE3 hashing for tamper evidence, keyed
//! one-way hashing of personal identifiers, and envelope encryption of
//! sensitive audit payloads behind a key-management boundary.
//!
//! All crypto operations wrap established libraries; there is no custom cryptography.

pub mod envelope;
pub mod error;
pub mod hasher;
pub mod privacy;

pub use envelope::{DataKey, EnvelopeCipher, KeyManagementService, LocalKms, SealedPayload};
pub use error::CryptoError;
pub use hasher::ContentHasher;
pub use privacy::{reduce_user_agent, truncate_ip, PrivacyHasher};
