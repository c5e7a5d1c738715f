use std::collections::BTreeMap;

use serde_json::Value;
use tessera_types::Digest;

use crate::error::CryptoError;

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag (e.g. `"tessera-audit-event-v1"`) that is
/// prepended to every hash computation, so digests from different record
/// kinds never collide even when their bytes are identical.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for the tamper-evidence digest of audit events.
    pub const AUDIT_EVENT: Self = Self {
        domain: "tessera-audit-event-v1",
    };

    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> Digest {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        Digest::from_hash(*hasher.finalize().as_bytes())
    }

    /// Hash a serializable value as canonical JSON with domain separation.
    ///
    /// Object keys, struct fields included, are sorted at every depth before
    /// encoding. The digest depends on neither field declaration order nor
    /// whether `serde_json` was built with `preserve_order`.
    pub fn hash_json<T: serde::Serialize>(&self, value: &T) -> Result<Digest, CryptoError> {
        let value =
            serde_json::to_value(value).map_err(|e| CryptoError::Serialization(e.to_string()))?;
        let data = serde_json::to_vec(&canonicalize(value))
            .map_err(|e| CryptoError::Serialization(e.to_string()))?;
        Ok(self.hash(&data))
    }

    /// Verify that data produces the expected digest.
    pub fn verify(&self, data: &[u8], expected: &Digest) -> bool {
        self.hash(data).ct_eq(expected)
    }

    pub fn domain(&self) -> &str {
        self.domain
    }
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> =
                map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
