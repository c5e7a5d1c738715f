//! Payload protection strategies.
//!
//! Which strategy protects an event's details is decided once, when the
//! [`ProtectionTable`] is built, from each [`DataClassification`]. The write
//! path only looks the strategy up.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tessera_crypto::EnvelopeCipher;
use tessera_types::DataClassification;

use crate::error::AuditError;
use crate::event::EventDetails;

#[async_trait]
pub trait PayloadProtection: Send + Sync {
    fn name(&self) -> &'static str;

    /// Turn plain details into their stored form. `aad` binds sealed output
    /// to the owning event.
    async fn protect(&self, details: &Value, aad: &[u8]) -> Result<EventDetails, AuditError>;
}

/// Stores details as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainText;

#[async_trait]
impl PayloadProtection for PlainText {
    fn name(&self) -> &'static str {
        "plain"
    }

    async fn protect(&self, details: &Value, _aad: &[u8]) -> Result<EventDetails, AuditError> {
        Ok(EventDetails::Plain(details.clone()))
    }
}

/// Seals details under a fresh data key.
#[derive(Clone)]
pub struct EnvelopeSealed {
    cipher: EnvelopeCipher,
}

impl EnvelopeSealed {
    pub fn new(cipher: EnvelopeCipher) -> Self {
        Self { cipher }
    }
}

#[async_trait]
impl PayloadProtection for EnvelopeSealed {
    fn name(&self) -> &'static str {
        "envelope"
    }

    async fn protect(&self, details: &Value, aad: &[u8]) -> Result<EventDetails, AuditError> {
        let plaintext = serde_json::to_vec(details)?;
        let sealed = self.cipher.seal(&plaintext, aad).await?;
        Ok(EventDetails::Sealed(sealed))
    }
}

/// Strategy per classification.
#[derive(Clone)]
pub struct ProtectionTable {
    by_class: HashMap<DataClassification, Arc<dyn PayloadProtection>>,
}

impl ProtectionTable {
    /// Envelope encryption for classifications that require it, plain text
    /// for the rest.
    pub fn standard(cipher: EnvelopeCipher) -> Self {
        let sealed: Arc<dyn PayloadProtection> = Arc::new(EnvelopeSealed::new(cipher));
        let plain: Arc<dyn PayloadProtection> = Arc::new(PlainText);
        let by_class = DataClassification::ALL
            .into_iter()
            .map(|c| {
                let strategy = if c.requires_encryption() {
                    Arc::clone(&sealed)
                } else {
                    Arc::clone(&plain)
                };
                (c, strategy)
            })
            .collect();
        Self { by_class }
    }

    pub fn with_strategy(
        mut self,
        classification: DataClassification,
        strategy: Arc<dyn PayloadProtection>,
    ) -> Self {
        self.by_class.insert(classification, strategy);
        self
    }

    pub fn for_class(
        &self,
        classification: DataClassification,
    ) -> Result<&dyn PayloadProtection, AuditError> {
        self.by_class
            .get(&classification)
            .map(|s| &**s)
            .ok_or(AuditError::NoProtection(classification))
    }
}

impl std::fmt::Debug for ProtectionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self
            .by_class
            .iter()
            .map(|(c, s)| (c.as_str(), s.name()))
            .collect();
        names.sort();
        f.debug_struct("ProtectionTable")
            .field("by_class", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tessera_crypto::LocalKms;

    use super::*;

    fn table() -> ProtectionTable {
        ProtectionTable::standard(EnvelopeCipher::new(Arc::new(LocalKms::ephemeral())))
    }

    #[test]
    fn sensitive_classes_are_sealed() {
        let t = table();
        for c in DataClassification::ALL {
            let expected = if c.requires_encryption() { "envelope" } else { "plain" };
            assert_eq!(t.for_class(c).unwrap().name(), expected, "{c}");
        }
    }

    #[tokio::test]
    async fn sealed_output_hides_the_payload() {
        let t = table();
        let details = json!({"diagnosis": "J45.909"});
        let stored = t
            .for_class(DataClassification::MedicalPhi)
            .unwrap()
            .protect(&details, b"aad")
            .await
            .unwrap();
        assert!(stored.is_sealed());
        assert!(!serde_json::to_string(&stored).unwrap().contains("J45"));
    }

    #[test]
    fn overrides_replace_the_standard_choice() {
        let cipher = EnvelopeCipher::new(Arc::new(LocalKms::ephemeral()));
        let t = table().with_strategy(
            DataClassification::Confidential,
            Arc::new(EnvelopeSealed::new(cipher)),
        );
        assert_eq!(
            t.for_class(DataClassification::Confidential).unwrap().name(),
            "envelope"
        );
    }
}
