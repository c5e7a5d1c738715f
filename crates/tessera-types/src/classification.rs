use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Sensitivity tier of an audit event.
///
/// The tier decides two things at write time: whether the event payload is
/// sealed with envelope encryption, and whether a frozen copy goes to the
/// long-term archive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataClassification {
    Public,
    Internal,
    Confidential,
    Restricted,
    MedicalPhi,
    SecurityEvent,
}

impl DataClassification {
    pub const ALL: [Self; 6] = [
        Self::Public,
        Self::Internal,
        Self::Confidential,
        Self::Restricted,
        Self::MedicalPhi,
        Self::SecurityEvent,
    ];

    /// Payloads of this tier are encrypted before they are persisted.
    pub fn requires_encryption(&self) -> bool {
        matches!(self, Self::MedicalPhi | Self::Restricted)
    }

    /// Events of this tier are copied to the write-once archive.
    pub fn requires_archive(&self) -> bool {
        matches!(self, Self::MedicalPhi | Self::SecurityEvent)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Internal => "internal",
            Self::Confidential => "confidential",
            Self::Restricted => "restricted",
            Self::MedicalPhi => "medical_phi",
            Self::SecurityEvent => "security_event",
        }
    }
}

impl Default for DataClassification {
    fn default() -> Self {
        Self::Internal
    }
}

impl fmt::Display for DataClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataClassification {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| TypeError::UnknownClassification(s.to_string()))
    }
}

/// GDPR Art. 6 lawful basis for processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LawfulBasis {
    Consent,
    Contract,
    LegalObligation,
    VitalInterests,
    PublicTask,
    LegitimateInterests,
}

impl LawfulBasis {
    pub const ALL: [Self; 6] = [
        Self::Consent,
        Self::Contract,
        Self::LegalObligation,
        Self::VitalInterests,
        Self::PublicTask,
        Self::LegitimateInterests,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Consent => "consent",
            Self::Contract => "contract",
            Self::LegalObligation => "legal_obligation",
            Self::VitalInterests => "vital_interests",
            Self::PublicTask => "public_task",
            Self::LegitimateInterests => "legitimate_interests",
        }
    }
}

impl fmt::Display for LawfulBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LawfulBasis {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|b| b.as_str() == s)
            .ok_or_else(|| TypeError::UnknownLawfulBasis(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encryption_and_archive_tiers() {
        assert!(DataClassification::MedicalPhi.requires_encryption());
        assert!(DataClassification::Restricted.requires_encryption());
        assert!(!DataClassification::SecurityEvent.requires_encryption());

        assert!(DataClassification::MedicalPhi.requires_archive());
        assert!(DataClassification::SecurityEvent.requires_archive());
        assert!(!DataClassification::Restricted.requires_archive());
        assert!(!DataClassification::Internal.requires_archive());
    }

    #[test]
    fn serde_names_match_as_str() {
        for c in DataClassification::ALL {
            let json = serde_json::to_string(&c).unwrap();
            assert_eq!(json, format!("\"{}\"", c.as_str()));
            assert_eq!(c.as_str().parse::<DataClassification>().unwrap(), c);
        }
        for b in LawfulBasis::ALL {
            let json = serde_json::to_string(&b).unwrap();
            assert_eq!(json, format!("\"{}\"", b.as_str()));
            assert_eq!(b.as_str().parse::<LawfulBasis>().unwrap(), b);
        }
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert_eq!(
            "secret".parse::<DataClassification>().unwrap_err(),
            TypeError::UnknownClassification("secret".into())
        );
        assert!("whim".parse::<LawfulBasis>().is_err());
    }
}
