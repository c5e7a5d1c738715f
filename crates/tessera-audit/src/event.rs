use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tessera_crypto::{ContentHasher, CryptoError, SealedPayload};
use tessera_types::{AuditId, DataClassification, Digest, LawfulBasis};

/// Payload of an audit event as stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "protection", content = "payload", rename_all = "snake_case")]
pub enum EventDetails {
    Plain(Value),
    /// Envelope-encrypted JSON, bound to the event's audit id.
    Sealed(SealedPayload),
}

impl EventDetails {
    pub fn is_sealed(&self) -> bool {
        matches!(self, Self::Sealed(_))
    }
}

/// Left on a row anonymized by a right-to-erasure request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErasureMark {
    pub erased_at: DateTime<Utc>,
    /// Event hash before anonymization; matches the archived copy.
    pub prior_event_hash: Digest,
}

/// One immutable audit record.
///
/// Identifiers are stored only as keyed one-way hashes. `event_hash` is the
/// tamper-evidence anchor: it must equal [`AuditEvent::compute_hash`] for the
/// record as stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub audit_id: AuditId,
    pub event_timestamp: DateTime<Utc>,
    pub event_type: String,
    pub event_subtype: String,
    pub user_id_hash: Option<Digest>,
    pub session_id_hash: Option<Digest>,
    pub source_ip_hash: Option<Digest>,
    pub user_agent_hash: Option<Digest>,
    pub event_details: EventDetails,
    pub gdpr_lawful_basis: LawfulBasis,
    pub data_classification: DataClassification,
    pub retention_years: u32,
    pub event_hash: Digest,
    pub environment: String,
    pub erasure: Option<ErasureMark>,
}

/// Everything covered by `event_hash`: every field except `audit_id` and
/// `event_hash` itself, in a fixed order.
#[derive(Serialize)]
struct HashedFields<'a> {
    event_timestamp: &'a DateTime<Utc>,
    event_type: &'a str,
    event_subtype: &'a str,
    user_id_hash: &'a Option<Digest>,
    session_id_hash: &'a Option<Digest>,
    source_ip_hash: &'a Option<Digest>,
    user_agent_hash: &'a Option<Digest>,
    event_details: &'a EventDetails,
    gdpr_lawful_basis: &'a LawfulBasis,
    data_classification: &'a DataClassification,
    retention_years: u32,
    environment: &'a str,
    erasure: &'a Option<ErasureMark>,
}

impl AuditEvent {
    /// Recompute the tamper-evidence digest from the stored fields.
    pub fn compute_hash(&self) -> Result<Digest, CryptoError> {
        ContentHasher::AUDIT_EVENT.hash_json(&HashedFields {
            event_timestamp: &self.event_timestamp,
            event_type: &self.event_type,
            event_subtype: &self.event_subtype,
            user_id_hash: &self.user_id_hash,
            session_id_hash: &self.session_id_hash,
            source_ip_hash: &self.source_ip_hash,
            user_agent_hash: &self.user_agent_hash,
            event_details: &self.event_details,
            gdpr_lawful_basis: &self.gdpr_lawful_basis,
            data_classification: &self.data_classification,
            retention_years: self.retention_years,
            environment: &self.environment,
            erasure: &self.erasure,
        })
    }

    /// Recompute and store `event_hash`.
    pub fn seal(&mut self) -> Result<(), CryptoError> {
        self.event_hash = self.compute_hash()?;
        Ok(())
    }

    pub fn hash_matches(&self) -> Result<bool, CryptoError> {
        Ok(self.compute_hash()?.ct_eq(&self.event_hash))
    }

    /// When the retention period ends. `None` only on calendar overflow.
    pub fn retention_expires_at(&self) -> Option<DateTime<Utc>> {
        self.event_timestamp
            .checked_add_months(Months::new(self.retention_years.saturating_mul(12)))
    }

    pub fn is_erased(&self) -> bool {
        self.erasure.is_some()
    }

    /// Drop every link to the data subject and re-seal. The prior hash is
    /// kept in the erasure mark.
    pub fn anonymize(&mut self, erased_at: DateTime<Utc>) -> Result<(), CryptoError> {
        self.erasure = Some(ErasureMark {
            erased_at,
            prior_event_hash: self.event_hash,
        });
        self.user_id_hash = None;
        self.session_id_hash = None;
        self.source_ip_hash = None;
        self.user_agent_hash = None;
        self.seal()
    }
}

/// Caller-supplied fields of a new audit event. Identifiers are raw here and
/// hashed by the ledger before anything is stored.
#[derive(Clone, Debug, PartialEq)]
pub struct AuditEventInput {
    pub event_type: String,
    pub event_subtype: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub source_ip: Option<String>,
    pub user_agent: Option<String>,
    pub event_details: Value,
    pub lawful_basis: LawfulBasis,
    pub classification: DataClassification,
    /// Fixed event time; defaults to the time of writing.
    pub timestamp: Option<DateTime<Utc>>,
}

impl AuditEventInput {
    pub fn new(event_type: impl Into<String>, event_subtype: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            event_subtype: event_subtype.into(),
            user_id: None,
            session_id: None,
            source_ip: None,
            user_agent: None,
            event_details: Value::Object(Default::default()),
            lawful_basis: LawfulBasis::LegitimateInterests,
            classification: DataClassification::default(),
            timestamp: None,
        }
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn source_ip(mut self, ip: impl Into<String>) -> Self {
        self.source_ip = Some(ip.into());
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.event_details = details;
        self
    }

    pub fn lawful_basis(mut self, basis: LawfulBasis) -> Self {
        self.lawful_basis = basis;
        self
    }

    pub fn classification(mut self, classification: DataClassification) -> Self {
        self.classification = classification;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}
