//! Tamper-evident, privacy-preserving audit ledger for Tessera.
//!
//! This crate records who did what to which data, without storing who they
//! are. It provides:
//! - [`AuditEvent`] with a content hash over every recorded field
//! - Keyed one-way hashing of user, session, IP and user-agent identifiers
//! - Envelope encryption of details for sensitive classifications
//! - A write-once, date-partitioned archive copy for PHI and security events
//! - Integrity verification, compliance reports and daily rollups
//! - Right-to-erasure by in-place anonymization
//! - The `AuditRepository` trait boundary and [`InMemoryAuditRepository`]
//!
//! Audit writes never fail the caller. A failed write is reported as
//! [`AuditWriteOutcome::Failed`] and logged under [`FALLBACK_TARGET`].

pub mod error;
pub mod event;
pub mod ledger;
pub mod memory;
pub mod protection;
pub mod query;
pub mod report;
pub mod traits;

pub use error::{AuditError, AuditResult};
pub use event::{AuditEvent, AuditEventInput, ErasureMark, EventDetails};
pub use ledger::{AuditLedger, AuditSettings, AuditWriteOutcome, FALLBACK_TARGET};
pub use memory::InMemoryAuditRepository;
pub use protection::{EnvelopeSealed, PayloadProtection, PlainText, ProtectionTable};
pub use query::AuditQuery;
pub use report::{
    ArchiveCheck, ComplianceBucket, ComplianceReport, DailyRollup, ErasureSummary,
    IntegrityReport, IntegrityStatus,
};
pub use traits::AuditRepository;
