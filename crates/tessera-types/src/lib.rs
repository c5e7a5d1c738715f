//! Foundation types for Tessera.
//!
//! Every other Tessera crate depends on `tessera-types`. The types here carry
//! no behaviour beyond parsing, formatting and classification predicates.
//!
//! # Key Types
//!
//! - [`AuditId`]: UUID v7 identifier of an audit event (time-ordered)
//! - [`CorrelationId`]: UUID v7 identifier tying a failing request to its logs
//! - [`Digest`]: 32-byte BLAKE3 digest used for tamper evidence
//! - [`DataClassification`]: sensitivity tier driving encryption and archival
//! - [`LawfulBasis`]: GDPR Art. 6 basis recorded with every audit event

pub mod classification;
pub mod digest;
pub mod error;
pub mod ids;

pub use classification::{DataClassification, LawfulBasis};
pub use digest::Digest;
pub use error::TypeError;
pub use ids::{AuditId, CorrelationId};
