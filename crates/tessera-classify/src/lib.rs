//! Error taxonomy for Tessera.
//!
//! Collaborators raise [`ServiceError`] variants that already carry their
//! category; [`ErrorClassifier`] matches them exhaustively into an
//! [`ErrorClassification`] and builds the [`UnifiedError`] a handler logs and
//! returns. Untyped failures go through [`ServiceError::infer`] first.
//!
//! | category | strategy | exceptions |
//! |---|---|---|
//! | EXTERNAL, TECHNICAL | RETRY | circuit open: FALLBACK; audit write: IGNORE |
//! | VALIDATION, BUSINESS | ESCALATE | |
//!
//! Outward bodies carry a correlation id and fixed user text from
//! [`ErrorCode::user_message`], never raw error output.

pub mod classifier;
pub mod error;
pub mod taxonomy;
pub mod unified;

pub use classifier::{ErrorClassification, ErrorClassifier, DEFAULT_SLOW_CLASSIFICATION};
pub use error::{ErrorContext, ServiceError};
pub use taxonomy::{ErrorCategory, ErrorCode, RecoveryStrategy};
pub use unified::{OutwardError, SupportInfo, TechnicalDetails, UnifiedError, SUPPORT_CONTACT};
