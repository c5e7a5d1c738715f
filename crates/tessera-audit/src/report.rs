use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tessera_types::{AuditId, DataClassification, Digest, LawfulBasis};

use crate::event::AuditEvent;
use crate::ledger::AuditWriteOutcome;

/// Result of recomputing one event's hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub audit_id: AuditId,
    pub status: IntegrityStatus,
    pub stored_hash: Option<Digest>,
    pub computed_hash: Option<Digest>,
    pub archive: ArchiveCheck,
    pub erased: bool,
    pub checked_at: DateTime<Utc>,
}

impl IntegrityReport {
    pub fn is_valid(&self) -> bool {
        self.status == IntegrityStatus::Valid
            && matches!(self.archive, ArchiveCheck::NotApplicable | ArchiveCheck::Matches)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityStatus {
    Valid,
    HashMismatch,
    Missing,
}

/// Outcome of comparing the primary row with its archived copy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ArchiveCheck {
    /// The classification is not archived.
    NotApplicable,
    Matches,
    Missing,
    /// The archived copy no longer hashes to its own `event_hash`, or that
    /// hash differs from the primary row's original hash.
    Diverged { archived_hash: Digest },
    Unreadable { reason: String },
}

/// One subject's events bucketed by lawful basis and classification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub subject_hash: Digest,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub total_events: usize,
    pub buckets: Vec<ComplianceBucket>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceBucket {
    pub lawful_basis: LawfulBasis,
    pub classification: DataClassification,
    pub count: usize,
    pub first_at: DateTime<Utc>,
    pub last_at: DateTime<Utc>,
}

impl ComplianceReport {
    pub(crate) fn build(
        subject_hash: Digest,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        events: &[AuditEvent],
        generated_at: DateTime<Utc>,
    ) -> Self {
        let mut buckets: BTreeMap<(LawfulBasis, DataClassification), ComplianceBucket> =
            BTreeMap::new();
        for e in events {
            let at = e.event_timestamp;
            buckets
                .entry((e.gdpr_lawful_basis, e.data_classification))
                .and_modify(|b| {
                    b.count += 1;
                    b.first_at = b.first_at.min(at);
                    b.last_at = b.last_at.max(at);
                })
                .or_insert(ComplianceBucket {
                    lawful_basis: e.gdpr_lawful_basis,
                    classification: e.data_classification,
                    count: 1,
                    first_at: at,
                    last_at: at,
                });
        }
        Self {
            subject_hash,
            from,
            to,
            total_events: events.len(),
            buckets: buckets.into_values().collect(),
            generated_at,
        }
    }
}

/// Dashboard counts for one UTC day.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyRollup {
    pub date: NaiveDate,
    pub total_events: usize,
    pub by_event_type: BTreeMap<String, usize>,
    pub by_classification: BTreeMap<DataClassification, usize>,
    pub distinct_subjects: usize,
    pub erased_events: usize,
}

impl DailyRollup {
    pub(crate) fn build(date: NaiveDate, events: &[AuditEvent]) -> Self {
        let mut by_event_type = BTreeMap::new();
        let mut by_classification = BTreeMap::new();
        let mut subjects = BTreeSet::new();
        let mut erased_events = 0;
        for e in events {
            *by_event_type.entry(e.event_type.clone()).or_insert(0) += 1;
            *by_classification.entry(e.data_classification).or_insert(0) += 1;
            if let Some(h) = e.user_id_hash {
                subjects.insert(h);
            }
            if e.is_erased() {
                erased_events += 1;
            }
        }
        Self {
            date,
            total_events: events.len(),
            by_event_type,
            by_classification,
            distinct_subjects: subjects.len(),
            erased_events,
        }
    }
}

/// What a right-to-erasure request did.
#[derive(Clone, Debug, PartialEq)]
pub struct ErasureSummary {
    pub events_anonymized: usize,
    pub completed_at: DateTime<Utc>,
    /// Outcome of writing the `gdpr/erasure_completed` event.
    pub summary_event: AuditWriteOutcome,
}
