use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tessera_crypto::{EnvelopeCipher, KeyManagementService, PrivacyHasher};
use tessera_store::{ArchiveStore, StoreError};
use tessera_types::{AuditId, DataClassification, Digest, LawfulBasis};
use tracing::{debug, error, info, warn};

use crate::error::{AuditError, AuditResult};
use crate::event::{AuditEvent, AuditEventInput, EventDetails};
use crate::protection::ProtectionTable;
use crate::query::AuditQuery;
use crate::report::{
    ArchiveCheck, ComplianceReport, DailyRollup, ErasureSummary, IntegrityReport, IntegrityStatus,
};
use crate::traits::AuditRepository;

/// `tracing` target of the local fallback line emitted when a write fails.
pub const FALLBACK_TARGET: &str = "tessera::audit::fallback";

/// Ledger settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    pub retention_years: u32,
    /// Budget for the synchronous archive write.
    pub archive_timeout_ms: u64,
    pub environment: String,
}

impl AuditSettings {
    pub fn archive_timeout(&self) -> Duration {
        Duration::from_millis(self.archive_timeout_ms)
    }
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            retention_years: 7,
            archive_timeout_ms: 5_000,
            environment: "development".into(),
        }
    }
}

/// Result of an audit write. Writes never return errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuditWriteOutcome {
    Written {
        audit_id: AuditId,
        event_hash: Digest,
        archived: bool,
    },
    /// Handed to a background task; the outcome is only logged.
    Queued { audit_id: AuditId },
    Failed { audit_id: AuditId, reason: String },
}

impl AuditWriteOutcome {
    pub fn audit_id(&self) -> AuditId {
        match self {
            Self::Written { audit_id, .. }
            | Self::Queued { audit_id }
            | Self::Failed { audit_id, .. } => *audit_id,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Written { .. } => "written",
            Self::Queued { .. } => "queued",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Tamper-evident, privacy-preserving audit ledger.
///
/// Cheap to clone; clones share the same repository, archive, and keys.
#[derive(Clone)]
pub struct AuditLedger {
    inner: Arc<Inner>,
}

struct Inner {
    repository: Arc<dyn AuditRepository>,
    archive: Arc<dyn ArchiveStore>,
    hasher: PrivacyHasher,
    cipher: EnvelopeCipher,
    protection: ProtectionTable,
    settings: AuditSettings,
}

impl AuditLedger {
    pub fn new(
        repository: Arc<dyn AuditRepository>,
        archive: Arc<dyn ArchiveStore>,
        hasher: PrivacyHasher,
        kms: Arc<dyn KeyManagementService>,
        settings: AuditSettings,
    ) -> Self {
        let cipher = EnvelopeCipher::new(kms);
        let protection = ProtectionTable::standard(cipher.clone());
        Self::with_protection(repository, archive, hasher, cipher, protection, settings)
    }

    pub fn with_protection(
        repository: Arc<dyn AuditRepository>,
        archive: Arc<dyn ArchiveStore>,
        hasher: PrivacyHasher,
        cipher: EnvelopeCipher,
        protection: ProtectionTable,
        settings: AuditSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                repository,
                archive,
                hasher,
                cipher,
                protection,
                settings,
            }),
        }
    }

    pub fn settings(&self) -> &AuditSettings {
        &self.inner.settings
    }

    /// Hash of a raw user id as stored in `user_id_hash`.
    pub fn subject_hash(&self, user_id: &str) -> Digest {
        self.inner.hasher.hash_user_id(user_id)
    }

    /// Write one event and wait for it, archive copy included.
    pub async fn log_audit_event(&self, input: AuditEventInput) -> AuditWriteOutcome {
        self.inner.write(AuditId::new(), input).await
    }

    /// Write one event, detaching low-sensitivity writes onto a background
    /// task. Archive-bound classifications are always written before
    /// returning.
    pub async fn submit(&self, input: AuditEventInput) -> AuditWriteOutcome {
        if input.classification.requires_archive() {
            return self.log_audit_event(input).await;
        }
        let audit_id = AuditId::new();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.write(audit_id, input).await;
        });
        AuditWriteOutcome::Queued { audit_id }
    }

    pub async fn get(&self, id: &AuditId) -> AuditResult<Option<AuditEvent>> {
        self.inner.repository.get(id).await
    }

    /// Matching events, newest first.
    pub async fn query(&self, query: &AuditQuery) -> AuditResult<Vec<AuditEvent>> {
        self.inner.repository.query(query).await
    }

    /// A subject's events in `[from, to)` bucketed by lawful basis and
    /// classification.
    pub async fn compliance_report(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AuditResult<ComplianceReport> {
        let subject_hash = self.subject_hash(user_id);
        let events = self
            .query(&AuditQuery::new().user_id_hash(subject_hash).between(from, to))
            .await?;
        Ok(ComplianceReport::build(subject_hash, from, to, &events, Utc::now()))
    }

    /// Counts for one UTC day.
    pub async fn daily_rollup(&self, date: NaiveDate) -> AuditResult<DailyRollup> {
        let (from, to) = day_bounds(date)?;
        let events = self.query(&AuditQuery::new().between(from, to)).await?;
        Ok(DailyRollup::build(date, &events))
    }

    /// Refetch an event, recompute its hash, and cross-check the archived
    /// copy when there is one. Mismatches are reported, never repaired.
    pub async fn verify_audit_integrity(&self, id: &AuditId) -> AuditResult<IntegrityReport> {
        let checked_at = Utc::now();
        let Some(event) = self.get(id).await? else {
            return Ok(IntegrityReport {
                audit_id: *id,
                status: IntegrityStatus::Missing,
                stored_hash: None,
                computed_hash: None,
                archive: ArchiveCheck::NotApplicable,
                erased: false,
                checked_at,
            });
        };

        let computed = event.compute_hash()?;
        let status = if computed.ct_eq(&event.event_hash) {
            IntegrityStatus::Valid
        } else {
            IntegrityStatus::HashMismatch
        };
        let archive = self.inner.check_archive(&event).await;
        let archive_ok = matches!(archive, ArchiveCheck::NotApplicable | ArchiveCheck::Matches);
        if status != IntegrityStatus::Valid || !archive_ok {
            warn!(
                audit_id = %id,
                ?status,
                ?archive,
                "audit integrity check failed"
            );
        }

        Ok(IntegrityReport {
            audit_id: *id,
            status,
            stored_hash: Some(event.event_hash),
            computed_hash: Some(computed),
            archive,
            erased: event.is_erased(),
            checked_at,
        })
    }

    /// Right-to-erasure: anonymize every row linked to `user_id` in place,
    /// then record one `gdpr/erasure_completed` event carrying only the
    /// count.
    ///
    /// Archived copies are write-once and keep their keyed `user_id_hash`.
    /// Integrity checks on an erased row match that copy against
    /// [`ErasureMark::prior_event_hash`](crate::ErasureMark).
    pub async fn delete_user_audit_data(&self, user_id: &str) -> AuditResult<ErasureSummary> {
        let subject = self.subject_hash(user_id);
        let events = self.query(&AuditQuery::new().user_id_hash(subject)).await?;
        let completed_at = Utc::now();

        let mut anonymized = 0;
        for mut event in events {
            event.anonymize(completed_at)?;
            self.inner.repository.replace(&event).await?;
            anonymized += 1;
        }
        info!(events = anonymized, "erasure request completed");

        let summary_event = self
            .log_audit_event(
                AuditEventInput::new("gdpr", "erasure_completed")
                    .details(json!({
                        "events_anonymized": anonymized,
                        "completed_at": completed_at,
                    }))
                    .lawful_basis(LawfulBasis::LegalObligation)
                    .classification(DataClassification::SecurityEvent)
                    .at(completed_at),
            )
            .await;

        Ok(ErasureSummary {
            events_anonymized: anonymized,
            completed_at,
            summary_event,
        })
    }

    /// Plain details of an event, decrypting sealed payloads.
    pub async fn reveal_details(&self, event: &AuditEvent) -> AuditResult<Value> {
        match &event.event_details {
            EventDetails::Plain(value) => Ok(value.clone()),
            EventDetails::Sealed(sealed) => {
                let plaintext = self
                    .inner
                    .cipher
                    .open(sealed, event.audit_id.as_uuid().as_bytes())
                    .await?;
                Ok(serde_json::from_slice(&plaintext)?)
            }
        }
    }

    /// Remove primary rows whose retention period ended before `now`.
    /// Archive copies are write-once and are not touched.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> AuditResult<usize> {
        let events = self
            .query(&AuditQuery::new().between(DateTime::<Utc>::MIN_UTC, now))
            .await?;
        let mut purged = 0;
        for event in events {
            let expired = event.retention_expires_at().is_some_and(|at| at <= now);
            if expired && self.inner.repository.remove(&event.audit_id).await? {
                purged += 1;
            }
        }
        if purged > 0 {
            info!(purged, "expired audit events purged");
        }
        Ok(purged)
    }
}

impl std::fmt::Debug for AuditLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLedger")
            .field("settings", &self.inner.settings)
            .field("protection", &self.inner.protection)
            .finish_non_exhaustive()
    }
}

impl Inner {
    async fn write(&self, audit_id: AuditId, input: AuditEventInput) -> AuditWriteOutcome {
        let outcome = match self.try_write(audit_id, &input).await {
            Ok((event_hash, archived)) => {
                debug!(
                    audit_id = %audit_id,
                    event_type = %input.event_type,
                    event_subtype = %input.event_subtype,
                    archived,
                    "audit event written"
                );
                AuditWriteOutcome::Written {
                    audit_id,
                    event_hash,
                    archived,
                }
            }
            Err(e) => {
                error!(
                    target: FALLBACK_TARGET,
                    audit_id = %audit_id,
                    event_type = %input.event_type,
                    event_subtype = %input.event_subtype,
                    classification = %input.classification,
                    error = %e,
                    "audit write failed"
                );
                AuditWriteOutcome::Failed {
                    audit_id,
                    reason: e.to_string(),
                }
            }
        };
        metrics::counter!("tessera_audit_writes_total", "outcome" => outcome.label()).increment(1);
        outcome
    }

    async fn try_write(
        &self,
        audit_id: AuditId,
        input: &AuditEventInput,
    ) -> AuditResult<(Digest, bool)> {
        let event = self.build_event(audit_id, input).await?;
        self.repository.insert(&event).await?;
        let archived = if event.data_classification.requires_archive() {
            self.archive_event(&event).await?;
            true
        } else {
            false
        };
        Ok((event.event_hash, archived))
    }

    async fn build_event(
        &self,
        audit_id: AuditId,
        input: &AuditEventInput,
    ) -> AuditResult<AuditEvent> {
        let event_details = self
            .protection
            .for_class(input.classification)?
            .protect(&input.event_details, audit_id.as_uuid().as_bytes())
            .await?;

        let mut event = AuditEvent {
            audit_id,
            event_timestamp: input.timestamp.unwrap_or_else(Utc::now),
            event_type: input.event_type.clone(),
            event_subtype: input.event_subtype.clone(),
            user_id_hash: input.user_id.as_deref().map(|u| self.hasher.hash_user_id(u)),
            session_id_hash: input
                .session_id
                .as_deref()
                .map(|s| self.hasher.hash_session_id(s)),
            source_ip_hash: input.source_ip.as_deref().and_then(|ip| self.hasher.hash_ip(ip)),
            user_agent_hash: input
                .user_agent
                .as_deref()
                .map(|ua| self.hasher.hash_user_agent(ua)),
            event_details,
            gdpr_lawful_basis: input.lawful_basis,
            data_classification: input.classification,
            retention_years: self.settings.retention_years,
            event_hash: Digest::zero(),
            environment: self.settings.environment.clone(),
            erasure: None,
        };
        event.seal()?;
        Ok(event)
    }

    /// Write-once copy into the day partition, bounded by the archive timeout.
    async fn archive_event(&self, event: &AuditEvent) -> AuditResult<()> {
        let bytes = serde_json::to_vec(event)?;
        let partition = event.event_timestamp.date_naive();
        let id = event.audit_id.to_string();
        let archive = Arc::clone(&self.archive);
        let timeout = self.settings.archive_timeout();

        let task = tokio::task::spawn_blocking(move || archive.put(partition, &id, &bytes));
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result.map_err(AuditError::from),
            Ok(Err(join)) => Err(AuditError::Internal(format!("archive task failed: {join}"))),
            Err(_) => Err(AuditError::ArchiveTimeout(timeout)),
        }
    }

    async fn check_archive(&self, event: &AuditEvent) -> ArchiveCheck {
        if !event.data_classification.requires_archive() {
            return ArchiveCheck::NotApplicable;
        }
        let partition = event.event_timestamp.date_naive();
        let id = event.audit_id.to_string();
        let archive = Arc::clone(&self.archive);
        let fetched = tokio::task::spawn_blocking(move || archive.get(partition, &id)).await;

        let bytes = match fetched {
            Ok(Ok(Some(bytes))) => bytes,
            Ok(Ok(None)) => return ArchiveCheck::Missing,
            Ok(Err(e)) => return unreadable(e),
            Err(join) => {
                return ArchiveCheck::Unreadable {
                    reason: join.to_string(),
                }
            }
        };
        let archived: AuditEvent = match serde_json::from_slice(&bytes) {
            Ok(a) => a,
            Err(e) => {
                return ArchiveCheck::Unreadable {
                    reason: e.to_string(),
                }
            }
        };

        // An erased row no longer carries its original hash; the archive
        // copy must match the hash recorded at erasure.
        let expected = event
            .erasure
            .as_ref()
            .map(|m| m.prior_event_hash)
            .unwrap_or(event.event_hash);
        let self_consistent = archived.hash_matches().unwrap_or(false);
        if self_consistent && archived.event_hash.ct_eq(&expected) {
            ArchiveCheck::Matches
        } else {
            ArchiveCheck::Diverged {
                archived_hash: archived.event_hash,
            }
        }
    }
}

fn unreadable(e: StoreError) -> ArchiveCheck {
    ArchiveCheck::Unreadable {
        reason: e.to_string(),
    }
}

fn day_bounds(date: NaiveDate) -> AuditResult<(DateTime<Utc>, DateTime<Utc>)> {
    let start = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| AuditError::Internal(format!("invalid day {date}")))?
        .and_utc();
    let next = date
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| AuditError::Internal(format!("no day after {date}")))?
        .and_utc();
    Ok((start, next))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::TimeZone;
    use tessera_crypto::LocalKms;
    use tessera_store::{FsArchive, InMemoryArchive};

    use super::*;
    use crate::memory::InMemoryAuditRepository;

    struct Fixture {
        ledger: AuditLedger,
        repo: Arc<InMemoryAuditRepository>,
        archive: Arc<InMemoryArchive>,
    }

    fn fixture() -> Fixture {
        let repo = Arc::new(InMemoryAuditRepository::new());
        let archive = Arc::new(InMemoryArchive::new());
        let ledger = AuditLedger::new(
            repo.clone(),
            archive.clone(),
            PrivacyHasher::new(b"test-secret"),
            Arc::new(LocalKms::ephemeral()),
            AuditSettings {
                environment: "test".into(),
                ..AuditSettings::default()
            },
        );
        Fixture {
            ledger,
            repo,
            archive,
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn login(ts: DateTime<Utc>) -> AuditEventInput {
        AuditEventInput::new("authentication", "login_success")
            .user("patient-42")
            .session("sess-1")
            .source_ip("203.0.113.5")
            .user_agent("Mozilla/5.0 (X11; Linux x86_64) Firefox/126.0")
            .details(json!({"method": "password"}))
            .lawful_basis(LawfulBasis::Contract)
            .classification(DataClassification::Internal)
            .at(ts)
    }

    fn phi_read(user: &str, ts: DateTime<Utc>) -> AuditEventInput {
        AuditEventInput::new("phi_access", "record_read")
            .user(user)
            .details(json!({"record": "lab-7", "diagnosis": "J45.909"}))
            .lawful_basis(LawfulBasis::VitalInterests)
            .classification(DataClassification::MedicalPhi)
            .at(ts)
    }

    fn written(outcome: &AuditWriteOutcome) -> (AuditId, Digest, bool) {
        match outcome {
            AuditWriteOutcome::Written {
                audit_id,
                event_hash,
                archived,
            } => (*audit_id, *event_hash, *archived),
            other => panic!("expected written, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn identical_input_hashes_identically() {
        let f = fixture();
        let (id_a, hash_a, _) = written(&f.ledger.log_audit_event(login(at(9))).await);
        let (id_b, hash_b, _) = written(&f.ledger.log_audit_event(login(at(9))).await);
        let (_, hash_c, _) = written(&f.ledger.log_audit_event(login(at(10))).await);

        assert_ne!(id_a, id_b);
        assert_eq!(hash_a, hash_b);
        assert_ne!(hash_a, hash_c);
    }

    #[tokio::test]
    async fn stored_identifiers_are_hashed() {
        let f = fixture();
        let (id, _, archived) = written(&f.ledger.log_audit_event(login(at(9))).await);
        assert!(!archived);

        let event = f.ledger.get(&id).await.unwrap().unwrap();
        assert_eq!(event.user_id_hash, Some(f.ledger.subject_hash("patient-42")));
        assert_eq!(event.environment, "test");
        assert_eq!(event.retention_years, 7);
        let stored = serde_json::to_string(&event).unwrap();
        assert!(!stored.contains("patient-42"));
        assert!(!stored.contains("203.0.113"));
        assert!(!stored.contains("sess-1"));
    }

    #[tokio::test]
    async fn addresses_in_one_network_share_a_hash() {
        let f = fixture();
        let a = login(at(9));
        let b = login(at(9)).source_ip("203.0.113.9");
        let (id_a, _, _) = written(&f.ledger.log_audit_event(a).await);
        let (id_b, _, _) = written(&f.ledger.log_audit_event(b).await);

        let ea = f.ledger.get(&id_a).await.unwrap().unwrap();
        let eb = f.ledger.get(&id_b).await.unwrap().unwrap();
        assert!(ea.source_ip_hash.is_some());
        assert_eq!(ea.source_ip_hash, eb.source_ip_hash);
    }

    #[tokio::test]
    async fn tampering_is_detected() {
        let f = fixture();
        let (id, _, _) = written(&f.ledger.log_audit_event(login(at(9))).await);
        assert!(f.ledger.verify_audit_integrity(&id).await.unwrap().is_valid());

        let mut event = f.repo.get(&id).await.unwrap().unwrap();
        event.event_subtype = "login_failure".into();
        f.repo.replace(&event).await.unwrap();

        let report = f.ledger.verify_audit_integrity(&id).await.unwrap();
        assert_eq!(report.status, IntegrityStatus::HashMismatch);
        assert!(!report.is_valid());
        assert_ne!(report.stored_hash, report.computed_hash);
    }

    #[tokio::test]
    async fn unknown_id_reports_missing() {
        let f = fixture();
        let report = f.ledger.verify_audit_integrity(&AuditId::new()).await.unwrap();
        assert_eq!(report.status, IntegrityStatus::Missing);
    }

    #[tokio::test]
    async fn phi_is_sealed_and_archived() {
        let f = fixture();
        let (id, _, archived) = written(&f.ledger.log_audit_event(phi_read("p1", at(9))).await);
        assert!(archived);
        assert_eq!(f.archive.len(), 1);

        let event = f.ledger.get(&id).await.unwrap().unwrap();
        assert!(event.event_details.is_sealed());
        assert!(!serde_json::to_string(&event).unwrap().contains("J45"));
        let details = f.ledger.reveal_details(&event).await.unwrap();
        assert_eq!(details["diagnosis"], "J45.909");

        let report = f.ledger.verify_audit_integrity(&id).await.unwrap();
        assert_eq!(report.archive, ArchiveCheck::Matches);
        assert!(report.is_valid());
    }

    #[tokio::test]
    async fn security_events_are_archived_but_not_sealed() {
        let f = fixture();
        let input = AuditEventInput::new("security", "mfa_disabled")
            .user("admin-1")
            .details(json!({"by": "self"}))
            .classification(DataClassification::SecurityEvent);
        let (id, _, archived) = written(&f.ledger.log_audit_event(input).await);
        assert!(archived);
        let event = f.ledger.get(&id).await.unwrap().unwrap();
        assert!(!event.event_details.is_sealed());
    }

    #[tokio::test]
    async fn lost_archive_copy_is_reported() {
        let f = fixture();
        let (id, _, _) = written(&f.ledger.log_audit_event(phi_read("p1", at(9))).await);

        let elsewhere = AuditLedger::new(
            f.repo.clone(),
            Arc::new(InMemoryArchive::new()),
            PrivacyHasher::new(b"test-secret"),
            Arc::new(LocalKms::ephemeral()),
            AuditSettings::default(),
        );
        let report = elsewhere.verify_audit_integrity(&id).await.unwrap();
        assert_eq!(report.status, IntegrityStatus::Valid);
        assert_eq!(report.archive, ArchiveCheck::Missing);
        assert!(!report.is_valid());
    }

    #[tokio::test]
    async fn archive_on_disk_is_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Arc::new(FsArchive::open(dir.path()).unwrap());
        let ledger = AuditLedger::new(
            Arc::new(InMemoryAuditRepository::new()),
            archive.clone(),
            PrivacyHasher::new(b"test-secret"),
            Arc::new(LocalKms::ephemeral()),
            AuditSettings::default(),
        );
        let (id, _, _) = written(&ledger.log_audit_event(phi_read("p1", at(9))).await);

        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(archive.list(day).unwrap(), vec![id.to_string()]);
        assert!(archive.put(day, &id.to_string(), b"{}").is_err());
        assert!(ledger.verify_audit_integrity(&id).await.unwrap().is_valid());
    }

    #[tokio::test]
    async fn erasure_anonymizes_and_keeps_integrity() {
        let f = fixture();
        let (first, _, _) = written(&f.ledger.log_audit_event(phi_read("p1", at(9))).await);
        let (second, _, _) = written(&f.ledger.log_audit_event(phi_read("p1", at(10))).await);
        let (other, _, _) = written(&f.ledger.log_audit_event(phi_read("p2", at(11))).await);

        let summary = f.ledger.delete_user_audit_data("p1").await.unwrap();
        assert_eq!(summary.events_anonymized, 2);
        assert!(!summary.summary_event.is_failed());

        for id in [first, second] {
            let event = f.ledger.get(&id).await.unwrap().unwrap();
            assert!(event.user_id_hash.is_none());
            assert!(event.is_erased());
            let report = f.ledger.verify_audit_integrity(&id).await.unwrap();
            assert!(report.erased);
            assert!(report.is_valid(), "{report:?}");
        }
        let untouched = f.ledger.get(&other).await.unwrap().unwrap();
        assert!(!untouched.is_erased());

        let remaining = f
            .ledger
            .query(&AuditQuery::new().user_id_hash(f.ledger.subject_hash("p1")))
            .await
            .unwrap();
        assert!(remaining.is_empty());

        let recorded = f
            .ledger
            .query(&AuditQuery::new().event_type("gdpr"))
            .await
            .unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].event_subtype, "erasure_completed");
        assert_eq!(recorded[0].data_classification, DataClassification::SecurityEvent);
        assert!(recorded[0].user_id_hash.is_none());
        let expected = json!({
            "events_anonymized": 2,
            "completed_at": summary.completed_at,
        });
        assert_eq!(recorded[0].event_details, EventDetails::Plain(expected));
    }

    #[tokio::test]
    async fn erased_rows_keep_their_pseudonymous_archive_copy() {
        let f = fixture();
        let (id, original_hash, archived) =
            written(&f.ledger.log_audit_event(phi_read("p1", at(9))).await);
        assert!(archived);

        f.ledger.delete_user_audit_data("p1").await.unwrap();

        let row = f.ledger.get(&id).await.unwrap().unwrap();
        assert!(row.user_id_hash.is_none());
        let mark = row.erasure.clone().unwrap();
        assert_eq!(mark.prior_event_hash, original_hash);
        assert_ne!(row.event_hash, original_hash);

        let bytes = f
            .archive
            .get(at(9).date_naive(), &id.to_string())
            .unwrap()
            .unwrap();
        let copy: AuditEvent = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(copy.user_id_hash, Some(f.ledger.subject_hash("p1")));
        assert_eq!(copy.event_hash, original_hash);
        assert!(!copy.is_erased());

        let report = f.ledger.verify_audit_integrity(&id).await.unwrap();
        assert!(report.erased);
        assert_eq!(report.archive, ArchiveCheck::Matches);
        assert!(report.is_valid(), "{report:?}");
    }

    struct BrokenRepository;

    #[async_trait]
    impl AuditRepository for BrokenRepository {
        async fn insert(&self, _event: &AuditEvent) -> AuditResult<()> {
            Err(AuditError::Repository("connection refused".into()))
        }

        async fn get(&self, _id: &AuditId) -> AuditResult<Option<AuditEvent>> {
            Ok(None)
        }

        async fn replace(&self, event: &AuditEvent) -> AuditResult<()> {
            Err(AuditError::NotFound(event.audit_id))
        }

        async fn query(&self, _query: &AuditQuery) -> AuditResult<Vec<AuditEvent>> {
            Ok(Vec::new())
        }

        async fn remove(&self, _id: &AuditId) -> AuditResult<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn failed_write_is_reported_not_raised() {
        let ledger = AuditLedger::new(
            Arc::new(BrokenRepository),
            Arc::new(InMemoryArchive::new()),
            PrivacyHasher::new(b"test-secret"),
            Arc::new(LocalKms::ephemeral()),
            AuditSettings::default(),
        );
        let outcome = ledger.log_audit_event(login(at(9))).await;
        match outcome {
            AuditWriteOutcome::Failed { reason, .. } => {
                assert!(reason.contains("connection refused"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn submit_detaches_low_sensitivity_writes() {
        let f = fixture();
        let outcome = f.ledger.submit(login(at(9))).await;
        let AuditWriteOutcome::Queued { audit_id } = outcome else {
            panic!("expected queued, got {outcome:?}");
        };

        for _ in 0..100 {
            if f.ledger.get(&audit_id).await.unwrap().is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(f.ledger.get(&audit_id).await.unwrap().is_some());

        let phi = f.ledger.submit(phi_read("p1", at(9))).await;
        assert!(matches!(phi, AuditWriteOutcome::Written { archived: true, .. }));
    }

    #[tokio::test]
    async fn purge_removes_only_expired_rows() {
        let f = fixture();
        let old = Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap();
        written(&f.ledger.log_audit_event(login(old)).await);
        let (recent, _, _) = written(&f.ledger.log_audit_event(login(at(9))).await);

        let purged = f
            .ledger
            .purge_expired(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert_eq!(f.repo.len(), 1);
        assert!(f.ledger.get(&recent).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reports_group_a_subjects_events() {
        let f = fixture();
        f.ledger.log_audit_event(phi_read("p1", at(9))).await;
        f.ledger.log_audit_event(login(at(10)).user("p1")).await;
        f.ledger.log_audit_event(phi_read("p2", at(11))).await;

        let report = f.ledger.compliance_report("p1", at(0), at(23)).await.unwrap();
        assert_eq!(report.total_events, 2);
        assert_eq!(report.buckets.len(), 2);

        let rollup = f
            .ledger
            .daily_rollup(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())
            .await
            .unwrap();
        assert_eq!(rollup.total_events, 3);
        assert_eq!(rollup.distinct_subjects, 2);
        assert_eq!(rollup.by_event_type["phi_access"], 2);
    }
}
