use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tessera_types::AuditId;

use crate::error::AuditError;
use crate::event::AuditEvent;
use crate::query::AuditQuery;
use crate::traits::AuditRepository;

/// In-memory audit repository for tests, local demos, and embedding.
#[derive(Default)]
pub struct InMemoryAuditRepository {
    events: RwLock<BTreeMap<AuditId, AuditEvent>>,
}

impl InMemoryAuditRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> AuditError {
        AuditError::Repository("lock poisoned".into())
    }
}

#[async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn insert(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let mut events = self.events.write().map_err(|_| Self::poisoned())?;
        if events.contains_key(&event.audit_id) {
            return Err(AuditError::Duplicate(event.audit_id));
        }
        events.insert(event.audit_id, event.clone());
        Ok(())
    }

    async fn get(&self, id: &AuditId) -> Result<Option<AuditEvent>, AuditError> {
        let events = self.events.read().map_err(|_| Self::poisoned())?;
        Ok(events.get(id).cloned())
    }

    async fn replace(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let mut events = self.events.write().map_err(|_| Self::poisoned())?;
        match events.get_mut(&event.audit_id) {
            Some(slot) => {
                *slot = event.clone();
                Ok(())
            }
            None => Err(AuditError::NotFound(event.audit_id)),
        }
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>, AuditError> {
        let events = self.events.read().map_err(|_| Self::poisoned())?;
        Ok(query.apply(events.values()))
    }

    async fn remove(&self, id: &AuditId) -> Result<bool, AuditError> {
        let mut events = self.events.write().map_err(|_| Self::poisoned())?;
        Ok(events.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use tessera_types::{DataClassification, Digest, LawfulBasis};

    use super::*;
    use crate::event::EventDetails;

    fn event(subtype: &str, hour: u32, user: &[u8]) -> AuditEvent {
        AuditEvent {
            audit_id: AuditId::new(),
            event_timestamp: Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap(),
            event_type: "authentication".into(),
            event_subtype: subtype.into(),
            user_id_hash: Some(Digest::of(user)),
            session_id_hash: None,
            source_ip_hash: None,
            user_agent_hash: None,
            event_details: EventDetails::Plain(json!({})),
            gdpr_lawful_basis: LawfulBasis::Contract,
            data_classification: DataClassification::Internal,
            retention_years: 7,
            event_hash: Digest::zero(),
            environment: "test".into(),
            erasure: None,
        }
    }

    #[tokio::test]
    async fn insert_is_once_only() {
        let repo = InMemoryAuditRepository::new();
        let e = event("login_success", 1, b"u1");
        repo.insert(&e).await.unwrap();
        assert!(matches!(repo.insert(&e).await, Err(AuditError::Duplicate(_))));
        assert_eq!(repo.get(&e.audit_id).await.unwrap(), Some(e));
    }

    #[tokio::test]
    async fn replace_requires_existing_row() {
        let repo = InMemoryAuditRepository::new();
        let e = event("login_success", 1, b"u1");
        assert!(matches!(repo.replace(&e).await, Err(AuditError::NotFound(_))));
    }

    #[tokio::test]
    async fn query_filters_and_orders_newest_first() {
        let repo = InMemoryAuditRepository::new();
        for (sub, hour, user) in [
            ("login_success", 1, b"u1"),
            ("login_failure", 2, b"u1"),
            ("login_success", 3, b"u2"),
            ("login_success", 4, b"u1"),
        ] {
            repo.insert(&event(sub, hour, user)).await.unwrap();
        }

        let q = AuditQuery::new()
            .event_subtype("login_success")
            .user_id_hash(Digest::of(b"u1"));
        let hours: Vec<_> = repo
            .query(&q)
            .await
            .unwrap()
            .iter()
            .map(|e| e.event_timestamp.format("%H").to_string())
            .collect();
        assert_eq!(hours, vec!["04", "01"]);

        let ranged = AuditQuery::new()
            .between(
                Utc.with_ymd_and_hms(2024, 5, 1, 2, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 5, 1, 4, 0, 0).unwrap(),
            )
            .limit(1);
        let got = repo.query(&ranged).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].event_subtype, "login_success");
    }
}
