use chrono::{DateTime, Utc};
use tessera_types::Digest;

use crate::event::AuditEvent;

/// Filter over stored audit events. Unset fields match everything; the time
/// range is `[from, to)`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuditQuery {
    pub event_type: Option<String>,
    pub event_subtype: Option<String>,
    pub user_id_hash: Option<Digest>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_type(mut self, t: impl Into<String>) -> Self {
        self.event_type = Some(t.into());
        self
    }

    pub fn event_subtype(mut self, s: impl Into<String>) -> Self {
        self.event_subtype = Some(s.into());
        self
    }

    pub fn user_id_hash(mut self, hash: Digest) -> Self {
        self.user_id_hash = Some(hash);
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(t) = &self.event_type {
            if &event.event_type != t {
                return false;
            }
        }
        if let Some(s) = &self.event_subtype {
            if &event.event_subtype != s {
                return false;
            }
        }
        if let Some(h) = &self.user_id_hash {
            if event.user_id_hash.as_ref() != Some(h) {
                return false;
            }
        }
        if let Some(from) = self.from {
            if event.event_timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if event.event_timestamp >= to {
                return false;
            }
        }
        true
    }

    /// Filter, order newest first, and truncate to `limit`.
    pub fn apply<'a, I>(&self, events: I) -> Vec<AuditEvent>
    where
        I: IntoIterator<Item = &'a AuditEvent>,
    {
        let mut out: Vec<AuditEvent> = events
            .into_iter()
            .filter(|e| self.matches(e))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.event_timestamp
                .cmp(&a.event_timestamp)
                .then_with(|| b.audit_id.cmp(&a.audit_id))
        });
        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }
}
