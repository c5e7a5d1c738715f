use async_trait::async_trait;
use tessera_types::AuditId;

use crate::error::AuditError;
use crate::event::AuditEvent;
use crate::query::AuditQuery;

/// Primary, low-latency store of audit events.
///
/// Rows are inserted once. `replace` exists solely for erasure
/// anonymization and `remove` solely for retention purges.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Insert a new event. Fails with [`AuditError::Duplicate`] if the id exists.
    async fn insert(&self, event: &AuditEvent) -> Result<(), AuditError>;

    async fn get(&self, id: &AuditId) -> Result<Option<AuditEvent>, AuditError>;

    /// Overwrite an existing event. Fails with [`AuditError::NotFound`] if
    /// the id is unknown.
    async fn replace(&self, event: &AuditEvent) -> Result<(), AuditError>;

    /// Matching events, newest first.
    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>, AuditError>;

    /// Delete an event. Returns `true` if it existed.
    async fn remove(&self, id: &AuditId) -> Result<bool, AuditError>;
}
