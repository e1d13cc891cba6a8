//! Reliability event repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ReliabilityEvent, ReliabilityLayer};

/// Append-only store of reliability gate evaluations.
///
/// Events are never deleted. The only mutation allowed after insert is the
/// one-time recovery outcome.
#[async_trait]
pub trait ReliabilityEventRepository: Send + Sync {
    /// Append a new event.
    async fn insert(&self, event: &ReliabilityEvent) -> DomainResult<()>;

    /// Record the recovery outcome of an event.
    ///
    /// Sets `recovery_attempted` together with the outcome. Returns
    /// `Ok(false)` when the event already carries an outcome, and
    /// `DomainError::EventNotFound` when the id is unknown.
    async fn record_recovery_outcome(
        &self,
        id: Uuid,
        success: bool,
        strategy: Option<&str>,
    ) -> DomainResult<bool>;

    /// Load an event by id.
    async fn get(&self, id: Uuid) -> DomainResult<Option<ReliabilityEvent>>;

    /// Events for a layer, oldest first, optionally restricted to those
    /// created at or after `since`.
    async fn list_by_layer(
        &self,
        layer: ReliabilityLayer,
        since: Option<DateTime<Utc>>,
    ) -> DomainResult<Vec<ReliabilityEvent>>;
}
