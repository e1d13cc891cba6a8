//! Non-fatal reliability telemetry client.
//!
//! Learning is an enhancement, not a correctness requirement: the methods
//! here return no `Result`. Repository failures are logged and swallowed so
//! the coordinator can never fail a run because telemetry is down.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::models::{ReliabilityEvent, ReliabilityLayer};
use crate::domain::ports::ReliabilityEventRepository;

#[derive(Clone)]
pub struct ReliabilityTelemetry {
    repo: Arc<dyn ReliabilityEventRepository>,
}

impl ReliabilityTelemetry {
    pub fn new(repo: Arc<dyn ReliabilityEventRepository>) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> Arc<dyn ReliabilityEventRepository> {
        Arc::clone(&self.repo)
    }

    /// Persist a gate evaluation. Returns the event id when the write
    /// succeeded, `None` otherwise.
    pub async fn record_evaluation(
        &self,
        layer: ReliabilityLayer,
        triggered: bool,
        threshold: f64,
        context: serde_json::Value,
    ) -> Option<Uuid> {
        let event = ReliabilityEvent::new(layer, triggered, threshold, context);
        match self.repo.insert(&event).await {
            Ok(()) => {
                debug!(
                    event_id = %event.id,
                    layer = %layer,
                    triggered,
                    threshold,
                    "recorded reliability event"
                );
                Some(event.id)
            }
            Err(e) => {
                warn!(layer = %layer, triggered, error = %e, "failed to record reliability event");
                None
            }
        }
    }

    /// Attach the recovery outcome to a previously recorded event.
    pub async fn record_recovery_outcome(
        &self,
        event_id: Option<Uuid>,
        success: bool,
        strategy: Option<&str>,
    ) {
        let Some(id) = event_id else {
            return;
        };
        match self.repo.record_recovery_outcome(id, success, strategy).await {
            Ok(true) => debug!(event_id = %id, success, "recorded recovery outcome"),
            Ok(false) => debug!(event_id = %id, "recovery outcome already recorded"),
            Err(e) => warn!(event_id = %id, error = %e, "failed to record recovery outcome"),
        }
    }

    /// Events for a layer, or an empty list when the store is unavailable.
    pub async fn events(
        &self,
        layer: ReliabilityLayer,
        since: Option<DateTime<Utc>>,
    ) -> Vec<ReliabilityEvent> {
        self.repo
            .list_by_layer(layer, since)
            .await
            .unwrap_or_else(|e| {
                warn!(layer = %layer, error = %e, "failed to load reliability events");
                Vec::new()
            })
    }
}
