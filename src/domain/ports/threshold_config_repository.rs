//! Persistence port for the adaptive threshold controller.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ThresholdAdjustment, ThresholdConfig};

#[async_trait]
pub trait ThresholdConfigRepository: Send + Sync {
    /// Load the stored configuration, if one was ever saved.
    async fn load(&self) -> DomainResult<Option<ThresholdConfig>>;

    /// Replace the stored configuration.
    async fn save(&self, config: &ThresholdConfig) -> DomainResult<()>;

    /// Append an analysis result to the adjustment audit log.
    async fn record_adjustment(&self, adjustment: &ThresholdAdjustment) -> DomainResult<()>;

    /// Most recent adjustments, newest first.
    async fn list_adjustments(&self, limit: usize) -> DomainResult<Vec<ThresholdAdjustment>>;
}
