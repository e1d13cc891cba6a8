//! Write-through store for intermediate run state.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::RunState;

#[async_trait]
pub trait RunSnapshotRepository: Send + Sync {
    /// Upsert the latest snapshot for `state.run_id`.
    async fn save_snapshot(&self, state: &RunState) -> DomainResult<()>;

    async fn get_snapshot(&self, run_id: Uuid) -> DomainResult<Option<RunState>>;
}
