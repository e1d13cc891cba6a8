//! Step handler port.
//!
//! Diagnosis, planning, patch application and verification live behind
//! this trait. The coordinator only sees the patch each step returns.

use async_trait::async_trait;

use crate::domain::models::{ExternalContext, RunState, StatePatch};

#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Run the step and describe the resulting state change.
    ///
    /// An error is fatal to the run; handlers that want another attempt
    /// push feedback and route back to `analysis` instead.
    async fn handle(&self, state: &RunState, ctx: &ExternalContext) -> anyhow::Result<StatePatch>;
}
