//! Recovery strategy port.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::models::ReliabilityLayer;

/// Gate-specific inputs for a recovery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecoveryDetails {
    /// Gate A fired: no verified reproduction command.
    Reproduction {
        reproduction_command: Option<String>,
        diagnosis_summary: Option<String>,
        affected_files: Vec<String>,
        iteration: u32,
    },
    /// Gate B fired: complexity is diverging above the live thresholds.
    StrategyLoop {
        complexity: f64,
        complexity_threshold: f64,
        iteration_threshold: f64,
        iteration: u32,
        complexity_history: Vec<f64>,
        feedback: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryContext {
    pub layer: ReliabilityLayer,
    /// Threshold in effect when the gate fired.
    pub threshold: f64,
    pub details: RecoveryDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryOutcome {
    pub success: bool,
    pub strategy: String,
    /// Reproduction command (Gate A) or strategy guidance (Gate B).
    pub new_value: Option<String>,
    pub reasoning: String,
}

/// Automated remediation attempted when a gate triggers.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    /// `Ok(None)` means the strategy has nothing to offer for this context.
    async fn attempt_recovery(
        &self,
        context: &RecoveryContext,
        event_id: Option<Uuid>,
    ) -> anyhow::Result<Option<RecoveryOutcome>>;
}
