//! Common test utilities for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use fixloop::adapters::sqlite::{
    create_migrated_test_pool, SqliteReliabilityEventRepository, SqliteRunSnapshotRepository,
};
use fixloop::domain::models::{
    Diagnosis, ErrorCategory, ExternalContext, RunState, StatePatch, StepId,
};
use fixloop::domain::ports::StepHandler;
use fixloop::{ReliabilityTelemetry, StepRegistry};
use sqlx::SqlitePool;

/// Handler backed by a plain function of the current state.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> StepHandler for FnHandler<F>
where
    F: Fn(&RunState) -> StatePatch + Send + Sync,
{
    async fn handle(&self, state: &RunState, _ctx: &ExternalContext) -> anyhow::Result<StatePatch> {
        Ok((self.0)(state))
    }
}

pub fn diagnosis() -> Diagnosis {
    Diagnosis {
        category: ErrorCategory::TestFailure,
        summary: "assertion failed in parser".to_string(),
        confidence: 0.8,
        affected_files: vec!["src/parser.rs".to_string()],
    }
}

pub fn ctx() -> ExternalContext {
    ExternalContext::new("pipeline-42", "acme/widgets").with_failure_log("test parser ... FAILED")
}

/// analysis -> planning -> execution -> verification -> finish.
/// The analysis step only sets a reproduction command when asked to.
pub fn linear_registry(with_reproduction: bool) -> StepRegistry {
    StepRegistry::builder()
        .register(
            StepId::Analysis,
            Arc::new(FnHandler(move |_: &RunState| {
                let patch = StatePatch::goto(StepId::Planning).with_diagnosis(diagnosis());
                if with_reproduction {
                    patch.with_reproduction_command("cargo test parser")
                } else {
                    patch
                }
            })),
        )
        .register(
            StepId::Planning,
            Arc::new(FnHandler(|_: &RunState| StatePatch::goto(StepId::Execution))),
        )
        .register(
            StepId::Execution,
            Arc::new(FnHandler(|state: &RunState| {
                StatePatch::goto(StepId::Verification).add_files(state, ["src/parser.rs"])
            })),
        )
        .register(
            StepId::Verification,
            Arc::new(FnHandler(|_: &RunState| StatePatch::goto(StepId::Finish))),
        )
        .build()
        .expect("every dispatchable step is registered")
}

/// analysis -> planning -> execution -> verification -> analysis, with
/// verification never passing. Pushes `feedback` on each failed cycle when
/// given.
pub fn cycling_registry(diagnosis: Diagnosis, feedback: Option<&'static str>) -> StepRegistry {
    StepRegistry::builder()
        .register(
            StepId::Analysis,
            Arc::new(FnHandler(move |_: &RunState| {
                StatePatch::goto(StepId::Planning)
                    .with_diagnosis(diagnosis.clone())
                    .with_reproduction_command("make test")
            })),
        )
        .register(
            StepId::Planning,
            Arc::new(FnHandler(|_: &RunState| StatePatch::goto(StepId::Execution))),
        )
        .register(
            StepId::Execution,
            Arc::new(FnHandler(|_: &RunState| StatePatch::goto(StepId::Verification))),
        )
        .register(
            StepId::Verification,
            Arc::new(FnHandler(move |state: &RunState| {
                let patch = StatePatch::goto(StepId::Analysis);
                match feedback {
                    Some(entry) => patch.push_feedback(state, entry),
                    None => patch,
                }
            })),
        )
        .build()
        .expect("every dispatchable step is registered")
}

pub struct TestStores {
    pub pool: SqlitePool,
    pub telemetry: ReliabilityTelemetry,
    pub snapshots: Arc<SqliteRunSnapshotRepository>,
}

pub async fn stores() -> TestStores {
    let pool = create_migrated_test_pool()
        .await
        .expect("Failed to create test database");
    TestStores {
        telemetry: ReliabilityTelemetry::new(Arc::new(SqliteReliabilityEventRepository::new(
            pool.clone(),
        ))),
        snapshots: Arc::new(SqliteRunSnapshotRepository::new(pool.clone())),
        pool,
    }
}
