//! RunCoordinator - iterative repair loop with reliability gates
//!
//! Drives one run through the step handlers until it finishes, fails, is
//! stopped, or exhausts its iteration cap:
//! - Gate A (reproduction check) before every risky step
//! - Step dispatch through a closed [`StepId`] to handler table
//! - Complexity scoring once per attempt cycle
//! - Gate B (strategy-loop check) once after the loop exits
//!
//! Telemetry, adaptive thresholds, recovery and snapshots are optional
//! [`Capabilities`]. Missing capabilities fall back to the default
//! thresholds and skip recovery.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::models::{
    Config, ExternalContext, FinalResult, HistoryRecord, ReliabilityLayer, RunState, RunStatus,
    StepId, ThresholdKind, DEFAULT_MAX_ITERATIONS,
};
use crate::domain::ports::{
    RecoveryContext, RecoveryDetails, RecoveryOutcome, RecoveryStrategy, RunSnapshotRepository,
    StepHandler,
};
use crate::services::adaptive_thresholds::AdaptiveThresholdController;
use crate::services::complexity::{
    detect_convergence, estimate_complexity, is_atomic, RECENT_WINDOW,
};
use crate::services::telemetry::ReliabilityTelemetry;

pub const REPRODUCTION_MISSING: &str = "reproduction command required but missing";
pub const MAX_ITERATIONS_REACHED: &str = "max iterations reached";
pub const RUN_CANCELLED: &str = "run cancelled";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no handler registered for step '{0}'")]
    MissingHandler(StepId),

    #[error("step '{0}' is terminal and cannot have a handler")]
    TerminalStep(StepId),
}

// ----------------------------------------------------------------------------
// StepRegistry
// ----------------------------------------------------------------------------

/// Fixed mapping from step to handler. Complete by construction: every
/// dispatchable step has a handler, and the terminal step has none.
#[derive(Clone)]
pub struct StepRegistry {
    handlers: BTreeMap<StepId, Arc<dyn StepHandler>>,
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("steps", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StepRegistry {
    pub fn builder() -> StepRegistryBuilder {
        StepRegistryBuilder::default()
    }

    pub fn get(&self, step: StepId) -> Option<&Arc<dyn StepHandler>> {
        self.handlers.get(&step)
    }
}

#[derive(Default)]
pub struct StepRegistryBuilder {
    handlers: BTreeMap<StepId, Arc<dyn StepHandler>>,
}

impl StepRegistryBuilder {
    /// Register a handler; a later registration for the same step wins.
    pub fn register(mut self, step: StepId, handler: Arc<dyn StepHandler>) -> Self {
        self.handlers.insert(step, handler);
        self
    }

    pub fn build(self) -> Result<StepRegistry, RegistryError> {
        if let Some(step) = self.handlers.keys().find(|s| s.is_terminal()) {
            return Err(RegistryError::TerminalStep(*step));
        }
        if let Some(step) = StepId::DISPATCHABLE
            .iter()
            .find(|s| !self.handlers.contains_key(s))
        {
            return Err(RegistryError::MissingHandler(*step));
        }
        Ok(StepRegistry {
            handlers: self.handlers,
        })
    }
}

// ----------------------------------------------------------------------------
// Capabilities
// ----------------------------------------------------------------------------

/// Optional collaborators. Absent entries degrade gracefully.
#[derive(Clone, Default)]
pub struct Capabilities {
    pub telemetry: Option<ReliabilityTelemetry>,
    pub thresholds: Option<Arc<AdaptiveThresholdController>>,
    pub recovery: Option<Arc<dyn RecoveryStrategy>>,
    pub snapshots: Option<Arc<dyn RunSnapshotRepository>>,
}

impl Capabilities {
    pub fn with_telemetry(mut self, telemetry: ReliabilityTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_thresholds(mut self, controller: Arc<AdaptiveThresholdController>) -> Self {
        self.thresholds = Some(controller);
        self
    }

    pub fn with_recovery(mut self, recovery: Arc<dyn RecoveryStrategy>) -> Self {
        self.recovery = Some(recovery);
        self
    }

    pub fn with_snapshots(mut self, snapshots: Arc<dyn RunSnapshotRepository>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }
}

/// Result of asking the recovery collaborator for help.
enum RecoveryAttempt {
    /// No collaborator configured.
    Unavailable,
    /// Collaborator returned nothing or errored.
    NoOutcome,
    Outcome(RecoveryOutcome),
}

impl RecoveryAttempt {
    /// The outcome's value, when recovery succeeded with something usable.
    fn usable_value(&self) -> Option<&str> {
        match self {
            Self::Outcome(outcome) if outcome.success => outcome
                .new_value
                .as_deref()
                .filter(|value| !value.trim().is_empty()),
            _ => None,
        }
    }
}

enum ReproductionGate {
    Clear,
    Recovered,
    Halted,
}

// ----------------------------------------------------------------------------
// RunCoordinator
// ----------------------------------------------------------------------------

pub struct RunCoordinator {
    registry: StepRegistry,
    capabilities: Capabilities,
    max_iterations: u32,
}

impl RunCoordinator {
    pub fn new(registry: StepRegistry, capabilities: Capabilities) -> Self {
        Self {
            registry,
            capabilities,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn from_config(
        registry: StepRegistry,
        capabilities: Capabilities,
        config: &Config,
    ) -> Self {
        Self::new(registry, capabilities).with_max_iterations(config.coordinator.max_iterations)
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Start a fresh run at `analysis`.
    pub async fn run(&self, ctx: &ExternalContext) -> FinalResult {
        self.run_with_state(RunState::new(self.max_iterations), ctx)
            .await
    }

    /// Drive an existing run state to a terminal status.
    #[instrument(
        skip_all,
        fields(run_id = %state.run_id, pipeline_run_id = %ctx.pipeline_run_id)
    )]
    pub async fn run_with_state(&self, mut state: RunState, ctx: &ExternalContext) -> FinalResult {
        info!(
            repository = %ctx.repository,
            max_iterations = state.max_iterations,
            "starting run"
        );

        while state.is_working() && state.iteration < state.max_iterations {
            if ctx.cancellation.is_cancelled() {
                info!(iteration = state.iteration, "run cancelled");
                state.status = RunStatus::Stopped;
                state.failure_reason = Some(RUN_CANCELLED.to_string());
                break;
            }

            let step = state.current_step;
            if step.is_terminal() {
                state.status = RunStatus::Success;
                break;
            }

            if step.is_risky() {
                match self.check_reproduction(&mut state).await {
                    ReproductionGate::Clear => {}
                    // Same iteration, same step, now with a command.
                    ReproductionGate::Recovered => continue,
                    ReproductionGate::Halted => break,
                }
            }

            let Some(handler) = self.registry.get(step) else {
                state.fail(RegistryError::MissingHandler(step).to_string());
                break;
            };

            debug!(step = %step, iteration = state.iteration, "dispatching step");
            match handler.handle(&state, ctx).await {
                Ok(patch) => state.apply(patch),
                Err(e) => {
                    error!(step = %step, error = %e, "step handler failed");
                    state.fail(e.to_string());
                    break;
                }
            }

            if !state.is_working() {
                break;
            }

            // Handing control back to analysis closes an attempt cycle.
            let iteration_closed = state.current_step == StepId::Analysis;
            if iteration_closed {
                state.iteration += 1;
            }
            state.history.push(HistoryRecord {
                step,
                action: "transition".to_string(),
                timestamp: Utc::now(),
            });
            debug!(step = %step, next = %state.current_step, "step completed");

            // One complexity sample per attempt cycle, including the one that
            // reaches `finish`.
            if iteration_closed || state.current_step.is_terminal() {
                let complexity = estimate_complexity(&state);
                state.complexity_history.push(complexity);
                state.is_atomic = is_atomic(complexity, &state.complexity_history);
                debug!(
                    iteration = state.iteration,
                    complexity,
                    is_atomic = state.is_atomic,
                    "iteration scored"
                );
            }

            self.save_snapshot(&state).await;
        }

        if state.is_working() && state.complexity_history.len() > 2 {
            self.check_strategy_loop(&mut state).await;
        }

        if state.is_working() && state.iteration >= state.max_iterations {
            warn!(iterations = state.iteration, "max iterations reached");
            state.fail(MAX_ITERATIONS_REACHED);
        }

        self.save_snapshot(&state).await;

        let result = FinalResult::from(state);
        info!(
            status = %result.status,
            iterations = result.iterations,
            files_changed = result.files_changed.len(),
            failure_reason = result.failure_reason.as_deref().unwrap_or(""),
            "run finished"
        );
        result
    }

    /// Gate A: risky steps need a verified reproduction command.
    async fn check_reproduction(&self, state: &mut RunState) -> ReproductionGate {
        let threshold = self.threshold(ThresholdKind::Reproduction).await;
        let context = json!({
            "step": state.current_step,
            "category": state.diagnosis.as_ref().map(|d| d.category),
            "affectedFiles": state
                .diagnosis
                .as_ref()
                .map(|d| d.affected_files.clone())
                .unwrap_or_default(),
            "iteration": state.iteration,
            "complexity": state.complexity_history.last(),
        });

        if state.has_reproduction_command() {
            self.record_evaluation(ReliabilityLayer::ReproductionCheck, false, threshold, context)
                .await;
            return ReproductionGate::Clear;
        }

        warn!(step = %state.current_step, "reproduction command required but missing");
        state.reproduction_required = true;
        let event_id = self
            .record_evaluation(ReliabilityLayer::ReproductionCheck, true, threshold, context)
            .await;

        let recovery_context = RecoveryContext {
            layer: ReliabilityLayer::ReproductionCheck,
            threshold,
            details: RecoveryDetails::Reproduction {
                reproduction_command: state.reproduction_command.clone(),
                diagnosis_summary: state.diagnosis.as_ref().map(|d| d.summary.clone()),
                affected_files: state
                    .diagnosis
                    .as_ref()
                    .map(|d| d.affected_files.clone())
                    .unwrap_or_default(),
                iteration: state.iteration,
            },
        };
        let attempt = self.attempt_recovery(&recovery_context, event_id).await;
        self.record_recovery_outcome(event_id, &attempt).await;

        if let Some(command) = attempt.usable_value() {
            info!(command, "recovery supplied a reproduction command");
            state.reproduction_command = Some(command.to_string());
            return ReproductionGate::Recovered;
        }

        state.fail(REPRODUCTION_MISSING);
        ReproductionGate::Halted
    }

    /// Gate B: diverging complexity above the live thresholds is a strategy
    /// loop.
    async fn check_strategy_loop(&self, state: &mut RunState) {
        let complexity_threshold = self.threshold(ThresholdKind::Complexity).await;
        let iteration_threshold = self.threshold(ThresholdKind::Iteration).await;

        let history = &state.complexity_history;
        let convergence = detect_convergence(history);
        let current = history.last().copied().unwrap_or_default();
        let recent_high = history
            .iter()
            .rev()
            .take(RECENT_WINDOW)
            .filter(|c| **c >= complexity_threshold)
            .count();
        let confirmed = convergence.is_diverging
            && current >= complexity_threshold
            && recent_high as f64 >= iteration_threshold;

        let context = json!({
            "complexityHistory": history,
            "currentComplexity": current,
            "trend": convergence.trend,
            "recentHighCount": recent_high,
            "iterationThreshold": iteration_threshold,
            "iteration": state.iteration,
        });

        if !confirmed {
            debug!(trend = %convergence.trend, current, "no strategy loop");
            self.record_evaluation(
                ReliabilityLayer::LoopDetection,
                false,
                complexity_threshold,
                context,
            )
            .await;
            return;
        }

        warn!(history = ?history, "strategy loop detected");
        let event_id = self
            .record_evaluation(
                ReliabilityLayer::LoopDetection,
                true,
                complexity_threshold,
                context,
            )
            .await;

        let recovery_context = RecoveryContext {
            layer: ReliabilityLayer::LoopDetection,
            threshold: complexity_threshold,
            details: RecoveryDetails::StrategyLoop {
                complexity: current,
                complexity_threshold,
                iteration_threshold,
                iteration: state.iteration,
                complexity_history: history.clone(),
                feedback: state.feedback.clone(),
            },
        };
        let attempt = self.attempt_recovery(&recovery_context, event_id).await;
        self.record_recovery_outcome(event_id, &attempt).await;

        if let Some(guidance) = attempt.usable_value() {
            info!("recovery supplied new strategy guidance");
            state.recovery_guidance = Some(guidance.to_string());
            state.complexity_history.clear();
            return;
        }

        let reason = format!("strategy loop detected: complexity {:?}", state.complexity_history);
        state.loop_detected = true;
        state.fail(reason);
    }

    async fn threshold(&self, kind: ThresholdKind) -> f64 {
        match &self.capabilities.thresholds {
            Some(controller) => controller
                .get_current_threshold(kind.layer(), kind)
                .await
                .unwrap_or_else(|| kind.default_value()),
            None => kind.default_value(),
        }
    }

    async fn record_evaluation(
        &self,
        layer: ReliabilityLayer,
        triggered: bool,
        threshold: f64,
        context: serde_json::Value,
    ) -> Option<Uuid> {
        match &self.capabilities.telemetry {
            Some(telemetry) => {
                telemetry
                    .record_evaluation(layer, triggered, threshold, context)
                    .await
            }
            None => None,
        }
    }

    async fn attempt_recovery(
        &self,
        context: &RecoveryContext,
        event_id: Option<Uuid>,
    ) -> RecoveryAttempt {
        let Some(recovery) = &self.capabilities.recovery else {
            debug!(layer = %context.layer, "recovery unavailable");
            return RecoveryAttempt::Unavailable;
        };
        match recovery.attempt_recovery(context, event_id).await {
            Ok(Some(outcome)) => {
                info!(
                    layer = %context.layer,
                    strategy = %outcome.strategy,
                    success = outcome.success,
                    reasoning = %outcome.reasoning,
                    "recovery attempted"
                );
                RecoveryAttempt::Outcome(outcome)
            }
            Ok(None) => RecoveryAttempt::NoOutcome,
            Err(e) => {
                warn!(layer = %context.layer, error = %e, "recovery strategy failed");
                RecoveryAttempt::NoOutcome
            }
        }
    }

    async fn record_recovery_outcome(&self, event_id: Option<Uuid>, attempt: &RecoveryAttempt) {
        let Some(telemetry) = &self.capabilities.telemetry else {
            return;
        };
        match attempt {
            RecoveryAttempt::Unavailable => {}
            RecoveryAttempt::NoOutcome => {
                telemetry.record_recovery_outcome(event_id, false, None).await;
            }
            RecoveryAttempt::Outcome(outcome) => {
                telemetry
                    .record_recovery_outcome(
                        event_id,
                        attempt.usable_value().is_some(),
                        Some(&outcome.strategy),
                    )
                    .await;
            }
        }
    }

    async fn save_snapshot(&self, state: &RunState) {
        if let Some(snapshots) = &self.capabilities.snapshots {
            if let Err(e) = snapshots.save_snapshot(state).await {
                warn!(error = %e, "failed to save run snapshot");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{
        create_migrated_test_pool, SqliteReliabilityEventRepository, SqliteRunSnapshotRepository,
    };
    use crate::domain::errors::{DomainError, DomainResult};
    use crate::domain::models::{
        Diagnosis, ErrorCategory, ReliabilityEvent, StatePatch, ThresholdConfig,
    };
    use crate::domain::ports::ReliabilityEventRepository;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    /// Handler backed by a closure, counting its calls.
    struct FnHandler<F> {
        f: F,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl<F> StepHandler for FnHandler<F>
    where
        F: Fn(&RunState) -> anyhow::Result<StatePatch> + Send + Sync,
    {
        async fn handle(
            &self,
            state: &RunState,
            _ctx: &ExternalContext,
        ) -> anyhow::Result<StatePatch> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.f)(state)
        }
    }

    fn handler<F>(f: F) -> (Arc<dyn StepHandler>, Arc<AtomicUsize>)
    where
        F: Fn(&RunState) -> anyhow::Result<StatePatch> + Send + Sync + 'static,
    {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(FnHandler {
                f,
                calls: Arc::clone(&calls),
            }),
            calls,
        )
    }

    struct FixedRecovery(Option<RecoveryOutcome>);

    #[async_trait]
    impl RecoveryStrategy for FixedRecovery {
        async fn attempt_recovery(
            &self,
            _context: &RecoveryContext,
            _event_id: Option<Uuid>,
        ) -> anyhow::Result<Option<RecoveryOutcome>> {
            Ok(self.0.clone())
        }
    }

    fn diagnosis() -> Diagnosis {
        Diagnosis {
            category: ErrorCategory::TestFailure,
            summary: "assertion failed in parser".to_string(),
            confidence: 0.8,
            affected_files: vec!["src/parser.rs".to_string()],
        }
    }

    fn ctx() -> ExternalContext {
        ExternalContext::new("pipeline-42", "acme/widgets")
    }

    /// analysis -> planning -> execution -> verification -> finish
    struct Steps {
        registry: StepRegistry,
        execution_calls: Arc<AtomicUsize>,
    }

    fn happy_steps(with_command: bool) -> Steps {
        let (analysis, _) = handler(move |_| {
            let mut patch = StatePatch::goto(StepId::Planning).with_diagnosis(diagnosis());
            if with_command {
                patch = patch.with_reproduction_command("cargo test parser");
            }
            Ok(patch)
        });
        let (planning, _) = handler(|_| Ok(StatePatch::goto(StepId::Execution)));
        let (execution, execution_calls) = handler(|state| {
            Ok(StatePatch::goto(StepId::Verification).add_files(state, ["src/parser.rs"]))
        });
        let (verification, _) = handler(|_| Ok(StatePatch::goto(StepId::Finish)));

        let registry = StepRegistry::builder()
            .register(StepId::Analysis, analysis)
            .register(StepId::Planning, planning)
            .register(StepId::Execution, execution)
            .register(StepId::Verification, verification)
            .build()
            .unwrap();
        Steps {
            registry,
            execution_calls,
        }
    }

    async fn sqlite_telemetry() -> (ReliabilityTelemetry, sqlx::SqlitePool) {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = SqliteReliabilityEventRepository::new(pool.clone());
        let telemetry = ReliabilityTelemetry::new(Arc::new(repo));
        (telemetry, pool)
    }

    // --- registry ---

    #[test]
    fn test_registry_rejects_missing_handler() {
        let (analysis, _) = handler(|_| Ok(StatePatch::default()));
        let err = StepRegistry::builder()
            .register(StepId::Analysis, analysis)
            .build()
            .unwrap_err();
        assert_eq!(err, RegistryError::MissingHandler(StepId::Planning));
    }

    #[test]
    fn test_registry_rejects_terminal_handler() {
        let (finish, _) = handler(|_| Ok(StatePatch::default()));
        let err = StepRegistry::builder()
            .register(StepId::Finish, finish)
            .build()
            .unwrap_err();
        assert_eq!(err, RegistryError::TerminalStep(StepId::Finish));
    }

    // --- run ---

    #[tokio::test]
    async fn test_happy_path_succeeds() {
        let steps = happy_steps(true);
        let (telemetry, _pool) = sqlite_telemetry().await;
        let coordinator = RunCoordinator::new(
            steps.registry,
            Capabilities::default().with_telemetry(telemetry.clone()),
        );

        let result = coordinator.run(&ctx()).await;

        assert_eq!(result.status, RunStatus::Success);
        assert_eq!(result.iterations, 0);
        assert_eq!(result.files_changed, vec!["src/parser.rs".to_string()]);
        assert!(result.failure_reason.is_none());
        // A single attempt cycle, scored once when it reached `finish`.
        assert_eq!(result.complexity_history.len(), 1);
        assert!(!result.reproduction_required);

        // Planning and execution each passed Gate A.
        let events = telemetry.events(ReliabilityLayer::ReproductionCheck, None).await;
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| !e.triggered));
    }

    #[tokio::test]
    async fn test_missing_reproduction_without_recovery_fails() {
        let steps = happy_steps(false);
        let (telemetry, _pool) = sqlite_telemetry().await;
        let coordinator = RunCoordinator::new(
            steps.registry,
            Capabilities::default().with_telemetry(telemetry.clone()),
        );

        let result = coordinator.run(&ctx()).await;

        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.reproduction_required);
        assert_eq!(result.failure_reason.as_deref(), Some(REPRODUCTION_MISSING));
        assert!(result.files_changed.is_empty());
        assert_eq!(steps.execution_calls.load(Ordering::SeqCst), 0);

        let events = telemetry.events(ReliabilityLayer::ReproductionCheck, None).await;
        assert_eq!(events.len(), 1);
        assert!(events[0].triggered);
        assert!(!events[0].recovery_attempted);
        assert_eq!(events[0].context["category"], "test_failure");
    }

    #[tokio::test]
    async fn test_recovered_reproduction_retries_same_step() {
        let steps = happy_steps(false);
        let (telemetry, _pool) = sqlite_telemetry().await;
        let recovery = FixedRecovery(Some(RecoveryOutcome {
            success: true,
            strategy: "infer-test-command".to_string(),
            new_value: Some("cargo test parser".to_string()),
            reasoning: "found failing test in log".to_string(),
        }));
        let coordinator = RunCoordinator::new(
            steps.registry,
            Capabilities::default()
                .with_telemetry(telemetry.clone())
                .with_recovery(Arc::new(recovery)),
        );

        let result = coordinator.run(&ctx()).await;

        assert_eq!(result.status, RunStatus::Success);
        assert_eq!(result.iterations, 0);
        assert!(result.reproduction_required);
        assert_eq!(steps.execution_calls.load(Ordering::SeqCst), 1);

        let events = telemetry.events(ReliabilityLayer::ReproductionCheck, None).await;
        let triggered: Vec<_> = events.iter().filter(|e| e.triggered).collect();
        assert_eq!(triggered.len(), 1);
        assert_eq!(triggered[0].recovery_success, Some(true));
        assert_eq!(
            triggered[0].recovery_strategy.as_deref(),
            Some("infer-test-command")
        );
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn test_unusable_recovery_halts() {
        let steps = happy_steps(false);
        let (telemetry, _pool) = sqlite_telemetry().await;
        let recovery = FixedRecovery(Some(RecoveryOutcome {
            success: true,
            strategy: "infer-test-command".to_string(),
            new_value: Some("   ".to_string()),
            reasoning: "nothing found".to_string(),
        }));
        let coordinator = RunCoordinator::new(
            steps.registry,
            Capabilities::default()
                .with_telemetry(telemetry.clone())
                .with_recovery(Arc::new(recovery)),
        );

        let result = coordinator.run(&ctx()).await;
        assert_eq!(result.failure_reason.as_deref(), Some(REPRODUCTION_MISSING));

        let events = telemetry.events(ReliabilityLayer::ReproductionCheck, None).await;
        assert!(events[0].recovery_attempted);
        assert_eq!(events[0].recovery_success, Some(false));
    }

    #[tokio::test]
    async fn test_handler_error_is_fatal() {
        let (analysis, _) = handler(|_| anyhow::bail!("llm provider unavailable"));
        let (other, other_calls) = handler(|_| Ok(StatePatch::default()));
        let registry = StepRegistry::builder()
            .register(StepId::Analysis, analysis)
            .register(StepId::Planning, Arc::clone(&other))
            .register(StepId::Execution, Arc::clone(&other))
            .register(StepId::Verification, other)
            .build()
            .unwrap();

        let result = RunCoordinator::new(registry, Capabilities::default())
            .run(&ctx())
            .await;

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.failure_reason.as_deref(), Some("llm provider unavailable"));
        assert_eq!(other_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handler_can_stop_the_run() {
        let (analysis, _) = handler(|_| {
            Ok(StatePatch::default()
                .with_status(RunStatus::Stopped)
                .with_failure_reason("not a code failure"))
        });
        let (other, _) = handler(|_| Ok(StatePatch::default()));
        let registry = StepRegistry::builder()
            .register(StepId::Analysis, analysis)
            .register(StepId::Planning, Arc::clone(&other))
            .register(StepId::Execution, Arc::clone(&other))
            .register(StepId::Verification, other)
            .build()
            .unwrap();

        let result = RunCoordinator::new(registry, Capabilities::default())
            .run(&ctx())
            .await;

        assert_eq!(result.status, RunStatus::Stopped);
        assert_eq!(result.failure_reason.as_deref(), Some("not a code failure"));
        assert!(result.complexity_history.is_empty());
    }

    #[tokio::test]
    async fn test_retry_loop_exhausts_iterations() {
        let (analysis, _) = handler(|_| {
            Ok(StatePatch::goto(StepId::Planning)
                .with_diagnosis(Diagnosis {
                    category: ErrorCategory::Syntax,
                    summary: "missing semicolon".to_string(),
                    confidence: 1.0,
                    affected_files: vec!["src/lib.rs".to_string()],
                })
                .with_reproduction_command("cargo check"))
        });
        let (planning, _) = handler(|_| Ok(StatePatch::goto(StepId::Execution)));
        let (execution, _) = handler(|_| Ok(StatePatch::goto(StepId::Verification)));
        let (verification, _) = handler(|state| {
            Ok(StatePatch::goto(StepId::Analysis).push_feedback(state, "still failing"))
        });
        let registry = StepRegistry::builder()
            .register(StepId::Analysis, analysis)
            .register(StepId::Planning, planning)
            .register(StepId::Execution, execution)
            .register(StepId::Verification, verification)
            .build()
            .unwrap();

        let result = RunCoordinator::new(registry, Capabilities::default())
            .with_max_iterations(3)
            .run(&ctx())
            .await;

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.iterations, 3);
        assert!(!result.loop_detected);
        assert_eq!(result.failure_reason.as_deref(), Some(MAX_ITERATIONS_REACHED));
        // syntax (1) + 1.5 per feedback entry + 0.5 per iteration, once per cycle
        assert_eq!(result.complexity_history, vec![3.0, 5.0, 7.0]);
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_dispatch() {
        let steps = happy_steps(true);
        let token = CancellationToken::new();
        token.cancel();

        let result = RunCoordinator::new(steps.registry, Capabilities::default())
            .run(&ctx().with_cancellation(token))
            .await;

        assert_eq!(result.status, RunStatus::Stopped);
        assert_eq!(result.failure_reason.as_deref(), Some(RUN_CANCELLED));
        assert_eq!(steps.execution_calls.load(Ordering::SeqCst), 0);
    }

    fn exhausted_state(history: Vec<f64>) -> RunState {
        let mut state = RunState::new(3);
        state.iteration = 3;
        state.complexity_history = history;
        state
    }

    #[tokio::test]
    async fn test_strategy_loop_without_recovery_fails() {
        let steps = happy_steps(true);
        let (telemetry, _pool) = sqlite_telemetry().await;
        let coordinator = RunCoordinator::new(
            steps.registry,
            Capabilities::default().with_telemetry(telemetry.clone()),
        );

        let result = coordinator
            .run_with_state(exhausted_state(vec![12.0, 15.0, 18.0]), &ctx())
            .await;

        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.loop_detected);
        let reason = result.failure_reason.unwrap();
        assert!(reason.contains("[12.0, 15.0, 18.0]"), "{reason}");

        let events = telemetry.events(ReliabilityLayer::LoopDetection, None).await;
        assert_eq!(events.len(), 1);
        assert!(events[0].triggered);
        assert_eq!(events[0].threshold, 15.0);
        assert_eq!(events[0].context["complexityHistory"], json!([12.0, 15.0, 18.0]));
    }

    #[tokio::test]
    async fn test_strategy_loop_recovery_resets_history() {
        let steps = happy_steps(true);
        let recovery = FixedRecovery(Some(RecoveryOutcome {
            success: true,
            strategy: "decompose".to_string(),
            new_value: Some("split the fix per module".to_string()),
            reasoning: "complexity keeps rising".to_string(),
        }));
        let coordinator = RunCoordinator::new(
            steps.registry,
            Capabilities::default().with_recovery(Arc::new(recovery)),
        );

        let result = coordinator
            .run_with_state(exhausted_state(vec![12.0, 15.0, 18.0]), &ctx())
            .await;

        assert!(!result.loop_detected);
        assert!(result.complexity_history.is_empty());
        assert_eq!(result.recovery_guidance.as_deref(), Some("split the fix per module"));
        // Exhaustion still applies.
        assert_eq!(result.failure_reason.as_deref(), Some(MAX_ITERATIONS_REACHED));
    }

    #[tokio::test]
    async fn test_strategy_loop_uses_live_thresholds() {
        let steps = happy_steps(true);
        let (telemetry, _pool) = sqlite_telemetry().await;
        let mut config = ThresholdConfig::default();
        config.phase3_complexity_threshold.current = 20.0;
        let controller = Arc::new(AdaptiveThresholdController::new(config));
        let coordinator = RunCoordinator::new(
            steps.registry,
            Capabilities::default()
                .with_telemetry(telemetry.clone())
                .with_thresholds(controller),
        );

        let result = coordinator
            .run_with_state(exhausted_state(vec![12.0, 15.0, 18.0]), &ctx())
            .await;

        assert!(!result.loop_detected);
        assert_eq!(result.failure_reason.as_deref(), Some(MAX_ITERATIONS_REACHED));
        let events = telemetry.events(ReliabilityLayer::LoopDetection, None).await;
        assert_eq!(events.len(), 1);
        assert!(!events[0].triggered);
        assert_eq!(events[0].threshold, 20.0);
    }

    #[tokio::test]
    async fn test_converging_history_is_not_a_loop() {
        let steps = happy_steps(true);
        let result = RunCoordinator::new(steps.registry, Capabilities::default())
            .run_with_state(exhausted_state(vec![18.0, 15.0, 12.0]), &ctx())
            .await;
        assert!(!result.loop_detected);
        assert_eq!(result.failure_reason.as_deref(), Some(MAX_ITERATIONS_REACHED));
    }

    #[tokio::test]
    async fn test_snapshots_are_written_through() {
        let steps = happy_steps(true);
        let pool = create_migrated_test_pool().await.unwrap();
        let snapshots = Arc::new(SqliteRunSnapshotRepository::new(pool));
        let coordinator = RunCoordinator::new(
            steps.registry,
            Capabilities::default().with_snapshots(snapshots.clone()),
        );

        let state = RunState::new(5);
        let run_id = state.run_id;
        let result = coordinator.run_with_state(state, &ctx()).await;

        let stored = snapshots.get_snapshot(run_id).await.unwrap().unwrap();
        assert_eq!(stored.status, result.status);
        assert_eq!(stored.history.len(), 4);
    }

    // --- real attempt cycles ---

    /// analysis -> planning -> execution -> verification -> analysis until
    /// the cap, optionally pushing feedback on every failed verification.
    fn cycling_steps(diagnosis: Diagnosis, feedback: Option<&'static str>) -> StepRegistry {
        let (analysis, _) = handler(move |_| {
            Ok(StatePatch::goto(StepId::Planning)
                .with_diagnosis(diagnosis.clone())
                .with_reproduction_command("cargo test"))
        });
        let (planning, _) = handler(|_| Ok(StatePatch::goto(StepId::Execution)));
        let (execution, _) = handler(|_| Ok(StatePatch::goto(StepId::Verification)));
        let (verification, _) = handler(move |state| {
            let patch = StatePatch::goto(StepId::Analysis);
            Ok(match feedback {
                Some(entry) => patch.push_feedback(state, entry),
                None => patch,
            })
        });
        StepRegistry::builder()
            .register(StepId::Analysis, analysis)
            .register(StepId::Planning, planning)
            .register(StepId::Execution, execution)
            .register(StepId::Verification, verification)
            .build()
            .unwrap()
    }

    fn diagnosis_of(category: ErrorCategory, confidence: f64, files: usize) -> Diagnosis {
        Diagnosis {
            category,
            summary: "flaky integration environment".to_string(),
            confidence,
            affected_files: (0..files).map(|i| format!("src/mod_{i}.rs")).collect(),
        }
    }

    #[tokio::test]
    async fn test_iteration_creep_alone_is_a_strategy_loop() {
        // infrastructure (4) + 3 extra files (6) + zero confidence (5) = 15,
        // plus 0.5 per closed cycle.
        let registry = cycling_steps(diagnosis_of(ErrorCategory::Infrastructure, 0.0, 4), None);
        let (telemetry, _pool) = sqlite_telemetry().await;
        let coordinator = RunCoordinator::new(
            registry,
            Capabilities::default().with_telemetry(telemetry.clone()),
        );

        let result = coordinator.run(&ctx()).await;

        assert_eq!(result.iterations, DEFAULT_MAX_ITERATIONS);
        assert_eq!(result.complexity_history, vec![15.5, 16.0, 16.5, 17.0, 17.5]);
        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.loop_detected);
        assert_eq!(
            result.failure_reason.as_deref(),
            Some("strategy loop detected: complexity [15.5, 16.0, 16.5, 17.0, 17.5]")
        );

        let events = telemetry.events(ReliabilityLayer::LoopDetection, None).await;
        assert_eq!(events.len(), 1);
        assert!(events[0].triggered);
        assert_eq!(events[0].context["trend"], "increasing");
    }

    #[tokio::test]
    async fn test_accumulating_feedback_is_a_strategy_loop() {
        // test failure (3) + 2 extra files (4) + full confidence (0) = 7,
        // plus 1.5 per feedback entry and 0.5 per closed cycle.
        let registry = cycling_steps(
            diagnosis_of(ErrorCategory::TestFailure, 1.0, 3),
            Some("verification still failing"),
        );

        let result = RunCoordinator::new(registry, Capabilities::default())
            .run(&ctx())
            .await;

        assert_eq!(result.complexity_history, vec![9.0, 11.0, 13.0, 15.0, 17.0]);
        assert!(result.loop_detected);
        let reason = result.failure_reason.unwrap();
        assert!(reason.contains("[9.0, 11.0, 13.0, 15.0, 17.0]"), "{reason}");
    }

    #[tokio::test]
    async fn test_cycles_below_complexity_threshold_exhaust_iterations() {
        let registry = cycling_steps(diagnosis_of(ErrorCategory::Syntax, 1.0, 1), None);

        let result = RunCoordinator::new(registry, Capabilities::default())
            .with_max_iterations(4)
            .run(&ctx())
            .await;

        assert_eq!(result.complexity_history, vec![1.5, 2.0, 2.5, 3.0]);
        assert!(!result.loop_detected);
        assert_eq!(result.failure_reason.as_deref(), Some(MAX_ITERATIONS_REACHED));
    }

    // --- telemetry outage ---

    /// Event store whose every call fails.
    struct UnavailableEvents;

    #[async_trait]
    impl ReliabilityEventRepository for UnavailableEvents {
        async fn insert(&self, _event: &ReliabilityEvent) -> DomainResult<()> {
            Err(DomainError::DatabaseError("database is locked".to_string()))
        }

        async fn record_recovery_outcome(
            &self,
            _id: Uuid,
            _success: bool,
            _strategy: Option<&str>,
        ) -> DomainResult<bool> {
            Err(DomainError::DatabaseError("database is locked".to_string()))
        }

        async fn get(&self, _id: Uuid) -> DomainResult<Option<ReliabilityEvent>> {
            Err(DomainError::DatabaseError("database is locked".to_string()))
        }

        async fn list_by_layer(
            &self,
            _layer: ReliabilityLayer,
            _since: Option<DateTime<Utc>>,
        ) -> DomainResult<Vec<ReliabilityEvent>> {
            Err(DomainError::DatabaseError("database is locked".to_string()))
        }
    }

    fn unavailable_telemetry() -> ReliabilityTelemetry {
        ReliabilityTelemetry::new(Arc::new(UnavailableEvents))
    }

    #[tokio::test]
    async fn test_reproduction_gate_halts_during_telemetry_outage() {
        let steps = happy_steps(false);
        let coordinator = RunCoordinator::new(
            steps.registry,
            Capabilities::default().with_telemetry(unavailable_telemetry()),
        );

        let result = coordinator.run(&ctx()).await;

        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.reproduction_required);
        assert_eq!(result.failure_reason.as_deref(), Some(REPRODUCTION_MISSING));
        assert_eq!(steps.execution_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_recovery_still_runs_during_telemetry_outage() {
        let steps = happy_steps(false);
        let recovery = FixedRecovery(Some(RecoveryOutcome {
            success: true,
            strategy: "infer-test-command".to_string(),
            new_value: Some("cargo test parser".to_string()),
            reasoning: "found failing test in log".to_string(),
        }));
        let coordinator = RunCoordinator::new(
            steps.registry,
            Capabilities::default()
                .with_telemetry(unavailable_telemetry())
                .with_recovery(Arc::new(recovery)),
        );

        let result = coordinator.run(&ctx()).await;

        assert_eq!(result.status, RunStatus::Success);
        assert_eq!(steps.execution_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_strategy_loop_gate_halts_during_telemetry_outage() {
        let registry = cycling_steps(diagnosis_of(ErrorCategory::Infrastructure, 0.0, 4), None);
        let coordinator = RunCoordinator::new(
            registry,
            Capabilities::default().with_telemetry(unavailable_telemetry()),
        );

        let result = coordinator.run(&ctx()).await;

        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.loop_detected);
        assert!(result
            .failure_reason
            .unwrap()
            .starts_with("strategy loop detected"));
    }
}
