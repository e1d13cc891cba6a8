//! Domain models for the fixloop control loop.

pub mod config;
pub mod convergence;
pub mod reliability;
pub mod run_state;

pub use config::{AnalysisConfig, Config, CoordinatorConfig, DatabaseConfig, LoggingConfig};
pub use convergence::{ConvergenceResult, Trend};
pub use reliability::{
    LayerMetrics, ReliabilityEvent, ReliabilityLayer, ThresholdAdjustment, ThresholdAnalysis,
    ThresholdBounds, ThresholdConfig, ThresholdConfigPatch, ThresholdKind,
    DEFAULT_COMPLEXITY_THRESHOLD, DEFAULT_ITERATION_THRESHOLD, DEFAULT_REPRODUCTION_THRESHOLD,
};
pub use run_state::{
    Diagnosis, ErrorCategory, ExternalContext, FinalResult, HistoryRecord, RunState, RunStatus,
    StatePatch, StepId, DEFAULT_MAX_ITERATIONS,
};
