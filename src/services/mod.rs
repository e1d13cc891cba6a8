//! Stateless estimators and the reliability learning services.

pub mod adaptive_thresholds;
pub mod complexity;
pub mod reliability_metrics;
pub mod telemetry;

pub use adaptive_thresholds::{apply_adjustment, AdaptiveThresholdController, CONFIDENCE_CUTOFF};
pub use complexity::{detect_convergence, estimate_complexity, is_atomic};
pub use reliability_metrics::{analyze_from_metrics, ReliabilityMetrics};
pub use telemetry::ReliabilityTelemetry;
