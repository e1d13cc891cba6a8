//! Reliability metrics and threshold analysis.
//!
//! Aggregates reliability events into per-gate rates and turns those rates
//! into a threshold recommendation. The recommendation follows a fixed
//! recovery-rate x trigger-rate matrix:
//!
//! | recovery | triggers | reading                    | recommendation | confidence |
//! |----------|----------|----------------------------|----------------|------------|
//! | > 0.7    | > 0.3    | fires often, recovers fine | increase       | 0.7        |
//! | < 0.3    | > 0.2    | fires and usually fails    | decrease       | 0.8        |
//! | any      | < 0.1    | almost never fires         | decrease by 1  | 0.6        |
//! | other    |          | balanced                   | no change      | 0.9        |
//!
//! A gate with data but no triggers at all gets a cautious decrease by 1 at
//! confidence 0.5.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::domain::errors::DomainResult;
use crate::domain::models::{LayerMetrics, ReliabilityLayer, ThresholdAnalysis};
use crate::domain::ports::ReliabilityEventRepository;

/// Trailing window analyzed by default.
pub const ANALYSIS_WINDOW_DAYS: i64 = 30;

const HIGH_RECOVERY_RATE: f64 = 0.7;
const LOW_RECOVERY_RATE: f64 = 0.3;
const FREQUENT_TRIGGER_RATE: f64 = 0.3;
const FAILING_TRIGGER_RATE: f64 = 0.2;
const IDLE_TRIGGER_RATE: f64 = 0.1;

const IDLE_GATE_CONFIDENCE: f64 = 0.5;
const INCREASE_CONFIDENCE: f64 = 0.7;
const DECREASE_CONFIDENCE: f64 = 0.8;
const RARE_TRIGGER_CONFIDENCE: f64 = 0.6;
const BALANCED_CONFIDENCE: f64 = 0.9;

/// Reads reliability telemetry and produces per-gate metrics and
/// threshold recommendations.
#[derive(Clone)]
pub struct ReliabilityMetrics {
    repo: Arc<dyn ReliabilityEventRepository>,
    window: Duration,
}

impl ReliabilityMetrics {
    pub fn new(repo: Arc<dyn ReliabilityEventRepository>) -> Self {
        Self {
            repo,
            window: Duration::days(ANALYSIS_WINDOW_DAYS),
        }
    }

    pub fn with_window_days(mut self, days: i64) -> Self {
        self.window = Duration::days(days);
        self
    }

    /// Start of the trailing analysis window.
    pub fn window_start(&self) -> DateTime<Utc> {
        Utc::now() - self.window
    }

    /// Aggregate metrics for a layer. `None` when the layer has no events.
    pub async fn get_layer_metrics(
        &self,
        layer: ReliabilityLayer,
        since: Option<DateTime<Utc>>,
    ) -> DomainResult<Option<LayerMetrics>> {
        let events = self.repo.list_by_layer(layer, since).await?;
        Ok(LayerMetrics::from_events(layer, &events))
    }

    /// Analyze a gate's threshold over the trailing window.
    ///
    /// Returns `None` when the window holds no events at all, and a
    /// zero-confidence analysis when it holds fewer than `min_data_points`.
    pub async fn analyze_threshold(
        &self,
        layer: ReliabilityLayer,
        current: f64,
        min: f64,
        max: f64,
        min_data_points: usize,
    ) -> DomainResult<Option<ThresholdAnalysis>> {
        let events = self.repo.list_by_layer(layer, Some(self.window_start())).await?;
        if events.is_empty() {
            return Ok(None);
        }

        let total = events.len();
        let triggered = events.iter().filter(|e| e.triggered).count();
        let recovered = events.iter().filter(|e| e.triggered && e.recovered()).count();
        let recovery_rate = if triggered == 0 {
            0.0
        } else {
            recovered as f64 / triggered as f64
        };

        let analysis = analyze_rates(
            layer,
            RateInputs {
                total,
                triggered,
                recovery_rate,
            },
            current,
            min,
            max,
            min_data_points,
        );
        debug!(
            layer = %layer,
            data_points = total,
            recommended = analysis.recommended_threshold,
            confidence = analysis.confidence,
            "analyzed threshold"
        );
        Ok(Some(analysis))
    }
}

/// Analyze a threshold straight from aggregated metrics, using
/// `recovery_success_rate` as the recovery rate.
pub fn analyze_from_metrics(
    metrics: &LayerMetrics,
    current: f64,
    min: f64,
    max: f64,
    min_data_points: usize,
) -> ThresholdAnalysis {
    analyze_rates(
        metrics.layer,
        RateInputs {
            total: metrics.total_events,
            triggered: metrics.triggered_events,
            recovery_rate: metrics.recovery_success_rate,
        },
        current,
        min,
        max,
        min_data_points,
    )
}

struct RateInputs {
    total: usize,
    triggered: usize,
    recovery_rate: f64,
}

fn analyze_rates(
    layer: ReliabilityLayer,
    inputs: RateInputs,
    current: f64,
    min: f64,
    max: f64,
    min_data_points: usize,
) -> ThresholdAnalysis {
    let trigger_rate = if inputs.total == 0 {
        0.0
    } else {
        inputs.triggered as f64 / inputs.total as f64
    };
    let clamp = |v: f64| v.clamp(min, max);

    let (recommended, confidence, reasoning) = if inputs.total < min_data_points {
        (
            current,
            0.0,
            format!(
                "Insufficient data: {} events (minimum {} required)",
                inputs.total, min_data_points
            ),
        )
    } else if inputs.triggered == 0 {
        (
            clamp(current - 1.0),
            IDLE_GATE_CONFIDENCE,
            format!(
                "Gate never triggered in {} evaluations; \
                 may be miscalibrated, decreasing cautiously",
                inputs.total
            ),
        )
    } else if inputs.recovery_rate > HIGH_RECOVERY_RATE && trigger_rate > FREQUENT_TRIGGER_RATE {
        let step = ((trigger_rate - FREQUENT_TRIGGER_RATE) * 10.0).round().max(1.0);
        (
            clamp(current + step),
            INCREASE_CONFIDENCE,
            format!(
                "Trigger rate {:.0}% with {:.0}% recovery: \
                 gate fires too often but recovers, increasing by {step}",
                trigger_rate * 100.0,
                inputs.recovery_rate * 100.0
            ),
        )
    } else if inputs.recovery_rate < LOW_RECOVERY_RATE && trigger_rate > FAILING_TRIGGER_RATE {
        let step = ((1.0 - inputs.recovery_rate) * 2.0).round().max(1.0);
        (
            clamp(current - step),
            DECREASE_CONFIDENCE,
            format!(
                "Trigger rate {:.0}% with only {:.0}% recovery: \
                 gate is too aggressive, decreasing by {step}",
                trigger_rate * 100.0,
                inputs.recovery_rate * 100.0
            ),
        )
    } else if trigger_rate < IDLE_TRIGGER_RATE {
        (
            clamp(current - 1.0),
            RARE_TRIGGER_CONFIDENCE,
            format!(
                "Trigger rate {:.0}% is very low: decreasing by 1 to catch more cases",
                trigger_rate * 100.0
            ),
        )
    } else {
        (
            current,
            BALANCED_CONFIDENCE,
            format!(
                "Balanced: trigger rate {:.0}%, recovery rate {:.0}%",
                trigger_rate * 100.0,
                inputs.recovery_rate * 100.0
            ),
        )
    };

    ThresholdAnalysis {
        layer,
        current_threshold: current,
        recommended_threshold: recommended,
        confidence,
        reasoning,
        data_points: inputs.total,
        trigger_rate,
        recovery_rate: inputs.recovery_rate,
    }
}
