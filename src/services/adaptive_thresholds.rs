//! Adaptive threshold controller.
//!
//! Owns the live value of every tunable gate threshold and nudges each one
//! toward the recommendation produced by [`ReliabilityMetrics`]:
//!
//! 1. Analyze: obtain a recommendation and confidence per threshold.
//! 2. Gate: only recommendations with confidence strictly above
//!    [`CONFIDENCE_CUTOFF`] that differ from the current value are applied.
//! 3. Smooth: move by `|gap| * learning_rate`, but never by less than one
//!    whole unit, and never outside `[min, max]`.
//!
//! Config mutation is serialized behind a single async mutex so concurrent
//! runs never lose an update.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    LayerMetrics, ReliabilityLayer, ThresholdAdjustment, ThresholdAnalysis, ThresholdBounds,
    ThresholdConfig, ThresholdConfigPatch, ThresholdKind,
};
use crate::domain::ports::ThresholdConfigRepository;
use crate::services::reliability_metrics::{analyze_from_metrics, ReliabilityMetrics};

/// Recommendations at or below this confidence are never applied.
pub const CONFIDENCE_CUTOFF: f64 = 0.6;
/// Events required before a recommendation carries confidence.
pub const DEFAULT_MIN_DATA_POINTS: usize = 30;
/// Smallest movement of an applied adjustment.
pub const MIN_STEP: f64 = 1.0;

/// Apply the confidence-gated, learning-rate-smoothed update rule.
///
/// Returns the new value and whether the adjustment was applied. A move
/// that the bounds cancel entirely (e.g. `current == max` with a higher
/// recommendation) leaves the value unchanged and reports not applied, the
/// same as an equal recommendation. The controller clamps recommendations
/// into the bounds first, so this only arises when calling the rule
/// directly.
pub fn apply_adjustment(
    bounds: &ThresholdBounds,
    recommended: f64,
    confidence: f64,
) -> (f64, bool) {
    let current = bounds.current;
    let gap = recommended - current;
    let passes_gate = confidence > CONFIDENCE_CUTOFF;

    if !passes_gate || !gap.is_finite() || gap.abs() < f64::EPSILON {
        return (current, false);
    }

    let delta = gap.abs() * bounds.learning_rate;
    let new_value = bounds.clamp(current + gap.signum() * delta.max(MIN_STEP));
    if (new_value - current).abs() < f64::EPSILON {
        return (current, false);
    }
    (new_value, true)
}

pub struct AdaptiveThresholdController {
    config: RwLock<ThresholdConfig>,
    update_lock: Mutex<()>,
    metrics: Option<ReliabilityMetrics>,
    store: Option<Arc<dyn ThresholdConfigRepository>>,
    history: RwLock<Vec<ThresholdAdjustment>>,
}

impl AdaptiveThresholdController {
    pub fn new(config: ThresholdConfig) -> Self {
        Self {
            config: RwLock::new(config),
            update_lock: Mutex::new(()),
            metrics: None,
            store: None,
            history: RwLock::new(Vec::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ThresholdConfig::default())
    }

    /// Attach the telemetry source recommendations are computed from.
    pub fn with_metrics(mut self, metrics: ReliabilityMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Attach persistence for the live config and the adjustment audit log.
    ///
    /// Writes are best-effort: failures are logged and the in-memory config
    /// stays authoritative.
    pub fn with_store(mut self, store: Arc<dyn ThresholdConfigRepository>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the live config with the persisted one, if any.
    pub async fn load_persisted(&self) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        match store.load().await {
            Ok(Some(stored)) => {
                if let Err(reason) = stored.validate() {
                    warn!(%reason, "ignoring invalid persisted threshold config");
                    return false;
                }
                let _guard = self.update_lock.lock().await;
                *self.config.write().await = stored;
                info!("loaded persisted threshold config");
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "failed to load persisted threshold config");
                false
            }
        }
    }

    /// Run one analysis pass over all three thresholds.
    ///
    /// Returns one adjustment per threshold, applied or not. Returns nothing
    /// when adaptation is disabled.
    pub async fn analyze_and_adjust_thresholds(
        &self,
        min_data_points: usize,
    ) -> Vec<ThresholdAdjustment> {
        let _guard = self.update_lock.lock().await;
        let snapshot = self.config.read().await.clone();
        if !snapshot.enabled {
            debug!("adaptive thresholds disabled; skipping analysis");
            return Vec::new();
        }

        let analyses = self.collect_analyses(&snapshot, min_data_points).await;

        let mut adjustments = Vec::with_capacity(analyses.len());
        let mut any_applied = false;
        {
            let mut config = self.config.write().await;
            for (kind, analysis) in analyses {
                let bounds = config.bounds_mut(kind);
                let old_value = bounds.current;
                let (new_value, applied) = apply_adjustment(
                    bounds,
                    analysis.recommended_threshold,
                    analysis.confidence,
                );
                if applied {
                    bounds.current = new_value;
                    any_applied = true;
                    info!(
                        kind = %kind,
                        old_value,
                        new_value,
                        confidence = analysis.confidence,
                        "adjusted threshold"
                    );
                } else {
                    debug!(
                        kind = %kind,
                        current = old_value,
                        recommended = analysis.recommended_threshold,
                        confidence = analysis.confidence,
                        "threshold left unchanged"
                    );
                }

                adjustments.push(ThresholdAdjustment {
                    id: Uuid::new_v4(),
                    layer: kind.layer(),
                    kind,
                    old_value,
                    new_value,
                    recommended_value: analysis.recommended_threshold,
                    confidence: analysis.confidence,
                    reasoning: analysis.reasoning,
                    applied,
                    created_at: Utc::now(),
                });
            }
        }

        self.history
            .write()
            .await
            .extend(adjustments.iter().filter(|a| a.applied).cloned());

        if let Some(store) = &self.store {
            if any_applied {
                let config = self.config.read().await.clone();
                if let Err(e) = store.save(&config).await {
                    warn!(error = %e, "failed to persist threshold config");
                }
            }
            for adjustment in &adjustments {
                if let Err(e) = store.record_adjustment(adjustment).await {
                    warn!(
                        kind = %adjustment.kind,
                        error = %e,
                        "failed to record threshold adjustment"
                    );
                }
            }
        }

        adjustments
    }

    async fn collect_analyses(
        &self,
        config: &ThresholdConfig,
        min_data_points: usize,
    ) -> Vec<(ThresholdKind, ThresholdAnalysis)> {
        let Some(metrics) = &self.metrics else {
            return ThresholdKind::ALL
                .into_iter()
                .map(|kind| {
                    let analysis = no_recommendation(
                        kind,
                        config.bounds(kind),
                        "Reliability metrics unavailable".to_string(),
                    );
                    (kind, analysis)
                })
                .collect();
        };

        let mut analyses = Vec::with_capacity(3);

        let repro = config.bounds(ThresholdKind::Reproduction);
        let analysis = match metrics
            .analyze_threshold(
                ReliabilityLayer::ReproductionCheck,
                repro.current,
                repro.min,
                repro.max,
                min_data_points,
            )
            .await
        {
            Ok(Some(analysis)) => analysis,
            Ok(None) => no_recommendation(
                ThresholdKind::Reproduction,
                repro,
                "No reliability events recorded".to_string(),
            ),
            Err(e) => {
                warn!(error = %e, "reproduction threshold analysis failed");
                no_recommendation(
                    ThresholdKind::Reproduction,
                    repro,
                    format!("Reliability metrics unavailable: {e}"),
                )
            }
        };
        analyses.push((ThresholdKind::Reproduction, analysis));

        // Both loop-detection parameters read the same layer metrics.
        let loop_metrics: Result<Option<LayerMetrics>, String> = metrics
            .get_layer_metrics(ReliabilityLayer::LoopDetection, Some(metrics.window_start()))
            .await
            .map_err(|e| {
                warn!(error = %e, "loop detection metrics unavailable");
                e.to_string()
            });

        for kind in [ThresholdKind::Complexity, ThresholdKind::Iteration] {
            let bounds = config.bounds(kind);
            let analysis = match &loop_metrics {
                Ok(Some(m)) => {
                    analyze_from_metrics(m, bounds.current, bounds.min, bounds.max, min_data_points)
                }
                Ok(None) => {
                    no_recommendation(kind, bounds, "No reliability events recorded".to_string())
                }
                Err(e) => no_recommendation(
                    kind,
                    bounds,
                    format!("Reliability metrics unavailable: {e}"),
                ),
            };
            analyses.push((kind, analysis));
        }

        analyses
    }

    /// Live value of a threshold. `None` when `kind` does not belong to
    /// `layer`.
    pub async fn get_current_threshold(
        &self,
        layer: ReliabilityLayer,
        kind: ThresholdKind,
    ) -> Option<f64> {
        if kind.layer() != layer {
            return None;
        }
        Some(self.config.read().await.bounds(kind).current)
    }

    pub async fn get_config(&self) -> ThresholdConfig {
        self.config.read().await.clone()
    }

    /// Shallow-merge a partial config. Replacement threshold objects have
    /// their `current` clamped into their own bounds; a merged config that
    /// is still invalid is rejected and the live config left untouched.
    pub async fn update_config(
        &self,
        patch: ThresholdConfigPatch,
    ) -> DomainResult<ThresholdConfig> {
        let _guard = self.update_lock.lock().await;
        let mut updated = self.config.read().await.clone();
        updated.merge(patch);
        for kind in ThresholdKind::ALL {
            let bounds = updated.bounds_mut(kind);
            if bounds.min <= bounds.max {
                bounds.current = bounds.clamp(bounds.current);
            }
        }
        updated.validate().map_err(DomainError::ValidationFailed)?;

        *self.config.write().await = updated.clone();
        info!("threshold config updated");
        self.persist(&updated).await;
        Ok(updated)
    }

    /// Restore the documented defaults, discarding learned adjustments.
    pub async fn reset_to_defaults(&self) {
        let _guard = self.update_lock.lock().await;
        let defaults = ThresholdConfig::default();
        *self.config.write().await = defaults.clone();
        info!("threshold config reset to defaults");
        self.persist(&defaults).await;
    }

    /// Applied adjustments since this controller was created.
    pub async fn adjustment_history(&self) -> Vec<ThresholdAdjustment> {
        self.history.read().await.clone()
    }

    async fn persist(&self, config: &ThresholdConfig) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(config).await {
                warn!(error = %e, "failed to persist threshold config");
            }
        }
    }
}

fn no_recommendation(
    kind: ThresholdKind,
    bounds: &ThresholdBounds,
    reasoning: String,
) -> ThresholdAnalysis {
    ThresholdAnalysis {
        layer: kind.layer(),
        current_threshold: bounds.current,
        recommended_threshold: bounds.current,
        confidence: 0.0,
        reasoning,
        data_points: 0,
        trigger_rate: 0.0,
        recovery_rate: 0.0,
    }
}
