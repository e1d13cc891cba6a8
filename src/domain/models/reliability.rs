//! Reliability gate telemetry and threshold types.
//!
//! Every evaluation of a reliability gate produces a [`ReliabilityEvent`].
//! The accumulated events are the only input to threshold learning: they are
//! aggregated into [`LayerMetrics`], analyzed into a recommendation, and the
//! recommendation is applied to the live [`ThresholdConfig`] as a
//! [`ThresholdAdjustment`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::DomainError;

/// Fallback reproduction threshold when no controller is available.
pub const DEFAULT_REPRODUCTION_THRESHOLD: f64 = 1.0;
/// Fallback high-complexity threshold when no controller is available.
pub const DEFAULT_COMPLEXITY_THRESHOLD: f64 = 15.0;
/// Fallback strategy-loop iteration threshold when no controller is available.
pub const DEFAULT_ITERATION_THRESHOLD: f64 = 2.0;

// ---------------------------------------------------------------------------
// ReliabilityLayer / ThresholdKind
// ---------------------------------------------------------------------------

/// The reliability gate that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReliabilityLayer {
    /// Gate A: a verified reproduction command must exist before risky steps.
    #[serde(rename = "phase2-reproduction")]
    ReproductionCheck,
    /// Gate B: complexity divergence across iterations signals a strategy loop.
    #[serde(rename = "phase3-loop-detection")]
    LoopDetection,
}

impl ReliabilityLayer {
    pub const ALL: [ReliabilityLayer; 2] = [Self::ReproductionCheck, Self::LoopDetection];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReproductionCheck => "phase2-reproduction",
            Self::LoopDetection => "phase3-loop-detection",
        }
    }
}

impl fmt::Display for ReliabilityLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReliabilityLayer {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "phase2-reproduction" | "reproduction-check" | "reproduction" => {
                Ok(Self::ReproductionCheck)
            }
            "phase3-loop-detection" | "loop-detection" | "loop" => Ok(Self::LoopDetection),
            other => Err(DomainError::UnknownLayer(other.to_string())),
        }
    }
}

/// A tunable threshold parameter owned by the adaptive controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdKind {
    /// Sensitivity of the reproduction-required gate.
    Reproduction,
    /// Complexity score above which an iteration counts as "high".
    Complexity,
    /// Number of high-complexity diverging samples that confirm a loop.
    Iteration,
}

impl ThresholdKind {
    pub const ALL: [ThresholdKind; 3] = [Self::Reproduction, Self::Complexity, Self::Iteration];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reproduction => "reproduction",
            Self::Complexity => "complexity",
            Self::Iteration => "iteration",
        }
    }

    /// The gate whose telemetry drives this parameter.
    pub const fn layer(self) -> ReliabilityLayer {
        match self {
            Self::Reproduction => ReliabilityLayer::ReproductionCheck,
            Self::Complexity | Self::Iteration => ReliabilityLayer::LoopDetection,
        }
    }

    pub const fn default_value(self) -> f64 {
        match self {
            Self::Reproduction => DEFAULT_REPRODUCTION_THRESHOLD,
            Self::Complexity => DEFAULT_COMPLEXITY_THRESHOLD,
            Self::Iteration => DEFAULT_ITERATION_THRESHOLD,
        }
    }
}

impl fmt::Display for ThresholdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThresholdKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reproduction" => Ok(Self::Reproduction),
            "complexity" => Ok(Self::Complexity),
            "iteration" => Ok(Self::Iteration),
            other => Err(DomainError::UnknownThresholdKind(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ThresholdBounds / ThresholdConfig
// ---------------------------------------------------------------------------

/// Bounds and live value of one tunable threshold.
///
/// `current` is kept within `[min, max]` by every mutation path of the
/// controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdBounds {
    pub min: f64,
    pub max: f64,
    pub current: f64,
    /// Fraction of the gap to the recommendation applied per cycle (0-1).
    pub learning_rate: f64,
}

impl ThresholdBounds {
    pub const fn new(min: f64, max: f64, current: f64, learning_rate: f64) -> Self {
        Self {
            min,
            max,
            current,
            learning_rate,
        }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Check the structural invariants, returning a description of the
    /// first violation.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.min.is_finite() && self.max.is_finite() && self.current.is_finite()) {
            return Err("threshold bounds must be finite".to_string());
        }
        if self.min > self.max {
            return Err(format!("min ({}) exceeds max ({})", self.min, self.max));
        }
        if !self.contains(self.current) {
            return Err(format!(
                "current ({}) outside [{}, {}]",
                self.current, self.min, self.max
            ));
        }
        if !(0.0..=1.0).contains(&self.learning_rate) {
            return Err(format!(
                "learning rate ({}) outside [0, 1]",
                self.learning_rate
            ));
        }
        Ok(())
    }
}

/// Serializable configuration of the adaptive threshold controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_reproduction_bounds")]
    pub phase2_reproduction_threshold: ThresholdBounds,

    #[serde(default = "default_complexity_bounds")]
    pub phase3_complexity_threshold: ThresholdBounds,

    #[serde(default = "default_iteration_bounds")]
    pub phase3_iteration_threshold: ThresholdBounds,
}

const fn default_enabled() -> bool {
    true
}

const fn default_reproduction_bounds() -> ThresholdBounds {
    ThresholdBounds::new(1.0, 3.0, DEFAULT_REPRODUCTION_THRESHOLD, 0.1)
}

const fn default_complexity_bounds() -> ThresholdBounds {
    ThresholdBounds::new(10.0, 25.0, DEFAULT_COMPLEXITY_THRESHOLD, 0.1)
}

const fn default_iteration_bounds() -> ThresholdBounds {
    ThresholdBounds::new(1.0, 5.0, DEFAULT_ITERATION_THRESHOLD, 0.1)
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            phase2_reproduction_threshold: default_reproduction_bounds(),
            phase3_complexity_threshold: default_complexity_bounds(),
            phase3_iteration_threshold: default_iteration_bounds(),
        }
    }
}

impl ThresholdConfig {
    pub const fn bounds(&self, kind: ThresholdKind) -> &ThresholdBounds {
        match kind {
            ThresholdKind::Reproduction => &self.phase2_reproduction_threshold,
            ThresholdKind::Complexity => &self.phase3_complexity_threshold,
            ThresholdKind::Iteration => &self.phase3_iteration_threshold,
        }
    }

    pub fn bounds_mut(&mut self, kind: ThresholdKind) -> &mut ThresholdBounds {
        match kind {
            ThresholdKind::Reproduction => &mut self.phase2_reproduction_threshold,
            ThresholdKind::Complexity => &mut self.phase3_complexity_threshold,
            ThresholdKind::Iteration => &mut self.phase3_iteration_threshold,
        }
    }

    /// Shallow merge: a provided threshold object replaces the existing one
    /// wholesale.
    pub fn merge(&mut self, patch: ThresholdConfigPatch) {
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        if let Some(bounds) = patch.phase2_reproduction_threshold {
            self.phase2_reproduction_threshold = bounds;
        }
        if let Some(bounds) = patch.phase3_complexity_threshold {
            self.phase3_complexity_threshold = bounds;
        }
        if let Some(bounds) = patch.phase3_iteration_threshold {
            self.phase3_iteration_threshold = bounds;
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        for kind in ThresholdKind::ALL {
            self.bounds(kind)
                .validate()
                .map_err(|e| format!("{kind} threshold: {e}"))?;
        }
        Ok(())
    }
}

/// Partial update for [`ThresholdConfig`]; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdConfigPatch {
    pub enabled: Option<bool>,
    pub phase2_reproduction_threshold: Option<ThresholdBounds>,
    pub phase3_complexity_threshold: Option<ThresholdBounds>,
    pub phase3_iteration_threshold: Option<ThresholdBounds>,
}

// ---------------------------------------------------------------------------
// ReliabilityEvent
// ---------------------------------------------------------------------------

/// One evaluation of a reliability gate.
///
/// Immutable apart from the recovery outcome, which is filled in at most
/// once via [`ReliabilityEvent::record_recovery`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReliabilityEvent {
    pub id: Uuid,
    pub layer: ReliabilityLayer,
    pub triggered: bool,
    /// Threshold value in effect when the gate was evaluated.
    pub threshold: f64,
    /// Free-form evaluation context (category, files, iteration, complexity).
    pub context: serde_json::Value,
    pub recovery_attempted: bool,
    pub recovery_success: Option<bool>,
    pub recovery_strategy: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ReliabilityEvent {
    pub fn new(
        layer: ReliabilityLayer,
        triggered: bool,
        threshold: f64,
        context: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            layer,
            triggered,
            threshold,
            context,
            recovery_attempted: false,
            recovery_success: None,
            recovery_strategy: None,
            created_at: Utc::now(),
        }
    }

    /// Record the recovery outcome. Returns `false` if an outcome was
    /// already recorded, leaving the event unchanged.
    pub fn record_recovery(&mut self, success: bool, strategy: Option<String>) -> bool {
        if self.recovery_success.is_some() {
            return false;
        }
        self.recovery_attempted = true;
        self.recovery_success = Some(success);
        self.recovery_strategy = strategy;
        true
    }

    pub fn recovered(&self) -> bool {
        self.recovery_success == Some(true)
    }
}

// ---------------------------------------------------------------------------
// LayerMetrics / ThresholdAnalysis / ThresholdAdjustment
// ---------------------------------------------------------------------------

/// Aggregated rates for one gate over a window of events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerMetrics {
    pub layer: ReliabilityLayer,
    pub total_events: usize,
    pub triggered_events: usize,
    /// `triggered_events / total_events`.
    pub trigger_rate: f64,
    pub recovery_attempts: usize,
    pub recovery_successes: usize,
    /// `recovery_successes / recovery_attempts`, 0 when nothing was attempted.
    pub recovery_success_rate: f64,
    /// Mean threshold across triggered events, 0 when nothing triggered.
    pub average_threshold: f64,
}

impl LayerMetrics {
    /// Aggregate the events belonging to `layer`. Returns `None` when there
    /// are none.
    pub fn from_events(layer: ReliabilityLayer, events: &[ReliabilityEvent]) -> Option<Self> {
        let layer_events: Vec<&ReliabilityEvent> =
            events.iter().filter(|e| e.layer == layer).collect();
        if layer_events.is_empty() {
            return None;
        }

        let total_events = layer_events.len();
        let triggered: Vec<&&ReliabilityEvent> =
            layer_events.iter().filter(|e| e.triggered).collect();
        let triggered_events = triggered.len();
        let recovery_attempts = layer_events.iter().filter(|e| e.recovery_attempted).count();
        let recovery_successes = layer_events.iter().filter(|e| e.recovered()).count();

        let average_threshold = if triggered.is_empty() {
            0.0
        } else {
            triggered.iter().map(|e| e.threshold).sum::<f64>() / triggered_events as f64
        };

        Some(Self {
            layer,
            total_events,
            triggered_events,
            trigger_rate: triggered_events as f64 / total_events as f64,
            recovery_attempts,
            recovery_successes,
            recovery_success_rate: if recovery_attempts == 0 {
                0.0
            } else {
                recovery_successes as f64 / recovery_attempts as f64
            },
            average_threshold,
        })
    }
}

/// Recommendation produced by analyzing a gate's telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdAnalysis {
    pub layer: ReliabilityLayer,
    pub current_threshold: f64,
    pub recommended_threshold: f64,
    /// 0 means "not enough data to say anything".
    pub confidence: f64,
    pub reasoning: String,
    pub data_points: usize,
    pub trigger_rate: f64,
    pub recovery_rate: f64,
}

/// Result of one analysis pass for one threshold parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdAdjustment {
    pub id: Uuid,
    pub layer: ReliabilityLayer,
    pub kind: ThresholdKind,
    pub old_value: f64,
    pub new_value: f64,
    pub recommended_value: f64,
    pub confidence: f64,
    pub reasoning: String,
    /// `false` when the recommendation was computed but did not pass the
    /// confidence gate or matched the current value.
    pub applied: bool,
    pub created_at: DateTime<Utc>,
}
