//! Complexity estimation and convergence detection.
//!
//! The coordinator scores the run once per attempt cycle and keeps the
//! scores as an ordered history. Two pure functions interpret that history:
//!
//! - [`estimate_complexity`] maps the current run state to a scalar score.
//! - [`detect_convergence`] classifies the direction of the history.
//!
//! [`is_atomic`] combines both into an advisory "simple and settled" signal.

use crate::domain::models::{ConvergenceResult, ErrorCategory, RunState, Trend};

/// Added per affected file beyond the first.
pub const FILE_WEIGHT: f64 = 2.0;
/// Added per prior failed attempt (feedback entry).
pub const FEEDBACK_WEIGHT: f64 = 1.5;
/// Multiplier for `1 - diagnosis confidence`.
pub const INVERSE_CONFIDENCE_WEIGHT: f64 = 5.0;
/// Added per completed attempt cycle, so stalled runs creep upward.
pub const ITERATION_WEIGHT: f64 = 0.5;

/// Scores above this are "high" by convention.
pub const HIGH_COMPLEXITY: f64 = 15.0;
/// Scores below this can be atomic.
pub const ATOMIC_COMPLEXITY_CUTOFF: f64 = 5.0;

/// Maximum first-to-last difference still classified as stable.
pub const TREND_EPSILON: f64 = 0.5;
/// Maximum range of the recent window still classified as stable.
pub const STABILITY_EPSILON: f64 = 0.5;
/// Number of trailing samples that define the current regime.
pub const RECENT_WINDOW: usize = 3;

/// Score the difficulty of the run in its current state.
///
/// Weighted sum of:
/// - error-category severity (1 for syntax up to 4 for unknown),
/// - [`FILE_WEIGHT`] per affected file beyond the first,
/// - [`FEEDBACK_WEIGHT`] per feedback entry,
/// - `(1 - confidence) * INVERSE_CONFIDENCE_WEIGHT`,
/// - [`ITERATION_WEIGHT`] per completed iteration.
///
/// A run with no diagnosis yet scores as unknown with zero confidence.
pub fn estimate_complexity(state: &RunState) -> f64 {
    let (category, confidence, affected) = state.diagnosis.as_ref().map_or(
        (ErrorCategory::Unknown, 0.0, 0),
        |d| (d.category, d.confidence, d.affected_files.len()),
    );

    let file_count = affected.max(state.files_changed.len());
    let extra_files = file_count.saturating_sub(1) as f64;
    let confidence = if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };

    category.severity()
        + extra_files * FILE_WEIGHT
        + state.feedback.len() as f64 * FEEDBACK_WEIGHT
        + (1.0 - confidence) * INVERSE_CONFIDENCE_WEIGHT
        + f64::from(state.iteration) * ITERATION_WEIGHT
}

/// Classify the trend of a complexity history.
///
/// The long-run direction compares the last sample against the first. The
/// recent window (last [`RECENT_WINDOW`] samples) then overrides it: if the
/// window's range is within [`STABILITY_EPSILON`] the trend is `Stable`
/// regardless of history. Both comparisons are inclusive at epsilon.
pub fn detect_convergence(history: &[f64]) -> ConvergenceResult {
    if history.len() < 2 {
        return ConvergenceResult::unknown();
    }

    let first = history[0];
    let last = history[history.len() - 1];
    let long_run = if last - first > TREND_EPSILON {
        Trend::Increasing
    } else if first - last > TREND_EPSILON {
        Trend::Decreasing
    } else {
        Trend::Stable
    };

    let recent = &history[history.len().saturating_sub(RECENT_WINDOW)..];
    let is_stable = range(recent) <= STABILITY_EPSILON;
    let trend = if is_stable { Trend::Stable } else { long_run };

    ConvergenceResult {
        trend,
        is_converging: trend == Trend::Decreasing,
        is_stable,
        is_diverging: trend == Trend::Increasing,
    }
}

/// True when the problem is both simple and settled.
///
/// Advisory only; the coordinator never stops a run on this alone.
pub fn is_atomic(complexity: f64, history: &[f64]) -> bool {
    complexity < ATOMIC_COMPLEXITY_CUTOFF && detect_convergence(history).is_stable
}

fn range(samples: &[f64]) -> f64 {
    let (min, max) = samples
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    max - min
}
