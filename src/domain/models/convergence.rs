//! Trend classification over a run's complexity history.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse direction of the complexity score across a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    /// The problem is getting harder.
    Increasing,
    /// The problem is getting easier.
    Decreasing,
    /// The current regime is flat.
    Stable,
    /// Fewer than two samples.
    Unknown,
}

impl Trend {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Increasing => "increasing",
            Self::Decreasing => "decreasing",
            Self::Stable => "stable",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`detect_convergence`](crate::services::complexity::detect_convergence).
///
/// `is_converging` and `is_diverging` follow `trend`; `is_stable` reflects the
/// recent window only, so a history whose endpoints are close but whose
/// recent samples swing widely reports `trend == Stable` with all three
/// flags false.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceResult {
    pub trend: Trend,
    pub is_converging: bool,
    pub is_stable: bool,
    pub is_diverging: bool,
}

impl ConvergenceResult {
    pub const fn unknown() -> Self {
        Self {
            trend: Trend::Unknown,
            is_converging: false,
            is_stable: false,
            is_diverging: false,
        }
    }
}

impl Default for ConvergenceResult {
    fn default() -> Self {
        Self::unknown()
    }
}
