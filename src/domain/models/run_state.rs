//! Run state threaded through the coordinator loop.
//!
//! A [`RunState`] is owned by exactly one coordinator for the lifetime of a
//! run. Step handlers never mutate it directly: they return a [`StatePatch`]
//! that the coordinator applies field by field.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Default cap on attempt cycles per run.
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

// ---------------------------------------------------------------------------
// StepId
// ---------------------------------------------------------------------------

/// Closed set of steps the coordinator can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    Analysis,
    Planning,
    Execution,
    Verification,
    /// Terminal step; has no handler.
    Finish,
}

impl StepId {
    /// Steps that need a registered handler.
    pub const DISPATCHABLE: [StepId; 4] = [
        Self::Analysis,
        Self::Planning,
        Self::Execution,
        Self::Verification,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Planning => "planning",
            Self::Execution => "execution",
            Self::Verification => "verification",
            Self::Finish => "finish",
        }
    }

    /// Risky steps mutate code or commit to a fix hypothesis and are gated
    /// on a verified reproduction command.
    pub const fn is_risky(self) -> bool {
        matches!(self, Self::Planning | Self::Execution)
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finish)
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RunStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Working,
    Success,
    Failed,
    Stopped,
}

impl RunStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Diagnosis
// ---------------------------------------------------------------------------

/// Error category assigned by the diagnosis step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Syntax,
    Lint,
    TypeError,
    Dependency,
    Configuration,
    Build,
    TestFailure,
    Runtime,
    Infrastructure,
    Unknown,
}

impl ErrorCategory {
    /// Ordinal severity used as the base of the complexity score.
    pub const fn severity(self) -> f64 {
        match self {
            Self::Syntax | Self::Lint => 1.0,
            Self::TypeError | Self::Dependency | Self::Configuration => 2.0,
            Self::Build | Self::TestFailure | Self::Runtime => 3.0,
            Self::Infrastructure | Self::Unknown => 4.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub category: ErrorCategory,
    pub summary: String,
    /// Diagnosis confidence in `[0, 1]`.
    pub confidence: f64,
    pub affected_files: Vec<String>,
}

// ---------------------------------------------------------------------------
// ExternalContext
// ---------------------------------------------------------------------------

/// Read-only inputs handed to every step handler.
#[derive(Debug, Clone)]
pub struct ExternalContext {
    pub pipeline_run_id: String,
    pub repository: String,
    pub failure_log: String,
    /// Checked by the coordinator at the top of every loop pass.
    pub cancellation: CancellationToken,
}

impl ExternalContext {
    pub fn new(pipeline_run_id: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            pipeline_run_id: pipeline_run_id.into(),
            repository: repository.into(),
            failure_log: String::new(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_failure_log(mut self, log: impl Into<String>) -> Self {
        self.failure_log = log.into();
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// One step transition in the run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub step: StepId,
    pub action: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: Uuid,
    pub current_step: StepId,
    /// Completed attempt cycles; never exceeds `max_iterations`.
    pub iteration: u32,
    pub max_iterations: u32,
    pub status: RunStatus,
    pub diagnosis: Option<Diagnosis>,
    /// Verified command that reproduces the failure.
    pub reproduction_command: Option<String>,
    /// One complexity score per attempt cycle, append-only except for
    /// a reset after strategy-loop recovery.
    pub complexity_history: Vec<f64>,
    /// One entry per failed attempt.
    pub feedback: Vec<String>,
    pub files_changed: BTreeSet<String>,
    pub history: Vec<HistoryRecord>,
    pub failure_reason: Option<String>,
    pub reproduction_required: bool,
    pub loop_detected: bool,
    /// Guidance returned by strategy-loop recovery.
    pub recovery_guidance: Option<String>,
    /// Advisory: complexity is low and stable.
    pub is_atomic: bool,
    pub started_at: DateTime<Utc>,
}

impl RunState {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            current_step: StepId::Analysis,
            iteration: 0,
            max_iterations,
            status: RunStatus::Working,
            diagnosis: None,
            reproduction_command: None,
            complexity_history: Vec::new(),
            feedback: Vec::new(),
            files_changed: BTreeSet::new(),
            history: Vec::new(),
            failure_reason: None,
            reproduction_required: false,
            loop_detected: false,
            recovery_guidance: None,
            is_atomic: false,
            started_at: Utc::now(),
        }
    }

    pub const fn is_working(&self) -> bool {
        matches!(self.status, RunStatus::Working)
    }

    pub fn has_reproduction_command(&self) -> bool {
        self.reproduction_command
            .as_deref()
            .is_some_and(|cmd| !cmd.trim().is_empty())
    }

    /// Terminate the run with a reason.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.failure_reason = Some(reason.into());
    }

    /// Apply a handler patch. Collections are replaced wholesale when present.
    pub fn apply(&mut self, patch: StatePatch) {
        if let Some(step) = patch.next_step {
            self.current_step = step;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(diagnosis) = patch.diagnosis {
            self.diagnosis = Some(diagnosis);
        }
        if let Some(command) = patch.reproduction_command {
            self.reproduction_command = Some(command);
        }
        if let Some(feedback) = patch.feedback {
            self.feedback = feedback;
        }
        if let Some(files) = patch.files_changed {
            self.files_changed = files;
        }
        if let Some(reason) = patch.failure_reason {
            self.failure_reason = Some(reason);
        }
    }
}

// ---------------------------------------------------------------------------
// StatePatch
// ---------------------------------------------------------------------------

/// Typed partial update returned by a step handler.
///
/// `feedback` and `files_changed` are full replacements; use
/// [`StatePatch::push_feedback`] and [`StatePatch::add_files`] to extend the
/// current values without dropping them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    pub next_step: Option<StepId>,
    pub status: Option<RunStatus>,
    pub diagnosis: Option<Diagnosis>,
    pub reproduction_command: Option<String>,
    pub feedback: Option<Vec<String>>,
    pub files_changed: Option<BTreeSet<String>>,
    pub failure_reason: Option<String>,
}

impl StatePatch {
    pub fn goto(step: StepId) -> Self {
        Self {
            next_step: Some(step),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_diagnosis(mut self, diagnosis: Diagnosis) -> Self {
        self.diagnosis = Some(diagnosis);
        self
    }

    pub fn with_reproduction_command(mut self, command: impl Into<String>) -> Self {
        self.reproduction_command = Some(command.into());
        self
    }

    pub fn with_failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }

    /// Extend the state's feedback with one entry.
    pub fn push_feedback(mut self, state: &RunState, entry: impl Into<String>) -> Self {
        let mut feedback = self.feedback.take().unwrap_or_else(|| state.feedback.clone());
        feedback.push(entry.into());
        self.feedback = Some(feedback);
        self
    }

    /// Extend the state's changed-file set.
    pub fn add_files<I, S>(mut self, state: &RunState, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = self
            .files_changed
            .take()
            .unwrap_or_else(|| state.files_changed.clone());
        set.extend(files.into_iter().map(Into::into));
        self.files_changed = Some(set);
        self
    }
}

// ---------------------------------------------------------------------------
// FinalResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub iterations: u32,
    pub files_changed: Vec<String>,
    /// Always set on a non-success terminal state.
    pub failure_reason: Option<String>,
    pub reproduction_required: bool,
    pub loop_detected: bool,
    pub complexity_history: Vec<f64>,
    pub recovery_guidance: Option<String>,
}

impl From<RunState> for FinalResult {
    fn from(state: RunState) -> Self {
        let failure_reason = match state.status {
            RunStatus::Success => state.failure_reason,
            _ => Some(
                state
                    .failure_reason
                    .unwrap_or_else(|| format!("run ended with status {}", state.status)),
            ),
        };

        Self {
            run_id: state.run_id,
            status: state.status,
            iterations: state.iteration,
            files_changed: state.files_changed.into_iter().collect(),
            failure_reason,
            reproduction_required: state.reproduction_required,
            loop_detected: state.loop_detected,
            complexity_history: state.complexity_history,
            recovery_guidance: state.recovery_guidance,
        }
    }
}
