//! Fixloop - self-tuning control loop for an autonomous CI repair agent
//!
//! A run walks `analysis -> planning -> execution -> verification` under two
//! reliability gates: a reproduction gate before risky steps and a strategy
//! loop gate that watches complexity divergence across iterations. Every
//! gate evaluation is recorded as telemetry, and the adaptive threshold
//! controller periodically tunes the gate thresholds from that history.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors and port traits
//! - **Service Layer** (`services`): telemetry, metrics, threshold tuning, complexity
//! - **Application Layer** (`application`): the run coordinator
//! - **Adapters** (`adapters`): `SQLite` persistence
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): inspection and tuning commands
//!
//! # Example
//!
//! ```ignore
//! use fixloop::application::{Capabilities, RunCoordinator, StepRegistry};
//! use fixloop::domain::models::ExternalContext;
//!
//! let coordinator = RunCoordinator::new(registry, Capabilities::default());
//! let result = coordinator.run(&ExternalContext::new("pipeline-1", "acme/widgets")).await;
//! ```

pub mod adapters;
pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::{Capabilities, RunCoordinator, StepRegistry};
pub use domain::models::{
    Config, ExternalContext, FinalResult, ReliabilityEvent, ReliabilityLayer, RunState, RunStatus,
    StatePatch, StepId, ThresholdConfig, ThresholdKind,
};
pub use domain::ports::{
    RecoveryStrategy, ReliabilityEventRepository, RunSnapshotRepository, StepHandler,
    ThresholdConfigRepository,
};
pub use domain::{DomainError, DomainResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{AdaptiveThresholdController, ReliabilityMetrics, ReliabilityTelemetry};
