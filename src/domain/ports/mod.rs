//! Port trait definitions (Hexagonal Architecture)
//!
//! Async trait interfaces the coordinator and services depend on:
//! - ReliabilityEventRepository: reliability telemetry persistence
//! - ThresholdConfigRepository: learned thresholds and adjustment audit log
//! - RunSnapshotRepository: write-through run state snapshots
//! - StepHandler: diagnosis / planning / execution / verification steps
//! - RecoveryStrategy: automated remediation when a gate triggers

pub mod recovery_strategy;
pub mod reliability_event_repository;
pub mod run_snapshot_repository;
pub mod step_handler;
pub mod threshold_config_repository;

pub use recovery_strategy::{RecoveryContext, RecoveryDetails, RecoveryOutcome, RecoveryStrategy};
pub use reliability_event_repository::ReliabilityEventRepository;
pub use run_snapshot_repository::RunSnapshotRepository;
pub use step_handler::StepHandler;
pub use threshold_config_repository::ThresholdConfigRepository;
