//! Application layer: the run coordinator and its wiring.

pub mod run_coordinator;

pub use run_coordinator::{
    Capabilities, RegistryError, RunCoordinator, StepRegistry, StepRegistryBuilder,
    MAX_ITERATIONS_REACHED, REPRODUCTION_MISSING, RUN_CANCELLED,
};
