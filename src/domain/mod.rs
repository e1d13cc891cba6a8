//! Domain layer for fixloop
//!
//! Core models, errors and the ports the control loop depends on.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
