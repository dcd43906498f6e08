//! Core provisioning logic.
//!
//! This module contains:
//! - Sequencer: ordered probe / confirm / apply loop
//! - Steps: the fixed provisioning sequence
//! - Generator: deterministic artifact rendering
//! - Gate: operator confirmation
//! - Preflight and HostLock: checks made before the first probe

pub mod fsops;
pub mod gate;
pub mod generator;
pub mod lock;
pub mod preflight;
pub mod probe;
pub mod secrets;
pub mod sequencer;
pub mod step;
pub mod steps;

// Re-export commonly used types
pub use gate::{Confirm, GateError, LineGate};
pub use generator::{generate, verify, ConsistencyError};
pub use lock::HostLock;
pub use preflight::PreconditionError;
pub use sequencer::{survey, Sequencer, StepFilter};
pub use step::{Step, StepError};
pub use steps::{plan, STEP_IDS};
