//! Domain types for the provisioning orchestrator.
//!
//! This module contains the core data structures:
//! - ConfigurationRecord: the immutable input of a run
//! - StepState / StepResult: probe answers and step outcomes
//! - RunReport: the ordered outcome of a run
//! - GeneratedArtifact: rendered configuration files

pub mod artifact;
pub mod record;
pub mod run;
pub mod step;

// Re-export commonly used types
pub use artifact::{ArtifactKind, FileOwner, GeneratedArtifact};
pub use record::{
    ConfigurationRecord, DatabaseSettings, DerivedPaths, RecordError, RecordSettings,
    SystemLayout,
};
pub use run::{ArtifactDigest, RunReport, StepRecord};
pub use step::{Criticality, StepResult, StepState};
