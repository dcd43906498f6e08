//! hostprep - staged, re-runnable provisioning for Django application hosts
//!
//! Turns a fresh RHEL/Fedora host into a running deployment: system
//! packages, firewall, virtualenv, PostgreSQL, Django migrations and static
//! files, a gunicorn systemd unit behind nginx, a Let's Encrypt certificate,
//! permissions and SELinux policy.
//!
//! # Architecture
//!
//! The run is a fixed, ordered list of steps:
//! - Every step probes the live system first and is skipped when its goal
//!   state already holds, so a run can be repeated safely
//! - The operator confirms each remaining step before it changes anything
//! - A hard-fail step that fails stops the run; advisory failures are recorded
//! - Configuration files are rendered deterministically from one immutable
//!   record, so the unit and the site always agree on the socket path
//!
//! # Modules
//!
//! - `adapters`: External command execution
//! - `core`: Sequencer, steps, artifact generation, confirmation gate
//! - `domain`: Data structures (ConfigurationRecord, RunReport, GeneratedArtifact)
//! - `config`: Config file discovery and defaults
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Provision, confirming each step
//! sudo hostprep run
//!
//! # See which steps are already done
//! sudo hostprep status
//!
//! # Inspect the generated nginx site
//! hostprep render site
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{Command, CommandError, CommandOutput, CommandRunner, SystemRunner};
pub use core::{Sequencer, Step, StepFilter};
pub use domain::{ConfigurationRecord, RecordSettings, RunReport, StepResult, StepState};
