//! Step states and outcomes.

use serde::{Deserialize, Serialize};

/// What a probe found on the live system for one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    /// Nothing of the goal state is present (also the fail-safe answer)
    NotStarted,

    /// Part of the goal state is present; the action must repair, not assume
    /// a pristine start
    PartiallyDone,

    /// The goal state already holds
    AlreadyDone,
}

impl StepState {
    /// Combine a set of independent checks into a state.
    ///
    /// All true is `AlreadyDone`, none true is `NotStarted`, anything in
    /// between is `PartiallyDone`.
    pub fn from_checks(checks: &[bool]) -> Self {
        let held = checks.iter().filter(|c| **c).count();
        if !checks.is_empty() && held == checks.len() {
            Self::AlreadyDone
        } else if held == 0 {
            Self::NotStarted
        } else {
            Self::PartiallyDone
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::NotStarted => "not started",
            Self::PartiallyDone => "partial",
            Self::AlreadyDone => "done",
        }
    }
}

/// Whether a failure stops the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    /// Failure aborts the remaining sequence
    HardFail,

    /// Failure is recorded and the run continues
    Advisory,
}

/// Final outcome of one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum StepResult {
    /// The operator declined the step
    Skipped,

    /// Left out of this run by `--only`/`--from`; never probed
    NotSelected,

    /// The probe reported the goal state already holds
    SkippedAlreadyDone,

    Succeeded,

    Failed {
        cause: String,
        /// Captured command output, when a command was the cause
        output: Option<String>,
    },
}

impl StepResult {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Short label for the printed report
    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::NotSelected => "not selected",
            Self::SkippedAlreadyDone => "already done",
            Self::Succeeded => "done",
            Self::Failed { .. } => "FAILED",
        }
    }
}
