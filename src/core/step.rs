//! Step definition: a probe plus an action over an explicit record.

use async_trait::async_trait;
use thiserror::Error;

use crate::adapters::{CommandError, CommandRunner};
use crate::domain::{ConfigurationRecord, Criticality, StepState};

use super::generator::ConsistencyError;
use super::probe::QueryRunner;

/// Why a probe or an action failed
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("generated artifacts are inconsistent: {0}")]
    Consistency(#[from] ConsistencyError),

    #[error("{0}")]
    Other(String),
}

impl StepError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Captured command output, when a command caused the failure
    pub fn output(&self) -> Option<String> {
        match self {
            Self::Command(e) => e.output().map(str::to_string),
            _ => None,
        }
    }
}

/// What a probe may see
pub struct ProbeContext<'a> {
    pub cfg: &'a ConfigurationRecord,
    pub queries: QueryRunner<'a>,
}

/// What an action may use
pub struct ActionContext<'a> {
    pub cfg: &'a ConfigurationRecord,
    pub runner: &'a dyn CommandRunner,
}

/// Probe and action of one step
#[async_trait]
pub trait StepOps: Send + Sync {
    /// Inspect the live system. Must not change it.
    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<StepState, StepError>;

    /// Bring the system to the step's goal state, starting from `state`
    async fn apply(&self, ctx: &ActionContext<'_>, state: StepState) -> Result<(), StepError>;
}

/// A named unit of provisioning work
pub struct Step {
    pub id: &'static str,
    pub description: String,
    pub criticality: Criticality,
    ops: Box<dyn StepOps>,
}

impl Step {
    pub fn new(
        id: &'static str,
        description: impl Into<String>,
        criticality: Criticality,
        ops: impl StepOps + 'static,
    ) -> Self {
        Self {
            id,
            description: description.into(),
            criticality,
            ops: Box::new(ops),
        }
    }

    pub async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<StepState, StepError> {
        self.ops.probe(ctx).await
    }

    pub async fn apply(&self, ctx: &ActionContext<'_>, state: StepState) -> Result<(), StepError> {
        self.ops.apply(ctx, state).await
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("criticality", &self.criticality)
            .finish()
    }
}
