//! The step sequencer.
//!
//! Walks the fixed step list in order: probe, skip if already done, ask the
//! operator, apply, record. A hard-fail step that fails stops the run; an
//! advisory failure is recorded and the run continues. Nothing runs
//! concurrently and nothing is retried.

use std::time::Instant;

use tracing::{error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use crate::adapters::CommandRunner;
use crate::domain::{
    ArtifactDigest, ArtifactKind, ConfigurationRecord, Criticality, RunReport, StepRecord,
    StepResult, StepState,
};

use super::gate::Confirm;
use super::generator;
use super::preflight::{self, PreconditionError};
use super::probe::QueryRunner;
use super::step::{ActionContext, ProbeContext, Step};

/// Which steps a run offers to the operator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StepFilter {
    #[default]
    All,

    /// Only the named steps
    Only(Vec<String>),

    /// The named step and everything after it
    From(String),
}

impl StepFilter {
    /// Per-step "offered" flags, in step order
    pub fn select(&self, steps: &[Step]) -> Result<Vec<bool>, PreconditionError> {
        let known = |id: &str| steps.iter().any(|s| s.id == id);
        match self {
            Self::All => Ok(vec![true; steps.len()]),
            Self::Only(ids) => {
                if let Some(unknown) = ids.iter().find(|id| !known(id.as_str())) {
                    return Err(PreconditionError::UnknownStep(unknown.clone()));
                }
                Ok(steps
                    .iter()
                    .map(|s| ids.iter().any(|id| id == s.id))
                    .collect())
            }
            Self::From(first) => {
                let start = steps
                    .iter()
                    .position(|s| s.id == first.as_str())
                    .ok_or_else(|| PreconditionError::UnknownStep(first.clone()))?;
                Ok((0..steps.len()).map(|i| i >= start).collect())
            }
        }
    }
}

/// How one offered step ended
struct Outcome {
    state: StepState,
    result: StepResult,
    abort: bool,
}

/// Drives one provisioning run
pub struct Sequencer<'a> {
    runner: &'a dyn CommandRunner,
    gate: &'a mut dyn Confirm,
    filter: StepFilter,
}

impl<'a> Sequencer<'a> {
    pub fn new(runner: &'a dyn CommandRunner, gate: &'a mut dyn Confirm) -> Self {
        Self {
            runner,
            gate,
            filter: StepFilter::All,
        }
    }

    pub fn with_filter(mut self, filter: StepFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Run `steps` against `cfg`.
    ///
    /// Precondition failures are returned before any probe runs. Everything
    /// else, including a failed step, ends up in the report.
    #[instrument(skip_all, fields(run_id = %run_id, service = %cfg.settings().service_name))]
    pub async fn run(
        &mut self,
        steps: &[Step],
        cfg: &ConfigurationRecord,
        run_id: Uuid,
    ) -> Result<RunReport, PreconditionError> {
        preflight::check(cfg)?;
        let offered = self.filter.select(steps)?;

        let mut report = RunReport::new(run_id, cfg.settings().service_name.clone());
        report.artifacts = ArtifactKind::ALL
            .iter()
            .map(|kind| ArtifactDigest::from(&generator::generate(*kind, cfg)))
            .collect();
        info!(steps = steps.len(), "Starting provisioning run");

        let total = steps.len();
        for (index, (step, offered)) in steps.iter().zip(offered).enumerate() {
            if !offered {
                report.record(StepRecord {
                    step_id: step.id.to_string(),
                    description: step.description.clone(),
                    criticality: step.criticality,
                    state: None,
                    result: StepResult::NotSelected,
                    duration_ms: 0,
                });
                continue;
            }

            let started = Instant::now();
            let outcome = self
                .run_step(step, cfg, index + 1, total)
                .instrument(info_span!("step", step = step.id))
                .await;

            report.record(StepRecord {
                step_id: step.id.to_string(),
                description: step.description.clone(),
                criticality: step.criticality,
                state: Some(outcome.state),
                result: outcome.result,
                duration_ms: started.elapsed().as_millis() as u64,
            });

            if outcome.abort {
                error!(step = step.id, "Run stopped");
                report.abort(step.id);
                break;
            }
        }

        report.finish();
        if report.success {
            info!("Provisioning run completed");
        }
        Ok(report)
    }

    async fn run_step(
        &mut self,
        step: &Step,
        cfg: &ConfigurationRecord,
        position: usize,
        total: usize,
    ) -> Outcome {
        let probe_ctx = ProbeContext {
            cfg,
            queries: QueryRunner::new(self.runner),
        };
        let state = match step.probe(&probe_ctx).await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Probe failed; treating step as not started");
                StepState::NotStarted
            }
        };

        if state == StepState::AlreadyDone {
            info!("Already done, skipping");
            return Outcome {
                state,
                result: StepResult::SkippedAlreadyDone,
                abort: false,
            };
        }

        let prompt = match state {
            StepState::PartiallyDone => format!(
                "[{}/{}] {} (partially done; will repair)?",
                position, total, step.description
            ),
            _ => format!("[{}/{}] {}?", position, total, step.description),
        };

        match self.gate.confirm(&prompt) {
            Ok(true) => {}
            Ok(false) => {
                info!("Declined by operator");
                return Outcome {
                    state,
                    result: StepResult::Skipped,
                    abort: false,
                };
            }
            Err(e) => {
                error!(error = %e, "Confirmation gate failed");
                return Outcome {
                    state,
                    result: StepResult::Failed {
                        cause: e.to_string(),
                        output: None,
                    },
                    abort: true,
                };
            }
        }

        let action_ctx = ActionContext {
            cfg,
            runner: self.runner,
        };
        match step.apply(&action_ctx, state).await {
            Ok(()) => {
                info!("Step succeeded");
                Outcome {
                    state,
                    result: StepResult::Succeeded,
                    abort: false,
                }
            }
            Err(e) => {
                let abort = step.criticality == Criticality::HardFail;
                if abort {
                    error!(error = %e, "Step failed");
                } else {
                    warn!(error = %e, "Advisory step failed; continuing");
                }
                Outcome {
                    state,
                    result: StepResult::Failed {
                        cause: e.to_string(),
                        output: e.output(),
                    },
                    abort,
                }
            }
        }
    }
}

/// Probe every step without prompting or applying anything
pub async fn survey(
    runner: &dyn CommandRunner,
    steps: &[Step],
    cfg: &ConfigurationRecord,
) -> Vec<(String, StepState)> {
    let ctx = ProbeContext {
        cfg,
        queries: QueryRunner::new(runner),
    };
    let mut states = Vec::with_capacity(steps.len());
    for step in steps {
        let state = match step.probe(&ctx).await {
            Ok(state) => state,
            Err(e) => {
                warn!(step = step.id, error = %e, "Probe failed");
                StepState::NotStarted
            }
        };
        states.push((step.id.to_string(), state));
    }
    states
}
