//! Python virtual environment and dependencies.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::adapters::Command;
use crate::core::probe;
use crate::core::step::{ActionContext, ProbeContext, StepError, StepOps};
use crate::domain::StepState;

/// Packages the generated unit needs on top of requirements.txt
pub const RUNTIME_PACKAGES: [&str; 2] = ["gunicorn", "psycopg2-binary"];

/// A virtualenv counts as done only when its interpreter and pip are
/// executable; a bare or half-populated directory is partial.
pub struct Virtualenv;

#[async_trait]
impl StepOps for Virtualenv {
    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<StepState, StepError> {
        let p = ctx.cfg.paths();
        if !probe::is_dir(&ctx.cfg.settings().venv_path) {
            return Ok(StepState::NotStarted);
        }
        let complete = probe::is_executable(&p.venv_python) && probe::is_executable(&p.venv_pip);
        Ok(if complete {
            StepState::AlreadyDone
        } else {
            StepState::PartiallyDone
        })
    }

    async fn apply(&self, ctx: &ActionContext<'_>, state: StepState) -> Result<(), StepError> {
        let venv = &ctx.cfg.settings().venv_path;

        if state == StepState::PartiallyDone || probe::is_dir(venv) {
            warn!(path = %venv.display(), "Removing incomplete virtual environment");
            tokio::fs::remove_dir_all(venv).await?;
        }

        ctx.runner
            .run(
                &Command::new("python3")
                    .args(["-m", "venv"])
                    .arg(venv.display().to_string()),
            )
            .await?;
        ctx.runner
            .run(
                &Command::new(ctx.cfg.paths().venv_pip.display().to_string())
                    .args(["install", "--upgrade", "pip"]),
            )
            .await?;
        Ok(())
    }
}

pub struct Dependencies;

#[async_trait]
impl StepOps for Dependencies {
    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<StepState, StepError> {
        let p = ctx.cfg.paths();
        if !probe::is_executable(&p.venv_pip) {
            return Ok(StepState::NotStarted);
        }
        let pip = p.venv_pip.display().to_string();

        let runtime = ctx
            .queries
            .succeeds(&Command::query(&pip).arg("show").args(RUNTIME_PACKAGES))
            .await;

        let requirements = if probe::is_file(&p.requirements) {
            // pip's resolver reports "Would install ..." when anything is
            // missing or at the wrong version.
            match ctx
                .queries
                .output(
                    &Command::query(&pip)
                        .args(["install", "--dry-run", "-r"])
                        .arg(p.requirements.display().to_string()),
                )
                .await
            {
                Some(out) => !out.contains("Would install"),
                None => false,
            }
        } else {
            true
        };

        Ok(StepState::from_checks(&[runtime, requirements]))
    }

    async fn apply(&self, ctx: &ActionContext<'_>, _state: StepState) -> Result<(), StepError> {
        let p = ctx.cfg.paths();
        let pip = p.venv_pip.display().to_string();

        if probe::is_file(&p.requirements) {
            ctx.runner
                .run(
                    &Command::new(&pip)
                        .args(["install", "-r"])
                        .arg(p.requirements.display().to_string()),
                )
                .await?;
        } else {
            info!(path = %p.requirements.display(), "No requirements file; installing runtime packages only");
        }

        ctx.runner
            .run(&Command::new(&pip).arg("install").args(RUNTIME_PACKAGES))
            .await?;
        Ok(())
    }
}
