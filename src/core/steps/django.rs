//! Django management commands: migrations, static files, superuser.

use async_trait::async_trait;

use crate::core::probe;
use crate::core::step::{ActionContext, ProbeContext, StepError, StepOps};
use crate::domain::StepState;

use super::{manage, manage_query};

const HAS_SUPERUSER: &str = "import sys; from django.contrib.auth import get_user_model; \
sys.exit(0 if get_user_model().objects.filter(is_superuser=True).exists() else 1)";

pub struct Migrations;

#[async_trait]
impl StepOps for Migrations {
    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<StepState, StepError> {
        if !probe::is_executable(&ctx.cfg.paths().venv_python) {
            return Ok(StepState::NotStarted);
        }
        // `migrate --check` exits non-zero while migrations are unapplied
        let applied = ctx
            .queries
            .succeeds(&manage_query(ctx.cfg, ["migrate", "--check", "--noinput"]))
            .await;
        Ok(if applied {
            StepState::AlreadyDone
        } else {
            StepState::NotStarted
        })
    }

    async fn apply(&self, ctx: &ActionContext<'_>, _state: StepState) -> Result<(), StepError> {
        ctx.runner
            .run(&manage(ctx.cfg, ["migrate", "--noinput"]))
            .await?;
        Ok(())
    }
}

pub struct StaticAssets;

#[async_trait]
impl StepOps for StaticAssets {
    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<StepState, StepError> {
        let root = &ctx.cfg.paths().static_root;
        Ok(if probe::has_files(root) {
            StepState::AlreadyDone
        } else if probe::is_dir(root) {
            StepState::PartiallyDone
        } else {
            StepState::NotStarted
        })
    }

    async fn apply(&self, ctx: &ActionContext<'_>, _state: StepState) -> Result<(), StepError> {
        ctx.runner
            .run(&manage(ctx.cfg, ["collectstatic", "--noinput"]))
            .await?;
        Ok(())
    }
}

pub struct Superuser;

#[async_trait]
impl StepOps for Superuser {
    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<StepState, StepError> {
        if !probe::is_executable(&ctx.cfg.paths().venv_python) {
            return Ok(StepState::NotStarted);
        }
        let exists = ctx
            .queries
            .succeeds(&manage_query(ctx.cfg, ["shell", "-c", HAS_SUPERUSER]))
            .await;
        Ok(if exists {
            StepState::AlreadyDone
        } else {
            StepState::NotStarted
        })
    }

    async fn apply(&self, ctx: &ActionContext<'_>, _state: StepState) -> Result<(), StepError> {
        ctx.runner
            .run(&manage(ctx.cfg, ["createsuperuser"]).interactive())
            .await?;
        Ok(())
    }
}
