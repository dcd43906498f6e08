//! Host packages and firewall.

use async_trait::async_trait;

use crate::adapters::Command;
use crate::core::step::{ActionContext, ProbeContext, StepError, StepOps};
use crate::domain::StepState;

use super::systemctl;

/// Packages the deployment needs from dnf
pub const PACKAGES: [&str; 9] = [
    "python3",
    "python3-pip",
    "postgresql-server",
    "postgresql-contrib",
    "nginx",
    "certbot",
    "firewalld",
    "policycoreutils-python-utils",
    "gcc",
];

const FIREWALL_SERVICES: [&str; 2] = ["http", "https"];

pub struct Packages;

#[async_trait]
impl StepOps for Packages {
    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<StepState, StepError> {
        let mut installed = Vec::with_capacity(PACKAGES.len());
        for package in PACKAGES {
            installed.push(
                ctx.queries
                    .succeeds(&Command::query("rpm").args(["-q", package]))
                    .await,
            );
        }
        Ok(StepState::from_checks(&installed))
    }

    async fn apply(&self, ctx: &ActionContext<'_>, _state: StepState) -> Result<(), StepError> {
        // dnf skips what is already installed, so a partial install needs no
        // special handling.
        ctx.runner
            .run(&Command::new("dnf").args(["install", "-y"]).args(PACKAGES))
            .await?;
        Ok(())
    }
}

pub struct Firewall;

#[async_trait]
impl StepOps for Firewall {
    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<StepState, StepError> {
        let mut open = Vec::with_capacity(FIREWALL_SERVICES.len());
        for service in FIREWALL_SERVICES {
            open.push(
                ctx.queries
                    .succeeds(
                        &Command::query("firewall-cmd")
                            .arg(format!("--query-service={}", service)),
                    )
                    .await,
            );
        }
        Ok(StepState::from_checks(&open))
    }

    async fn apply(&self, ctx: &ActionContext<'_>, _state: StepState) -> Result<(), StepError> {
        ctx.runner
            .run(&systemctl(["enable", "--now", "firewalld"]))
            .await?;
        for service in FIREWALL_SERVICES {
            ctx.runner
                .run(
                    &Command::new("firewall-cmd")
                        .arg("--permanent")
                        .arg(format!("--add-service={}", service)),
                )
                .await?;
        }
        ctx.runner
            .run(&Command::new("firewall-cmd").arg("--reload"))
            .await?;
        Ok(())
    }
}
