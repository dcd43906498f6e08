//! Process unit, reverse proxy, certificate and service lifecycle.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::adapters::Command;
use crate::core::step::{ActionContext, ProbeContext, StepError, StepOps};
use crate::core::{fsops, generator, probe};
use crate::domain::{ArtifactKind, ConfigurationRecord, FileOwner, GeneratedArtifact, StepState};

use super::{systemctl, systemctl_query};

const NGINX: &str = "nginx";
const RENEW_TIMER: &str = "certbot-renew.timer";

/// Render the unit and the site together and check they agree
fn render_checked(
    cfg: &ConfigurationRecord,
) -> Result<(GeneratedArtifact, GeneratedArtifact), StepError> {
    let unit = generator::generate(ArtifactKind::ProcessUnit, cfg);
    let site = generator::generate(ArtifactKind::ReverseProxySite, cfg);
    generator::verify(&[unit.clone(), site.clone()], cfg)?;
    Ok((unit, site))
}

/// nginx can only load the HTTPS server once the certificate exists
fn certificate_ready(cfg: &ConfigurationRecord) -> bool {
    !cfg.settings().tls || probe::is_file(&cfg.paths().fullchain)
}

pub struct ProcessUnit;

#[async_trait]
impl StepOps for ProcessUnit {
    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<StepState, StepError> {
        let unit = generator::generate(ArtifactKind::ProcessUnit, ctx.cfg);
        Ok(StepState::from_checks(&[
            probe::content_matches(&unit.target, &unit.content),
            probe::is_dir(&ctx.cfg.paths().log_dir),
        ]))
    }

    async fn apply(&self, ctx: &ActionContext<'_>, _state: StepState) -> Result<(), StepError> {
        let (unit, _) = render_checked(ctx.cfg)?;
        let owner = FileOwner {
            user: ctx.cfg.settings().service_user.clone(),
            group: ctx.cfg.settings().service_group.clone(),
        };

        fsops::ensure_dir(ctx.runner, &ctx.cfg.paths().log_dir, 0o750, &owner).await?;
        fsops::install_artifact(ctx.runner, &unit).await?;
        ctx.runner.run(&systemctl(["daemon-reload"])).await?;
        // Picks up a changed unit when the service is already running
        ctx.runner
            .run(&systemctl(["try-restart", ctx.cfg.settings().service_name.as_str()]))
            .await?;
        Ok(())
    }
}

pub struct ReverseProxy;

#[async_trait]
impl StepOps for ReverseProxy {
    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<StepState, StepError> {
        let site = generator::generate(ArtifactKind::ReverseProxySite, ctx.cfg);
        Ok(StepState::from_checks(&[
            probe::is_file(&site.target),
            probe::content_matches(&site.target, &site.content),
        ]))
    }

    async fn apply(&self, ctx: &ActionContext<'_>, _state: StepState) -> Result<(), StepError> {
        let (_, site) = render_checked(ctx.cfg)?;

        tokio::fs::create_dir_all(ctx.cfg.settings().layout.log_root.join(NGINX)).await?;
        fsops::install_artifact(ctx.runner, &site).await?;

        if certificate_ready(ctx.cfg) {
            ctx.runner.run(&Command::new(NGINX).arg("-t")).await?;
            ctx.runner
                .run(&systemctl(["try-reload-or-restart", NGINX]))
                .await?;
        } else {
            info!(
                domain = %ctx.cfg.settings().domain,
                "Certificate not issued yet; nginx configuration test deferred"
            );
        }
        Ok(())
    }
}

/// Issues the certificate with certbot's standalone authenticator so the
/// generated site file stays exactly as rendered.
pub struct TlsCertificate;

#[async_trait]
impl StepOps for TlsCertificate {
    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<StepState, StepError> {
        Ok(if certificate_ready(ctx.cfg) {
            StepState::AlreadyDone
        } else {
            StepState::NotStarted
        })
    }

    async fn apply(&self, ctx: &ActionContext<'_>, _state: StepState) -> Result<(), StepError> {
        let s = ctx.cfg.settings();
        if !s.tls {
            info!("TLS disabled; no certificate requested");
            return Ok(());
        }

        let mut certbot = Command::new("certbot")
            .args(["certonly", "--standalone", "-d"])
            .arg(s.domain.as_str())
            .arg("--config-dir")
            .arg(s.layout.letsencrypt_dir.display().to_string())
            .args([
                "--pre-hook",
                "systemctl stop nginx",
                "--post-hook",
                "systemctl start nginx",
            ])
            .interactive();
        if let Some(email) = &s.admin_email {
            certbot = certbot.args(["--agree-tos", "--no-eff-email", "-m", email.as_str()]);
        }
        ctx.runner.run(&certbot).await?;

        if !probe::is_file(&ctx.cfg.paths().fullchain) {
            return Err(StepError::other(format!(
                "certbot finished but {} does not exist",
                ctx.cfg.paths().fullchain.display()
            )));
        }
        ctx.runner.run(&Command::new(NGINX).arg("-t")).await?;
        Ok(())
    }
}

pub struct ServiceActivation;

#[async_trait]
impl StepOps for ServiceActivation {
    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<StepState, StepError> {
        let service = ctx.cfg.settings().service_name.as_str();
        let mut checks = Vec::with_capacity(4);
        for unit in [service, NGINX] {
            for verb in ["is-active", "is-enabled"] {
                checks.push(ctx.queries.succeeds(&systemctl_query(verb, unit)).await);
            }
        }
        Ok(StepState::from_checks(&checks))
    }

    async fn apply(&self, ctx: &ActionContext<'_>, _state: StepState) -> Result<(), StepError> {
        let service = ctx.cfg.settings().service_name.as_str();
        for unit in [service, NGINX] {
            ctx.runner.run(&systemctl(["enable", unit])).await?;
            ctx.runner.run(&systemctl(["restart", unit])).await?;
            info!(unit, "Service enabled and restarted");
        }
        Ok(())
    }
}

pub struct CertificateRenewal;

#[async_trait]
impl StepOps for CertificateRenewal {
    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<StepState, StepError> {
        if !ctx.cfg.settings().tls {
            return Ok(StepState::AlreadyDone);
        }
        let enabled = ctx
            .queries
            .succeeds(&systemctl_query("is-enabled", RENEW_TIMER))
            .await;
        let active = ctx
            .queries
            .succeeds(&systemctl_query("is-active", RENEW_TIMER))
            .await;
        Ok(StepState::from_checks(&[enabled, active]))
    }

    async fn apply(&self, ctx: &ActionContext<'_>, _state: StepState) -> Result<(), StepError> {
        let s = ctx.cfg.settings();
        if !s.tls {
            return Ok(());
        }
        ctx.runner
            .run(&systemctl(["enable", "--now", RENEW_TIMER]))
            .await?;

        let dry_run = Command::new("certbot")
            .args(["renew", "--dry-run", "--config-dir"])
            .arg(s.layout.letsencrypt_dir.display().to_string());
        if let Err(e) = ctx.runner.run(&dry_run).await {
            warn!(error = %e, "Certificate renewal dry run failed");
            return Err(e.into());
        }
        Ok(())
    }
}
