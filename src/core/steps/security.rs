//! Ownership, permissions and SELinux policy for the deployment.

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use crate::adapters::Command;
use crate::core::step::{ActionContext, ProbeContext, StepError, StepOps};
use crate::core::probe;
use crate::domain::{ConfigurationRecord, StepState};

const PROJECT_MODE: u32 = 0o750;
const SECRET_MODE: u32 = 0o600;
const NGINX_ACCOUNT: &str = "nginx";
const NETWORK_BOOLEAN: &str = "httpd_can_network_connect";

pub struct Permissions;

#[async_trait]
impl StepOps for Permissions {
    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<StepState, StepError> {
        let s = ctx.cfg.settings();
        let p = ctx.cfg.paths();

        let owner = ctx
            .queries
            .output(
                &Command::query("stat")
                    .args(["-c", "%U:%G"])
                    .arg(s.project_path.display().to_string()),
            )
            .await;
        let nginx_groups = ctx
            .queries
            .output(&Command::query("id").args(["-nG", NGINX_ACCOUNT]))
            .await
            .unwrap_or_default();

        Ok(StepState::from_checks(&[
            owner.as_deref() == Some(ctx.cfg.owner_spec().as_str()),
            probe::mode_of(&s.project_path) == Some(PROJECT_MODE),
            probe::mode_of(&p.secret_file) == Some(SECRET_MODE),
            nginx_groups
                .split_whitespace()
                .any(|g| g == s.service_group),
        ]))
    }

    async fn apply(&self, ctx: &ActionContext<'_>, _state: StepState) -> Result<(), StepError> {
        let s = ctx.cfg.settings();
        let p = ctx.cfg.paths();

        ctx.runner
            .run(
                &Command::new("chown")
                    .args(["-R", ctx.cfg.owner_spec().as_str()])
                    .arg(s.project_path.display().to_string()),
            )
            .await?;
        tokio::fs::set_permissions(
            &s.project_path,
            std::fs::Permissions::from_mode(PROJECT_MODE),
        )
        .await?;
        tokio::fs::set_permissions(&p.secret_file, std::fs::Permissions::from_mode(SECRET_MODE))
            .await?;

        // nginx reads static files and the socket through the service group
        ctx.runner
            .run(
                &Command::new("usermod")
                    .args(["-a", "-G", s.service_group.as_str(), NGINX_ACCOUNT]),
            )
            .await?;
        Ok(())
    }
}

/// A persistent file-context rule: `<dir>(/.*)?` labelled `selinux_type`
#[derive(Debug, Clone, PartialEq, Eq)]
struct LabelRule {
    dir: PathBuf,
    selinux_type: &'static str,
}

impl LabelRule {
    fn pattern(&self) -> String {
        format!("{}(/.*)?", self.dir.display())
    }

    /// Whether `semanage fcontext -l -C` output already carries this rule
    fn listed_in(&self, listing: &str) -> bool {
        let pattern = self.pattern();
        listing.lines().any(|line| {
            let mut fields = line.split_whitespace();
            fields.next() == Some(pattern.as_str()) && line.contains(self.selinux_type)
        })
    }
}

fn label_rules(cfg: &ConfigurationRecord) -> Vec<LabelRule> {
    let p = cfg.paths();
    vec![
        LabelRule {
            dir: p.static_root.clone(),
            selinux_type: "httpd_sys_content_t",
        },
        LabelRule {
            dir: p.media_root.clone(),
            selinux_type: "httpd_sys_rw_content_t",
        },
        LabelRule {
            dir: p.socket_dir.clone(),
            selinux_type: "httpd_var_run_t",
        },
    ]
}

pub struct SelinuxLabels;

impl SelinuxLabels {
    async fn local_rules(ctx: &ProbeContext<'_>) -> String {
        ctx.queries
            .output(&Command::query("semanage").args(["fcontext", "-l", "-C"]))
            .await
            .unwrap_or_default()
    }

    async fn boolean_on(ctx: &ProbeContext<'_>) -> bool {
        ctx.queries
            .output(&Command::query("getsebool").arg(NETWORK_BOOLEAN))
            .await
            .map(|out| out.ends_with("on"))
            .unwrap_or(false)
    }
}

#[async_trait]
impl StepOps for SelinuxLabels {
    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<StepState, StepError> {
        let mode = ctx.queries.output(&Command::query("getenforce")).await;
        if mode.as_deref() == Some("Disabled") {
            return Ok(StepState::AlreadyDone);
        }

        let listing = Self::local_rules(ctx).await;
        let mut checks: Vec<bool> = label_rules(ctx.cfg)
            .iter()
            .map(|rule| rule.listed_in(&listing))
            .collect();
        checks.push(Self::boolean_on(ctx).await);
        Ok(StepState::from_checks(&checks))
    }

    async fn apply(&self, ctx: &ActionContext<'_>, _state: StepState) -> Result<(), StepError> {
        let queries = ProbeContext {
            cfg: ctx.cfg,
            queries: probe::QueryRunner::new(ctx.runner),
        };
        let listing = Self::local_rules(&queries).await;

        for rule in label_rules(ctx.cfg) {
            if rule.listed_in(&listing) {
                info!(path = %rule.dir.display(), "SELinux file context already defined");
            } else {
                ctx.runner
                    .run(
                        &Command::new("semanage")
                            .args(["fcontext", "-a", "-t", rule.selinux_type])
                            .arg(rule.pattern()),
                    )
                    .await?;
            }
            // The socket directory only exists while the service runs
            if probe::is_dir(&rule.dir) {
                ctx.runner
                    .run(
                        &Command::new("restorecon")
                            .arg("-R")
                            .arg(rule.dir.display().to_string()),
                    )
                    .await?;
            }
        }

        ctx.runner
            .run(&Command::new("setsebool").args(["-P", NETWORK_BOOLEAN, "1"]))
            .await?;
        Ok(())
    }
}
