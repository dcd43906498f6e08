//! PostgreSQL server, role/database bootstrap and the secret file.

use async_trait::async_trait;
use tracing::info;

use crate::adapters::Command;
use crate::core::step::{ActionContext, ProbeContext, StepError, StepOps};
use crate::core::{fsops, generator, probe, secrets};
use crate::domain::{ArtifactKind, StepState};

use super::{systemctl, systemctl_query};

const POSTGRES_ACCOUNT: &str = "postgres";

/// `psql -tAc <sql>` as the postgres superuser
fn psql_query(sql: String) -> Command {
    Command::query("psql")
        .args(["-tAc", sql.as_str()])
        .run_as(POSTGRES_ACCOUNT)
}

fn psql(sql: String) -> Command {
    Command::new("psql")
        .args(["-v", "ON_ERROR_STOP=1", "-c", sql.as_str()])
        .run_as(POSTGRES_ACCOUNT)
}

/// Quote a SQL string literal
fn literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Quote a SQL identifier so PostgreSQL keeps its exact case
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub struct Server;

#[async_trait]
impl StepOps for Server {
    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<StepState, StepError> {
        if !probe::is_file(&ctx.cfg.paths().pg_version_file) {
            return Ok(StepState::NotStarted);
        }
        let active = ctx
            .queries
            .succeeds(&systemctl_query("is-active", "postgresql"))
            .await;
        let enabled = ctx
            .queries
            .succeeds(&systemctl_query("is-enabled", "postgresql"))
            .await;
        Ok(StepState::from_checks(&[true, active, enabled]))
    }

    async fn apply(&self, ctx: &ActionContext<'_>, _state: StepState) -> Result<(), StepError> {
        if probe::is_file(&ctx.cfg.paths().pg_version_file) {
            info!("PostgreSQL cluster already initialised");
        } else {
            ctx.runner
                .run(&Command::new("postgresql-setup").arg("--initdb"))
                .await?;
        }
        ctx.runner
            .run(&systemctl(["enable", "--now", "postgresql"]))
            .await?;
        Ok(())
    }
}

/// Creates whichever of the role and the database is missing.
///
/// An existing role keeps its password; the step does not rotate credentials.
pub struct Bootstrap;

impl Bootstrap {
    async fn role_exists(ctx: &ProbeContext<'_>) -> bool {
        let user = &ctx.cfg.settings().database.user;
        let sql = format!("SELECT 1 FROM pg_roles WHERE rolname = {}", literal(user));
        ctx.queries.output(&psql_query(sql)).await.as_deref() == Some("1")
    }

    async fn database_exists(ctx: &ProbeContext<'_>) -> bool {
        let name = &ctx.cfg.settings().database.name;
        let sql = format!("SELECT 1 FROM pg_database WHERE datname = {}", literal(name));
        ctx.queries.output(&psql_query(sql)).await.as_deref() == Some("1")
    }
}

#[async_trait]
impl StepOps for Bootstrap {
    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<StepState, StepError> {
        let role = Self::role_exists(ctx).await;
        let database = Self::database_exists(ctx).await;
        Ok(StepState::from_checks(&[role, database]))
    }

    async fn apply(&self, ctx: &ActionContext<'_>, _state: StepState) -> Result<(), StepError> {
        let db = &ctx.cfg.settings().database;
        let (role, database) = (quote_ident(&db.user), quote_ident(&db.name));
        let queries = ProbeContext {
            cfg: ctx.cfg,
            queries: probe::QueryRunner::new(ctx.runner),
        };

        if Self::role_exists(&queries).await {
            info!(role = %db.user, "Database role exists");
        } else {
            let sql = format!(
                "CREATE ROLE {} WITH LOGIN PASSWORD {}",
                role,
                literal(&db.password)
            );
            ctx.runner
                .run(
                    &psql(sql)
                        .redact(literal(&db.password))
                        .redact(db.password.as_str()),
                )
                .await?;

            // Settings Django expects on its connection role
            for setting in [
                "client_encoding TO 'utf8'",
                "default_transaction_isolation TO 'read committed'",
                "timezone TO 'UTC'",
            ] {
                ctx.runner
                    .run(&psql(format!("ALTER ROLE {} SET {}", role, setting)))
                    .await?;
            }
        }

        if Self::database_exists(&queries).await {
            info!(database = %db.name, "Database exists");
        } else {
            ctx.runner
                .run(&psql(format!(
                    "CREATE DATABASE {} OWNER {}",
                    database, role
                )))
                .await?;
        }

        ctx.runner
            .run(&psql(format!(
                "GRANT ALL PRIVILEGES ON DATABASE {} TO {}",
                database, role
            )))
            .await?;
        Ok(())
    }
}

/// Merges the managed settings into the project's secret file
pub struct SecretStore;

#[async_trait]
impl StepOps for SecretStore {
    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<StepState, StepError> {
        let content = tokio::fs::read_to_string(&ctx.cfg.paths().secret_file).await?;
        let held: Vec<bool> = generator::secret_entries(ctx.cfg)
            .iter()
            .map(|(key, value)| secrets::holds(&content, key, value))
            .collect();
        Ok(StepState::from_checks(&held))
    }

    async fn apply(&self, ctx: &ActionContext<'_>, _state: StepState) -> Result<(), StepError> {
        let fragment = generator::generate(ArtifactKind::SecretFragment, ctx.cfg);
        generator::verify(std::slice::from_ref(&fragment), ctx.cfg)?;

        let existing = tokio::fs::read_to_string(&fragment.target).await?;
        let merged = secrets::merge(&existing, &generator::secret_entries(ctx.cfg));

        fsops::write_atomic(&fragment.target, &merged, fragment.mode).await?;
        fsops::chown(ctx.runner, &fragment.target, &fragment.owner, false).await?;
        info!(path = %fragment.target.display(), "Secret file updated");
        Ok(())
    }
}
