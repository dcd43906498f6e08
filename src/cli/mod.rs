//! Command-line interface for hostprep.
//!
//! Provides commands for running the provisioning sequence, inspecting the
//! host without changing it, and printing the generated artifacts and the
//! resolved configuration.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use crate::adapters::SystemRunner;
use crate::config;
use crate::core::{generate, plan, survey, HostLock, LineGate, Sequencer, StepFilter};
use crate::domain::{ArtifactKind, ConfigurationRecord, RunReport};

/// Exit code for a run that failed at a step
pub const EXIT_RUN_FAILED: u8 = 1;

/// Exit code for configuration and precondition errors
pub const EXIT_PRECONDITION: u8 = 2;

/// hostprep - staged, re-runnable provisioning for Django application hosts
#[derive(Parser, Debug)]
#[command(name = "hostprep")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: .hostprep/config.yaml in this directory or a parent)
    #[arg(long, global = true, env = "HOSTPREP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Use configured and default values without asking for each one
    #[arg(long, global = true)]
    pub non_interactive: bool,

    /// Debug logging (same as RUST_LOG=debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the provisioning sequence (default)
    Run {
        /// Only offer these steps (comma-separated ids)
        #[arg(long, value_delimiter = ',', conflicts_with = "from")]
        only: Vec<String>,

        /// Offer this step and every step after it
        #[arg(long)]
        from: Option<String>,

        /// Write the run report as JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Probe every step and print its state (changes nothing)
    Status,

    /// Print a generated artifact with its target, mode, owner and digest
    Render {
        #[arg(value_enum)]
        artifact: ArtifactArg,
    },

    /// Show resolved configuration
    Config,
}

/// Artifact name for `render` (maps to ArtifactKind)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ArtifactArg {
    /// systemd unit for gunicorn
    Unit,

    /// nginx site
    Site,

    /// Managed lines for the secret file
    Secrets,
}

impl From<ArtifactArg> for ArtifactKind {
    fn from(a: ArtifactArg) -> Self {
        match a {
            ArtifactArg::Unit => ArtifactKind::ProcessUnit,
            ArtifactArg::Site => ArtifactKind::ReverseProxySite,
            ArtifactArg::Secrets => ArtifactKind::SecretFragment,
        }
    }
}

impl Cli {
    /// Execute the CLI command.
    ///
    /// Errors returned from here are configuration or precondition errors;
    /// a failed step is reported through the exit code instead.
    pub async fn execute(self) -> Result<ExitCode> {
        match self.command.unwrap_or(Commands::Run {
            only: Vec::new(),
            from: None,
            report: None,
        }) {
            Commands::Run { only, from, report } => {
                let filter = if let Some(first) = from {
                    StepFilter::From(first)
                } else if !only.is_empty() {
                    StepFilter::Only(only)
                } else {
                    StepFilter::All
                };
                run(
                    self.config.as_deref(),
                    self.non_interactive,
                    filter,
                    report.as_deref(),
                )
                .await
            }
            Commands::Status => show_status(self.config.as_deref()).await,
            Commands::Render { artifact } => render(self.config.as_deref(), artifact.into()),
            Commands::Config => show_config(self.config.as_deref()),
        }
    }
}

/// Resolve the record without asking anything
fn resolve_record(config_path: Option<&Path>) -> Result<ConfigurationRecord> {
    let settings = resolve_settings(config_path)?;
    ConfigurationRecord::new(settings).context("Invalid configuration")
}

fn resolve_settings(config_path: Option<&Path>) -> Result<crate::domain::RecordSettings> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    let loaded = config::load(config_path, &cwd)?;
    if let Some(source) = &loaded.source {
        tracing::debug!(path = %source.display(), "Loaded config file");
    }
    Ok(config::resolve(&loaded))
}

/// Run the provisioning sequence
async fn run(
    config_path: Option<&Path>,
    non_interactive: bool,
    filter: StepFilter,
    report_path: Option<&Path>,
) -> Result<ExitCode> {
    let mut gate = LineGate::stdio();

    let settings = resolve_settings(config_path)?;
    let settings = if non_interactive {
        settings
    } else {
        config::collect(&mut gate, settings).context("Failed to read configuration values")?
    };
    let cfg = ConfigurationRecord::new(settings).context("Invalid configuration")?;

    let _lock = HostLock::acquire(&cfg.paths().lock_file)?;

    let runner = SystemRunner::new();
    let steps = plan(&cfg);
    let report = Sequencer::new(&runner, &mut gate)
        .with_filter(filter)
        .run(&steps, &cfg, Uuid::new_v4())
        .await?;

    println!();
    print!("{}", report.render());

    if let Some(path) = report_path {
        write_report(&report, path)?;
        eprintln!("Report written to {}", path.display());
    }

    Ok(if report.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_RUN_FAILED)
    })
}

/// Write the run report as pretty-printed JSON
fn write_report(report: &RunReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to encode run report")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write run report: {}", path.display()))
}

/// Probe every step and print its state
async fn show_status(config_path: Option<&Path>) -> Result<ExitCode> {
    let cfg = resolve_record(config_path)?;
    let runner = SystemRunner::new();
    let steps = plan(&cfg);

    println!("{:<22} {:<12} {}", "STEP", "STATE", "DESCRIPTION");
    println!("{}", "-".repeat(80));
    let states = survey(&runner, &steps, &cfg).await;
    for (step, (_, state)) in steps.iter().zip(states) {
        println!("{:<22} {:<12} {}", step.id, state.label(), step.description);
    }

    Ok(ExitCode::SUCCESS)
}

/// Print one generated artifact
fn render(config_path: Option<&Path>, kind: ArtifactKind) -> Result<ExitCode> {
    let cfg = resolve_record(config_path)?;
    let artifact = generate(kind, &cfg);

    eprintln!("target: {}", artifact.target.display());
    eprintln!("mode:   {}", artifact.mode_octal());
    eprintln!("owner:  {}", artifact.owner.spec());
    eprintln!("sha256: {}", artifact.digest());
    print!("{}", artifact.content);

    Ok(ExitCode::SUCCESS)
}

/// Show resolved configuration (password masked)
fn show_config(config_path: Option<&Path>) -> Result<ExitCode> {
    let mut settings = resolve_settings(config_path)?;
    let cfg = ConfigurationRecord::new(settings.clone()).context("Invalid configuration")?;

    settings.database.password = "********".to_string();
    println!("# settings");
    print!("{}", serde_yaml::to_string(&settings)?);
    println!("# derived paths");
    print!("{}", serde_yaml::to_string(cfg.paths())?);

    Ok(ExitCode::SUCCESS)
}
