//! Configuration for a provisioning run.
//!
//! Configuration sources (highest priority first):
//! 1. Explicit file (`--config <path>` or HOSTPREP_CONFIG)
//! 2. Discovered file (.hostprep/config.yaml in the current directory or a parent)
//! 3. User file (~/.config/hostprep/config.yaml)
//! 4. Defaults derived from the project directory
//!
//! Relative paths in a discovered file resolve against the directory that
//! contains `.hostprep/`; in any other file, against the file's own directory.
//! Values resolved here are only defaults: interactive collection shows each
//! one and lets the operator accept it with Enter.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::gate::LineGate;
use crate::core::secrets;
use crate::domain::{DatabaseSettings, RecordSettings, SystemLayout};

/// Directory searched for in the current directory and its parents
pub const CONFIG_DIR: &str = ".hostprep";
pub const CONFIG_FILE: &str = "config.yaml";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub project_path: Option<String>,
    pub venv_path: Option<String>,
    pub app_module: Option<String>,
    pub settings_module: Option<String>,
    pub domain: Option<String>,
    pub workers: Option<u32>,
    pub service_name: Option<String>,
    pub service_user: Option<String>,
    pub service_group: Option<String>,
    pub tls: Option<bool>,
    pub admin_email: Option<String>,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub layout: Option<SystemLayout>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    pub name: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// A config file together with where it came from
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub file: ConfigFile,

    /// Path to config file (if found)
    pub source: Option<PathBuf>,

    /// Directory relative paths resolve against
    pub base_dir: PathBuf,
}

/// Find config file by searching `start` and its parents
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.is_file() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Per-user config file, if present
fn user_config_file() -> Option<PathBuf> {
    let path = dirs::config_dir()?.join("hostprep").join(CONFIG_FILE);
    path.is_file().then_some(path)
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Load the highest-priority config file, or an empty one
pub fn load(explicit: Option<&Path>, cwd: &Path) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        let file = load_config_file(path)?;
        let base_dir = path
            .parent()
            .map(|p| resolve_path(cwd, &p.display().to_string()))
            .unwrap_or_else(|| cwd.to_path_buf());
        return Ok(LoadedConfig {
            file,
            source: Some(path.to_path_buf()),
            base_dir,
        });
    }

    if let Some(path) = find_config_file(cwd) {
        let file = load_config_file(&path)?;
        // Base directory is the parent of .hostprep/
        let base_dir = path
            .parent()
            .and_then(|p| p.parent())
            .unwrap_or(cwd)
            .to_path_buf();
        return Ok(LoadedConfig {
            file,
            source: Some(path),
            base_dir,
        });
    }

    if let Some(path) = user_config_file() {
        let file = load_config_file(&path)?;
        return Ok(LoadedConfig {
            file,
            source: Some(path),
            base_dir: cwd.to_path_buf(),
        });
    }

    Ok(LoadedConfig {
        file: ConfigFile::default(),
        source: None,
        base_dir: cwd.to_path_buf(),
    })
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Account the application should run as when none is configured
fn invoking_user() -> String {
    std::env::var("SUDO_USER")
        .or_else(|_| std::env::var("USER"))
        .unwrap_or_default()
}

/// 2 x cpus + 1, the usual gunicorn sizing
fn default_workers() -> u32 {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1);
    cpus * 2 + 1
}

/// Existing password in the project's secret file, if any
fn existing_password(project: &Path) -> Option<String> {
    let content = std::fs::read_to_string(project.join(".env")).ok()?;
    secrets::lookup(&content, "DB_PASSWORD").filter(|p| !p.is_empty())
}

/// Fill every field from the file or its default
pub fn resolve(loaded: &LoadedConfig) -> RecordSettings {
    let f = &loaded.file;
    let base = &loaded.base_dir;

    let project_path = f
        .project_path
        .as_deref()
        .map(|p| resolve_path(base, p))
        .unwrap_or_else(|| base.clone());
    let dir_name = project_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let app_module = f
        .app_module
        .clone()
        .unwrap_or_else(|| dir_name.replace('-', "_"));
    let service_name = f
        .service_name
        .clone()
        .unwrap_or_else(|| dir_name.replace('_', "-").to_ascii_lowercase());
    let service_user = f.service_user.clone().unwrap_or_else(invoking_user);

    let password = f
        .database
        .password
        .clone()
        .or_else(|| existing_password(&project_path))
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

    RecordSettings {
        venv_path: f
            .venv_path
            .as_deref()
            .map(|p| resolve_path(base, p))
            .unwrap_or_else(|| project_path.join("venv")),
        settings_module: f
            .settings_module
            .clone()
            .unwrap_or_else(|| format!("{}.settings.production", app_module)),
        domain: f.domain.clone().unwrap_or_default(),
        workers: f.workers.unwrap_or_else(default_workers),
        database: DatabaseSettings {
            name: f.database.name.clone().unwrap_or_else(|| app_module.clone()),
            user: f.database.user.clone().unwrap_or_else(|| app_module.clone()),
            password,
            host: f
                .database
                .host
                .clone()
                .unwrap_or_else(|| "localhost".to_string()),
            port: f.database.port.unwrap_or(5432),
        },
        service_group: f
            .service_group
            .clone()
            .unwrap_or_else(|| service_user.clone()),
        service_user,
        tls: f.tls.unwrap_or(true),
        admin_email: f.admin_email.clone(),
        layout: f.layout.clone().unwrap_or_default(),
        project_path,
        app_module,
        service_name,
    }
}

/// Ask the operator for each value, offering the resolved one as default
pub fn collect<R: BufRead, W: Write>(
    gate: &mut LineGate<R, W>,
    defaults: RecordSettings,
) -> Result<RecordSettings> {
    let mut s = defaults;

    s.project_path = PathBuf::from(gate.ask("Project path", &s.project_path.display().to_string())?);
    s.venv_path = PathBuf::from(gate.ask("Virtualenv path", &s.venv_path.display().to_string())?);
    s.app_module = gate.ask("Django app module", &s.app_module)?;
    s.settings_module = gate.ask("Settings module", &s.settings_module)?;
    s.domain = gate.ask("Domain", &s.domain)?;
    s.workers = ask_parsed(gate, "Gunicorn workers", s.workers)?;
    s.service_name = gate.ask("Service name", &s.service_name)?;
    s.database.name = gate.ask("Database name", &s.database.name)?;
    s.database.user = gate.ask("Database user", &s.database.user)?;
    s.database.host = gate.ask("Database host", &s.database.host)?;
    s.database.port = ask_parsed(gate, "Database port", s.database.port)?;
    s.service_user = gate.ask("Service user", &s.service_user)?;
    s.service_group = gate.ask("Service group", &s.service_group)?;
    s.tls = ask_parsed(gate, "Enable TLS (true/false)", s.tls)?;
    if s.tls {
        let email = gate.ask(
            "Certificate contact email",
            s.admin_email.as_deref().unwrap_or_default(),
        )?;
        s.admin_email = Some(email).filter(|e| !e.is_empty());
    }

    Ok(s)
}

fn ask_parsed<R, W, T>(gate: &mut LineGate<R, W>, label: &str, default: T) -> Result<T>
where
    R: BufRead,
    W: Write,
    T: std::str::FromStr + std::fmt::Display,
{
    loop {
        let answer = gate.ask(label, &default.to_string())?;
        match answer.parse() {
            Ok(value) => return Ok(value),
            Err(_) => tracing::warn!(%label, %answer, "Not a valid value, asking again"),
        }
    }
}
