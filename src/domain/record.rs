//! The configuration record a provisioning run is driven by.
//!
//! A [`ConfigurationRecord`] is built once per run from [`RecordSettings`],
//! validated, and never mutated afterwards. Every path the steps touch is
//! derived here, at construction, so the generated artifacts cannot disagree
//! about where the socket or the logs live.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Roots of the system directories the orchestrator writes into.
///
/// The defaults are the real locations on a RHEL/Fedora host. They are
/// configurable so a run can be pointed at a scratch tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemLayout {
    /// systemd unit directory (default: /etc/systemd/system)
    #[serde(default = "default_unit_dir")]
    pub unit_dir: PathBuf,

    /// nginx site directory (default: /etc/nginx/conf.d)
    #[serde(default = "default_sites_dir")]
    pub sites_dir: PathBuf,

    /// Log root (default: /var/log)
    #[serde(default = "default_log_root")]
    pub log_root: PathBuf,

    /// Runtime root for sockets and locks (default: /run)
    #[serde(default = "default_run_root")]
    pub run_root: PathBuf,

    /// certbot configuration root (default: /etc/letsencrypt)
    #[serde(default = "default_letsencrypt_dir")]
    pub letsencrypt_dir: PathBuf,

    /// PostgreSQL cluster directory (default: /var/lib/pgsql/data)
    #[serde(default = "default_pg_data_dir")]
    pub pg_data_dir: PathBuf,
}

fn default_unit_dir() -> PathBuf {
    PathBuf::from("/etc/systemd/system")
}
fn default_sites_dir() -> PathBuf {
    PathBuf::from("/etc/nginx/conf.d")
}
fn default_log_root() -> PathBuf {
    PathBuf::from("/var/log")
}
fn default_run_root() -> PathBuf {
    PathBuf::from("/run")
}
fn default_letsencrypt_dir() -> PathBuf {
    PathBuf::from("/etc/letsencrypt")
}
fn default_pg_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/pgsql/data")
}

impl Default for SystemLayout {
    fn default() -> Self {
        Self {
            unit_dir: default_unit_dir(),
            sites_dir: default_sites_dir(),
            log_root: default_log_root(),
            run_root: default_run_root(),
            letsencrypt_dir: default_letsencrypt_dir(),
            pg_data_dir: default_pg_data_dir(),
        }
    }
}

impl SystemLayout {
    /// Place every root under `base` (used for scratch runs and tests)
    pub fn rooted_at(base: &Path) -> Self {
        let defaults = Self::default();
        let reroot = |p: &Path| base.join(p.strip_prefix("/").unwrap_or(p));
        Self {
            unit_dir: reroot(&defaults.unit_dir),
            sites_dir: reroot(&defaults.sites_dir),
            log_root: reroot(&defaults.log_root),
            run_root: reroot(&defaults.run_root),
            letsencrypt_dir: reroot(&defaults.letsencrypt_dir),
            pg_data_dir: reroot(&defaults.pg_data_dir),
        }
    }
}

/// Database connection parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub name: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
}

/// Raw, operator-supplied values before validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSettings {
    /// Django project root (contains manage.py and the secret file)
    pub project_path: PathBuf,

    /// Python virtual environment
    pub venv_path: PathBuf,

    /// Python package of the project (e.g. "sc_download_gate")
    pub app_module: String,

    /// Settings module exported to every manage.py invocation
    pub settings_module: String,

    /// Public domain name served by nginx
    pub domain: String,

    /// Gunicorn worker count
    pub workers: u32,

    /// Service identifier, used for the unit name and the socket namespace
    pub service_name: String,

    pub database: DatabaseSettings,

    /// Account the application runs as
    pub service_user: String,
    pub service_group: String,

    /// Issue a certificate and serve HTTPS
    pub tls: bool,

    /// Contact address handed to certbot; certbot asks when absent
    pub admin_email: Option<String>,

    pub layout: SystemLayout,
}

/// Paths computed once from the settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DerivedPaths {
    /// Name of the systemd RuntimeDirectory holding the socket
    pub runtime_dir_name: String,
    pub socket_dir: PathBuf,
    pub socket: PathBuf,
    pub log_dir: PathBuf,
    pub access_log: PathBuf,
    pub error_log: PathBuf,
    pub unit_file: PathBuf,
    pub site_file: PathBuf,
    pub secret_file: PathBuf,
    pub manage_py: PathBuf,
    pub requirements: PathBuf,
    pub static_root: PathBuf,
    pub media_root: PathBuf,
    pub venv_python: PathBuf,
    pub venv_pip: PathBuf,
    pub gunicorn: PathBuf,
    pub certificate_dir: PathBuf,
    pub fullchain: PathBuf,
    pub private_key: PathBuf,
    pub pg_version_file: PathBuf,
    pub lock_file: PathBuf,
}

impl DerivedPaths {
    fn derive(s: &RecordSettings) -> Self {
        let runtime_dir_name = format!("gunicorn-{}", s.service_name);
        let socket_dir = s.layout.run_root.join(&runtime_dir_name);
        let log_dir = s.layout.log_root.join(&runtime_dir_name);
        let venv_bin = s.venv_path.join("bin");
        let certificate_dir = s.layout.letsencrypt_dir.join("live").join(&s.domain);

        Self {
            socket: socket_dir.join("gunicorn.sock"),
            socket_dir,
            access_log: log_dir.join("access.log"),
            error_log: log_dir.join("error.log"),
            log_dir,
            unit_file: s
                .layout
                .unit_dir
                .join(format!("{}.service", s.service_name)),
            site_file: s.layout.sites_dir.join(format!("{}.conf", s.domain)),
            secret_file: s.project_path.join(".env"),
            manage_py: s.project_path.join("manage.py"),
            requirements: s.project_path.join("requirements.txt"),
            static_root: s.project_path.join("staticfiles"),
            media_root: s.project_path.join("media"),
            venv_python: venv_bin.join("python"),
            venv_pip: venv_bin.join("pip"),
            gunicorn: venv_bin.join("gunicorn"),
            fullchain: certificate_dir.join("fullchain.pem"),
            private_key: certificate_dir.join("privkey.pem"),
            certificate_dir,
            pg_version_file: s.layout.pg_data_dir.join("PG_VERSION"),
            lock_file: s
                .layout
                .run_root
                .join("lock")
                .join(format!("hostprep-{}.lock", s.service_name)),
            runtime_dir_name,
        }
    }
}

/// Validation failures for a configuration record
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("{field} must be an absolute path, got '{value}'")]
    RelativePath { field: &'static str, value: String },

    #[error("{field} is invalid: '{value}' ({reason})")]
    InvalidValue {
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("{field} must not be empty")]
    Empty { field: &'static str },
}

/// Immutable, validated configuration for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigurationRecord {
    settings: RecordSettings,
    paths: DerivedPaths,
}

impl ConfigurationRecord {
    /// Validate the settings and derive every path
    pub fn new(settings: RecordSettings) -> Result<Self, RecordError> {
        validate(&settings)?;
        let paths = DerivedPaths::derive(&settings);
        Ok(Self { settings, paths })
    }

    pub fn settings(&self) -> &RecordSettings {
        &self.settings
    }

    pub fn paths(&self) -> &DerivedPaths {
        &self.paths
    }

    /// `user:group` owner spec for chown
    pub fn owner_spec(&self) -> String {
        format!(
            "{}:{}",
            self.settings.service_user, self.settings.service_group
        )
    }

    /// Environment every manage.py invocation runs with
    pub fn django_env(&self) -> Vec<(String, String)> {
        vec![(
            "DJANGO_SETTINGS_MODULE".to_string(),
            self.settings.settings_module.clone(),
        )]
    }

    /// WSGI entry point handed to gunicorn
    pub fn wsgi_target(&self) -> String {
        format!("{}.wsgi:application", self.settings.app_module)
    }
}

fn validate(s: &RecordSettings) -> Result<(), RecordError> {
    for (field, path) in [
        ("project_path", &s.project_path),
        ("venv_path", &s.venv_path),
        ("layout.unit_dir", &s.layout.unit_dir),
        ("layout.sites_dir", &s.layout.sites_dir),
        ("layout.log_root", &s.layout.log_root),
        ("layout.run_root", &s.layout.run_root),
        ("layout.letsencrypt_dir", &s.layout.letsencrypt_dir),
        ("layout.pg_data_dir", &s.layout.pg_data_dir),
    ] {
        if !path.is_absolute() {
            return Err(RecordError::RelativePath {
                field,
                value: path.display().to_string(),
            });
        }
    }

    require_charset(
        "service_name",
        &s.service_name,
        |c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-',
        "lowercase letters, digits and '-' only",
    )?;
    require_charset(
        "app_module",
        &s.app_module,
        is_identifier_char,
        "letters, digits and '_' only",
    )?;
    require_charset(
        "settings_module",
        &s.settings_module,
        |c| is_identifier_char(c) || c == '.',
        "a dotted Python module path",
    )?;
    require_charset(
        "database.name",
        &s.database.name,
        is_identifier_char,
        "letters, digits and '_' only",
    )?;
    require_charset(
        "database.user",
        &s.database.user,
        is_identifier_char,
        "letters, digits and '_' only",
    )?;
    require_charset(
        "domain",
        &s.domain,
        |c| c.is_ascii_alphanumeric() || c == '-' || c == '.',
        "a DNS name",
    )?;
    require_charset(
        "service_user",
        &s.service_user,
        is_account_char,
        "a system account name",
    )?;
    require_charset(
        "service_group",
        &s.service_group,
        is_account_char,
        "a system group name",
    )?;

    if s.database.host.is_empty() {
        return Err(RecordError::Empty {
            field: "database.host",
        });
    }
    if s.database.password.is_empty() {
        return Err(RecordError::Empty {
            field: "database.password",
        });
    }
    if s.database.password.contains(['\n', '\r']) {
        return Err(RecordError::InvalidValue {
            field: "database.password",
            value: "<redacted>".to_string(),
            reason: "must be a single line",
        });
    }
    if s.workers == 0 {
        return Err(RecordError::InvalidValue {
            field: "workers",
            value: "0".to_string(),
            reason: "at least one worker is required",
        });
    }
    if let Some(email) = &s.admin_email {
        if !email.contains('@') || email.contains(char::is_whitespace) {
            return Err(RecordError::InvalidValue {
                field: "admin_email",
                value: email.clone(),
                reason: "not an email address",
            });
        }
    }

    Ok(())
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_account_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'
}

fn require_charset(
    field: &'static str,
    value: &str,
    allowed: impl Fn(char) -> bool,
    reason: &'static str,
) -> Result<(), RecordError> {
    if value.is_empty() {
        return Err(RecordError::Empty { field });
    }
    if !value.chars().all(allowed) {
        return Err(RecordError::InvalidValue {
            field,
            value: value.to_string(),
            reason,
        });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Settings for the sc-download-gate example deployment
    pub fn example_settings() -> RecordSettings {
        RecordSettings {
            project_path: PathBuf::from("/srv/sc_download_gate"),
            venv_path: PathBuf::from("/srv/sc_download_gate/venv"),
            app_module: "sc_download_gate".to_string(),
            settings_module: "sc_download_gate.settings.production".to_string(),
            domain: "download.example.com".to_string(),
            workers: 3,
            service_name: "sc-download-gate".to_string(),
            database: DatabaseSettings {
                name: "sc_download_gate".to_string(),
                user: "sc_download_gate".to_string(),
                password: "s3cret-pass".to_string(),
                host: "localhost".to_string(),
                port: 5432,
            },
            service_user: "deploy".to_string(),
            service_group: "deploy".to_string(),
            tls: true,
            admin_email: None,
            layout: SystemLayout::default(),
        }
    }

    pub fn example_record() -> ConfigurationRecord {
        ConfigurationRecord::new(example_settings()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_socket_path_is_namespaced_per_service() {
        let record = example_record();
        assert_eq!(
            record.paths().socket,
            PathBuf::from("/run/gunicorn-sc-download-gate/gunicorn.sock")
        );
        assert_eq!(
            record.paths().access_log,
            PathBuf::from("/var/log/gunicorn-sc-download-gate/access.log")
        );
        assert_eq!(
            record.paths().unit_file,
            PathBuf::from("/etc/systemd/system/sc-download-gate.service")
        );
        assert_eq!(
            record.paths().site_file,
            PathBuf::from("/etc/nginx/conf.d/download.example.com.conf")
        );
    }

    #[test]
    fn test_rejects_relative_project_path() {
        let mut settings = example_settings();
        settings.project_path = PathBuf::from("relative/project");
        let err = ConfigurationRecord::new(settings).unwrap_err();
        assert!(matches!(
            err,
            RecordError::RelativePath {
                field: "project_path",
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_sql_unsafe_database_user() {
        let mut settings = example_settings();
        settings.database.user = "app; DROP ROLE postgres".to_string();
        assert!(ConfigurationRecord::new(settings).is_err());
    }

    #[test]
    fn test_rejects_zero_workers_and_bad_domain() {
        let mut settings = example_settings();
        settings.workers = 0;
        assert!(ConfigurationRecord::new(settings).is_err());

        let mut settings = example_settings();
        settings.domain = "download example.com".to_string();
        assert!(ConfigurationRecord::new(settings).is_err());
    }

    #[test]
    fn test_rooted_layout_stays_under_base() {
        let layout = SystemLayout::rooted_at(Path::new("/tmp/scratch"));
        assert_eq!(layout.unit_dir, PathBuf::from("/tmp/scratch/etc/systemd/system"));
        assert_eq!(layout.run_root, PathBuf::from("/tmp/scratch/run"));
    }
}
