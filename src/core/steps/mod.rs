//! The fixed provisioning sequence.
//!
//! Order is a total order matching real prerequisites: packages before
//! everything, the virtualenv before dependencies, the database before
//! migrations, the unit file before the service starts, the certificate
//! before nginx is restarted with the HTTPS server.

mod database;
mod django;
mod python;
mod security;
mod system;
mod web;

use crate::adapters::Command;
use crate::domain::{ConfigurationRecord, Criticality};

use super::step::Step;

pub const SYSTEM_PACKAGES: &str = "system-packages";
pub const FIREWALL: &str = "firewall";
pub const VIRTUALENV: &str = "virtualenv";
pub const PYTHON_DEPENDENCIES: &str = "python-dependencies";
pub const DATABASE_SERVER: &str = "database-server";
pub const DATABASE_BOOTSTRAP: &str = "database-bootstrap";
pub const SECRET_STORE: &str = "secret-store";
pub const MIGRATIONS: &str = "migrations";
pub const STATIC_ASSETS: &str = "static-assets";
pub const SUPERUSER: &str = "superuser";
pub const PROCESS_UNIT: &str = "process-unit";
pub const REVERSE_PROXY: &str = "reverse-proxy";
pub const TLS_CERTIFICATE: &str = "tls-certificate";
pub const PERMISSIONS: &str = "permissions";
pub const SELINUX_LABELS: &str = "selinux-labels";
pub const SERVICE_ACTIVATION: &str = "service-activation";
pub const CERTIFICATE_RENEWAL: &str = "certificate-renewal";

/// Step identifiers in execution order
pub const STEP_IDS: [&str; 17] = [
    SYSTEM_PACKAGES,
    FIREWALL,
    VIRTUALENV,
    PYTHON_DEPENDENCIES,
    DATABASE_SERVER,
    DATABASE_BOOTSTRAP,
    SECRET_STORE,
    MIGRATIONS,
    STATIC_ASSETS,
    SUPERUSER,
    PROCESS_UNIT,
    REVERSE_PROXY,
    TLS_CERTIFICATE,
    PERMISSIONS,
    SELINUX_LABELS,
    SERVICE_ACTIVATION,
    CERTIFICATE_RENEWAL,
];

/// Build the provisioning sequence for `cfg`
pub fn plan(cfg: &ConfigurationRecord) -> Vec<Step> {
    let s = cfg.settings();
    let p = cfg.paths();
    use Criticality::{Advisory, HardFail};

    vec![
        Step::new(
            SYSTEM_PACKAGES,
            "Install system packages (python, PostgreSQL, nginx, certbot, SELinux tools)",
            HardFail,
            system::Packages,
        ),
        Step::new(
            FIREWALL,
            "Open HTTP and HTTPS in firewalld",
            HardFail,
            system::Firewall,
        ),
        Step::new(
            VIRTUALENV,
            format!("Create the Python virtual environment at {}", s.venv_path.display()),
            HardFail,
            python::Virtualenv,
        ),
        Step::new(
            PYTHON_DEPENDENCIES,
            "Install Python dependencies (requirements.txt, gunicorn, psycopg2)",
            HardFail,
            python::Dependencies,
        ),
        Step::new(
            DATABASE_SERVER,
            "Initialise and start the PostgreSQL server",
            HardFail,
            database::Server,
        ),
        Step::new(
            DATABASE_BOOTSTRAP,
            format!(
                "Create database '{}' owned by role '{}'",
                s.database.name, s.database.user
            ),
            HardFail,
            database::Bootstrap,
        ),
        Step::new(
            SECRET_STORE,
            format!("Write database settings into {}", p.secret_file.display()),
            HardFail,
            database::SecretStore,
        ),
        Step::new(
            MIGRATIONS,
            "Apply Django migrations",
            HardFail,
            django::Migrations,
        ),
        Step::new(
            STATIC_ASSETS,
            format!("Collect static files into {}", p.static_root.display()),
            HardFail,
            django::StaticAssets,
        ),
        Step::new(
            SUPERUSER,
            "Create a Django superuser (interactive)",
            Advisory,
            django::Superuser,
        ),
        Step::new(
            PROCESS_UNIT,
            format!("Install systemd unit {}", p.unit_file.display()),
            HardFail,
            web::ProcessUnit,
        ),
        Step::new(
            REVERSE_PROXY,
            format!("Install nginx site {}", p.site_file.display()),
            HardFail,
            web::ReverseProxy,
        ),
        Step::new(
            TLS_CERTIFICATE,
            format!("Obtain a Let's Encrypt certificate for {}", s.domain),
            HardFail,
            web::TlsCertificate,
        ),
        Step::new(
            PERMISSIONS,
            format!(
                "Give {} to {} and restrict the secret file",
                s.project_path.display(),
                cfg.owner_spec()
            ),
            HardFail,
            security::Permissions,
        ),
        Step::new(
            SELINUX_LABELS,
            "Apply SELinux labels and booleans for nginx",
            HardFail,
            security::SelinuxLabels,
        ),
        Step::new(
            SERVICE_ACTIVATION,
            format!("Enable and start {} and nginx", s.service_name),
            HardFail,
            web::ServiceActivation,
        ),
        Step::new(
            CERTIFICATE_RENEWAL,
            "Enable certificate auto-renewal and run a renewal dry run",
            Advisory,
            web::CertificateRenewal,
        ),
    ]
}

/// `systemctl <verb> <unit>` as a query
fn systemctl_query(verb: &str, unit: &str) -> Command {
    Command::query("systemctl").args([verb, unit])
}

/// `systemctl <args..>` as a mutation
fn systemctl<const N: usize>(args: [&str; N]) -> Command {
    Command::new("systemctl").args(args)
}

/// `python manage.py <args..>` in the project, with the settings module set
fn manage<const N: usize>(cfg: &ConfigurationRecord, args: [&str; N]) -> Command {
    let p = cfg.paths();
    Command::new(p.venv_python.display().to_string())
        .arg(p.manage_py.display().to_string())
        .args(args)
        .current_dir(&cfg.settings().project_path)
        .envs(cfg.django_env())
}

/// Read-only `python manage.py <args..>`
fn manage_query<const N: usize>(cfg: &ConfigurationRecord, args: [&str; N]) -> Command {
    Command {
        effect: crate::adapters::Effect::Query,
        ..manage(cfg, args)
    }
}
