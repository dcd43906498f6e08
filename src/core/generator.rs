//! Artifact generation.
//!
//! Rendering is a pure function of the configuration record and the fixed
//! templates below: the same record always renders byte-identical content,
//! which is what lets the probes detect an already-applied artifact by
//! comparing bytes.

use std::fmt::Write as _;
use std::path::Path;

use thiserror::Error;

use crate::domain::{ArtifactKind, ConfigurationRecord, FileOwner, GeneratedArtifact};

use super::secrets;

/// Keys the orchestrator owns in the secret file
pub const SECRET_KEYS: [&str; 10] = [
    "DB_NAME",
    "DB_USER",
    "DB_PASSWORD",
    "DB_HOST",
    "DB_PORT",
    "ALLOWED_HOSTS",
    "CSRF_TRUSTED_ORIGINS",
    "SECURE_SSL_REDIRECT",
    "SESSION_COOKIE_SECURE",
    "CSRF_COOKIE_SECURE",
];

/// Cross-artifact consistency failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("{artifact} does not reference socket {expected}")]
    SocketMismatch {
        artifact: &'static str,
        expected: String,
    },

    #[error("reverse-proxy alias {alias} is outside project {project}")]
    AliasOutsideProject { alias: String, project: String },

    #[error("secret fragment defines {key} more than once")]
    DuplicateKey { key: String },
}

/// Render one artifact
pub fn generate(kind: ArtifactKind, cfg: &ConfigurationRecord) -> GeneratedArtifact {
    let paths = cfg.paths();
    match kind {
        ArtifactKind::ProcessUnit => GeneratedArtifact {
            kind,
            target: paths.unit_file.clone(),
            content: render_unit(cfg),
            mode: 0o644,
            owner: FileOwner::root(),
        },
        ArtifactKind::ReverseProxySite => GeneratedArtifact {
            kind,
            target: paths.site_file.clone(),
            content: render_site(cfg),
            mode: 0o644,
            owner: FileOwner::root(),
        },
        ArtifactKind::SecretFragment => GeneratedArtifact {
            kind,
            target: paths.secret_file.clone(),
            content: render_secret_fragment(cfg),
            mode: 0o600,
            owner: FileOwner {
                user: cfg.settings().service_user.clone(),
                group: cfg.settings().service_group.clone(),
            },
        },
    }
}

/// The `(key, value)` pairs merged into the secret file
///
/// Besides the database connection this pins the host Django answers for
/// and whether it insists on HTTPS, which must follow the `tls` flag or a
/// plain-HTTP site redirects forever.
pub fn secret_entries(cfg: &ConfigurationRecord) -> Vec<(&'static str, String)> {
    let s = cfg.settings();
    let db = &s.database;
    let (scheme, secure) = if s.tls { ("https", "True") } else { ("http", "False") };
    vec![
        (SECRET_KEYS[0], db.name.clone()),
        (SECRET_KEYS[1], db.user.clone()),
        (SECRET_KEYS[2], db.password.clone()),
        (SECRET_KEYS[3], db.host.clone()),
        (SECRET_KEYS[4], db.port.to_string()),
        (SECRET_KEYS[5], s.domain.clone()),
        (SECRET_KEYS[6], format!("{}://{}", scheme, s.domain)),
        (SECRET_KEYS[7], secure.to_string()),
        (SECRET_KEYS[8], secure.to_string()),
        (SECRET_KEYS[9], secure.to_string()),
    ]
}

fn render_secret_fragment(cfg: &ConfigurationRecord) -> String {
    secret_entries(cfg)
        .iter()
        .map(|(key, value)| format!("{}\n", secrets::format_entry(key, value)))
        .collect()
}

fn render_unit(cfg: &ConfigurationRecord) -> String {
    let s = cfg.settings();
    let p = cfg.paths();

    format!(
        r#"# Generated by hostprep for {service}. Changes are overwritten on the next run.
[Unit]
Description=Gunicorn application server for {service}
After=network.target postgresql.service
Wants=postgresql.service

[Service]
Type=notify
NotifyAccess=main
User={user}
Group={group}
RuntimeDirectory={runtime_dir}
RuntimeDirectoryMode=0750
WorkingDirectory={project}
Environment="DJANGO_SETTINGS_MODULE={settings_module}"
ExecStart={gunicorn} --workers {workers} --bind unix:{socket} --access-logfile {access_log} --error-logfile {error_log} {wsgi}
ExecReload=/bin/kill -s HUP $MAINPID
KillMode=mixed
TimeoutStopSec=5
Restart=on-failure
PrivateTmp=true

[Install]
WantedBy=multi-user.target
"#,
        service = s.service_name,
        user = s.service_user,
        group = s.service_group,
        runtime_dir = p.runtime_dir_name,
        project = s.project_path.display(),
        settings_module = s.settings_module,
        gunicorn = p.gunicorn.display(),
        workers = s.workers,
        socket = p.socket.display(),
        access_log = p.access_log.display(),
        error_log = p.error_log.display(),
        wsgi = cfg.wsgi_target(),
    )
}

fn render_site(cfg: &ConfigurationRecord) -> String {
    let s = cfg.settings();
    let p = cfg.paths();
    let mut out = String::new();

    let _ = writeln!(
        out,
        "# Generated by hostprep for {} ({}). Changes are overwritten on the next run.",
        s.service_name, s.domain
    );

    if s.tls {
        let _ = write!(
            out,
            r#"server {{
    listen 80;
    listen [::]:80;
    server_name {domain};

    return 301 https://$host$request_uri;
}}

server {{
    listen 443 ssl;
    listen [::]:443 ssl;
    server_name {domain};

    ssl_certificate {fullchain};
    ssl_certificate_key {private_key};
    ssl_protocols TLSv1.2 TLSv1.3;
    ssl_session_cache shared:SSL:10m;
    add_header Strict-Transport-Security "max-age=31536000; includeSubDomains" always;
"#,
            domain = s.domain,
            fullchain = p.fullchain.display(),
            private_key = p.private_key.display(),
        );
    } else {
        let _ = write!(
            out,
            r#"server {{
    listen 80;
    listen [::]:80;
    server_name {domain};
"#,
            domain = s.domain,
        );
    }

    let nginx_logs = s.layout.log_root.join("nginx");
    let _ = write!(
        out,
        r#"
    client_max_body_size 20M;

    access_log {logs}/{domain}.access.log;
    error_log {logs}/{domain}.error.log;

    location = /favicon.ico {{
        access_log off;
        log_not_found off;
    }}

    location /static/ {{
        alias {static_root}/;
    }}

    location /media/ {{
        alias {media_root}/;
    }}

    location / {{
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
        proxy_redirect off;
        proxy_pass http://unix:{socket};
    }}
}}
"#,
        logs = nginx_logs.display(),
        domain = s.domain,
        static_root = p.static_root.display(),
        media_root = p.media_root.display(),
        socket = p.socket.display(),
    );

    out
}

/// Check the structural invariants that tie the artifacts together
pub fn verify(artifacts: &[GeneratedArtifact], cfg: &ConfigurationRecord) -> Result<(), ConsistencyError> {
    let socket = cfg.paths().socket.display().to_string();

    for artifact in artifacts {
        match artifact.kind {
            ArtifactKind::ProcessUnit => {
                if unit_socket(&artifact.content) != Some(socket.as_str()) {
                    return Err(ConsistencyError::SocketMismatch {
                        artifact: "process unit",
                        expected: socket,
                    });
                }
            }
            ArtifactKind::ReverseProxySite => {
                if site_socket(&artifact.content) != Some(socket.as_str()) {
                    return Err(ConsistencyError::SocketMismatch {
                        artifact: "reverse-proxy site",
                        expected: socket,
                    });
                }
                for alias in site_aliases(&artifact.content) {
                    if !Path::new(alias).starts_with(&cfg.settings().project_path) {
                        return Err(ConsistencyError::AliasOutsideProject {
                            alias: alias.to_string(),
                            project: cfg.settings().project_path.display().to_string(),
                        });
                    }
                }
            }
            ArtifactKind::SecretFragment => {
                let mut seen = std::collections::HashSet::new();
                for key in artifact.content.lines().filter_map(secrets::line_key) {
                    if !seen.insert(key) {
                        return Err(ConsistencyError::DuplicateKey {
                            key: key.to_string(),
                        });
                    }
                }
            }
        }
    }

    Ok(())
}

/// Socket path the unit binds (`--bind unix:<path>`)
pub fn unit_socket(unit: &str) -> Option<&str> {
    let exec = unit.lines().find(|l| l.starts_with("ExecStart="))?;
    let (_, rest) = exec.split_once("--bind unix:")?;
    rest.split_whitespace().next()
}

/// Socket path the site proxies to (`proxy_pass http://unix:<path>;`)
pub fn site_socket(site: &str) -> Option<&str> {
    site.lines()
        .map(str::trim)
        .find_map(|l| l.strip_prefix("proxy_pass http://unix:"))
        .map(|rest| rest.trim_end_matches(';'))
}

fn site_aliases(site: &str) -> impl Iterator<Item = &str> {
    site.lines()
        .map(str::trim)
        .filter_map(|l| l.strip_prefix("alias "))
        .map(|rest| rest.trim_end_matches(';'))
}
