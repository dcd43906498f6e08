//! Artifact Generation Tests
//!
//! Rendering is a pure function of the configuration record, and the unit
//! and site always agree on the socket.

mod common;

use common::settings_in;
use hostprep::core::generator::{site_socket, unit_socket};
use hostprep::core::{generate, verify};
use hostprep::domain::{ArtifactKind, ConfigurationRecord, RecordError};
use tempfile::TempDir;

fn record(adjust: impl FnOnce(&mut hostprep::RecordSettings)) -> (TempDir, ConfigurationRecord) {
    let temp = TempDir::new().unwrap();
    let mut settings = settings_in(temp.path());
    adjust(&mut settings);
    let cfg = ConfigurationRecord::new(settings).unwrap();
    (temp, cfg)
}

#[test]
fn test_identical_records_render_identical_bytes() {
    let temp = TempDir::new().unwrap();
    let a = ConfigurationRecord::new(settings_in(temp.path())).unwrap();
    let b = ConfigurationRecord::new(settings_in(temp.path())).unwrap();

    for kind in ArtifactKind::ALL {
        let left = generate(kind, &a);
        let right = generate(kind, &b);
        assert_eq!(left.content.as_bytes(), right.content.as_bytes(), "{:?}", kind);
        assert_eq!(left.digest(), right.digest());
        assert_eq!(left.target, right.target);
    }
}

#[test]
fn test_socket_is_namespaced_by_service() {
    let (temp, cfg) = record(|_| {});
    let unit = generate(ArtifactKind::ProcessUnit, &cfg);
    let site = generate(ArtifactKind::ReverseProxySite, &cfg);

    let expected = temp
        .path()
        .join("host/run/gunicorn-sc-download-gate/gunicorn.sock")
        .display()
        .to_string();
    assert_eq!(unit_socket(&unit.content), Some(expected.as_str()));
    assert_eq!(site_socket(&site.content), Some(expected.as_str()));
    assert!(verify(&[unit, site], &cfg).is_ok());
}

#[test]
fn test_changing_one_field_changes_only_what_depends_on_it() {
    let temp = TempDir::new().unwrap();
    let base = ConfigurationRecord::new(settings_in(temp.path())).unwrap();
    let mut settings = settings_in(temp.path());
    settings.workers = 5;
    let more_workers = ConfigurationRecord::new(settings).unwrap();

    let render = |kind, cfg: &ConfigurationRecord| generate(kind, cfg).digest();

    assert_ne!(
        render(ArtifactKind::ProcessUnit, &base),
        render(ArtifactKind::ProcessUnit, &more_workers)
    );
    assert_eq!(
        render(ArtifactKind::ReverseProxySite, &base),
        render(ArtifactKind::ReverseProxySite, &more_workers)
    );
    assert_eq!(
        render(ArtifactKind::SecretFragment, &base),
        render(ArtifactKind::SecretFragment, &more_workers)
    );
}

#[test]
fn test_two_services_never_share_a_socket() {
    let temp = TempDir::new().unwrap();
    let first = ConfigurationRecord::new(settings_in(temp.path())).unwrap();
    let mut other = settings_in(temp.path());
    other.service_name = "billing".to_string();
    other.domain = "billing.example.com".to_string();
    let second = ConfigurationRecord::new(other).unwrap();

    assert_ne!(first.paths().socket, second.paths().socket);
    assert_ne!(first.paths().unit_file, second.paths().unit_file);
    assert_ne!(first.paths().site_file, second.paths().site_file);
}

#[test]
fn test_secret_fragment_defines_each_key_once() {
    let (_temp, cfg) = record(|_| {});
    let fragment = generate(ArtifactKind::SecretFragment, &cfg);

    assert_eq!(fragment.mode, 0o600);
    assert_eq!(fragment.owner.spec(), "deploy:deploy");
    for key in ["DB_NAME", "DB_USER", "DB_PASSWORD", "DB_HOST", "DB_PORT"] {
        let prefix = format!("{}=", key);
        assert_eq!(
            fragment.content.lines().filter(|l| l.starts_with(&prefix)).count(),
            1,
            "{}",
            key
        );
    }
}

#[test]
fn test_invalid_records_are_rejected_at_construction() {
    let temp = TempDir::new().unwrap();

    let mut relative = settings_in(temp.path());
    relative.project_path = "srv/app".into();
    assert!(matches!(
        ConfigurationRecord::new(relative),
        Err(RecordError::RelativePath { field: "project_path", .. })
    ));

    let mut bad_service = settings_in(temp.path());
    bad_service.service_name = "My App".to_string();
    assert!(matches!(
        ConfigurationRecord::new(bad_service),
        Err(RecordError::InvalidValue { field: "service_name", .. })
    ));

    let mut no_workers = settings_in(temp.path());
    no_workers.workers = 0;
    assert!(ConfigurationRecord::new(no_workers).is_err());

    let mut no_domain = settings_in(temp.path());
    no_domain.domain = String::new();
    assert!(matches!(
        ConfigurationRecord::new(no_domain),
        Err(RecordError::Empty { field: "domain" })
    ));
}
