//! Checks that must hold before any step is probed.

use std::path::PathBuf;

use thiserror::Error;

use crate::domain::ConfigurationRecord;

use super::probe;

/// Fatal conditions detected before the sequence starts
#[derive(Debug, Error)]
pub enum PreconditionError {
    #[error("project directory {0} does not exist")]
    ProjectMissing(PathBuf),

    #[error("secret file {0} does not exist; create it (it may be empty) and re-run")]
    SecretFileMissing(PathBuf),

    #[error("unknown step '{0}'")]
    UnknownStep(String),

    #[error("another provisioning run holds {0}")]
    Locked(PathBuf),

    #[error("cannot open lock file {path}: {source}")]
    LockFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Verify the project directory and its secret file exist
pub fn check(cfg: &ConfigurationRecord) -> Result<(), PreconditionError> {
    let project = &cfg.settings().project_path;
    if !probe::is_dir(project) {
        return Err(PreconditionError::ProjectMissing(project.clone()));
    }

    let secret_file = &cfg.paths().secret_file;
    if !probe::is_file(secret_file) {
        return Err(PreconditionError::SecretFileMissing(secret_file.clone()));
    }
    Ok(())
}
