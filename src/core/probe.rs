//! Idempotency probe support.
//!
//! Probes inspect the live system and never change it. They get a
//! [`QueryRunner`], which refuses any command not marked as a query, and a
//! handful of filesystem helpers that treat "cannot tell" as "not there".

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tracing::debug;

use crate::adapters::{Command, CommandError, CommandOutput, CommandRunner};

/// Read-only view of a command runner
#[derive(Clone, Copy)]
pub struct QueryRunner<'a> {
    inner: &'a dyn CommandRunner,
}

impl<'a> QueryRunner<'a> {
    pub fn new(inner: &'a dyn CommandRunner) -> Self {
        Self { inner }
    }

    /// Run a query command
    pub async fn run(&self, cmd: &Command) -> Result<CommandOutput, CommandError> {
        if !cmd.is_query() {
            return Err(CommandError::Refused {
                command: cmd.display(),
            });
        }
        self.inner.run(cmd).await
    }

    /// Whether a query exits zero. Any failure counts as "no".
    pub async fn succeeds(&self, cmd: &Command) -> bool {
        match self.run(cmd).await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "Probe query did not succeed");
                false
            }
        }
    }

    /// Trimmed output of a successful query, `None` otherwise
    pub async fn output(&self, cmd: &Command) -> Option<String> {
        match self.run(cmd).await {
            Ok(out) => Some(out.output.trim().to_string()),
            Err(e) => {
                debug!(error = %e, "Probe query did not succeed");
                None
            }
        }
    }
}

/// A regular file that can be read
pub fn is_file(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

/// A directory that can be stat'ed
pub fn is_dir(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
}

/// A regular file with any execute bit set
pub fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Permission bits of `path`, if readable
pub fn mode_of(path: &Path) -> Option<u32> {
    std::fs::metadata(path)
        .ok()
        .map(|m| m.permissions().mode() & 0o7777)
}

/// Current bytes of `path` equal `expected`
pub fn content_matches(path: &Path, expected: &str) -> bool {
    std::fs::read(path)
        .map(|bytes| bytes == expected.as_bytes())
        .unwrap_or(false)
}

/// A directory containing at least one regular file, at any depth
pub fn has_files(dir: &Path) -> bool {
    let pattern = format!("{}/**/*", glob::Pattern::escape(&dir.display().to_string()));
    match glob::glob(&pattern) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .any(|entry| entry.is_file()),
        Err(_) => false,
    }
}
