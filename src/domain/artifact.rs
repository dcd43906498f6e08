//! Generated configuration artifacts.
//!
//! An artifact is rendered in memory; writing it to disk is a separate,
//! explicit action (see `core::fsops`).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The three files the orchestrator generates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// systemd unit running gunicorn
    ProcessUnit,

    /// nginx server definition for the domain
    ReverseProxySite,

    /// Database and host settings merged into the project's secret file
    SecretFragment,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::ProcessUnit,
        ArtifactKind::ReverseProxySite,
        ArtifactKind::SecretFragment,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ProcessUnit => "unit",
            Self::ReverseProxySite => "site",
            Self::SecretFragment => "secrets",
        }
    }
}

/// Required file owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOwner {
    pub user: String,
    pub group: String,
}

impl FileOwner {
    pub fn root() -> Self {
        Self {
            user: "root".to_string(),
            group: "root".to_string(),
        }
    }

    pub fn spec(&self) -> String {
        format!("{}:{}", self.user, self.group)
    }
}

/// A rendered artifact, not yet on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    pub kind: ArtifactKind,
    pub target: PathBuf,
    pub content: String,

    /// Unix permission bits, e.g. 0o644
    pub mode: u32,

    pub owner: FileOwner,
}

impl GeneratedArtifact {
    /// SHA-256 of the rendered content, hex encoded
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.content.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Mode formatted the way chmod takes it
    pub fn mode_octal(&self) -> String {
        format!("{:04o}", self.mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_stable_and_content_sensitive() {
        let artifact = GeneratedArtifact {
            kind: ArtifactKind::ProcessUnit,
            target: PathBuf::from("/etc/systemd/system/app.service"),
            content: "[Unit]\n".to_string(),
            mode: 0o644,
            owner: FileOwner::root(),
        };
        let mut other = artifact.clone();
        assert_eq!(artifact.digest(), other.digest());
        assert_eq!(artifact.digest().len(), 64);

        other.content.push('\n');
        assert_ne!(artifact.digest(), other.digest());
        assert_eq!(artifact.mode_octal(), "0644");
    }
}
