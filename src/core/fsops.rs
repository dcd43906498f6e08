//! Writing artifacts and directories with the required mode and owner.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tempfile::NamedTempFile;
use tokio::fs;
use tracing::info;

use crate::adapters::{Command, CommandRunner};
use crate::domain::{FileOwner, GeneratedArtifact};

use super::StepError;

/// Write `content` to `path` atomically with `mode`.
///
/// The temp file is created exclusively under a random name in the target
/// directory, so a link planted there is never followed. Renaming over
/// `path` replaces a symlink at `path` instead of writing through it.
pub async fn write_atomic(path: &Path, content: &str, mode: u32) -> Result<(), StepError> {
    let parent = path
        .parent()
        .ok_or_else(|| StepError::other(format!("{} has no parent directory", path.display())))?;
    fs::create_dir_all(parent).await?;

    let (dir, target, content) = (parent.to_path_buf(), path.to_path_buf(), content.to_owned());
    tokio::task::spawn_blocking(move || -> Result<(), StepError> {
        let mut temp = NamedTempFile::new_in(&dir)?;
        temp.write_all(content.as_bytes())?;
        temp.as_file().set_permissions(std::fs::Permissions::from_mode(mode))?;
        temp.as_file().sync_all()?;
        temp.persist(&target).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| StepError::other(format!("write of {} did not complete: {}", path.display(), e)))?
}

/// Hand `path` to `owner`
pub async fn chown(
    runner: &dyn CommandRunner,
    path: &Path,
    owner: &FileOwner,
    recursive: bool,
) -> Result<(), StepError> {
    let mut cmd = Command::new("chown");
    if recursive {
        cmd = cmd.arg("-R");
    }
    runner
        .run(&cmd.arg(owner.spec()).arg(path.display().to_string()))
        .await?;
    Ok(())
}

/// Write a generated artifact to its target with its mode and owner
pub async fn install_artifact(
    runner: &dyn CommandRunner,
    artifact: &GeneratedArtifact,
) -> Result<(), StepError> {
    write_atomic(&artifact.target, &artifact.content, artifact.mode).await?;
    chown(runner, &artifact.target, &artifact.owner, false).await?;
    info!(
        path = %artifact.target.display(),
        mode = %artifact.mode_octal(),
        sha256 = %artifact.digest(),
        "Installed artifact"
    );
    Ok(())
}

/// Create `dir` if needed and apply mode and owner
pub async fn ensure_dir(
    runner: &dyn CommandRunner,
    dir: &Path,
    mode: u32,
    owner: &FileOwner,
) -> Result<(), StepError> {
    fs::create_dir_all(dir).await?;
    fs::set_permissions(dir, std::fs::Permissions::from_mode(mode)).await?;
    chown(runner, dir, owner, false).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_atomic_sets_mode_and_leaves_no_temp_file() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("etc/nginx/conf.d/site.conf");

        write_atomic(&target, "server {}\n", 0o640).await.unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "server {}\n");
        let mode = std::fs::metadata(&target).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o640);

        let entries: Vec<_> = std::fs::read_dir(target.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("site.conf")]);
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_existing_content() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("app.service");
        std::fs::write(&target, "old").unwrap();

        write_atomic(&target, "new", 0o644).await.unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "new");
    }

    #[tokio::test]
    async fn test_write_atomic_never_writes_through_planted_links() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("project");
        std::fs::create_dir_all(&project).unwrap();
        let victim = temp.path().join("victim.conf");
        std::fs::write(&victim, "untouched\n").unwrap();
        std::fs::set_permissions(&victim, std::fs::Permissions::from_mode(0o644)).unwrap();

        // A link where a predictable temp name would be, and one at the target
        std::os::unix::fs::symlink(&victim, project.join("..env.hostprep-tmp")).unwrap();
        let target = project.join(".env");
        std::os::unix::fs::symlink(&victim, &target).unwrap();

        write_atomic(&target, "DB_PASSWORD=secret\n", 0o600).await.unwrap();

        assert_eq!(std::fs::read_to_string(&victim).unwrap(), "untouched\n");
        let victim_mode = std::fs::metadata(&victim).unwrap().permissions().mode() & 0o777;
        assert_eq!(victim_mode, 0o644);

        let meta = std::fs::symlink_metadata(&target).unwrap();
        assert!(meta.file_type().is_file());
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "DB_PASSWORD=secret\n");
    }
}
