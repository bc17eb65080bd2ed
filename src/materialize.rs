//! Config-file materializer.
//!
//! Writes per-instance config blobs into the stack's on-disk tree:
//! `<project_root>/compose/stacks/<stack>/<instance>/<file_path>`.
//! Paths are sandboxed to the instance directory; writes are idempotent.
//! The applier removes the whole stack directory on failure so a partial
//! tree is never visible to the next run.

use crate::error::{Error, Result};
use crate::model::ConfigFile;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Validate and normalize a config-file path relative to its instance
/// directory.
///
/// Rejects absolute paths, `..` components, and empty paths.
pub fn sanitize_file_path(file_path: &str) -> Result<PathBuf> {
    if file_path.is_empty() {
        return Err(Error::validation("config file path must not be empty"));
    }
    if file_path.starts_with('/') {
        return Err(Error::validation(format!(
            "config file path '{file_path}' must be relative"
        )));
    }

    let path = Path::new(file_path);
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::validation(format!(
                    "config file path '{file_path}' must not contain '..'"
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::validation(format!(
                    "config file path '{file_path}' must be relative"
                )));
            }
        }
    }
    if normalized.as_os_str().is_empty() {
        return Err(Error::validation(format!(
            "config file path '{file_path}' resolves to nothing"
        )));
    }
    Ok(normalized)
}

/// Parse an octal mode string (`0000`-`0777`)
pub fn parse_mode(mode: &str) -> Result<u32> {
    let digits = mode.strip_prefix("0o").unwrap_or(mode);
    if digits.is_empty() || digits.len() > 4 {
        return Err(Error::validation(format!(
            "file mode '{mode}' must be an octal string between 0000 and 0777"
        )));
    }
    let value = u32::from_str_radix(digits, 8).map_err(|_| {
        Error::validation(format!(
            "file mode '{mode}' must be an octal string between 0000 and 0777"
        ))
    })?;
    if value > 0o777 {
        return Err(Error::validation(format!(
            "file mode '{mode}' exceeds 0777"
        )));
    }
    Ok(value)
}

/// One instance's worth of files to materialize
#[derive(Debug, Clone)]
pub struct InstanceFiles {
    /// Instance id (directory name under the stack)
    pub instance_id: String,
    /// Effective config files for the instance
    pub files: Vec<ConfigFile>,
}

/// Materialize every config file of a stack under `stacks_root/<stack>/`.
///
/// Returns the paths written, relative to `stacks_root`. Parent
/// directories are created as needed; rewriting unchanged content is a
/// no-op at the tree level, so repeated runs converge.
pub async fn materialize_stack(
    stacks_root: &Path,
    stack: &str,
    instances: &[InstanceFiles],
) -> Result<Vec<PathBuf>> {
    let stack_dir = stacks_root.join(stack);
    let mut written = Vec::new();

    for inst in instances {
        let instance_dir = stack_dir.join(&inst.instance_id);
        for file in &inst.files {
            let rel = sanitize_file_path(&file.file_path)?;
            let mode = parse_mode(&file.mode)?;
            let target = instance_dir.join(&rel);

            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| Error::io(format!("create {}", parent.display()), e))?;
            }

            tokio::fs::write(&target, file.content.as_bytes())
                .await
                .map_err(|e| Error::io(format!("write {}", target.display()), e))?;

            set_mode(&target, mode).await?;

            debug!(path = %target.display(), mode = %file.mode, "materialized config file");
            written.push(
                Path::new(stack)
                    .join(&inst.instance_id)
                    .join(&rel),
            );
        }
    }

    Ok(written)
}

/// Remove a stack's materialized tree. Missing directories are fine.
pub async fn remove_stack_dir(stacks_root: &Path, stack: &str) -> Result<()> {
    let stack_dir = stacks_root.join(stack);
    match tokio::fs::remove_dir_all(&stack_dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(format!("remove {}", stack_dir.display()), e)),
    }
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(|e| Error::io(format!("chmod {}", path.display()), e))
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
