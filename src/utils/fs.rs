//! File system helpers shared by the engine stages.
//!
//! Everything here is synchronous and is expected to run inside
//! `tokio::task::spawn_blocking` (the rotation manager and archive extractor do
//! exactly that) or in tests.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Create `path` and its parents if needed.
///
/// # Errors
///
/// Fails if the directory cannot be created or `path` exists and is not a
/// directory.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path).with_context(|| {
            format!(
                "Failed to create directory: {}\n\nCheck directory permissions and path validity",
                path.display()
            )
        })?;
    } else if !path.is_dir() {
        return Err(anyhow::anyhow!("Path exists but is not a directory: {}", path.display()));
    }
    Ok(())
}

/// Write `content` to `path` so readers see either the old or the new file,
/// never a partial one.
///
/// The data is written to a uniquely named sibling, synced, then renamed over
/// `path`.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let temp_path = sibling_temp_path(path, "tmp");

    let write_result = (|| -> Result<()> {
        let mut file = fs::File::create(&temp_path)
            .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;
        file.write_all(content)
            .with_context(|| format!("Failed to write to temp file: {}", temp_path.display()))?;
        file.sync_all().context("Failed to sync file to disk")?;
        Ok(())
    })();

    if let Err(e) = write_result {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e).with_context(|| format!("Failed to rename temp file to: {}", path.display()));
    }

    Ok(())
}

/// A unique hidden path next to `path`, e.g. `dir/.name.<uuid>.tmp`.
pub fn sibling_temp_path(path: &Path, suffix: &str) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let temp_name = format!(".{name}.{}.{suffix}", uuid::Uuid::new_v4().simple());
    match path.parent() {
        Some(parent) => parent.join(temp_name),
        None => PathBuf::from(temp_name),
    }
}

/// Mark a file executable by owner, group and others (`0o755`).
#[cfg(unix)]
pub fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path)
        .with_context(|| format!("Failed to read permissions for {}", path.display()))?
        .permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms)
        .with_context(|| format!("Failed to make {} executable", path.display()))
}

/// Executable bits do not exist on this platform.
#[cfg(not(unix))]
pub fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Point `link` at `target` without ever removing `link` first.
///
/// A new symlink is created under a temporary name in the link's directory and
/// renamed over `link`, so the link is always either the old or the new one.
pub fn replace_symlink(target: &Path, link: &Path) -> Result<()> {
    if let Some(parent) = link.parent() {
        ensure_dir(parent)?;
    }

    let temp_link = sibling_temp_path(link, "link");
    create_symlink(target, &temp_link).with_context(|| {
        format!("Failed to create symlink {} -> {}", temp_link.display(), target.display())
    })?;

    if let Err(e) = fs::rename(&temp_link, link) {
        let _ = fs::remove_file(&temp_link);
        return Err(e).with_context(|| format!("Failed to replace symlink {}", link.display()));
    }
    Ok(())
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

/// Whether `link` is a symlink that currently points at `target`.
///
/// Relative link targets are resolved against the link's directory.
pub fn symlink_points_to(link: &Path, target: &Path) -> bool {
    let Ok(current) = fs::read_link(link) else {
        return false;
    };
    let resolved = if current.is_relative() {
        link.parent().map_or(current.clone(), |parent| parent.join(&current))
    } else {
        current
    };
    resolved == target
}

/// File name of `path` as an owned string, empty when there is none.
pub fn file_name_string(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}
