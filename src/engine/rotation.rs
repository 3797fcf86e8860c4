//! Rotation of installed artifacts inside a download directory.
//!
//! An application's files in its download directory form a small state
//! machine. The active artifact carries a `.current` suffix; older versions
//! carry `.old`, `.old2`, `.old3`, ... where a higher number is older. At most
//! `retain_count` files are kept in total. A symlink can be configured to
//! always point at the `.current` file.
//!
//! Installing a new artifact runs these steps in order:
//!
//! 1. Every existing file moves one position older, highest index first.
//!    Files that would fall beyond the retention limit are moved aside under a
//!    hidden temporary name instead.
//! 2. The new artifact is renamed to `<name>.current`.
//! 3. The symlink is repointed by creating a new link and renaming it over
//!    the old one.
//! 4. Files moved aside in step 1 are deleted.
//!
//! No filesystem renames several files atomically. Every rename is recorded,
//! and if any step before the last fails, the recorded renames are undone in
//! reverse so the previous `.current` is left in place. A crash in the middle
//! can still leave a numbering gap or no `.current` at all, but never two
//! `.current` files. [`RotationManager::repair`] reconciles such states and is
//! run before every rotation.
//!
//! All operations take a [`DirectoryLock`] to prove that no other rotation is
//! touching the same directory.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

use super::lock::DirectoryLock;
use crate::config::RotationPolicy;
use crate::constants::{CURRENT_SUFFIX, OLD_SUFFIX, PART_SUFFIX, STALE_PART_TTL};
use crate::core::RelkeepError;
use crate::pattern::AssetMatcher;
use crate::utils::fs::{replace_symlink, sibling_temp_path, symlink_points_to};

const EVICTED_SUFFIX: &str = "evicted";

/// One file of an application's rotation set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationMember {
    /// Full path of the file
    pub path: PathBuf,
    /// Artifact name, i.e. the file name without its rotation suffix
    pub stem: String,
    /// 0 for `.current`, N for the N-th older version
    pub index: usize,
    /// Last modification time, when available
    pub modified: Option<SystemTime>,
}

/// The on-disk rotation set of one application.
#[derive(Debug, Clone, Default)]
pub struct InstalledFileSet {
    /// Members ordered by index, newest modification first within an index
    pub members: Vec<RotationMember>,
}

impl InstalledFileSet {
    /// The active file, if there is exactly one candidate at index 0.
    pub fn current(&self) -> Option<&RotationMember> {
        self.members.first().filter(|m| m.index == 0)
    }

    /// Files with a `.current` suffix.
    pub fn current_count(&self) -> usize {
        self.members.iter().filter(|m| m.index == 0).count()
    }

    /// Files with an `.old*` suffix.
    pub fn old(&self) -> impl Iterator<Item = &RotationMember> {
        self.members.iter().filter(|m| m.index > 0)
    }

    /// Whether nothing is installed.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// What [`RotationManager::repair`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Files renamed to close numbering gaps or demote extra `.current` files
    pub renamed: Vec<PathBuf>,
    /// Files deleted because they exceeded retention
    pub removed: Vec<PathBuf>,
    /// Stale temporary files deleted
    pub stale_temporaries: Vec<PathBuf>,
    /// Whether the symlink was repointed
    pub symlink_repointed: bool,
}

impl RepairReport {
    /// Whether the directory was already consistent.
    pub fn is_clean(&self) -> bool {
        self.renamed.is_empty()
            && self.removed.is_empty()
            && self.stale_temporaries.is_empty()
            && !self.symlink_repointed
    }
}

/// Result of a rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rollback {
    /// The previous version, now `.current`
    pub restored: PathBuf,
    /// The version that was active, now `.old`
    pub demoted: PathBuf,
}

/// Renames performed so far, undone in reverse on failure.
#[derive(Debug, Default)]
struct Journal {
    renames: Vec<(PathBuf, PathBuf)>,
}

impl Journal {
    fn rename(&mut self, from: &Path, to: &Path) -> Result<()> {
        debug!("rename {} -> {}", from.display(), to.display());
        fs::rename(from, to).map_err(|e| RelkeepError::fs("rename", from, e))?;
        self.renames.push((from.to_path_buf(), to.to_path_buf()));
        Ok(())
    }

    fn undo(self) {
        for (from, to) in self.renames.into_iter().rev() {
            if let Err(e) = fs::rename(&to, &from) {
                warn!("Failed to undo rename {} -> {}: {}", from.display(), to.display(), e);
            }
        }
    }
}

/// Rotation for one application in one download directory.
#[derive(Debug, Clone)]
pub struct RotationManager {
    directory: PathBuf,
    matcher: AssetMatcher,
    known_names: Vec<String>,
    enabled: bool,
    retain_count: usize,
    symlink: Option<PathBuf>,
}

impl RotationManager {
    /// Manage the files in `directory` whose artifact name matches `matcher`.
    ///
    /// A relative `directory` is made absolute against the working directory,
    /// since symlink targets are resolved from the link's own location.
    pub fn new(directory: impl Into<PathBuf>, matcher: AssetMatcher, policy: &RotationPolicy) -> Self {
        let directory = directory.into();
        let directory = std::path::absolute(&directory).unwrap_or(directory);
        Self {
            directory,
            matcher,
            known_names: Vec::new(),
            enabled: policy.enabled,
            retain_count: policy.retain_count.max(1),
            symlink: policy.symlink_path.clone(),
        }
    }

    /// Also treat files named `name` as members, even if the pattern does not
    /// match them (e.g. an artifact extracted from a matching archive).
    #[must_use]
    pub fn with_known_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.is_empty() && !self.known_names.contains(&name) {
            self.known_names.push(name);
        }
        self
    }

    /// Override the symlink path.
    #[must_use]
    pub fn with_symlink(mut self, symlink: Option<PathBuf>) -> Self {
        self.symlink = symlink;
        self
    }

    /// The managed directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path a member with `stem` and `index` is stored under.
    pub fn member_path(&self, stem: &str, index: usize) -> PathBuf {
        self.directory.join(member_name(stem, index))
    }

    /// Read the current rotation set from disk.
    pub fn scan(&self) -> Result<InstalledFileSet> {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(InstalledFileSet::default());
            }
            Err(e) => return Err(RelkeepError::fs("read directory", &self.directory, e).into()),
        };

        let mut members = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| RelkeepError::fs("read directory", &self.directory, e))?;
            let file_type = entry.file_type().map_err(|e| RelkeepError::fs("stat", &entry.path(), e))?;
            if !file_type.is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            let Some((stem, index)) = parse_member_name(&name) else {
                continue;
            };
            if !self.is_member_stem(stem) {
                continue;
            }

            members.push(RotationMember {
                path: entry.path(),
                stem: stem.to_string(),
                index,
                modified: entry.metadata().ok().and_then(|m| m.modified().ok()),
            });
        }

        members.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| b.modified.cmp(&a.modified)));
        Ok(InstalledFileSet {
            members,
        })
    }

    /// Install `new_file` as the `.current` version of `artifact_name`.
    ///
    /// Returns the installed path. With rotation disabled the file replaces
    /// `<dir>/<artifact_name>` directly and no `.old` files are kept.
    ///
    /// # Errors
    ///
    /// Any failure before the symlink is repointed undoes the renames done so
    /// far, leaving the previous `.current` in place. `new_file` is left where
    /// it was for the caller to discard.
    pub fn rotate(&self, _lock: &DirectoryLock, new_file: &Path, artifact_name: &str) -> Result<PathBuf> {
        if !self.enabled {
            return self.overwrite(new_file, artifact_name);
        }

        let set = self.scan()?;
        let mut journal = Journal::default();
        let mut evicted = Vec::new();

        match self.shift_and_promote(&set, new_file, artifact_name, &mut journal, &mut evicted) {
            Ok(installed) => {
                for path in evicted {
                    match fs::remove_file(&path) {
                        Ok(()) => debug!("Removed evicted version {}", path.display()),
                        Err(e) => warn!("Failed to remove evicted version {}: {}", path.display(), e),
                    }
                }
                info!("Installed {}", installed.display());
                Ok(installed)
            }
            Err(e) => {
                warn!("Rotation in {} failed, restoring previous state", self.directory.display());
                journal.undo();
                Err(e.context(RelkeepError::Rotation {
                    directory: self.directory.display().to_string(),
                    reason: format!("could not install '{artifact_name}'"),
                }))
            }
        }
    }

    fn shift_and_promote(
        &self,
        set: &InstalledFileSet,
        new_file: &Path,
        artifact_name: &str,
        journal: &mut Journal,
        evicted: &mut Vec<PathBuf>,
    ) -> Result<PathBuf> {
        // oldest first so no rename lands on a file that has not moved yet
        for member in set.members.iter().rev() {
            let next = member.index + 1;
            if next >= self.retain_count {
                let aside = sibling_temp_path(&member.path, EVICTED_SUFFIX);
                journal.rename(&member.path, &aside)?;
                evicted.push(aside);
            } else {
                let target = self.member_path(&member.stem, next);
                self.ensure_vacant(&target)?;
                journal.rename(&member.path, &target)?;
            }
        }

        let installed = self.member_path(artifact_name, 0);
        self.ensure_vacant(&installed)?;
        journal.rename(new_file, &installed)?;

        if let Some(link) = &self.symlink {
            replace_symlink(&installed, link)?;
        }
        Ok(installed)
    }

    fn ensure_vacant(&self, path: &Path) -> Result<()> {
        if fs::symlink_metadata(path).is_ok() {
            return Err(RelkeepError::Rotation {
                directory: self.directory.display().to_string(),
                reason: format!("refusing to overwrite existing {}", path.display()),
            }
            .into());
        }
        Ok(())
    }

    fn overwrite(&self, new_file: &Path, artifact_name: &str) -> Result<PathBuf> {
        let target = self.directory.join(artifact_name);
        fs::rename(new_file, &target).map_err(|e| RelkeepError::fs("rename", new_file, e))?;
        if let Some(link) = &self.symlink {
            replace_symlink(&target, link)?;
        }
        info!("Replaced {}", target.display());
        Ok(target)
    }

    /// Reconcile the directory after an interrupted or manual change.
    ///
    /// - Renumbers the set so indexes are contiguous from `.current`; the
    ///   newest `.current` wins and any others become old versions
    /// - Deletes versions beyond the retention limit
    /// - Deletes hidden temporaries left by crashed downloads (older than
    ///   an hour) and by crashed rotations
    /// - Repoints a missing, dangling or misdirected symlink
    pub fn repair(&self, _lock: &DirectoryLock) -> Result<RepairReport> {
        let mut report = RepairReport {
            stale_temporaries: self.remove_stale_temporaries()?,
            ..RepairReport::default()
        };

        if !self.enabled {
            return Ok(report);
        }

        let set = self.scan()?;
        let (keep, surplus) = set.members.split_at(set.members.len().min(self.retain_count));

        for member in surplus {
            fs::remove_file(&member.path).map_err(|e| RelkeepError::fs("remove", &member.path, e))?;
            info!("Removed {} (beyond retention of {})", member.path.display(), self.retain_count);
            report.removed.push(member.path.clone());
        }

        // two passes through temporary names so renumbering cannot collide
        let mut staged = Vec::new();
        for (index, member) in keep.iter().enumerate() {
            let target = self.member_path(&member.stem, index);
            if target != member.path {
                let temp = sibling_temp_path(&member.path, "renumber");
                fs::rename(&member.path, &temp).map_err(|e| RelkeepError::fs("rename", &member.path, e))?;
                staged.push((temp, target));
            }
        }
        for (temp, target) in staged {
            self.ensure_vacant(&target)?;
            fs::rename(&temp, &target).map_err(|e| RelkeepError::fs("rename", &temp, e))?;
            info!("Renumbered {}", target.display());
            report.renamed.push(target);
        }

        if let (Some(link), Some(stem)) = (&self.symlink, keep.first().map(|m| &m.stem)) {
            let current = self.member_path(stem, 0);
            if !symlink_points_to(link, &current) {
                replace_symlink(&current, link)?;
                info!("Repointed {} -> {}", link.display(), current.display());
                report.symlink_repointed = true;
            }
        }

        Ok(report)
    }

    /// Make the newest old version `.current` again and demote the current one
    /// to `.old`.
    ///
    /// # Errors
    ///
    /// [`RelkeepError::Rotation`] when there is no `.current` and `.old` pair.
    pub fn rollback(&self, _lock: &DirectoryLock) -> Result<Rollback> {
        let set = self.scan()?;
        let (Some(current), Some(previous)) = (set.current(), set.old().find(|m| m.index == 1)) else {
            return Err(RelkeepError::Rotation {
                directory: self.directory.display().to_string(),
                reason: "no previous version to roll back to".to_string(),
            }
            .into());
        };

        let restored = self.member_path(&previous.stem, 0);
        let demoted = self.member_path(&current.stem, 1);
        let aside = sibling_temp_path(&current.path, "rollback");

        let mut journal = Journal::default();
        let swapped = (|| -> Result<()> {
            journal.rename(&current.path, &aside)?;
            journal.rename(&previous.path, &restored)?;
            journal.rename(&aside, &demoted)?;
            if let Some(link) = &self.symlink {
                replace_symlink(&restored, link)?;
            }
            Ok(())
        })();

        if let Err(e) = swapped {
            journal.undo();
            return Err(e).context("Rollback failed, previous state restored");
        }

        info!("Rolled back to {}", restored.display());
        Ok(Rollback {
            restored,
            demoted,
        })
    }

    fn is_member_stem(&self, stem: &str) -> bool {
        self.known_names.iter().any(|n| n == stem) || self.matcher.matches(stem)
    }

    fn remove_stale_temporaries(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RelkeepError::fs("read directory", &self.directory, e).into()),
        };

        let now = SystemTime::now();
        let mut removed = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') {
                continue;
            }

            let stale = if name.ends_with(PART_SUFFIX) {
                entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|modified| now.duration_since(modified).ok())
                    .is_some_and(|age| age > STALE_PART_TTL)
            } else {
                // left by a rotation that crashed while holding the lock
                name.ends_with(&format!(".{EVICTED_SUFFIX}"))
                    || name.ends_with(".renumber")
                    || name.ends_with(".rollback")
            };

            if stale {
                let path = entry.path();
                match fs::remove_file(&path) {
                    Ok(()) => {
                        debug!("Removed stale temporary {}", path.display());
                        removed.push(path);
                    }
                    Err(e) => warn!("Failed to remove stale temporary {}: {}", path.display(), e),
                }
            }
        }
        Ok(removed)
    }
}

/// File name of the member with `stem` at `index`.
pub fn member_name(stem: &str, index: usize) -> String {
    match index {
        0 => format!("{stem}{CURRENT_SUFFIX}"),
        1 => format!("{stem}{OLD_SUFFIX}"),
        n => format!("{stem}{OLD_SUFFIX}{n}"),
    }
}

/// Split a file name into artifact stem and rotation index.
pub fn parse_member_name(name: &str) -> Option<(&str, usize)> {
    if name.starts_with('.') {
        return None;
    }
    if let Some(stem) = name.strip_suffix(CURRENT_SUFFIX) {
        return (!stem.is_empty()).then_some((stem, 0));
    }

    let (stem, digits) = name.rsplit_once(OLD_SUFFIX)?;
    if stem.is_empty() {
        return None;
    }
    if digits.is_empty() {
        return Some((stem, 1));
    }
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    match digits.parse::<usize>() {
        Ok(n) if n >= 1 => Some((stem, n)),
        _ => None,
    }
}
