//! Artifact extraction from archive containers.
//!
//! Some projects only publish their artifact inside a `.zip` or tarball. The
//! extractor scans the container recursively for files carrying the
//! application's artifact extension, extracts the first one in listing order
//! to a temporary name in the download directory root, marks it executable,
//! and deletes the container.
//!
//! Only the selected entry is ever written, under a name derived from its
//! base name, so entry paths inside the archive cannot escape the download
//! directory.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::core::RelkeepError;
use crate::models::Warning;
use crate::pattern::{AssetKind, classify};
use crate::utils::fs::{set_executable, sibling_temp_path};

/// Container formats the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// `.zip`
    Zip,
    /// `.tar`
    Tar,
    /// `.tar.gz` or `.tgz`
    TarGz,
}

impl ArchiveFormat {
    /// Detect the format from a file name.
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Some(Self::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if lower.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }
}

/// The artifact pulled out of an archive.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// Temporary path of the extracted file, inside the download directory
    pub path: PathBuf,
    /// Base name of the extracted entry, used as the artifact name
    pub file_name: String,
    /// Full path of the entry inside the archive
    pub entry: String,
    /// Raised when the archive held more than one artifact
    pub warnings: Vec<Warning>,
}

/// One archive member.
#[derive(Debug, Clone)]
struct Entry {
    name: String,
    is_file: bool,
}

/// Extract the artifact from `archive_path` into `dest_dir`.
///
/// `archive_name` is the published asset name; it determines the container
/// format, since the downloaded file itself has a temporary name. The
/// container is deleted once the artifact has been extracted.
///
/// # Errors
///
/// - [`RelkeepError::NoArtifactInArchive`] when nothing in the archive carries
///   `extension`; the error lists the archive's top-level entries
/// - [`RelkeepError::Archive`] when the container is unreadable or of an
///   unknown format
pub async fn extract_artifact(
    archive_path: &Path,
    archive_name: &str,
    dest_dir: &Path,
    extension: &str,
) -> Result<Extraction> {
    let archive_path = archive_path.to_path_buf();
    let archive_name = archive_name.to_string();
    let dest_dir = dest_dir.to_path_buf();
    let extension = extension.to_string();

    tokio::task::spawn_blocking(move || {
        extract_blocking(&archive_path, &archive_name, &dest_dir, &extension)
    })
    .await
    .context("spawn_blocking panicked")?
}

fn extract_blocking(
    archive_path: &Path,
    archive_name: &str,
    dest_dir: &Path,
    extension: &str,
) -> Result<Extraction> {
    let format = ArchiveFormat::from_name(archive_name).ok_or_else(|| RelkeepError::Archive {
        archive: archive_name.to_string(),
        reason: "unsupported archive format".to_string(),
    })?;
    debug!("Scanning {} ({:?}) for .{} artifacts", archive_name, format, extension);

    let entries = list_entries(archive_path, format).map_err(|e| archive_error(archive_name, &e))?;

    let artifacts: Vec<(usize, &Entry)> = entries
        .iter()
        .enumerate()
        .filter(|(_, entry)| {
            entry.is_file && classify(base_name(&entry.name), extension) == AssetKind::PrimaryArtifact
        })
        .collect();

    let Some(&(index, chosen)) = artifacts.first() else {
        return Err(RelkeepError::NoArtifactInArchive {
            archive: archive_name.to_string(),
            extension: extension.to_string(),
            contents: top_level_entries(&entries),
        }
        .into());
    };

    let mut warnings = Vec::new();
    if artifacts.len() > 1 {
        let warning = Warning::MultipleArchiveEntries {
            archive: archive_name.to_string(),
            chosen: chosen.name.clone(),
            entries: artifacts.iter().map(|(_, entry)| entry.name.clone()).collect(),
        };
        warn!("{}", warning);
        warnings.push(warning);
    }

    let file_name = base_name(&chosen.name).to_string();
    let output = sibling_temp_path(&dest_dir.join(&file_name), "part");

    if let Err(e) = extract_entry(archive_path, format, index, &output) {
        let _ = std::fs::remove_file(&output);
        return Err(archive_error(archive_name, &e));
    }
    if let Err(e) = set_executable(&output) {
        let _ = std::fs::remove_file(&output);
        return Err(e);
    }

    std::fs::remove_file(archive_path)
        .map_err(|e| RelkeepError::fs("remove archive", archive_path, e))?;

    info!("Extracted {} from {}", chosen.name, archive_name);
    Ok(Extraction {
        path: output,
        file_name,
        entry: chosen.name.clone(),
        warnings,
    })
}

fn list_entries(path: &Path, format: ArchiveFormat) -> io::Result<Vec<Entry>> {
    match format {
        ArchiveFormat::Zip => {
            let mut archive = zip::ZipArchive::new(File::open(path)?).map_err(io::Error::other)?;
            let mut entries = Vec::with_capacity(archive.len());
            for i in 0..archive.len() {
                let file = archive.by_index(i).map_err(io::Error::other)?;
                entries.push(Entry {
                    name: file.name().to_string(),
                    is_file: !file.is_dir(),
                });
            }
            Ok(entries)
        }
        ArchiveFormat::Tar | ArchiveFormat::TarGz => {
            let mut archive = open_tar(path, format)?;
            let mut entries = Vec::new();
            for entry in archive.entries()? {
                let entry = entry?;
                entries.push(Entry {
                    name: entry.path()?.to_string_lossy().into_owned(),
                    is_file: entry.header().entry_type().is_file(),
                });
            }
            Ok(entries)
        }
    }
}

fn extract_entry(path: &Path, format: ArchiveFormat, index: usize, output: &Path) -> io::Result<()> {
    let mut out = File::create(output)?;
    match format {
        ArchiveFormat::Zip => {
            let mut archive = zip::ZipArchive::new(File::open(path)?).map_err(io::Error::other)?;
            let mut file = archive.by_index(index).map_err(io::Error::other)?;
            io::copy(&mut file, &mut out)?;
        }
        ArchiveFormat::Tar | ArchiveFormat::TarGz => {
            // tar streams cannot seek back, so walk to the entry again
            let mut archive = open_tar(path, format)?;
            let mut entry = archive.entries()?.nth(index).ok_or_else(|| {
                io::Error::new(io::ErrorKind::UnexpectedEof, "archive entry disappeared")
            })??;
            io::copy(&mut entry, &mut out)?;
        }
    }
    out.sync_all()
}

fn open_tar(path: &Path, format: ArchiveFormat) -> io::Result<tar::Archive<Box<dyn Read>>> {
    let file = File::open(path)?;
    let reader: Box<dyn Read> = match format {
        ArchiveFormat::TarGz => Box::new(GzDecoder::new(file)),
        _ => Box::new(file),
    };
    Ok(tar::Archive::new(reader))
}

fn base_name(entry: &str) -> &str {
    entry.trim_end_matches('/').rsplit(['/', '\\']).next().unwrap_or(entry)
}

/// First path component of every entry, deduplicated in listing order.
fn top_level_entries(entries: &[Entry]) -> Vec<String> {
    let mut top = Vec::new();
    for entry in entries {
        let trimmed = entry.name.trim_start_matches("./");
        let first = trimmed.split(['/', '\\']).next().unwrap_or(trimmed);
        if !first.is_empty() && !top.iter().any(|t: &String| t == first) {
            top.push(first.to_string());
        }
    }
    top
}

fn archive_error(archive_name: &str, error: &io::Error) -> anyhow::Error {
    RelkeepError::Archive {
        archive: archive_name.to_string(),
        reason: error.to_string(),
    }
    .into()
}
