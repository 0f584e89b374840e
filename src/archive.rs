//! Zip extraction into a scratch directory.
//!
//! Entries are written in archive order. Stored unix modes are applied to
//! both directories and files, and a later entry with the same name
//! overwrites an earlier one.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use zip::ZipArchive;
use zip::result::ZipError;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("cannot open archive {}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot open zip reader for {}", .path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: ZipError,
    },
    #[error("cannot open file {name} in archive")]
    Entry {
        name: String,
        #[source]
        source: ZipError,
    },
    #[error("entry {0} escapes the extraction directory")]
    UnsafeEntryName(String),
    #[error("cannot make directory {}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot open file {}", .path.display())]
    CreateFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot copy file {}", .path.display())]
    Copy {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot set permissions on {}", .path.display())]
    Permissions {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Counts reported after a successful extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub directories: usize,
    pub files: usize,
    pub bytes: u64,
}

/// Extracts every entry of the zip at `archive_path` below `dest`.
///
/// The first failing entry aborts the run; whatever was written before it
/// stays on disk.
pub fn extract_zip(archive_path: &Path, dest: &Path) -> Result<ExtractSummary, ArchiveError> {
    let file = File::open(archive_path).map_err(|source| ArchiveError::Open {
        path: archive_path.to_path_buf(),
        source,
    })?;
    let mut archive = ZipArchive::new(file).map_err(|source| ArchiveError::Format {
        path: archive_path.to_path_buf(),
        source,
    })?;

    let mut summary = ExtractSummary::default();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(|source| ArchiveError::Entry {
            name: format!("#{index}"),
            source,
        })?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| ArchiveError::UnsafeEntryName(entry.name().to_string()))?;
        let target = dest.join(relative);
        let mode = entry.unix_mode();

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|source| ArchiveError::CreateDir {
                path: target.clone(),
                source,
            })?;
            apply_mode(&target, mode)?;
            summary.directories += 1;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|source| ArchiveError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut out = create_truncated(&target, mode).map_err(|source| {
            ArchiveError::CreateFile {
                path: target.clone(),
                source,
            }
        })?;
        let copied = io::copy(&mut entry, &mut out).map_err(|source| ArchiveError::Copy {
            path: target.clone(),
            source,
        })?;
        drop(out);
        apply_mode(&target, mode)?;

        summary.files += 1;
        summary.bytes += copied;
    }

    debug!(
        archive = %archive_path.display(),
        dest = %dest.display(),
        directories = summary.directories,
        files = summary.files,
        "archive extracted"
    );
    Ok(summary)
}

#[cfg(unix)]
fn create_truncated(path: &Path, mode: Option<u32>) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    if let Some(mode) = mode {
        options.mode(mode & 0o7777);
    }
    options.open(path)
}

#[cfg(not(unix))]
fn create_truncated(path: &Path, _mode: Option<u32>) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

// Applied after creation so the umask and pre-existing files don't mask the stored mode.
#[cfg(unix)]
fn apply_mode(path: &Path, mode: Option<u32>) -> Result<(), ArchiveError> {
    use std::os::unix::fs::PermissionsExt;

    let Some(mode) = mode else {
        return Ok(());
    };
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777)).map_err(|source| {
        ArchiveError::Permissions {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: Option<u32>) -> Result<(), ArchiveError> {
    Ok(())
}
