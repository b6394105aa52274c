use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::db::FsStat;
use crate::error::{PipelineError, Result};

/// One immediate entry of a scanned directory.
#[derive(Debug, Clone)]
pub struct DirEntryInfo {
    pub name: String,
    pub path: PathBuf,
    pub is_directory: bool,
    pub stat: FsStat,
}

/// List the immediate entries of `directory`, sorted by file name.
///
/// Symlinks are never walked: a link to a file is listed with the target's
/// stat, a link to a directory is skipped so link cycles cannot recurse.
/// Entries that cannot be read are skipped with a warning; a missing or
/// non-directory `directory` is an error.
pub fn scan_dir(directory: &Path) -> Result<Vec<DirEntryInfo>> {
    let metadata = std::fs::metadata(directory).map_err(|e| PipelineError::io(directory, e))?;
    if !metadata.is_dir() {
        return Err(PipelineError::io(
            directory,
            std::io::Error::new(std::io::ErrorKind::Other, "not a directory"),
        ));
    }

    let mut entries = Vec::new();

    for entry in WalkDir::new(directory)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Skipping unreadable entry in {}: {}", directory.display(), e);
                continue;
            }
        };

        let path = entry.path().to_path_buf();
        let metadata = if entry.path_is_symlink() {
            match std::fs::metadata(&path) {
                Ok(m) if m.is_dir() => {
                    debug!("Not following directory link {}", path.display());
                    continue;
                }
                Ok(m) => m,
                Err(e) => {
                    warn!("Skipping dangling link {}: {}", path.display(), e);
                    continue;
                }
            }
        } else {
            match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            }
        };

        entries.push(DirEntryInfo {
            name: entry.file_name().to_string_lossy().to_string(),
            is_directory: metadata.is_dir(),
            stat: FsStat::from_metadata(&metadata),
            path,
        });
    }

    Ok(entries)
}

/// Lowercase extension without the dot; empty for directories.
pub fn extension_of(name: &str, is_directory: bool) -> String {
    if is_directory {
        return String::new();
    }
    Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}
