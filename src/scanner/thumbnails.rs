use base64::Engine;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::ThumbnailConfig;
use crate::error::{PipelineError, Result};

/// Number of two-character directory levels taken from the file id.
const PREFIX_LEVELS: usize = 4;

/// Content-addressed thumbnail storage.
///
/// A thumbnail for file `75d29234-a251-...` at width 200 lives at
/// `<root>/75/d2/92/34/75d29234-a251-..._200.jpg`. Paths are partitioned by
/// file id, so concurrent writers for different files never collide.
#[derive(Debug, Clone)]
pub struct ThumbnailStore {
    root: PathBuf,
    sizes: Vec<u32>,
}

impl ThumbnailStore {
    pub fn new(config: &ThumbnailConfig) -> Self {
        Self::with_sizes(config.path.clone(), config.sizes.clone())
    }

    pub fn with_sizes(root: PathBuf, mut sizes: Vec<u32>) -> Self {
        sizes.sort_unstable();
        sizes.dedup();
        Self { root, sizes }
    }

    /// Configured widths, smallest first.
    pub fn sizes(&self) -> &[u32] {
        &self.sizes
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the thumbnail of `file_id` at `size` is stored.
    pub fn path_for(&self, file_id: &str, size: u32) -> PathBuf {
        let hex: Vec<char> = file_id.chars().filter(|c| c.is_ascii_alphanumeric()).collect();

        let mut path = self.root.clone();
        for pair in hex.chunks(2).take(PREFIX_LEVELS) {
            path.push(pair.iter().collect::<String>());
        }
        path.push(format!("{file_id}_{size}.jpg"));
        path
    }

    /// [`path_for`](Self::path_for), with its directories created.
    pub fn prepare_path(&self, file_id: &str, size: u32) -> Result<PathBuf> {
        let path = self.path_for(file_id, size);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
        }
        Ok(path)
    }

    pub fn exists(&self, file_id: &str, size: u32) -> bool {
        self.path_for(file_id, size).is_file()
    }

    pub fn write(&self, file_id: &str, size: u32, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.prepare_path(file_id, size)?;
        fs::write(&path, bytes).map_err(|e| PipelineError::io(&path, e))?;
        Ok(path)
    }

    pub fn read(&self, file_id: &str, size: u32) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(file_id, size);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PipelineError::io(&path, e)),
        }
    }

    /// The smallest configured thumbnail as base64, or `None` if it has not
    /// been generated yet.
    pub fn read_base64_smallest(&self, file_id: &str) -> Result<Option<String>> {
        let Some(&size) = self.sizes.first() else {
            return Ok(None);
        };
        Ok(self
            .read(file_id, size)?
            .map(|bytes| base64::engine::general_purpose::STANDARD.encode(bytes)))
    }
}
