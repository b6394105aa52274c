//! Error taxonomy for the metadata pipeline.
//!
//! Per-file and per-album failures are reported through these variants and
//! caught at the orchestrator boundaries. Timeouts and shutdown requests are
//! not errors; they show up as a [`RunExit`](crate::process::RunExit).

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("not found: {0}")]
    NotFound(PathBuf),

    #[error("probe failed: {0}")]
    Probe(String),

    #[error("{tool} failed: {message}")]
    Tool { tool: &'static str, message: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("another update run holds the lease")]
    AlreadyRunning,

    #[error("worker failed: {0}")]
    Worker(String),

    #[error("invalid input: {0}")]
    Invalid(String),
}

impl PipelineError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Whether this error means the target vanished from disk.
    pub fn is_not_found(&self) -> bool {
        match self {
            PipelineError::NotFound(_) => true,
            PipelineError::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
