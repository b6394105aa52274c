//! Metadata extraction dispatch.
//!
//! Every file is classified into a [`ContentKind`]; each kind has one
//! [`Extractor`]. [`MetadataProcessor`] picks the extractor, keeps the
//! file's filesystem fields fresh, and writes what the extractor found.

use chrono::NaiveDateTime;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::image::ImageExtractor;
use super::reconcile::{absolute_path, sync_subtree, SyncReport};
use super::thumbnails::ThumbnailStore;
use super::video::VideoExtractor;
use crate::config::{Config, MediaConfig};
use crate::db::{Album, Database, FileRecord, FsStat, MetaValue, ThumbnailStatus};
use crate::error::{PipelineError, Result};
use crate::tools::{FrameEncoder, MediaProber};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Directory,
    Video,
    Image,
    Unknown,
}

impl ContentKind {
    /// Classify by directory flag, then by extension (case-insensitive).
    pub fn classify(file: &FileRecord, media: &MediaConfig) -> Self {
        if file.is_directory {
            return ContentKind::Directory;
        }
        let ext = file.extension.to_lowercase();
        let listed = |list: &[String]| list.iter().any(|e| e.eq_ignore_ascii_case(&ext));

        if listed(&media.video_extensions) {
            ContentKind::Video
        } else if listed(&media.image_extensions) {
            ContentKind::Image
        } else {
            ContentKind::Unknown
        }
    }
}

/// What happened to a file's thumbnails during extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailOutcome {
    /// The content kind has no thumbnails.
    NotApplicable,
    /// No encoder available; nothing attempted.
    Skipped,
    Generated { sizes: usize },
    Failed { generated: usize, failed: usize },
}

impl ThumbnailOutcome {
    pub fn from_counts(generated: usize, failed: usize) -> Self {
        if failed == 0 {
            ThumbnailOutcome::Generated { sizes: generated }
        } else {
            ThumbnailOutcome::Failed { generated, failed }
        }
    }

    fn status(&self) -> Option<ThumbnailStatus> {
        match self {
            ThumbnailOutcome::NotApplicable => None,
            ThumbnailOutcome::Skipped => Some(ThumbnailStatus::New),
            ThumbnailOutcome::Generated { .. } => Some(ThumbnailStatus::Processed),
            ThumbnailOutcome::Failed { .. } => Some(ThumbnailStatus::Failed),
        }
    }
}

/// Normalized result of one extractor run.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub tags: Vec<(String, MetaValue)>,
    pub content_date: Option<NaiveDateTime>,
    pub thumbnails: ThumbnailOutcome,
}

impl Default for Extracted {
    fn default() -> Self {
        Self {
            tags: Vec::new(),
            content_date: None,
            thumbnails: ThumbnailOutcome::NotApplicable,
        }
    }
}

/// Everything an extractor may need about the file it works on.
pub struct ExtractJob<'a> {
    pub db: &'a Database,
    pub album: &'a Album,
    pub file: &'a FileRecord,
    /// Absolute path on disk.
    pub path: PathBuf,
}

pub trait Extractor: Send + Sync {
    fn extract(&self, job: &ExtractJob<'_>) -> Result<Extracted>;
}

/// Re-syncs the directory's subtree.
pub struct DirectoryExtractor;

impl Extractor for DirectoryExtractor {
    fn extract(&self, job: &ExtractJob<'_>) -> Result<Extracted> {
        let boundaries = job.db.nested_album_roots(job.album)?;
        let report: SyncReport = sync_subtree(job.db, job.album, job.file, &boundaries)?;
        if report.has_changes() {
            debug!("Directory {} re-synced: {:?}", job.file.path, report);
        }
        Ok(Extracted::default())
    }
}

/// Unrecognized content: nothing to extract.
pub struct NoopExtractor;

impl Extractor for NoopExtractor {
    fn extract(&self, _job: &ExtractJob<'_>) -> Result<Extracted> {
        Ok(Extracted::default())
    }
}

/// Summary of a successful metadata pass over one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub kind: ContentKind,
    pub tags_written: usize,
    pub thumbnails: ThumbnailOutcome,
}

pub struct MetadataProcessor {
    db: Arc<Database>,
    media: MediaConfig,
    hash_content: bool,
    directory: DirectoryExtractor,
    video: VideoExtractor,
    image: ImageExtractor,
    unknown: NoopExtractor,
}

impl MetadataProcessor {
    pub fn new(
        db: Arc<Database>,
        config: &Config,
        prober: Arc<dyn MediaProber>,
        encoder: Option<Arc<dyn FrameEncoder>>,
    ) -> Self {
        let store = ThumbnailStore::new(&config.thumbnails);
        Self {
            db,
            media: config.media.clone(),
            hash_content: config.process.hash_content,
            directory: DirectoryExtractor,
            video: VideoExtractor::new(prober, encoder, store.clone()),
            image: ImageExtractor::new(store),
            unknown: NoopExtractor,
        }
    }

    fn extractor(&self, kind: ContentKind) -> &dyn Extractor {
        match kind {
            ContentKind::Directory => &self.directory,
            ContentKind::Video => &self.video,
            ContentKind::Image => &self.image,
            ContentKind::Unknown => &self.unknown,
        }
    }

    /// Run the matching extractor on `file` and store its results.
    ///
    /// For everything but directories the file must still exist on disk
    /// (`NotFound` otherwise), and its size and timestamps are refreshed from
    /// a live stat before extraction.
    pub fn process(&self, album: &Album, file: &FileRecord) -> Result<ProcessOutcome> {
        let kind = ContentKind::classify(file, &self.media);
        let path = absolute_path(album, file);

        if kind != ContentKind::Directory {
            self.refresh_stat(file, &path)?;
        }

        let job = ExtractJob {
            db: &self.db,
            album,
            file,
            path,
        };
        let extracted = self.extractor(kind).extract(&job)?;

        for (key, value) in &extracted.tags {
            self.db.upsert_meta(&file.id, key, value)?;
        }
        if let Some(date) = &extracted.content_date {
            self.db.set_content_date(&file.id, date)?;
        }
        if let Some(status) = extracted.thumbnails.status() {
            self.db.record_thumbnail_attempt(&file.id, status)?;
        }

        Ok(ProcessOutcome {
            kind,
            tags_written: extracted.tags.len(),
            thumbnails: extracted.thumbnails,
        })
    }

    fn refresh_stat(&self, file: &FileRecord, path: &Path) -> Result<()> {
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PipelineError::NotFound(path.to_path_buf()))
            }
            Err(e) => return Err(PipelineError::io(path, e)),
        };

        let stat = FsStat::from_metadata(&metadata);
        if stat != file.stat() {
            self.db.update_fs_stat(&file.id, &stat)?;
        }

        if self.hash_content && metadata.is_file() {
            let hash = content_hash(path)?;
            if file.content_hash.as_deref() != Some(hash.as_str()) {
                self.db.set_content_hash(&file.id, &hash)?;
            }
        }
        Ok(())
    }
}

/// Hex SHA-256 of a file's content.
pub fn content_hash(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();

    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = reader.read(&mut buffer).map_err(|e| PipelineError::io(path, e))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
