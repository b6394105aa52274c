//! The metadata update run.
//!
//! One run reconciles every album with the disk, then feeds each file that
//! still needs metadata through the [`MetadataProcessor`] on a bounded
//! worker pool. Runs are time-boxed and can be stopped through a
//! [`ShutdownSignal`]; both end the run early with partial statistics.

mod shutdown;
mod stats;

pub use shutdown::ShutdownSignal;
pub use stats::{RunExit, RunStats, StatsStore};

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ProcessConfig};
use crate::db::{now_ts, Album, AlbumStatus, Database, FileRecord, MetadataStatus, RunLease};
use crate::error::{PipelineError, Result};
use crate::scanner::{sync_album, MetadataProcessor, SyncReport};
use crate::tools::{FfmpegEncoder, FfprobeProber, FrameEncoder};

/// Lease name shared by every trigger of the update run.
pub const LEASE_NAME: &str = "update-metadata";

/// Extra lease lifetime beyond the run's own timeout.
const LEASE_GRACE: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub threads: usize,
    pub timeout: Duration,
    /// Restrict the run to one album.
    pub album_id: Option<String>,
    pub production: bool,
    /// Pause between dispatches outside production.
    pub dev_delay: Duration,
}

impl ProcessOptions {
    pub fn from_config(config: &ProcessConfig) -> Self {
        Self {
            threads: config.threads,
            timeout: config.timeout(),
            album_id: None,
            production: config.is_production(),
            dev_delay: Duration::from_millis(config.dev_delay_ms),
        }
    }

    /// Worker count actually used. Development runs are serial.
    pub fn effective_threads(&self) -> usize {
        if self.production {
            self.threads.max(1)
        } else {
            1
        }
    }
}

/// How one file ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileResult {
    Processed,
    Failed,
}

pub struct UpdateMetadataProcess {
    db: Arc<Database>,
    processor: Arc<MetadataProcessor>,
    stats: StatsStore,
    shutdown: ShutdownSignal,
}

impl UpdateMetadataProcess {
    pub fn new(
        db: Arc<Database>,
        processor: MetadataProcessor,
        stats: StatsStore,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            db,
            processor: Arc::new(processor),
            stats,
            shutdown,
        }
    }

    /// Wire up the real ffprobe/ffmpeg tools named in `config`.
    pub fn from_config(
        db: Arc<Database>,
        config: &Config,
        stats: StatsStore,
        shutdown: ShutdownSignal,
    ) -> Self {
        let prober = Arc::new(FfprobeProber::new(config.tools.ffprobe.clone()));
        let encoder = FfmpegEncoder::detect(config.tools.ffmpeg.clone())
            .map(|e| Arc::new(e) as Arc<dyn FrameEncoder>);
        let processor = MetadataProcessor::new(Arc::clone(&db), config, prober, encoder);
        Self::new(db, processor, stats, shutdown)
    }

    pub fn stats(&self) -> &StatsStore {
        &self.stats
    }

    /// Execute one run.
    ///
    /// Fails only for problems outside the per-album and per-file
    /// boundaries: the lease is held elsewhere, the album list cannot be
    /// read, or a selected album does not exist.
    pub async fn run(&self, opts: &ProcessOptions) -> Result<RunStats> {
        let started = Instant::now();
        let threads = opts.effective_threads();
        let mut stats = RunStats::new(now_ts(), threads, opts.timeout.as_secs(), opts.production);
        // A timeout too large to represent means no deadline at all.
        let deadline = started.checked_add(opts.timeout);

        let lease = self
            .acquire_lease(opts.timeout.saturating_add(LEASE_GRACE))
            .await?
            .ok_or(PipelineError::AlreadyRunning)?;

        info!(
            "Update run started: {} thread(s), timeout {}s, {}",
            threads,
            opts.timeout.as_secs(),
            if opts.production { "production" } else { "development" }
        );

        let outcome = self.run_phases(opts, threads, deadline, started, &mut stats).await;

        let released = self.blocking(move |_| lease.release()).await;
        if let Err(e) = released {
            warn!("Failed to release lease {}: {}", LEASE_NAME, e);
        }
        outcome?;

        stats.total_ms = started.elapsed().as_millis() as u64;
        info!(
            "Update run {}: {} album(s), {} director(ies), {} file(s), {} failed in {}ms",
            stats.exit.as_str(),
            stats.albums,
            stats.directories,
            stats.files,
            stats.failed,
            stats.total_ms
        );

        self.stats.record(stats.clone());
        Ok(stats)
    }

    async fn run_phases(
        &self,
        opts: &ProcessOptions,
        threads: usize,
        deadline: Option<Instant>,
        started: Instant,
        stats: &mut RunStats,
    ) -> Result<()> {
        let only = opts.album_id.clone();
        let albums = self
            .blocking(move |db| db.albums_for_processing(only.as_deref()))
            .await?;
        if let (Some(id), true) = (&opts.album_id, albums.is_empty()) {
            return Err(PipelineError::Invalid(format!("no album with id {id}")));
        }

        let mut synced = Vec::with_capacity(albums.len());
        for album in albums {
            if self.shutdown.is_triggered() {
                stats.exit = RunExit::ShutDown;
                break;
            }
            if let Some(album) = self.reconcile(album).await {
                synced.push(Arc::new(album));
            }
        }
        stats.albums = synced.len();
        stats.reconcile_ms = started.elapsed().as_millis() as u64;

        if stats.exit != RunExit::Completed {
            return Ok(());
        }

        for album in synced {
            if let Some(exit) = self.stop_reason(deadline) {
                stats.exit = exit;
                break;
            }
            match self.process_album(&album, opts, threads, deadline, stats).await {
                Ok(Some(exit)) => {
                    stats.exit = exit;
                    break;
                }
                Ok(None) => {}
                Err(e) => error!("Processing album {} failed: {}", album.name, e),
            }
        }
        Ok(())
    }

    /// Sync one album. Returns the album if its files should be processed.
    async fn reconcile(&self, album: Album) -> Option<Album> {
        let target = album.clone();
        let result: Result<SyncReport> = self
            .blocking(move |db| {
                let boundaries = db.nested_album_roots(&target)?;
                sync_album(db, &target, &boundaries)
            })
            .await;

        match result {
            Ok(report) => {
                debug!("Album {} reconciled: {:?}", album.name, report);
                Some(album)
            }
            Err(e) if e.is_not_found() => {
                warn!(
                    "Album {} base path {} is gone, marking deleted",
                    album.name,
                    album.base_path.display()
                );
                let id = album.id.clone();
                if let Err(e) = self
                    .blocking(move |db| db.set_album_status(&id, AlbumStatus::Deleted))
                    .await
                {
                    error!("Cannot mark album {} deleted: {}", album.name, e);
                }
                None
            }
            Err(e) => {
                error!("Reconciling album {} failed: {}", album.name, e);
                None
            }
        }
    }

    /// Run every pending file of `album` through the worker pool.
    ///
    /// Returns the early exit reason if the deadline passed or shutdown was
    /// requested. Files already dispatched are always waited for.
    async fn process_album(
        &self,
        album: &Arc<Album>,
        opts: &ProcessOptions,
        threads: usize,
        deadline: Option<Instant>,
        stats: &mut RunStats,
    ) -> Result<Option<RunExit>> {
        let album_id = album.id.clone();
        let files = self
            .blocking(move |db| db.files_needing_metadata(&album_id))
            .await?;
        if files.is_empty() {
            return Ok(None);
        }
        debug!("Album {}: {} file(s) pending", album.name, files.len());

        let semaphore = Arc::new(Semaphore::new(threads));
        let mut tasks = JoinSet::new();
        let mut exit = None;

        for (index, file) in files.into_iter().enumerate() {
            if index > 0 && !opts.production && !opts.dev_delay.is_zero() {
                tokio::time::sleep(opts.dev_delay).await;
            }

            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| PipelineError::Worker(e.to_string()))?;

            if let Some(reason) = self.stop_reason(deadline) {
                exit = Some(reason);
                break;
            }

            let db = Arc::clone(&self.db);
            let processor = Arc::clone(&self.processor);
            let album = Arc::clone(album);
            let is_directory = file.is_directory;
            tasks.spawn(async move {
                let _permit = permit;
                let result = tokio::task::spawn_blocking(move || {
                    process_file(&db, &processor, &album, &file)
                })
                .await
                .map_err(|e| PipelineError::Worker(e.to_string()))
                .and_then(|r| r);
                (is_directory, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (is_directory, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!("Worker task failed: {}", e);
                    stats.failed += 1;
                    continue;
                }
            };

            if is_directory {
                stats.directories += 1;
            } else {
                stats.files += 1;
            }
            match result {
                Ok(FileResult::Processed) => {}
                Ok(FileResult::Failed) => stats.failed += 1,
                Err(e) => {
                    error!("Recording file status failed: {}", e);
                    stats.failed += 1;
                }
            }
        }

        Ok(exit)
    }

    fn stop_reason(&self, deadline: Option<Instant>) -> Option<RunExit> {
        if self.shutdown.is_triggered() {
            Some(RunExit::ShutDown)
        } else if deadline.is_some_and(|d| Instant::now() >= d) {
            Some(RunExit::TimedOut)
        } else {
            None
        }
    }

    async fn acquire_lease(&self, ttl: Duration) -> Result<Option<RunLease>> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || RunLease::try_acquire(&db, LEASE_NAME, ttl))
            .await
            .map_err(|e| PipelineError::Worker(e.to_string()))?
    }

    /// Run database work on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| PipelineError::Worker(e.to_string()))?
    }
}

/// Extract one file and record the outcome on its row.
fn process_file(
    db: &Database,
    processor: &MetadataProcessor,
    album: &Album,
    file: &FileRecord,
) -> Result<FileResult> {
    match processor.process(album, file) {
        Ok(outcome) => {
            debug!("{}: {:?}", file.path, outcome);
            db.set_metadata_status(&file.id, MetadataStatus::Processed, None)?;
            Ok(FileResult::Processed)
        }
        Err(e) => {
            warn!("Metadata for {} in album {} failed: {}", file.path, album.name, e);
            db.set_metadata_status(&file.id, MetadataStatus::Failed, Some(&e.to_string()))?;
            Ok(FileResult::Failed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_db, FileStatus, ThumbnailStatus};
    use crate::tools::{MediaProber, ProbeOutput, ProbeStream};
    use std::fs;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    struct FakeProber;

    impl MediaProber for FakeProber {
        fn probe(&self, path: &Path) -> Result<ProbeOutput> {
            if path.to_string_lossy().contains("bad") {
                return Err(PipelineError::Probe("no readable streams".to_string()));
            }
            let mut output = ProbeOutput::default();
            output.data.streams.push(ProbeStream {
                codec_type: Some("video".to_string()),
                r_frame_rate: Some("60/1".to_string()),
                ..Default::default()
            });
            Ok(output)
        }
    }

    /// Requests shutdown from inside the first extraction.
    struct ShutdownOnFirstCall(ShutdownSignal);

    impl MediaProber for ShutdownOnFirstCall {
        fn probe(&self, path: &Path) -> Result<ProbeOutput> {
            self.0.trigger();
            FakeProber.probe(path)
        }
    }

    struct Harness {
        _thumbs: TempDir,
        db: Arc<Database>,
        process: UpdateMetadataProcess,
        shutdown: ShutdownSignal,
    }

    fn harness() -> Harness {
        harness_with(|_| Arc::new(FakeProber))
    }

    fn harness_with(prober: impl FnOnce(&ShutdownSignal) -> Arc<dyn MediaProber>) -> Harness {
        let thumbs = tempdir().unwrap();
        let db = Arc::new(test_db());
        let mut config = Config::default();
        config.thumbnails.path = thumbs.path().to_path_buf();

        let shutdown = ShutdownSignal::new();
        let processor = MetadataProcessor::new(Arc::clone(&db), &config, prober(&shutdown), None);
        let process =
            UpdateMetadataProcess::new(Arc::clone(&db), processor, StatsStore::new(), shutdown.clone());

        Harness {
            _thumbs: thumbs,
            db,
            process,
            shutdown,
        }
    }

    fn options(timeout: Duration) -> ProcessOptions {
        ProcessOptions {
            threads: 2,
            timeout,
            album_id: None,
            production: true,
            dev_delay: Duration::ZERO,
        }
    }

    fn album_with(files: &[&str]) -> TempDir {
        let dir = tempdir().unwrap();
        for name in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, b"data").unwrap();
        }
        dir
    }

    fn file_by_path(db: &Database, album: &Album, path: &str) -> FileRecord {
        db.files_in_album(&album.id)
            .unwrap()
            .into_iter()
            .find(|f| f.path == path && f.status == FileStatus::Active)
            .unwrap()
    }

    #[tokio::test]
    async fn test_failing_file_does_not_stop_siblings() {
        let h = harness();
        let dir = album_with(&["a.mp4", "bad.mp4", "c.mp4"]);
        let album = h.db.register_album(dir.path(), None).unwrap();

        let stats = h.process.run(&options(Duration::from_secs(60))).await.unwrap();
        assert_eq!(stats.exit, RunExit::Completed);
        assert_eq!(stats.albums, 1);
        assert_eq!(stats.files, 3);
        assert_eq!(stats.failed, 1);

        let a = file_by_path(&h.db, &album, "a.mp4");
        let bad = file_by_path(&h.db, &album, "bad.mp4");
        let c = file_by_path(&h.db, &album, "c.mp4");
        assert_eq!(a.metadata_status, MetadataStatus::Processed);
        assert_eq!(c.metadata_status, MetadataStatus::Processed);
        assert_eq!(bad.metadata_status, MetadataStatus::Failed);
        assert!(bad.metadata_error.unwrap().contains("no readable streams"));
        assert_eq!(h.db.get_meta(&a.id, "fps").unwrap().unwrap().int_value, Some(60));

        assert_eq!(h.process.stats().last(), Some(stats));

        // Nothing left to do on the next run.
        let again = h.process.run(&options(Duration::from_secs(60))).await.unwrap();
        assert_eq!(again.files, 0);
    }

    #[tokio::test]
    async fn test_zero_timeout_reconciles_but_processes_nothing() {
        let h = harness();
        let first = album_with(&["one.mp4"]);
        let second = album_with(&["two.mp4"]);
        let a = h.db.register_album(first.path(), None).unwrap();
        let b = h.db.register_album(second.path(), None).unwrap();

        let stats = h.process.run(&options(Duration::ZERO)).await.unwrap();
        assert_eq!(stats.exit, RunExit::TimedOut);
        assert_eq!(stats.albums, 2);
        assert_eq!(stats.files, 0);

        for (album, path) in [(&a, "one.mp4"), (&b, "two.mp4")] {
            let file = file_by_path(&h.db, album, path);
            assert_eq!(file.metadata_status, MetadataStatus::New);
        }
    }

    #[tokio::test]
    async fn test_shutdown_before_start() {
        let h = harness();
        let dir = album_with(&["a.mp4"]);
        let album = h.db.register_album(dir.path(), None).unwrap();
        h.shutdown.trigger();

        let stats = h.process.run(&options(Duration::from_secs(60))).await.unwrap();
        assert_eq!(stats.exit, RunExit::ShutDown);
        assert_eq!(stats.albums, 0);
        assert!(h.db.files_in_album(&album.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lease_blocks_concurrent_run() {
        let h = harness();
        let held = RunLease::try_acquire(&h.db, LEASE_NAME, Duration::from_secs(60))
            .unwrap()
            .unwrap();

        let err = h.process.run(&options(Duration::from_secs(60))).await.unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyRunning));

        held.release().unwrap();
        assert!(h.process.run(&options(Duration::from_secs(60))).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_album_is_marked_deleted() {
        let h = harness();
        let gone = album_with(&["a.mp4"]);
        let kept = album_with(&["b.mp4"]);
        let gone_album = h.db.register_album(gone.path(), None).unwrap();
        h.db.register_album(kept.path(), None).unwrap();
        drop(gone);

        let stats = h.process.run(&options(Duration::from_secs(60))).await.unwrap();
        assert_eq!(stats.albums, 1);
        assert_eq!(stats.files, 1);
        let stored = h.db.get_album(&gone_album.id).unwrap().unwrap();
        assert_eq!(stored.status, AlbumStatus::Deleted);
    }

    #[tokio::test]
    async fn test_directories_are_counted_and_always_revisited() {
        let h = harness();
        let dir = album_with(&["2023/a.mp4", "b.mp4"]);
        let mut opts = options(Duration::from_secs(60));
        opts.production = false;
        opts.threads = 8;
        let album = h.db.register_album(dir.path(), None).unwrap();
        opts.album_id = Some(album.id.clone());

        let stats = h.process.run(&opts).await.unwrap();
        assert_eq!(stats.threads, 1);
        assert_eq!(stats.directories, 1);
        assert_eq!(stats.files, 2);

        let again = h.process.run(&opts).await.unwrap();
        assert_eq!(again.directories, 1);
        assert_eq!(again.files, 0);
    }

    #[tokio::test]
    async fn test_unknown_album_selection_fails() {
        let h = harness();
        let mut opts = options(Duration::from_secs(60));
        opts.album_id = Some("missing".to_string());

        let err = h.process.run(&opts).await.unwrap_err();
        assert!(matches!(err, PipelineError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_shutdown_mid_run_stops_dispatching() {
        let h = harness_with(|signal| Arc::new(ShutdownOnFirstCall(signal.clone())));
        let dir = album_with(&["a.mp4", "b.mp4", "c.mp4"]);
        let album = h.db.register_album(dir.path(), None).unwrap();
        let mut opts = options(Duration::from_secs(60));
        opts.threads = 1;

        let stats = h.process.run(&opts).await.unwrap();
        assert_eq!(stats.exit, RunExit::ShutDown);
        assert_eq!(stats.files, 1);
        assert_eq!(h.process.stats().last(), Some(stats));

        // The file already running finishes; the rest wait for the next run.
        let a = file_by_path(&h.db, &album, "a.mp4");
        assert_eq!(a.metadata_status, MetadataStatus::Processed);
        for path in ["b.mp4", "c.mp4"] {
            assert_eq!(file_by_path(&h.db, &album, path).metadata_status, MetadataStatus::New);
        }
    }

    #[tokio::test]
    async fn test_video_without_encoder_stamps_thumbnail_attempt() {
        let h = harness();
        let dir = album_with(&["a.mp4"]);
        let album = h.db.register_album(dir.path(), None).unwrap();

        let stats = h.process.run(&options(Duration::from_secs(60))).await.unwrap();
        assert_eq!(stats.files, 1);

        let a = file_by_path(&h.db, &album, "a.mp4");
        assert_eq!(a.metadata_status, MetadataStatus::Processed);
        assert_eq!(a.thumbnail_status, ThumbnailStatus::New);
        assert!(a.thumbnail_processed_at.is_some());
    }

    #[tokio::test]
    async fn test_nested_album_files_stay_with_the_nested_album() {
        let h = harness();
        let dir = album_with(&["inner/x.mp4"]);
        let outer = h.db.register_album(dir.path(), None).unwrap();
        let inner = h.db.register_album(&dir.path().join("inner"), None).unwrap();

        let stats = h.process.run(&options(Duration::from_secs(60))).await.unwrap();
        assert_eq!(stats.exit, RunExit::Completed);
        assert_eq!(stats.albums, 2);

        let active = |album: &Album| -> Vec<String> {
            h.db.files_in_album(&album.id)
                .unwrap()
                .into_iter()
                .filter(|f| f.status == FileStatus::Active)
                .map(|f| f.path)
                .collect()
        };
        assert_eq!(active(&outer), vec!["inner"]);
        assert_eq!(active(&inner), vec!["x.mp4"]);
        assert_eq!(file_by_path(&h.db, &inner, "x.mp4").metadata_status, MetadataStatus::Processed);
    }
}
