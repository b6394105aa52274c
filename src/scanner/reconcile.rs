//! Album file sync.
//!
//! Makes the stored file tree of one album match the directory tree on
//! disk: new entries get rows, changed entries get their size and
//! timestamps refreshed, vanished entries are soft-deleted. The walk is
//! recursive and idempotent; a second pass over an unchanged tree writes
//! nothing.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::discovery::{extension_of, scan_dir};
use crate::db::{Album, Database, FileRecord, NewFile};
use crate::error::{PipelineError, Result};

/// Counts of the changes one sync made.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Directory levels walked, including the starting one.
    pub directories: usize,
}

impl SyncReport {
    pub fn has_changes(&self) -> bool {
        self.created + self.updated + self.deleted > 0
    }
}

/// Sync the whole tree of `album`.
///
/// `boundaries` are absolute roots of other albums nested inside this one.
/// They get a directory row like any other directory, but the walk does not
/// descend into them.
pub fn sync_album(db: &Database, album: &Album, boundaries: &[PathBuf]) -> Result<SyncReport> {
    if !album.base_path.is_dir() {
        return Err(PipelineError::NotFound(album.base_path.clone()));
    }

    let mut sync = TreeSync::new(db, album, boundaries);
    sync.sync_level(None, &album.base_path)?;

    if sync.report.has_changes() {
        info!(
            "Synced album {}: {} created, {} updated, {} deleted",
            album.name, sync.report.created, sync.report.updated, sync.report.deleted
        );
    }
    Ok(sync.report)
}

/// Sync the subtree below the directory row `dir`.
///
/// A `dir` that is itself the root of a nested album belongs to that album,
/// so nothing below it is touched.
pub fn sync_subtree(
    db: &Database,
    album: &Album,
    dir: &FileRecord,
    boundaries: &[PathBuf],
) -> Result<SyncReport> {
    let abs_dir = absolute_path(album, dir);
    if !abs_dir.is_dir() {
        return Err(PipelineError::NotFound(abs_dir));
    }
    if boundaries.iter().any(|b| *b == abs_dir) {
        debug!("{} is a nested album root, skipping", abs_dir.display());
        return Ok(SyncReport::default());
    }

    let mut sync = TreeSync::new(db, album, boundaries);
    sync.sync_level(Some(dir), &abs_dir)?;
    Ok(sync.report)
}

/// Absolute location of a file row on disk.
pub fn absolute_path(album: &Album, file: &FileRecord) -> PathBuf {
    album.base_path.join(&file.path)
}

fn child_path(parent: Option<&FileRecord>, name: &str) -> String {
    match parent {
        Some(p) => format!("{}/{}", p.path, name),
        None => name.to_string(),
    }
}

struct TreeSync<'a> {
    db: &'a Database,
    album: &'a Album,
    boundaries: HashSet<&'a Path>,
    report: SyncReport,
}

impl<'a> TreeSync<'a> {
    fn new(db: &'a Database, album: &'a Album, boundaries: &'a [PathBuf]) -> Self {
        Self {
            db,
            album,
            boundaries: boundaries.iter().map(PathBuf::as_path).collect(),
            report: SyncReport::default(),
        }
    }

    fn sync_level(&mut self, parent: Option<&FileRecord>, abs_dir: &Path) -> Result<()> {
        self.report.directories += 1;

        let live = scan_dir(abs_dir)?;
        let mut known: HashMap<String, FileRecord> = self
            .db
            .active_children(&self.album.id, parent.map(|p| p.id.as_str()))?
            .into_iter()
            .map(|f| (f.path.clone(), f))
            .collect();

        let mut to_walk = Vec::new();

        for entry in live {
            let path = child_path(parent, &entry.name);

            let record = match known.remove(&path) {
                Some(existing) if existing.is_directory == entry.is_directory => {
                    if existing.stat() != entry.stat {
                        self.db.update_fs_stat(&existing.id, &entry.stat)?;
                        self.report.updated += 1;
                    }
                    existing
                }
                stale => {
                    // A file replaced by a directory (or the reverse) is a new entry.
                    if let Some(stale) = stale {
                        self.report.deleted += self.db.soft_delete_file(&stale.id)?;
                    }
                    let (record, inserted) = self.db.insert_or_get_file(&NewFile {
                        album_id: &self.album.id,
                        parent_file_id: parent.map(|p| p.id.as_str()),
                        extension: extension_of(&entry.name, entry.is_directory),
                        name: entry.name.clone(),
                        path,
                        is_directory: entry.is_directory,
                        stat: entry.stat.clone(),
                    })?;
                    // Another sync of an overlapping subtree may have got there first.
                    if inserted {
                        debug!("New file {} in album {}", record.path, self.album.name);
                        self.report.created += 1;
                    }
                    record
                }
            };

            if entry.is_directory {
                if self.boundaries.contains(entry.path.as_path()) {
                    // Rows synced before the nested album existed now belong to it.
                    let retired = self.db.soft_delete_descendants(&record.id)?;
                    if retired > 0 {
                        debug!(
                            "Retired {} rows under nested album root {}",
                            retired,
                            entry.path.display()
                        );
                    }
                    self.report.deleted += retired;
                } else {
                    to_walk.push((record, entry.path));
                }
            }
        }

        for (_, vanished) in known {
            debug!("File {} vanished from album {}", vanished.path, self.album.name);
            self.report.deleted += self.db.soft_delete_file(&vanished.id)?;
        }

        for (record, path) in to_walk {
            self.sync_level(Some(&record), &path)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_db, FileStatus, MetaValue};
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    fn build_tree(root: &Path) {
        fs::create_dir_all(root.join("2023/summer")).unwrap();
        File::create(root.join("a.mp4")).unwrap();
        File::create(root.join("b.jpg")).unwrap();
        File::create(root.join("2023/c.mov")).unwrap();
        File::create(root.join("2023/summer/d.mp4")).unwrap();
    }

    fn active_paths(db: &Database, album: &Album) -> Vec<String> {
        db.files_in_album(&album.id)
            .unwrap()
            .into_iter()
            .filter(|f| f.status == FileStatus::Active)
            .map(|f| f.path)
            .collect()
    }

    #[test]
    fn test_first_sync_materializes_tree_with_parents() {
        let db = test_db();
        let dir = tempdir().unwrap();
        build_tree(dir.path());
        let album = db.register_album(dir.path(), None).unwrap();

        let report = sync_album(&db, &album, &[]).unwrap();
        assert_eq!(report.created, 6);
        assert_eq!(report.directories, 3);

        assert_eq!(
            active_paths(&db, &album),
            vec!["2023", "2023/c.mov", "2023/summer", "2023/summer/d.mp4", "a.mp4", "b.jpg"]
        );

        let files = db.files_in_album(&album.id).unwrap();
        let summer = files.iter().find(|f| f.path == "2023/summer").unwrap();
        let deep = files.iter().find(|f| f.path == "2023/summer/d.mp4").unwrap();
        let year = files.iter().find(|f| f.path == "2023").unwrap();
        assert_eq!(deep.parent_file_id.as_deref(), Some(summer.id.as_str()));
        assert_eq!(summer.parent_file_id.as_deref(), Some(year.id.as_str()));
        assert!(year.parent_file_id.is_none());
        assert!(year.is_directory && year.size.is_none() && year.extension.is_empty());
        assert_eq!(deep.extension, "mp4");
    }

    #[test]
    fn test_second_sync_is_a_no_op() {
        let db = test_db();
        let dir = tempdir().unwrap();
        build_tree(dir.path());
        let album = db.register_album(dir.path(), None).unwrap();

        sync_album(&db, &album, &[]).unwrap();
        let before = db.files_in_album(&album.id).unwrap().len();

        let report = sync_album(&db, &album, &[]).unwrap();
        assert!(!report.has_changes(), "unexpected changes: {report:?}");
        assert_eq!(db.files_in_album(&album.id).unwrap().len(), before);
    }

    #[test]
    fn test_removed_file_is_soft_deleted_alone() {
        let db = test_db();
        let dir = tempdir().unwrap();
        build_tree(dir.path());
        let album = db.register_album(dir.path(), None).unwrap();
        sync_album(&db, &album, &[]).unwrap();

        let clip = db
            .files_in_album(&album.id)
            .unwrap()
            .into_iter()
            .find(|f| f.path == "2023/c.mov")
            .unwrap();
        db.upsert_meta(&clip.id, "duration", &MetaValue::Float(12.0)).unwrap();

        fs::remove_file(dir.path().join("2023/c.mov")).unwrap();
        let report = sync_album(&db, &album, &[]).unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.created, 0);

        let clip = db.get_file(&clip.id).unwrap().unwrap();
        assert_eq!(clip.status, FileStatus::Deleted);
        assert!(db.get_meta(&clip.id, "duration").unwrap().is_some());
        assert_eq!(
            active_paths(&db, &album),
            vec!["2023", "2023/summer", "2023/summer/d.mp4", "a.mp4", "b.jpg"]
        );
    }

    #[test]
    fn test_changed_size_updates_in_place() {
        let db = test_db();
        let dir = tempdir().unwrap();
        build_tree(dir.path());
        let album = db.register_album(dir.path(), None).unwrap();
        sync_album(&db, &album, &[]).unwrap();

        let mut f = fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join("a.mp4"))
            .unwrap();
        f.write_all(b"more bytes").unwrap();
        drop(f);

        let report = sync_album(&db, &album, &[]).unwrap();
        assert_eq!(report.created, 0);
        assert!(report.updated >= 1);

        let a = db
            .files_in_album(&album.id)
            .unwrap()
            .into_iter()
            .find(|f| f.path == "a.mp4")
            .unwrap();
        assert_eq!(a.size, Some(10));
        assert_eq!(a.status, FileStatus::Active);
    }

    #[test]
    fn test_nested_album_root_is_not_descended() {
        let db = test_db();
        let dir = tempdir().unwrap();
        build_tree(dir.path());
        let album = db.register_album(dir.path(), None).unwrap();
        let nested = dir.path().join("2023/summer");

        let report = sync_album(&db, &album, &[nested]).unwrap();
        assert_eq!(report.created, 5);
        assert!(!active_paths(&db, &album).contains(&"2023/summer/d.mp4".to_string()));
    }

    #[test]
    fn test_rows_under_a_later_nested_album_are_retired() {
        let db = test_db();
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("inner/deep")).unwrap();
        File::create(dir.path().join("inner/x.txt")).unwrap();
        File::create(dir.path().join("inner/deep/y.mp4")).unwrap();
        let outer = db.register_album(dir.path(), None).unwrap();
        sync_album(&db, &outer, &[]).unwrap();
        assert_eq!(active_paths(&db, &outer).len(), 4);

        let inner = db.register_album(&dir.path().join("inner"), None).unwrap();
        let roots = db.nested_album_roots(&outer).unwrap();
        assert_eq!(roots, vec![inner.base_path.clone()]);

        let report = sync_album(&db, &outer, &roots).unwrap();
        assert_eq!(report.deleted, 3);
        assert_eq!(active_paths(&db, &outer), vec!["inner"]);

        // Settled: nothing left to retire.
        let report = sync_album(&db, &outer, &roots).unwrap();
        assert!(!report.has_changes(), "unexpected changes: {report:?}");
    }

    #[test]
    fn test_subtree_at_nested_root_is_left_alone() {
        let db = test_db();
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("inner")).unwrap();
        let outer = db.register_album(dir.path(), None).unwrap();
        sync_album(&db, &outer, &[]).unwrap();
        File::create(dir.path().join("inner/x.txt")).unwrap();

        let inner_dir = db
            .files_in_album(&outer.id)
            .unwrap()
            .into_iter()
            .find(|f| f.path == "inner")
            .unwrap();
        let roots = vec![absolute_path(&outer, &inner_dir)];

        let report = sync_subtree(&db, &outer, &inner_dir, &roots).unwrap();
        assert_eq!(report, SyncReport::default());
        assert_eq!(active_paths(&db, &outer), vec!["inner"]);
    }

    #[test]
    fn test_overlapping_subtree_syncs_do_not_duplicate_rows() {
        use std::sync::Barrier;

        let db = test_db();
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        let album = db.register_album(dir.path(), None).unwrap();
        sync_album(&db, &album, &[]).unwrap();

        let files = db.files_in_album(&album.id).unwrap();
        let a = files.iter().find(|f| f.path == "a").unwrap().clone();
        let b = files.iter().find(|f| f.path == "a/b").unwrap().clone();

        for round in 0..50 {
            for i in 0..20 {
                File::create(dir.path().join(format!("a/b/r{round}_{i}.mp4"))).unwrap();
            }

            let barrier = Barrier::new(2);
            let (outer, inner) = std::thread::scope(|scope| {
                let outer = scope.spawn(|| {
                    barrier.wait();
                    sync_subtree(&db, &album, &a, &[])
                });
                let inner = scope.spawn(|| {
                    barrier.wait();
                    sync_subtree(&db, &album, &b, &[])
                });
                (outer.join().unwrap(), inner.join().unwrap())
            });
            let outer = outer.unwrap();
            let inner = inner.unwrap();
            assert_eq!(outer.created + inner.created, 20, "round {round}");
        }

        let paths = active_paths(&db, &album);
        let unique: HashSet<&String> = paths.iter().collect();
        assert_eq!(unique.len(), paths.len());
        assert_eq!(paths.len(), 2 + 50 * 20);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_directory_is_not_followed() {
        use std::os::unix::fs::symlink;

        let db = test_db();
        let dir = tempdir().unwrap();
        File::create(dir.path().join("a.mp4")).unwrap();
        symlink(dir.path(), dir.path().join("loop")).unwrap();
        symlink(dir.path().join("a.mp4"), dir.path().join("link.mp4")).unwrap();
        let album = db.register_album(dir.path(), None).unwrap();

        let report = sync_album(&db, &album, &[]).unwrap();
        assert_eq!(report.created, 2);
        assert_eq!(report.directories, 1);
        assert_eq!(active_paths(&db, &album), vec!["a.mp4", "link.mp4"]);
    }

    #[test]
    fn test_subtree_sync_and_missing_root() {
        let db = test_db();
        let dir = tempdir().unwrap();
        build_tree(dir.path());
        let album = db.register_album(dir.path(), None).unwrap();
        sync_album(&db, &album, &[]).unwrap();

        File::create(dir.path().join("2023/summer/e.mp4")).unwrap();
        File::create(dir.path().join("z.mp4")).unwrap();
        let summer = db
            .files_in_album(&album.id)
            .unwrap()
            .into_iter()
            .find(|f| f.path == "2023/summer")
            .unwrap();

        let report = sync_subtree(&db, &album, &summer, &[]).unwrap();
        assert_eq!(report.created, 1);
        // Outside the subtree: untouched until a full sync.
        assert!(!active_paths(&db, &album).contains(&"z.mp4".to_string()));

        fs::remove_dir_all(dir.path().join("2023")).unwrap();
        assert!(matches!(
            sync_subtree(&db, &album, &summer, &[]),
            Err(PipelineError::NotFound(_))
        ));

        let gone = Album {
            base_path: dir.path().join("gone"),
            ..album
        };
        assert!(matches!(sync_album(&db, &gone, &[]), Err(PipelineError::NotFound(_))));
    }
}
