//! File records: one row per filesystem entry inside an album tree.

use chrono::NaiveDateTime;
use rusqlite::{params, OptionalExtension, Row};
use std::fs::Metadata;

use super::{format_ts, now_ts, system_time_to_ts, text_column, ts_column, Database};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Active,
    Disabled,
    Deleted,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Active => "active",
            FileStatus::Disabled => "disabled",
            FileStatus::Deleted => "deleted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(FileStatus::Active),
            "disabled" => Some(FileStatus::Disabled),
            "deleted" => Some(FileStatus::Deleted),
            _ => None,
        }
    }
}

/// Progress of metadata extraction for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataStatus {
    New,
    Processed,
    Failed,
}

impl MetadataStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataStatus::New => "new",
            MetadataStatus::Processed => "processed",
            MetadataStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "new" => Some(MetadataStatus::New),
            "processed" => Some(MetadataStatus::Processed),
            "failed" => Some(MetadataStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailStatus {
    New,
    Processed,
    Failed,
}

impl ThumbnailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThumbnailStatus::New => "new",
            ThumbnailStatus::Processed => "processed",
            ThumbnailStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "new" => Some(ThumbnailStatus::New),
            "processed" => Some(ThumbnailStatus::Processed),
            "failed" => Some(ThumbnailStatus::Failed),
            _ => None,
        }
    }
}

/// Filesystem-derived fields of a file, at stored precision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FsStat {
    /// `None` for directories.
    pub size: Option<u64>,
    pub created: Option<NaiveDateTime>,
    pub modified: Option<NaiveDateTime>,
}

impl FsStat {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            size: if metadata.is_dir() { None } else { Some(metadata.len()) },
            created: metadata.created().ok().map(system_time_to_ts),
            modified: metadata.modified().ok().map(system_time_to_ts),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: String,
    pub album_id: String,
    pub parent_file_id: Option<String>,
    /// Relative to the album base path, `/` separated.
    pub path: String,
    pub name: String,
    pub extension: String,
    pub size: Option<u64>,
    pub is_directory: bool,
    pub fs_created_at: Option<NaiveDateTime>,
    pub fs_modified_at: Option<NaiveDateTime>,
    pub content_date: Option<NaiveDateTime>,
    pub status: FileStatus,
    pub metadata_status: MetadataStatus,
    pub metadata_error: Option<String>,
    pub thumbnail_status: ThumbnailStatus,
    pub thumbnail_processed_at: Option<NaiveDateTime>,
    pub content_hash: Option<String>,
}

impl FileRecord {
    pub fn stat(&self) -> FsStat {
        FsStat {
            size: self.size,
            created: self.fs_created_at,
            modified: self.fs_modified_at,
        }
    }
}

/// A file discovered on disk that has no row yet.
#[derive(Debug, Clone)]
pub struct NewFile<'a> {
    pub album_id: &'a str,
    pub parent_file_id: Option<&'a str>,
    pub path: String,
    pub name: String,
    pub extension: String,
    pub is_directory: bool,
    pub stat: FsStat,
}

const FILE_COLUMNS: &str = r#"
    id, album_id, parent_file_id, path, name, extension, size, is_directory,
    fs_created_at, fs_modified_at, content_date, status, metadata_status, metadata_error,
    thumbnail_status, thumbnail_processed_at, content_hash
"#;

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        album_id: row.get(1)?,
        parent_file_id: row.get(2)?,
        path: row.get(3)?,
        name: row.get(4)?,
        extension: row.get(5)?,
        size: row.get::<_, Option<i64>>(6)?.map(|s| s as u64),
        is_directory: row.get(7)?,
        fs_created_at: ts_column(8, row.get(8)?)?,
        fs_modified_at: ts_column(9, row.get(9)?)?,
        content_date: ts_column(10, row.get(10)?)?,
        status: text_column(11, row.get(11)?, FileStatus::from_str)?,
        metadata_status: text_column(12, row.get(12)?, MetadataStatus::from_str)?,
        metadata_error: row.get(13)?,
        thumbnail_status: text_column(14, row.get(14)?, ThumbnailStatus::from_str)?,
        thumbnail_processed_at: ts_column(15, row.get(15)?)?,
        content_hash: row.get(16)?,
    })
}

impl Database {
    pub fn insert_file(&self, file: &NewFile<'_>) -> Result<FileRecord> {
        self.insert_or_get_file(file).map(|(record, _)| record)
    }

    /// Insert `file` unless a live row already holds its path.
    ///
    /// Returns the live row and whether this call created it. Two syncs
    /// racing over the same directory both end up with the same row.
    pub fn insert_or_get_file(&self, file: &NewFile<'_>) -> Result<(FileRecord, bool)> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = format_ts(&now_ts());
        let conn = self.conn()?;
        let inserted = conn.execute(
            r#"
            INSERT OR IGNORE INTO files (
                id, album_id, parent_file_id, path, name, extension, size, is_directory,
                fs_created_at, fs_modified_at, status, metadata_status, thumbnail_status,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'active', 'new', 'new', ?, ?)
            "#,
            params![
                id,
                file.album_id,
                file.parent_file_id,
                file.path,
                file.name,
                file.extension,
                file.stat.size.map(|s| s as i64),
                file.is_directory,
                file.stat.created.as_ref().map(format_ts),
                file.stat.modified.as_ref().map(format_ts),
                now,
                now,
            ],
            )?;

        let record = conn.query_row(
            &format!(
                "SELECT {FILE_COLUMNS} FROM files WHERE album_id = ? AND path = ? AND status != 'deleted'"
            ),
            params![file.album_id, file.path],
            file_from_row,
        )?;
        Ok((record, inserted == 1))
    }

    pub fn get_file(&self, id: &str) -> Result<Option<FileRecord>> {
        let conn = self.conn()?;
        let file = conn
            .query_row(
                &format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?"),
                [id],
                file_from_row,
            )
            .optional()?;
        Ok(file)
    }

    /// Active files directly under `parent` (the album root when `None`).
    pub fn active_children(&self, album_id: &str, parent: Option<&str>) -> Result<Vec<FileRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {FILE_COLUMNS} FROM files
            WHERE album_id = ?1 AND status = 'active' AND parent_file_id IS ?2
            ORDER BY path
            "#
        ))?;
        let files = stmt
            .query_map(params![album_id, parent], file_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    }

    /// Every file row of an album regardless of status, ordered by path.
    pub fn files_in_album(&self, album_id: &str) -> Result<Vec<FileRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE album_id = ? ORDER BY path, created_at"
        ))?;
        let files = stmt
            .query_map([album_id], file_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    }

    /// Active files that still need a metadata pass.
    ///
    /// Directories always qualify so their subtree is re-synced.
    pub fn files_needing_metadata(&self, album_id: &str) -> Result<Vec<FileRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {FILE_COLUMNS} FROM files
            WHERE album_id = ? AND status = 'active'
              AND (metadata_status = 'new' OR is_directory = 1)
            ORDER BY path
            "#
        ))?;
        let files = stmt
            .query_map([album_id], file_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    }

    pub fn update_fs_stat(&self, id: &str, stat: &FsStat) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            UPDATE files SET size = ?, fs_created_at = ?, fs_modified_at = ?, updated_at = ?
            WHERE id = ?
            "#,
            params![
                stat.size.map(|s| s as i64),
                stat.created.as_ref().map(format_ts),
                stat.modified.as_ref().map(format_ts),
                format_ts(&now_ts()),
                id,
            ],
        )?;
        Ok(())
    }

    /// Soft-delete a file and every active descendant. Metadata rows stay.
    ///
    /// Returns the number of rows marked deleted.
    pub fn soft_delete_file(&self, id: &str) -> Result<usize> {
        let conn = self.conn()?;
        let changed = conn.execute(
            r#"
            WITH RECURSIVE subtree(id) AS (
                SELECT id FROM files WHERE id = ?1
                UNION ALL
                SELECT f.id FROM files f JOIN subtree s ON f.parent_file_id = s.id
                WHERE f.status = 'active'
            )
            UPDATE files SET status = 'deleted', updated_at = ?2
            WHERE id IN (SELECT id FROM subtree) AND status != 'deleted'
            "#,
            params![id, format_ts(&now_ts())],
        )?;
        Ok(changed)
    }

    /// Soft-delete every active descendant of `id`, keeping `id` itself.
    pub fn soft_delete_descendants(&self, id: &str) -> Result<usize> {
        let conn = self.conn()?;
        let changed = conn.execute(
            r#"
            WITH RECURSIVE subtree(id) AS (
                SELECT id FROM files WHERE parent_file_id = ?1 AND status = 'active'
                UNION ALL
                SELECT f.id FROM files f JOIN subtree s ON f.parent_file_id = s.id
                WHERE f.status = 'active'
            )
            UPDATE files SET status = 'deleted', updated_at = ?2
            WHERE id IN (SELECT id FROM subtree)
            "#,
            params![id, format_ts(&now_ts())],
        )?;
        Ok(changed)
    }

    pub fn set_metadata_status(
        &self,
        id: &str,
        status: MetadataStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE files SET metadata_status = ?, metadata_error = ?, updated_at = ? WHERE id = ?",
            params![status.as_str(), error, format_ts(&now_ts()), id],
        )?;
        Ok(())
    }

    pub fn set_content_date(&self, id: &str, date: &NaiveDateTime) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE files SET content_date = ?, updated_at = ? WHERE id = ?",
            params![format_ts(date), format_ts(&now_ts()), id],
        )?;
        Ok(())
    }

    pub fn set_content_hash(&self, id: &str, hash: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE files SET content_hash = ?, updated_at = ? WHERE id = ?",
            params![hash, format_ts(&now_ts()), id],
        )?;
        Ok(())
    }

    /// Record a thumbnail attempt and stamp its time.
    pub fn record_thumbnail_attempt(&self, id: &str, status: ThumbnailStatus) -> Result<()> {
        let now = format_ts(&now_ts());
        let conn = self.conn()?;
        conn.execute(
            r#"
            UPDATE files SET thumbnail_status = ?, thumbnail_processed_at = ?, updated_at = ?
            WHERE id = ?
            "#,
            params![status.as_str(), now, now, id],
        )?;
        Ok(())
    }

    /// Put every active file of an album back to `new` and drop its metadata.
    ///
    /// Returns the number of files reset.
    pub fn reset_album_metadata(&self, album_id: &str) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            r#"
            DELETE FROM file_meta WHERE file_id IN (
                SELECT id FROM files WHERE album_id = ? AND status = 'active'
            )
            "#,
            [album_id],
        )?;
        let reset = tx.execute(
            r#"
            UPDATE files
            SET metadata_status = 'new', metadata_error = NULL, content_date = NULL,
                thumbnail_status = 'new', updated_at = ?
            WHERE album_id = ? AND status = 'active'
            "#,
            params![format_ts(&now_ts()), album_id],
        )?;
        tx.commit()?;
        Ok(reset)
    }
}
