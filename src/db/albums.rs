//! Album records and the album-layer operations the pipeline needs.

use chrono::NaiveDateTime;
use rusqlite::{params, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use tracing::info;

use super::{format_ts, now_ts, text_column, ts_column, Database};
use crate::error::{PipelineError, Result};

/// Lifecycle of an album. Albums are never removed, only marked deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlbumStatus {
    Active,
    Disabled,
    Deleted,
}

impl AlbumStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlbumStatus::Active => "active",
            AlbumStatus::Disabled => "disabled",
            AlbumStatus::Deleted => "deleted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AlbumStatus::Active),
            "disabled" => Some(AlbumStatus::Disabled),
            "deleted" => Some(AlbumStatus::Deleted),
            _ => None,
        }
    }
}

/// A root directory registered for ingestion.
#[derive(Debug, Clone)]
pub struct Album {
    pub id: String,
    pub name: String,
    pub base_path: PathBuf,
    pub status: AlbumStatus,
    pub parent_album_id: Option<String>,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

const ALBUM_COLUMNS: &str =
    "id, name, base_path, status, parent_album_id, created_at, updated_at";

fn album_from_row(row: &Row<'_>) -> rusqlite::Result<Album> {
    Ok(Album {
        id: row.get(0)?,
        name: row.get(1)?,
        base_path: PathBuf::from(row.get::<_, String>(2)?),
        status: text_column(3, row.get(3)?, AlbumStatus::from_str)?,
        parent_album_id: row.get(4)?,
        created_at: ts_column(5, row.get(5)?)?,
        updated_at: ts_column(6, row.get(6)?)?,
    })
}

impl Database {
    /// Register `base_path` as an album, or return the live album already there.
    ///
    /// The new album becomes a child of the deepest live album containing it,
    /// and adopts live albums nested inside it that were attached to that
    /// same ancestor.
    pub fn register_album(&self, base_path: &Path, name: Option<&str>) -> Result<Album> {
        if !base_path.is_absolute() {
            return Err(PipelineError::Invalid(format!(
                "album path must be absolute: {}",
                base_path.display()
            )));
        }
        // One album per directory, however the path was spelled.
        let canonical = match base_path.canonicalize() {
            Ok(p) => p,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PipelineError::NotFound(base_path.to_path_buf()));
            }
            Err(e) => return Err(PipelineError::io(base_path, e)),
        };
        let base_path = canonical.as_path();
        if !base_path.is_dir() {
            return Err(PipelineError::NotFound(base_path.to_path_buf()));
        }

        if let Some(existing) = self.find_album_by_path(base_path)? {
            return Ok(existing);
        }

        let live = self.list_albums()?;
        let parent = live
            .iter()
            .filter(|a| base_path.starts_with(&a.base_path) && a.base_path != base_path)
            .max_by_key(|a| a.base_path.components().count());
        let parent_id = parent.map(|a| a.id.clone());

        let name = name.map(str::to_string).unwrap_or_else(|| {
            base_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| base_path.to_string_lossy().to_string())
        });

        let id = uuid::Uuid::new_v4().to_string();
        let now = format_ts(&now_ts());
        {
            let conn = self.conn()?;
            conn.execute(
                r#"
                INSERT INTO albums (id, name, base_path, status, parent_album_id, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    id,
                    name,
                    base_path.to_string_lossy(),
                    AlbumStatus::Active.as_str(),
                    parent_id,
                    now,
                    now,
                ],
            )?;

            for nested in live
                .iter()
                .filter(|a| a.base_path.starts_with(base_path) && a.parent_album_id == parent_id)
            {
                conn.execute(
                    "UPDATE albums SET parent_album_id = ?, updated_at = ? WHERE id = ?",
                    params![id, now, nested.id],
                )?;
            }
        }

        info!("Registered album {} at {}", name, base_path.display());

        self.get_album(&id)?
            .ok_or_else(|| PipelineError::Invalid(format!("album {id} vanished after insert")))
    }

    pub fn get_album(&self, id: &str) -> Result<Option<Album>> {
        let conn = self.conn()?;
        let album = conn
            .query_row(
                &format!("SELECT {ALBUM_COLUMNS} FROM albums WHERE id = ?"),
                [id],
                album_from_row,
            )
            .optional()?;
        Ok(album)
    }

    /// The live (not deleted) album registered at exactly `base_path`.
    pub fn find_album_by_path(&self, base_path: &Path) -> Result<Option<Album>> {
        let conn = self.conn()?;
        let album = conn
            .query_row(
                &format!(
                    "SELECT {ALBUM_COLUMNS} FROM albums WHERE base_path = ? AND status != 'deleted'"
                ),
                [base_path.to_string_lossy()],
                album_from_row,
            )
            .optional()?;
        Ok(album)
    }

    /// All albums that are not deleted, ordered by base path.
    pub fn list_albums(&self) -> Result<Vec<Album>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ALBUM_COLUMNS} FROM albums WHERE status != 'deleted' ORDER BY base_path"
        ))?;
        let albums = stmt
            .query_map([], album_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(albums)
    }

    /// Albums the update run should visit, ordered by base path.
    ///
    /// Active and disabled albums qualify; `only` narrows the set to one id.
    pub fn albums_for_processing(&self, only: Option<&str>) -> Result<Vec<Album>> {
        let albums = self
            .list_albums()?
            .into_iter()
            .filter(|a| matches!(a.status, AlbumStatus::Active | AlbumStatus::Disabled))
            .filter(|a| only.map_or(true, |id| a.id == id))
            .collect();
        Ok(albums)
    }

    pub fn set_album_status(&self, id: &str, status: AlbumStatus) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE albums SET status = ?, updated_at = ? WHERE id = ?",
            params![status.as_str(), format_ts(&now_ts()), id],
        )?;
        Ok(())
    }

    /// Base paths of live albums nested strictly inside `album`.
    ///
    /// The reconciler stops descending at these directories; their content
    /// belongs to the nested album.
    pub fn nested_album_roots(&self, album: &Album) -> Result<Vec<PathBuf>> {
        let roots = self
            .list_albums()?
            .into_iter()
            .filter(|a| a.id != album.id)
            .filter(|a| a.base_path.starts_with(&album.base_path) && a.base_path != album.base_path)
            .map(|a| a.base_path)
            .collect();
        Ok(roots)
    }
}
