mod schema;
pub mod albums;
pub mod files;
pub mod lease;
pub mod meta;

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

use crate::error::{PipelineError, Result};

pub use albums::{Album, AlbumStatus};
pub use files::{FileRecord, FileStatus, FsStat, MetadataStatus, NewFile, ThumbnailStatus};
pub use lease::RunLease;
pub use meta::{FileMeta, MetaType, MetaValue};
pub use schema::SCHEMA;

/// Text layout of every stored timestamp. Fixed width so that
/// lexical comparison in SQL matches chronological order.
const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

pub fn format_ts(dt: &NaiveDateTime) -> String {
    dt.format(TS_FORMAT).to_string()
}

pub fn parse_ts(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

/// Current UTC time at stored precision.
pub fn now_ts() -> NaiveDateTime {
    Utc::now().naive_utc().trunc_subsecs(3)
}

/// Convert a filesystem timestamp to stored precision.
pub fn system_time_to_ts(time: SystemTime) -> NaiveDateTime {
    let dt: DateTime<Utc> = time.into();
    dt.naive_utc().trunc_subsecs(3)
}

/// Map a text column through `parse`, reporting unknown values as conversion errors.
pub(crate) fn text_column<T>(
    idx: usize,
    value: String,
    parse: impl Fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    parse(&value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unexpected value {value:?}").into(),
        )
    })
}

pub(crate) fn ts_column(idx: usize, value: Option<String>) -> rusqlite::Result<Option<NaiveDateTime>> {
    value.map(|v| text_column(idx, v, parse_ts)).transpose()
}

/// SQLite-backed repository for albums, files and metadata.
///
/// The connection is shared by the worker pool; every statement takes the
/// lock for its own duration only.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn initialize(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PipelineError::Worker("database lock poisoned".to_string()))
    }
}

#[cfg(test)]
pub(crate) fn test_db() -> Database {
    let db = Database::open_in_memory().unwrap();
    db.initialize().unwrap();
    db
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_timestamp_round_trip_is_lexically_ordered() {
        let a = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_milli_opt(0, 0, 0, 0)
            .unwrap();
        let b = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_milli_opt(0, 0, 0, 500)
            .unwrap();

        assert_eq!(format_ts(&a), "2024-01-01T00:00:00.000");
        assert!(format_ts(&a) < format_ts(&b));
        assert_eq!(parse_ts(&format_ts(&b)), Some(b));
    }
}
