//! Metadata store writer: one typed tag per (file, key).

use chrono::NaiveDateTime;
use rusqlite::{params, OptionalExtension, Row};

use super::{format_ts, now_ts, text_column, ts_column, Database};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaType {
    Int,
    Float,
    String,
    DateTime,
    Location,
}

impl MetaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetaType::Int => "int",
            MetaType::Float => "float",
            MetaType::String => "string",
            MetaType::DateTime => "datetime",
            MetaType::Location => "location",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "int" => Some(MetaType::Int),
            "float" => Some(MetaType::Float),
            "string" => Some(MetaType::String),
            "datetime" => Some(MetaType::DateTime),
            "location" => Some(MetaType::Location),
            _ => None,
        }
    }
}

/// A tag value. The variant decides which column group is populated.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Int(i64),
    Float(f64),
    String(String),
    DateTime(NaiveDateTime),
    Location { latitude: f64, longitude: f64 },
}

impl MetaValue {
    pub fn meta_type(&self) -> MetaType {
        match self {
            MetaValue::Int(_) => MetaType::Int,
            MetaValue::Float(_) => MetaType::Float,
            MetaValue::String(_) => MetaType::String,
            MetaValue::DateTime(_) => MetaType::DateTime,
            MetaValue::Location { .. } => MetaType::Location,
        }
    }
}

/// A stored tag row, with every value column as read back.
#[derive(Debug, Clone, PartialEq)]
pub struct FileMeta {
    pub file_id: String,
    pub key: String,
    pub meta_type: MetaType,
    pub int_value: Option<i64>,
    pub float_value: Option<f64>,
    pub string_value: Option<String>,
    pub date_value: Option<NaiveDateTime>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl FileMeta {
    /// The typed value, if the populated columns match the declared type.
    pub fn value(&self) -> Option<MetaValue> {
        match self.meta_type {
            MetaType::Int => self.int_value.map(MetaValue::Int),
            MetaType::Float => self.float_value.map(MetaValue::Float),
            MetaType::String => self.string_value.clone().map(MetaValue::String),
            MetaType::DateTime => self.date_value.map(MetaValue::DateTime),
            MetaType::Location => match (self.latitude, self.longitude) {
                (Some(latitude), Some(longitude)) => Some(MetaValue::Location { latitude, longitude }),
                _ => None,
            },
        }
    }
}

const META_COLUMNS: &str = "file_id, meta_key, meta_type, int_value, float_value, \
     string_value, date_value, latitude, longitude";

fn meta_from_row(row: &Row<'_>) -> rusqlite::Result<FileMeta> {
    Ok(FileMeta {
        file_id: row.get(0)?,
        key: row.get(1)?,
        meta_type: text_column(2, row.get(2)?, MetaType::from_str)?,
        int_value: row.get(3)?,
        float_value: row.get(4)?,
        string_value: row.get(5)?,
        date_value: ts_column(6, row.get(6)?)?,
        latitude: row.get(7)?,
        longitude: row.get(8)?,
    })
}

impl Database {
    /// Insert or overwrite the tag `key` of a file.
    ///
    /// Every value column is written on each call, so columns that do not
    /// belong to the new type end up NULL even when the tag changed type.
    pub fn upsert_meta(&self, file_id: &str, key: &str, value: &MetaValue) -> Result<()> {
        let mut int_value = None;
        let mut float_value = None;
        let mut string_value = None;
        let mut date_value = None;
        let mut latitude = None;
        let mut longitude = None;

        match value {
            MetaValue::Int(v) => int_value = Some(*v),
            MetaValue::Float(v) => float_value = Some(*v),
            MetaValue::String(v) => string_value = Some(v.as_str()),
            MetaValue::DateTime(v) => date_value = Some(format_ts(v)),
            MetaValue::Location {
                latitude: lat,
                longitude: lon,
            } => {
                latitude = Some(*lat);
                longitude = Some(*lon);
            }
        }

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO file_meta (
                file_id, meta_key, meta_type, int_value, float_value,
                string_value, date_value, latitude, longitude, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(file_id, meta_key) DO UPDATE SET
                meta_type = excluded.meta_type,
                int_value = excluded.int_value,
                float_value = excluded.float_value,
                string_value = excluded.string_value,
                date_value = excluded.date_value,
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                updated_at = excluded.updated_at
            "#,
            params![
                file_id,
                key,
                value.meta_type().as_str(),
                int_value,
                float_value,
                string_value,
                date_value,
                latitude,
                longitude,
                format_ts(&now_ts()),
            ],
        )?;
        Ok(())
    }

    pub fn get_meta(&self, file_id: &str, key: &str) -> Result<Option<FileMeta>> {
        let conn = self.conn()?;
        let meta = conn
            .query_row(
                &format!("SELECT {META_COLUMNS} FROM file_meta WHERE file_id = ? AND meta_key = ?"),
                params![file_id, key],
                meta_from_row,
            )
            .optional()?;
        Ok(meta)
    }

    pub fn list_meta(&self, file_id: &str) -> Result<Vec<FileMeta>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {META_COLUMNS} FROM file_meta WHERE file_id = ? ORDER BY meta_key"
        ))?;
        let rows = stmt
            .query_map([file_id], meta_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn clear_meta(&self, file_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        Ok(conn.execute("DELETE FROM file_meta WHERE file_id = ?", [file_id])?)
    }
}
