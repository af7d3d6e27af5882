//! Table of broker files already converted, so the worker only picks up new
//! or modified exports.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::database::{read_database, resolve_database_path, write_database};

const TABLE: &str = "trade_files";

/// A file counts as modified when its mtime moved past the stored one by
/// more than this many seconds (stored times are truncated to seconds).
const MTIME_TOLERANCE_SECS: i64 = 1;

mod timestamp {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedFile {
    pub file_name: String,
    #[serde(with = "timestamp")]
    pub last_modified: NaiveDateTime,
    pub status: FileStatus,
    #[serde(with = "timestamp")]
    pub processed_at: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Statistics about a batch of tracking updates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackingStats {
    pub inserted: usize,
    pub updated: usize,
    pub total: usize,
}

/// Session over the tracking table. Changes stay in memory until `save`.
#[derive(Debug)]
pub struct FileTracker {
    path: PathBuf,
    rows: Vec<TrackedFile>,
}

impl FileTracker {
    pub fn open<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let path = resolve_database_path(database_path);
        let db = read_database(&path)?;
        let rows = match db.get(TABLE) {
            Some(table) => serde_json::from_value(table.clone())
                .with_context(|| format!("Malformed '{}' table in {:?}", TABLE, path))?,
            None => Vec::new(),
        };
        Ok(Self { path, rows })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> &[TrackedFile] {
        &self.rows
    }

    pub fn get(&self, file_name: &str) -> Option<&TrackedFile> {
        self.rows.iter().find(|r| r.file_name == file_name)
    }

    pub fn last_modified(&self, file_name: &str) -> Option<NaiveDateTime> {
        self.get(file_name).map(|r| r.last_modified)
    }

    /// True when the file was never converted or changed since it was.
    pub fn is_newer(&self, file_name: &str, modified: NaiveDateTime) -> bool {
        match self.last_modified(file_name) {
            None => true,
            Some(last) => modified - last > chrono::Duration::seconds(MTIME_TOLERANCE_SECS),
        }
    }

    /// Inserts the row, or replaces the existing row with the same file name.
    pub fn record(&mut self, row: TrackedFile) -> TrackingStats {
        let mut stats = TrackingStats {
            total: 1,
            ..Default::default()
        };
        match self.rows.iter_mut().find(|r| r.file_name == row.file_name) {
            Some(existing) => {
                *existing = row;
                stats.updated += 1;
            }
            None => {
                self.rows.push(row);
                stats.inserted += 1;
            }
        }
        stats
    }

    /// Drops the row so the file is converted again on the next cycle.
    pub fn forget(&mut self, file_name: &str) -> bool {
        let before = self.rows.len();
        self.rows.retain(|r| r.file_name != file_name);
        self.rows.len() != before
    }

    pub fn record_all(&mut self, rows: Vec<TrackedFile>) -> TrackingStats {
        let mut stats = TrackingStats::default();
        for row in rows {
            let one = self.record(row);
            stats.inserted += one.inserted;
            stats.updated += one.updated;
            stats.total += one.total;
        }
        stats
    }

    /// Writes the table back, keeping any other top-level keys in the file.
    pub fn save(&self) -> Result<PathBuf> {
        let mut db = read_database(&self.path)?;
        let obj = db
            .as_object_mut()
            .ok_or_else(|| anyhow!("Tracking database {:?} is not a JSON object", self.path))?;
        obj.insert(TABLE.to_string(), serde_json::to_value(&self.rows)?);
        let written = write_database(&self.path, &db)?;
        tracing::debug!(path = %written.display(), rows = self.rows.len(), "saved tracking table");
        Ok(written)
    }
}

/// Local modification time of a file, as stored in the tracking table.
pub fn modified_time(path: &Path) -> Result<NaiveDateTime> {
    let meta = std::fs::metadata(path)
        .with_context(|| format!("Cannot stat {}", path.display()))?;
    let modified = meta
        .modified()
        .with_context(|| format!("No modification time for {}", path.display()))?;
    Ok(DateTime::<Local>::from(modified).naive_local())
}
