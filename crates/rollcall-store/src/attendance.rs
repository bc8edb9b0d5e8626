//! Attendance log: a Name/Time/Date table persisted as CSV.
//!
//! Each new row rewrites the whole table into a sibling temporary file that
//! is synced and renamed over the log, so an interrupted write leaves the
//! previous table intact. Deduplication is per session only: the caller's
//! [`MarkedSet`] is consulted, never the persisted rows.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("attendance file not found: {0}")]
    NotFound(String),
    #[error("attendance I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("attendance file is malformed: {0}")]
    Csv(#[from] csv::Error),
}

/// One attendance row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    #[serde(rename = "Name")]
    pub name: String,
    /// `HH:MM:SS`
    #[serde(rename = "Time")]
    pub time: String,
    /// `YYYY-MM-DD`
    #[serde(rename = "Date")]
    pub date: String,
}

impl AttendanceRecord {
    pub fn new(name: &str, at: NaiveDateTime) -> Self {
        Self {
            name: name.to_string(),
            time: at.format("%H:%M:%S").to_string(),
            date: at.format("%Y-%m-%d").to_string(),
        }
    }
}

/// Names already logged during the current session.
#[derive(Debug, Default)]
pub struct MarkedSet {
    names: HashSet<String>,
}

impl MarkedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Returns false if the name was already present.
    pub fn insert(&mut self, name: &str) -> bool {
        self.names.insert(name.to_string())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Handle to the attendance CSV file.
pub struct AttendanceLog {
    path: PathBuf,
}

impl AttendanceLog {
    /// The file itself is created on the first marked row.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AttendanceError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a row for `name` unless it was already marked this session.
    ///
    /// The name is recorded in `marked` before the write, so a failed write
    /// is not retried by a later match in the same session.
    pub fn mark_if_new(
        &self,
        marked: &mut MarkedSet,
        name: &str,
        at: NaiveDateTime,
    ) -> Result<Option<AttendanceRecord>, AttendanceError> {
        if !marked.insert(name) {
            return Ok(None);
        }

        let record = AttendanceRecord::new(name, at);
        let mut records = match self.load_all() {
            Ok(records) => records,
            Err(AttendanceError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        records.push(record.clone());
        self.write_all(&records)?;

        tracing::info!(
            name,
            time = %record.time,
            date = %record.date,
            rows = records.len(),
            "attendance marked"
        );
        Ok(Some(record))
    }

    /// [`mark_if_new`](Self::mark_if_new) stamped with the local wall clock.
    pub fn mark_if_new_now(
        &self,
        marked: &mut MarkedSet,
        name: &str,
    ) -> Result<Option<AttendanceRecord>, AttendanceError> {
        self.mark_if_new(marked, name, chrono::Local::now().naive_local())
    }

    /// The full persisted table.
    pub fn load_all(&self) -> Result<Vec<AttendanceRecord>, AttendanceError> {
        if !self.path.exists() {
            return Err(AttendanceError::NotFound(self.path.display().to_string()));
        }
        let mut reader = csv::Reader::from_path(&self.path)?;
        let mut records = Vec::new();
        for row in reader.deserialize() {
            records.push(row?);
        }
        Ok(records)
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attendance.csv".to_string());
        self.path.with_file_name(format!(".{name}.tmp"))
    }

    fn write_all(&self, records: &[AttendanceRecord]) -> Result<(), AttendanceError> {
        let tmp = self.temp_path();
        let file = File::create(&tmp)?;
        {
            let mut writer = csv::Writer::from_writer(&file);
            for record in records {
                writer.serialize(record)?;
            }
            writer.flush()?;
        }
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
