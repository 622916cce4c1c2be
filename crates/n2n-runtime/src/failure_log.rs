//! Per-execution log of records that did not make it
//!
//! One JSON object per line in `{log_dir}/{execution_id}_errors.jsonl`.
//! The file is created on the first entry. Problems writing it are logged
//! and otherwise ignored; they never stop a run.

use chrono::{DateTime, Utc};
use n2n_core::Fields;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Where in the pipeline a record was lost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// The source could not produce the record
    Source,
    /// Column validation rejected it
    Validation,
    /// A transform failed on it
    Transform,
    /// The destination did not accept it
    Destination,
}

/// One failure log line
#[derive(Debug, Clone, Serialize)]
pub struct FailureEntry<'a> {
    /// Record id, empty when the source could not tell
    pub record_id: &'a str,
    /// Where it failed
    pub stage: Stage,
    /// Destination status code, if any
    pub status_code: Option<u16>,
    /// What went wrong
    pub message: &'a str,
    /// Record fields at the time of failure
    pub fields: Option<&'a Fields>,
    /// When the line was written
    pub logged_at: DateTime<Utc>,
}

impl<'a> FailureEntry<'a> {
    /// A new entry stamped now
    pub fn new(record_id: &'a str, stage: Stage, message: &'a str) -> Self {
        Self {
            record_id,
            stage,
            status_code: None,
            message,
            fields: None,
            logged_at: Utc::now(),
        }
    }

    /// Attach the destination status code
    pub fn with_status(mut self, status_code: Option<u16>) -> Self {
        self.status_code = status_code;
        self
    }

    /// Attach the record fields
    pub fn with_fields(mut self, fields: &'a Fields) -> Self {
        self.fields = Some(fields);
        self
    }
}

/// Append-only failure log of one execution
#[derive(Debug)]
pub struct FailureLog {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    broken: bool,
    written: u64,
}

impl FailureLog {
    /// Path of the log for `execution_id` under `log_dir`
    pub fn path_for(log_dir: &Path, execution_id: &str) -> PathBuf {
        log_dir.join(format!("{execution_id}_errors.jsonl"))
    }

    /// A log that will append to [`FailureLog::path_for`]
    pub fn new(log_dir: &Path, execution_id: &str) -> Self {
        Self {
            path: Self::path_for(log_dir, execution_id),
            writer: None,
            broken: false,
            written: 0,
        }
    }

    /// Log file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    fn open(&mut self) -> std::io::Result<&mut BufWriter<File>> {
        if self.writer.is_none() {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.writer = Some(BufWriter::new(file));
        }
        self.writer
            .as_mut()
            .ok_or_else(|| std::io::Error::other("failure log is not open"))
    }

    /// Append one entry
    pub fn record(&mut self, entry: &FailureEntry<'_>) {
        if self.broken {
            return;
        }
        let result = serde_json::to_string(entry)
            .map_err(std::io::Error::from)
            .and_then(|line| {
                let writer = self.open()?;
                writeln!(writer, "{line}")
            });
        match result {
            Ok(()) => self.written += 1,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failure log disabled");
                self.broken = true;
            }
        }
    }

    /// Push buffered entries to disk
    pub fn flush(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.flush() {
                warn!(path = %self.path.display(), error = %e, "failed to flush failure log");
            }
        }
    }
}

impl Drop for FailureLog {
    fn drop(&mut self) {
        self.flush();
    }
}
