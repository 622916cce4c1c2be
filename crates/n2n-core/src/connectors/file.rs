//! JSON lines file destination
//!
//! Appends each record's fields as one JSON line. Batches are written
//! under a single lock with one flush.

use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{Destination, not_configured};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::metrics::{DestinationMetrics, DestinationMetricsRecorder};
use crate::record::{BatchOutcome, Record, ValidationOutcome, WriteOutcome};

const KIND: &str = "file";

fn output_path(settings: &Settings) -> Result<PathBuf> {
    let path = match settings.string(KIND, "path")? {
        Some(path) => path,
        None => settings.require_string(KIND, "file_path")?,
    };
    Ok(PathBuf::from(path))
}

/// Writes records to a JSON lines file
#[derive(Debug, Default)]
pub struct FileDestination {
    settings: Option<Settings>,
    writer: Mutex<Option<BufWriter<File>>>,
    metrics: DestinationMetricsRecorder,
}

impl FileDestination {
    /// An unconfigured destination
    pub fn new() -> Self {
        Self::default()
    }
}

fn write_line(writer: &mut BufWriter<File>, record: &Record) -> std::io::Result<u64> {
    let line = serde_json::to_string(&record.fields)?;
    writeln!(writer, "{line}")?;
    Ok(line.len() as u64 + 1)
}

#[async_trait]
impl Destination for FileDestination {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn initialize(&mut self, settings: &Settings) -> Result<()> {
        self.settings = Some(settings.clone());
        let path = output_path(settings)?;
        let append = settings.bool(KIND, "append")?.unwrap_or(true);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&path)
            .map_err(|e| Error::configuration(KIND, format!("cannot open {}: {e}", path.display())))?;

        *self.writer.get_mut() = Some(BufWriter::new(file));
        self.metrics.start();
        info!(file = %path.display(), append, "file destination ready");
        Ok(())
    }

    fn validate(&self) -> ValidationOutcome {
        match &self.settings {
            None => not_configured(KIND),
            Some(settings) => match output_path(settings) {
                Ok(_) => ValidationOutcome::success(),
                Err(e) => ValidationOutcome::failure([e.to_string()]),
            },
        }
    }

    async fn write_one(&self, record: &Record) -> Result<WriteOutcome> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| Error::NotInitialized {
            component: KIND.to_string(),
        })?;

        let started = Instant::now();
        let result = write_line(writer, record).and_then(|bytes| writer.flush().map(|_| bytes));
        let elapsed = started.elapsed().as_millis() as u64;

        Ok(match result {
            Ok(bytes) => {
                self.metrics.record_bytes(bytes);
                self.metrics.record_response(elapsed, true);
                WriteOutcome::success(record.id.clone(), elapsed)
            }
            Err(e) => {
                self.metrics.record_response(elapsed, false);
                WriteOutcome::failure(record.id.clone(), e.to_string(), None, elapsed)
            }
        })
    }

    async fn write_batch(&self, records: &[Record]) -> Result<BatchOutcome> {
        let started = Instant::now();
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| Error::NotInitialized {
            component: KIND.to_string(),
        })?;

        let mut batch = BatchOutcome::default();
        let mut failure: Option<String> = None;
        for record in records {
            let record_started = Instant::now();
            let result = match &failure {
                Some(message) => Err(message.clone()),
                None => write_line(writer, record).map_err(|e| e.to_string()),
            };
            let elapsed = record_started.elapsed().as_millis() as u64;
            match result {
                Ok(bytes) => {
                    self.metrics.record_bytes(bytes);
                    batch.push(WriteOutcome::success(record.id.clone(), elapsed));
                }
                Err(message) => {
                    failure.get_or_insert_with(|| message.clone());
                    batch.push(WriteOutcome::failure(record.id.clone(), message, None, elapsed));
                }
            }
        }

        if let Err(e) = writer.flush() {
            let message = e.to_string();
            for outcome in batch.outcomes.iter_mut().filter(|o| o.success) {
                outcome.success = false;
                outcome.error_message = Some(message.clone());
            }
            batch = BatchOutcome::from_outcomes(std::mem::take(&mut batch.outcomes), 0);
        }

        for outcome in &batch.outcomes {
            self.metrics.record_response(outcome.elapsed_ms, outcome.success);
        }
        batch.elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(total = batch.total, errors = batch.error_count, "file batch written");
        Ok(batch)
    }

    fn metrics(&self) -> DestinationMetrics {
        self.metrics.snapshot()
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.get_mut().take() {
            writer.flush()?;
        }
        Ok(())
    }
}
