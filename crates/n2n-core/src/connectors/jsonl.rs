//! JSON lines file source
//!
//! Each non-blank line holds one JSON object. The record id is the value of
//! `id_field` when configured and present, otherwise the 1-based count of
//! non-blank lines. The resume offset counts non-blank lines. A line that
//! is not valid UTF-8 is reported as a bad record and reading goes on.

use async_trait::async_trait;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{RecordStream, Source, cancellable_stream, not_configured};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::metrics::{SourceMetrics, SourceMetricsRecorder};
use crate::record::{Record, ValidationOutcome, value_as_text};

const KIND: &str = "jsonl";

#[derive(Debug, Clone)]
struct JsonlSettings {
    file_path: PathBuf,
    id_field: Option<String>,
}

impl JsonlSettings {
    fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self {
            file_path: PathBuf::from(settings.require_string(KIND, "file_path")?),
            id_field: settings
                .string(KIND, "id_field")?
                .filter(|f| !f.trim().is_empty()),
        })
    }

    fn open(&self) -> Result<BufReader<File>> {
        let file = File::open(&self.file_path).map_err(|e| {
            Error::configuration(
                KIND,
                format!("cannot open {}: {e}", self.file_path.display()),
            )
        })?;
        Ok(BufReader::new(file))
    }
}

/// Reads records from a JSON lines file
#[derive(Debug, Default)]
pub struct JsonlSource {
    settings: Option<Settings>,
    config: Option<JsonlSettings>,
    consumed: bool,
    stop: Option<CancellationToken>,
    metrics: SourceMetricsRecorder,
}

impl JsonlSource {
    /// An unconfigured source
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Source for JsonlSource {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn initialize(&mut self, settings: &Settings) -> Result<()> {
        self.settings = Some(settings.clone());
        let config = JsonlSettings::from_settings(settings)?;
        config.open()?;
        info!(file = %config.file_path.display(), "jsonl source ready");
        self.config = Some(config);
        self.metrics.start();
        Ok(())
    }

    fn validate(&self) -> ValidationOutcome {
        let Some(settings) = &self.settings else {
            return not_configured(KIND);
        };
        match JsonlSettings::from_settings(settings) {
            Ok(config) if config.file_path.is_file() => ValidationOutcome::success(),
            Ok(config) => ValidationOutcome::failure([format!(
                "file not found: {}",
                config.file_path.display()
            )]),
            Err(e) => ValidationOutcome::failure([e.to_string()]),
        }
    }

    async fn read(&mut self, offset: u64, cancel: CancellationToken) -> Result<RecordStream> {
        if self.consumed {
            return Err(Error::StreamConsumed {
                component: KIND.to_string(),
            });
        }
        let config = self.config.as_ref().ok_or_else(|| Error::NotInitialized {
            component: KIND.to_string(),
        })?;

        let reader = config.open()?;
        self.consumed = true;
        let stop = cancel.child_token();
        self.stop = Some(stop.clone());

        debug!(offset, "jsonl stream opened");
        let rows = JsonlRows {
            reader,
            buf: Vec::new(),
            id_field: config.id_field.clone(),
            source_file: config.file_path.display().to_string(),
            skip: offset,
            logical: 0,
            done: false,
            metrics: self.metrics.clone(),
        };
        Ok(cancellable_stream(rows, stop))
    }

    async fn estimated_count(&self) -> Option<u64> {
        let config = self.config.clone()?;
        tokio::task::spawn_blocking(move || {
            let mut reader = config.open().ok()?;
            let mut buf = Vec::new();
            let mut count = 0;
            loop {
                buf.clear();
                if reader.read_until(b'\n', &mut buf).ok()? == 0 {
                    return Some(count);
                }
                if !buf.trim_ascii().is_empty() {
                    count += 1;
                }
            }
        })
        .await
        .ok()
        .flatten()
    }

    fn metrics(&self) -> SourceMetrics {
        self.metrics.snapshot()
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(stop) = self.stop.take() {
            stop.cancel();
        }
        Ok(())
    }
}

struct JsonlRows {
    reader: BufReader<File>,
    buf: Vec<u8>,
    id_field: Option<String>,
    source_file: String,
    skip: u64,
    logical: u64,
    done: bool,
    metrics: SourceMetricsRecorder,
}

impl JsonlRows {
    fn parse(&self, line: &str) -> Result<Record> {
        let fields = match serde_json::from_str::<Value>(line)? {
            Value::Object(fields) => fields,
            other => {
                return Err(Error::InvalidRecord(format!(
                    "line {} is not a JSON object: {other}",
                    self.logical
                )));
            }
        };
        let id = self
            .id_field
            .as_deref()
            .and_then(|f| fields.get(f))
            .map(value_as_text)
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| self.logical.to_string());

        Ok(Record::new(id, fields)
            .with_metadata("line_number", self.logical)
            .with_metadata("source_file", self.source_file.clone()))
    }
}

impl Iterator for JsonlRows {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.buf.clear();
            let bytes = match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(n) => n as u64,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            };
            if self.buf.trim_ascii().is_empty() {
                self.metrics.record_bytes(bytes);
                continue;
            }
            self.logical += 1;
            if self.skip > 0 {
                self.skip -= 1;
                self.metrics.record_bytes(bytes);
                continue;
            }
            self.metrics.record_read(bytes);
            return Some(match std::str::from_utf8(&self.buf) {
                Ok(line) => self.parse(line.trim()),
                Err(e) => Err(Error::InvalidRecord(format!(
                    "line {} is not valid UTF-8: {e}",
                    self.logical
                ))),
            });
        }
        None
    }
}
