//! Delimited text file source
//!
//! Settings:
//!
//! | key           | default | meaning                                 |
//! |---------------|---------|-----------------------------------------|
//! | `file_path`   |         | file to read (required)                 |
//! | `delimiter`   | `,`     | single-byte field separator             |
//! | `has_headers` | `true`  | first line names the columns            |
//!
//! Record ids are physical line numbers, so with headers the first data
//! row is `"2"`. The resume offset counts data rows, malformed ones
//! included.

use ::csv::{ErrorKind, ReaderBuilder, StringRecord, StringRecordsIntoIter};
use async_trait::async_trait;
use serde_json::Value;
use std::fs::File;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{RecordStream, Source, cancellable_stream, not_configured};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::metrics::{SourceMetrics, SourceMetricsRecorder};
use crate::record::{Fields, Record, ValidationOutcome};

const KIND: &str = "csv";

#[derive(Debug, Clone)]
struct CsvSettings {
    file_path: PathBuf,
    delimiter: u8,
    has_headers: bool,
}

impl CsvSettings {
    fn from_settings(settings: &Settings) -> Result<Self> {
        let file_path = PathBuf::from(settings.require_string(KIND, "file_path")?);

        let delimiter = match settings.string(KIND, "delimiter")? {
            None => b',',
            Some(d) if d == "\\t" || d == "tab" => b'\t',
            Some(d) if d.len() == 1 => d.as_bytes()[0],
            Some(d) => {
                return Err(Error::configuration(
                    KIND,
                    format!("delimiter must be a single byte, got '{d}'"),
                ));
            }
        };

        Ok(Self {
            file_path,
            delimiter,
            has_headers: settings.bool(KIND, "has_headers")?.unwrap_or(true),
        })
    }

    fn reader(&self) -> Result<::csv::Reader<File>> {
        let file = File::open(&self.file_path).map_err(|e| {
            Error::configuration(
                KIND,
                format!("cannot open {}: {e}", self.file_path.display()),
            )
        })?;
        Ok(ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(self.has_headers)
            .from_reader(file))
    }
}

/// Reads records from a delimited text file
#[derive(Debug, Default)]
pub struct CsvSource {
    settings: Option<Settings>,
    config: Option<CsvSettings>,
    consumed: bool,
    stop: Option<CancellationToken>,
    metrics: SourceMetricsRecorder,
}

impl CsvSource {
    /// An unconfigured source
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Source for CsvSource {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn initialize(&mut self, settings: &Settings) -> Result<()> {
        self.settings = Some(settings.clone());
        let config = CsvSettings::from_settings(settings)?;
        // opening the file is the reachability check
        config.reader()?;
        info!(file = %config.file_path.display(), "csv source ready");
        self.config = Some(config);
        self.metrics.start();
        Ok(())
    }

    fn validate(&self) -> ValidationOutcome {
        let Some(settings) = &self.settings else {
            return not_configured(KIND);
        };
        let config = match CsvSettings::from_settings(settings) {
            Ok(config) => config,
            Err(e) => return ValidationOutcome::failure([e.to_string()]),
        };

        let mut outcome = ValidationOutcome::success();
        let path = config.file_path.as_path();
        if !path.is_file() {
            outcome.add_error(format!("file not found: {}", path.display()));
        } else if std::fs::metadata(path).is_ok_and(|m| m.len() == 0) {
            outcome.add_warning(format!("file is empty: {}", path.display()));
        }
        outcome
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

        let mut reader = config.reader()?;
        let headers = if config.has_headers {
            Some(reader.headers()?.clone())
        } else {
            None
        };
        self.metrics.record_bytes(reader.position().byte());

        self.consumed = true;
        let stop = cancel.child_token();
        self.stop = Some(stop.clone());

        debug!(offset, "csv stream opened");
        let rows = CsvRows {
            records: reader.into_records(),
            headers,
            source_file: config.file_path.display().to_string(),
            skip: offset,
            last_byte: 0,
            done: false,
            metrics: self.metrics.clone(),
        };
        Ok(cancellable_stream(rows, stop))
    }

    async fn estimated_count(&self) -> Option<u64> {
        let config = self.config.clone()?;
        tokio::task::spawn_blocking(move || count_rows(&config))
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
            debug!("csv source closed");
        }
        Ok(())
    }
}

fn count_rows(config: &CsvSettings) -> Option<u64> {
    let mut reader = config.reader().ok()?;
    let mut record = StringRecord::new();
    let mut count = 0;
    loop {
        match reader.read_record(&mut record) {
            Ok(true) => count += 1,
            Ok(false) => return Some(count),
            Err(e) if matches!(e.kind(), ErrorKind::Io(_)) => return None,
            Err(_) => count += 1,
        }
    }
}

struct CsvRows {
    records: StringRecordsIntoIter<File>,
    headers: Option<StringRecord>,
    source_file: String,
    skip: u64,
    last_byte: u64,
    done: bool,
    metrics: SourceMetricsRecorder,
}

impl CsvRows {
    fn consumed_bytes(&mut self) -> u64 {
        let byte = self.records.reader().position().byte();
        let consumed = byte.saturating_sub(self.last_byte);
        self.last_byte = byte;
        consumed
    }

    fn to_record(&self, row: &StringRecord) -> Record {
        let line = row.position().map_or(0, |p| p.line());
        let fields: Fields = row
            .iter()
            .enumerate()
            .map(|(i, value)| {
                let name = self
                    .headers
                    .as_ref()
                    .and_then(|h| h.get(i))
                    .map_or_else(|| format!("column_{}", i + 1), str::to_string);
                (name, Value::String(value.to_string()))
            })
            .collect();

        Record::new(line.to_string(), fields)
            .with_metadata("line_number", line)
            .with_metadata("source_file", self.source_file.clone())
    }
}

impl Iterator for CsvRows {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.last_byte == 0 {
            self.last_byte = self.records.reader().position().byte();
        }
        while !self.done {
            let item = self.records.next()?;
            let bytes = self.consumed_bytes();

            if let Err(e) = &item {
                if matches!(e.kind(), ErrorKind::Io(_)) {
                    self.done = true;
                }
            }

            if self.skip > 0 {
                self.skip -= 1;
                self.metrics.record_bytes(bytes);
                continue;
            }

            self.metrics.record_read(bytes);
            return Some(match item {
                Ok(row) => Ok(self.to_record(&row)),
                Err(e) => Err(e.into()),
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::io::Write;
    use std::path::Path;

    fn write_csv(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    async fn source_for(path: &Path) -> CsvSource {
        let mut source = CsvSource::new();
        source
            .initialize(&Settings::new().with("file_path", path.display().to_string()))
            .await
            .unwrap();
        source
    }

    async fn collect(stream: RecordStream) -> Vec<Result<Record>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_reads_rows_with_line_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "in.csv", "name,age\nAlice,30\nBob,25\n");
        let mut source = source_for(&path).await;

        let rows = collect(source.read(0, CancellationToken::new()).await.unwrap()).await;
        let records: Vec<Record> = rows.into_iter().map(|r| r.unwrap()).collect();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "2");
        assert_eq!(records[0].text("name").as_deref(), Some("Alice"));
        assert_eq!(records[1].id, "3");
        assert_eq!(records[1].metadata["line_number"], 3);
        let m = source.metrics();
        assert_eq!(m.records_read, 2);
        assert_eq!(m.bytes_read, std::fs::metadata(&path).unwrap().len());
    }

    #[tokio::test]
    async fn test_offset_skips_logical_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut contents = String::from("id\n");
        for i in 0..10 {
            contents.push_str(&format!("{i}\n"));
        }
        let path = write_csv(&dir, "in.csv", &contents);
        let mut source = source_for(&path).await;

        let rows = collect(source.read(7, CancellationToken::new()).await.unwrap()).await;
        let ids: Vec<String> = rows.into_iter().map(|r| r.unwrap().text("id").unwrap()).collect();
        assert_eq!(ids, vec!["7", "8", "9"]);
        assert_eq!(source.metrics().records_read, 3);
    }

    #[tokio::test]
    async fn test_read_is_single_pass() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "in.csv", "a\n1\n");
        let mut source = source_for(&path).await;
        let _stream = source.read(0, CancellationToken::new()).await.unwrap();
        let err = source.read(0, CancellationToken::new()).await.err().unwrap();
        assert!(matches!(err, Error::StreamConsumed { .. }));
    }

    #[tokio::test]
    async fn test_cancellation_ends_stream_quietly() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "in.csv", "a\n1\n2\n3\n");
        let mut source = source_for(&path).await;
        let cancel = CancellationToken::new();
        let mut stream = source.read(0, cancel.clone()).await.unwrap();

        assert!(stream.next().await.is_some());
        cancel.cancel();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_stops_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "in.csv", "a\n1\n2\n");
        let mut source = source_for(&path).await;
        let mut stream = source.read(0, CancellationToken::new()).await.unwrap();
        source.close().await.unwrap();
        source.close().await.unwrap();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_row_is_an_item_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "in.csv", "a,b\n1,2\n3\n4,5\n");
        let mut source = source_for(&path).await;
        let rows = collect(source.read(0, CancellationToken::new()).await.unwrap()).await;
        assert_eq!(rows.len(), 3);
        assert!(rows[0].is_ok());
        assert!(matches!(rows[1], Err(Error::Csv(_))));
        assert_eq!(rows[2].as_ref().unwrap().id, "4");
    }

    #[tokio::test]
    async fn test_custom_delimiter_without_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "in.csv", "x;y\n");
        let mut source = CsvSource::new();
        source
            .initialize(
                &Settings::new()
                    .with("FilePath", path.display().to_string())
                    .with("Delimiter", ";")
                    .with("has_headers", false),
            )
            .await
            .unwrap();
        let rows = collect(source.read(0, CancellationToken::new()).await.unwrap()).await;
        let record = rows.into_iter().next().unwrap().unwrap();
        assert_eq!(record.id, "1");
        assert_eq!(record.text("column_2").as_deref(), Some("y"));
    }

    #[tokio::test]
    async fn test_estimated_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "in.csv", "a\n1\n2\n3\n");
        let source = source_for(&path).await;
        assert_eq!(source.estimated_count().await, Some(3));
        assert_eq!(CsvSource::new().estimated_count().await, None);
    }

    #[tokio::test]
    async fn test_initialize_errors() {
        let mut source = CsvSource::new();
        let err = source.initialize(&Settings::new()).await.unwrap_err();
        assert!(err.is_configuration());

        let err = source
            .initialize(&Settings::new().with("file_path", "/no/such/file.csv"))
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        // settings were kept, so validate can explain the problem
        let outcome = source.validate();
        assert!(!outcome.valid);
        assert!(outcome.errors[0].contains("file not found"));
    }

    #[tokio::test]
    async fn test_validate_before_initialize() {
        assert!(!CsvSource::new().validate().valid);
    }

    #[tokio::test]
    async fn test_read_before_initialize() {
        let err = CsvSource::new()
            .read(0, CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::NotInitialized { .. }));
    }
}
