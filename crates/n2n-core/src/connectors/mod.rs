//! Source and destination contracts and their implementations
//!
//! A [`Source`] produces a lazy, single-pass stream of records. A
//! [`Destination`] accepts records one at a time or in batches and reports
//! per-record outcomes; recoverable delivery problems never surface as
//! `Err`.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::error::Result;
use crate::metrics::{DestinationMetrics, SourceMetrics};
use crate::record::{BatchOutcome, Record, ValidationOutcome, WriteOutcome};

pub mod csv;
pub mod file;
pub mod http;
pub mod jsonl;
pub mod memory;

pub use self::csv::CsvSource;
pub use self::file::FileDestination;
pub use self::http::{ApiDestination, PayloadBuilder, ReqwestTransport};
pub use self::jsonl::JsonlSource;
pub use self::memory::{MemoryDestination, MemoryHandle};

/// Records yielded by a source; an `Err` item is a single bad record
pub type RecordStream = BoxStream<'static, Result<Record>>;

/// Trait for record sources
#[async_trait]
pub trait Source: Send + Sync {
    /// Registered type name
    fn kind(&self) -> &'static str;

    /// Read settings and check the backing resource is reachable
    async fn initialize(&mut self, settings: &Settings) -> Result<()>;

    /// Pre-flight check of the configured settings, free of side effects
    fn validate(&self) -> ValidationOutcome;

    /// Open the single-pass record stream, skipping the first `offset`
    /// logical records. The stream ends early once `cancel` fires.
    async fn read(&mut self, offset: u64, cancel: CancellationToken) -> Result<RecordStream>;

    /// Best-effort total number of records, `None` when unknown
    async fn estimated_count(&self) -> Option<u64>;

    /// Point-in-time metrics snapshot
    fn metrics(&self) -> SourceMetrics;

    /// Release handles; safe to call more than once
    async fn close(&mut self) -> Result<()>;
}

/// Trait for record destinations
#[async_trait]
pub trait Destination: Send + Sync {
    /// Registered type name
    fn kind(&self) -> &'static str;

    /// Read settings and prepare clients or handles
    async fn initialize(&mut self, settings: &Settings) -> Result<()>;

    /// Pre-flight check of the configured settings, free of side effects
    fn validate(&self) -> ValidationOutcome;

    /// Write one record. Delivery failures are reported in the outcome;
    /// `Err` means the destination was misused.
    async fn write_one(&self, record: &Record) -> Result<WriteOutcome>;

    /// Cap on concurrent `write_one` calls within a batch, `None` for the
    /// whole batch at once
    fn max_concurrency(&self) -> Option<usize> {
        None
    }

    /// Write a batch. Outcomes are returned in batch order.
    async fn write_batch(&self, records: &[Record]) -> Result<BatchOutcome> {
        let started = Instant::now();
        let limit = self
            .max_concurrency()
            .unwrap_or(records.len())
            .max(1);

        let pending: Vec<_> = records.iter().map(|record| self.write_one(record)).collect();
        let outcomes: Vec<WriteOutcome> = stream::iter(pending)
            .buffered(limit)
            .try_collect()
            .await?;

        Ok(BatchOutcome::from_outcomes(
            outcomes,
            started.elapsed().as_millis() as u64,
        ))
    }

    /// Point-in-time metrics snapshot
    fn metrics(&self) -> DestinationMetrics;

    /// Flush and release handles; safe to call more than once
    async fn close(&mut self) -> Result<()>;
}

/// Wrap a blocking row iterator so it stops as soon as `stop` fires
pub(crate) fn cancellable_stream<I>(mut rows: I, stop: CancellationToken) -> RecordStream
where
    I: Iterator<Item = Result<Record>> + Send + 'static,
{
    let guarded = std::iter::from_fn(move || {
        if stop.is_cancelled() {
            None
        } else {
            rows.next()
        }
    });
    stream::iter(guarded).boxed()
}

/// Validation outcome for a component whose `initialize` never ran
pub(crate) fn not_configured(kind: &str) -> ValidationOutcome {
    ValidationOutcome::failure([format!("{kind} has not been configured")])
}
