//! In-memory destination
//!
//! Keeps accepted records in a shared buffer that outlives the destination,
//! and can be told to reject chosen record ids. Handy for local dry
//! experiments and for exercising the pipeline without a network.
//!
//! Settings:
//!
//! | key           | default | meaning                                  |
//! |---------------|---------|------------------------------------------|
//! | `fail_ids`    | `[]`    | record ids to reject                     |
//! | `fail_status` | `500`   | status reported for rejected records     |
//! | `latency_ms`  | `0`     | simulated per-write latency              |

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

use super::Destination;
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::metrics::{DestinationMetrics, DestinationMetricsRecorder};
use crate::record::{Record, ValidationOutcome, WriteOutcome};

const KIND: &str = "memory";

/// Shared view of what a [`MemoryDestination`] accepted
#[derive(Debug, Clone, Default)]
pub struct MemoryHandle {
    records: Arc<Mutex<Vec<Record>>>,
}

impl MemoryHandle {
    /// Accepted records in write completion order
    pub fn records(&self) -> Vec<Record> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of accepted records
    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing was accepted
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, record: Record) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}

/// Destination that stores records in memory
#[derive(Debug)]
pub struct MemoryDestination {
    handle: MemoryHandle,
    initialized: bool,
    fail_ids: HashSet<String>,
    fail_status: u16,
    latency: Duration,
    metrics: DestinationMetricsRecorder,
}

impl Default for MemoryDestination {
    fn default() -> Self {
        Self {
            handle: MemoryHandle::default(),
            initialized: false,
            fail_ids: HashSet::new(),
            fail_status: 500,
            latency: Duration::ZERO,
            metrics: DestinationMetricsRecorder::default(),
        }
    }
}

impl MemoryDestination {
    /// An empty destination
    pub fn new() -> Self {
        Self::default()
    }

    /// A destination writing into an existing buffer
    pub fn with_handle(handle: MemoryHandle) -> Self {
        Self {
            handle,
            ..Self::new()
        }
    }

    /// Shared view of the accepted records
    pub fn handle(&self) -> MemoryHandle {
        self.handle.clone()
    }

    /// Reject the given record ids
    pub fn fail_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fail_ids.extend(ids.into_iter().map(Into::into));
        self
    }
}

#[async_trait]
impl Destination for MemoryDestination {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn initialize(&mut self, settings: &Settings) -> Result<()> {
        if let Some(ids) = settings.get::<Vec<serde_json::Value>>(KIND, "fail_ids")? {
            self.fail_ids
                .extend(ids.iter().map(crate::record::value_as_text));
        }
        if let Some(status) = settings.u64(KIND, "fail_status")? {
            self.fail_status = u16::try_from(status)
                .map_err(|_| Error::configuration(KIND, "fail_status is not a status code"))?;
        }
        self.latency = Duration::from_millis(settings.u64(KIND, "latency_ms")?.unwrap_or(0));
        self.initialized = true;
        self.metrics.start();
        Ok(())
    }

    fn validate(&self) -> ValidationOutcome {
        ValidationOutcome::success()
    }

    async fn write_one(&self, record: &Record) -> Result<WriteOutcome> {
        if !self.initialized {
            return Err(Error::NotInitialized {
                component: KIND.to_string(),
            });
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let elapsed = self.latency.as_millis() as u64;
        let rejected = self.fail_ids.contains(&record.id);
        self.metrics
            .record_status(if rejected { self.fail_status } else { 200 });

        if rejected {
            debug!(record_id = %record.id, "rejecting scripted failure");
            self.metrics.record_response(elapsed, false);
            return Ok(WriteOutcome::failure(
                record.id.clone(),
                format!("HTTP {}", self.fail_status),
                Some(self.fail_status),
                elapsed,
            ));
        }

        self.handle.push(record.clone());
        self.metrics.record_response(elapsed, true);
        Ok(WriteOutcome::success(record.id.clone(), elapsed).with_status(200))
    }

    fn metrics(&self) -> DestinationMetrics {
        self.metrics.snapshot()
    }

    async fn close(&mut self) -> Result<()> {
        self.initialized = false;
        Ok(())
    }
}
