//! Source and destination metrics
//!
//! Each component owns a recorder and hands out point-in-time snapshots.
//! Destination recorders are written concurrently by batch fan-out, so the
//! counters live behind a mutex per component instance.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Snapshot of source counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceMetrics {
    /// Logical records yielded (skipped resume records excluded)
    pub records_read: u64,
    /// Records rejected by filters
    pub filtered: u64,
    /// Records rejected by validation or transforms
    pub validation_errors: u64,
    /// Bytes consumed from the backing resource
    pub bytes_read: u64,
    /// Time since the source was initialized
    pub elapsed: Duration,
    /// `records_read` per second of `elapsed`
    pub records_per_second: f64,
}

/// Snapshot of destination counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DestinationMetrics {
    /// Records for which a final outcome was produced
    pub records_written: u64,
    /// Successful writes
    pub success: u64,
    /// Failed writes
    pub errors: u64,
    /// Attempts beyond the first
    pub retries: u64,
    /// Payload bytes sent
    pub bytes_written: u64,
    /// Time since the destination was initialized
    pub elapsed: Duration,
    /// `records_written` per second of `elapsed`
    pub records_per_second: f64,
    /// Mean latency of final attempts
    pub average_response_ms: u64,
    /// Fastest final attempt
    pub min_response_ms: u64,
    /// Slowest final attempt
    pub max_response_ms: u64,
    /// Responses per status code, across all attempts
    pub status_codes: BTreeMap<u16, u64>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { count as f64 / secs } else { 0.0 }
}

/// Shared, cloneable recorder for source metrics
#[derive(Debug, Clone)]
pub struct SourceMetricsRecorder {
    inner: Arc<Mutex<SourceMetrics>>,
    started: Arc<Mutex<Option<Instant>>>,
}

impl Default for SourceMetricsRecorder {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SourceMetrics::default())),
            started: Arc::new(Mutex::new(None)),
        }
    }
}

impl SourceMetricsRecorder {
    /// Start the elapsed-time clock
    pub fn start(&self) {
        lock(&self.started).get_or_insert_with(Instant::now);
    }

    /// Count one yielded record of `bytes` size
    pub fn record_read(&self, bytes: u64) {
        let mut m = lock(&self.inner);
        m.records_read += 1;
        m.bytes_read += bytes;
    }

    /// Count bytes consumed without yielding a record (headers, skipped rows)
    pub fn record_bytes(&self, bytes: u64) {
        lock(&self.inner).bytes_read += bytes;
    }

    /// Point-in-time snapshot
    pub fn snapshot(&self) -> SourceMetrics {
        let elapsed = lock(&self.started)
            .map(|s| s.elapsed())
            .unwrap_or_default();
        let mut m = lock(&self.inner).clone();
        m.elapsed = elapsed;
        m.records_per_second = per_second(m.records_read, elapsed);
        m
    }
}

#[derive(Debug, Default)]
struct LatencyStats {
    count: u64,
    sum_ms: u64,
    min_ms: u64,
    max_ms: u64,
}

#[derive(Debug, Default)]
struct DestinationState {
    counters: DestinationMetrics,
    latency: LatencyStats,
}

/// Shared, cloneable recorder for destination metrics
#[derive(Debug, Clone, Default)]
pub struct DestinationMetricsRecorder {
    inner: Arc<Mutex<DestinationState>>,
    started: Arc<Mutex<Option<Instant>>>,
}

impl DestinationMetricsRecorder {
    /// Start the elapsed-time clock
    pub fn start(&self) {
        lock(&self.started).get_or_insert_with(Instant::now);
    }

    /// Record the final outcome of one record
    pub fn record_response(&self, elapsed_ms: u64, success: bool) {
        let mut state = lock(&self.inner);
        state.counters.records_written += 1;
        if success {
            state.counters.success += 1;
        } else {
            state.counters.errors += 1;
        }
        let latency = &mut state.latency;
        if latency.count == 0 {
            latency.min_ms = elapsed_ms;
            latency.max_ms = elapsed_ms;
        } else {
            latency.min_ms = latency.min_ms.min(elapsed_ms);
            latency.max_ms = latency.max_ms.max(elapsed_ms);
        }
        latency.count += 1;
        latency.sum_ms += elapsed_ms;
    }

    /// Count one attempt beyond the first
    pub fn record_retry(&self) {
        lock(&self.inner).counters.retries += 1;
    }

    /// Count a received status code
    pub fn record_status(&self, status: u16) {
        *lock(&self.inner)
            .counters
            .status_codes
            .entry(status)
            .or_insert(0) += 1;
    }

    /// Count payload bytes sent
    pub fn record_bytes(&self, bytes: u64) {
        lock(&self.inner).counters.bytes_written += bytes;
    }

    /// Point-in-time snapshot
    pub fn snapshot(&self) -> DestinationMetrics {
        let elapsed = lock(&self.started)
            .map(|s| s.elapsed())
            .unwrap_or_default();
        let state = lock(&self.inner);
        let mut m = state.counters.clone();
        m.elapsed = elapsed;
        m.records_per_second = per_second(m.records_written, elapsed);
        if state.latency.count > 0 {
            m.average_response_ms = state.latency.sum_ms / state.latency.count;
            m.min_response_ms = state.latency.min_ms;
            m.max_response_ms = state.latency.max_ms;
        }
        m
    }
}
