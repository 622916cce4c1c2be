//! Retrying, rate-limited delivery of single records
//!
//! The dispatcher owns the retry policy and is agnostic of the wire
//! protocol: it talks to a [`Transport`], which only knows how to send one
//! serialized body and report a status code or a transport failure.
//!
//! Classification:
//!
//! | outcome                          | disposition |
//! |----------------------------------|-------------|
//! | 2xx                              | delivered   |
//! | 5xx, 408, timeout                | retry       |
//! | connection reset, DNS failure    | retry       |
//! | 429                              | retry only when `retry_on_429` |
//! | other 4xx, refused, bad request  | terminal    |
//!
//! Retries wait a fixed delay. The rate limit token is taken once per
//! record, before the first attempt.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::metrics::DestinationMetricsRecorder;
use crate::rate_limiter::RateLimiter;
use crate::record::WriteOutcome;

/// Status reported when every attempt failed without an HTTP response
pub const EXHAUSTED_STATUS: u16 = 500;

const MAX_BODY_IN_ERROR: usize = 512;

/// Failures below the protocol level
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// No response within the configured timeout
    #[error("request timed out: {0}")]
    Timeout(String),
    /// Connection reset, DNS failure and similar transient trouble
    #[error("network error: {0}")]
    Network(String),
    /// The remote end refused the connection
    #[error("connection refused: {0}")]
    Refused(String),
    /// The request could not be built or sent at all
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Network(_))
    }
}

/// A protocol-level response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// Status code
    pub status: u16,
    /// Response body, possibly empty
    pub body: String,
}

impl TransportResponse {
    /// Create a response
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Any 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one serialized payload
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `body` and return the response or a transport failure
    async fn send(&self, body: &str) -> std::result::Result<TransportResponse, TransportError>;
}

/// Retry budget and classification knobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
    retry_on_429: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
            retry_on_429: false,
        }
    }
}

impl RetryPolicy {
    /// Policy with `attempts` total tries and a fixed `delay` between them
    pub fn new(attempts: u32, delay: Duration) -> Result<Self> {
        if attempts == 0 {
            return Err(Error::configuration(
                "retry policy",
                "retry_attempts must be at least 1",
            ));
        }
        Ok(Self {
            attempts,
            delay,
            retry_on_429: false,
        })
    }

    /// Treat 429 as retryable
    pub fn with_retry_on_429(mut self, enabled: bool) -> Self {
        self.retry_on_429 = enabled;
        self
    }

    /// Total attempts per record
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Fixed wait between attempts
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Whether a non-2xx status is worth another attempt
    pub fn is_retryable_status(&self, status: u16) -> bool {
        match status {
            500..=599 | 408 => true,
            429 => self.retry_on_429,
            _ => false,
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_BODY_IN_ERROR) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// Per-destination delivery routine
#[derive(Debug, Clone)]
pub struct Dispatcher {
    policy: RetryPolicy,
    limiter: Arc<RateLimiter>,
    metrics: DestinationMetricsRecorder,
}

impl Dispatcher {
    /// Create a dispatcher reporting into `metrics`
    pub fn new(
        policy: RetryPolicy,
        limiter: Arc<RateLimiter>,
        metrics: DestinationMetricsRecorder,
    ) -> Self {
        Self {
            policy,
            limiter,
            metrics,
        }
    }

    /// The retry policy in use
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// The shared rate limiter
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Deliver one record.
    ///
    /// `payload` is the already-built body, or the reason it could not be
    /// built; a build failure is terminal and never reaches the transport.
    /// Never fails: every problem ends up in the returned outcome.
    pub async fn dispatch<T>(
        &self,
        transport: &T,
        record_id: &str,
        payload: std::result::Result<String, String>,
    ) -> WriteOutcome
    where
        T: Transport + ?Sized,
    {
        self.limiter.acquire().await;

        let body = match payload {
            Ok(body) => body,
            Err(message) => {
                warn!(record_id, error = %message, "payload could not be built");
                self.metrics.record_response(0, false);
                return WriteOutcome::failure(
                    record_id,
                    format!("invalid payload: {message}"),
                    None,
                    0,
                );
            }
        };

        let mut last_error = String::new();
        let mut last_status: Option<u16> = None;
        let mut last_elapsed = 0;

        for attempt in 1..=self.policy.attempts {
            if attempt > 1 {
                self.metrics.record_retry();
                tokio::time::sleep(self.policy.delay).await;
            }

            let started = Instant::now();
            self.metrics.record_bytes(body.len() as u64);
            let result = transport.send(&body).await;
            last_elapsed = elapsed_ms(started);

            match result {
                Ok(response) => {
                    self.metrics.record_status(response.status);
                    if response.is_success() {
                        self.metrics.record_response(last_elapsed, true);
                        return WriteOutcome::success(record_id, last_elapsed)
                            .with_status(response.status)
                            .with_attempts(attempt);
                    }

                    last_status = Some(response.status);
                    last_error = if response.body.is_empty() {
                        format!("HTTP {}", response.status)
                    } else {
                        format!("HTTP {}: {}", response.status, truncate(&response.body))
                    };

                    if !self.policy.is_retryable_status(response.status) {
                        debug!(record_id, status = response.status, "terminal response");
                        self.metrics.record_response(last_elapsed, false);
                        return WriteOutcome::failure(
                            record_id,
                            last_error,
                            Some(response.status),
                            last_elapsed,
                        )
                        .with_attempts(attempt);
                    }
                }
                Err(err) => {
                    last_status = None;
                    last_error = err.to_string();
                    if !err.is_retryable() {
                        debug!(record_id, error = %err, "terminal transport failure");
                        self.metrics.record_response(last_elapsed, false);
                        return WriteOutcome::failure(record_id, last_error, None, last_elapsed)
                            .with_attempts(attempt);
                    }
                }
            }

            debug!(
                record_id,
                attempt,
                attempts = self.policy.attempts,
                error = %last_error,
                "attempt failed"
            );
        }

        warn!(
            record_id,
            attempts = self.policy.attempts,
            error = %last_error,
            "delivery failed after all attempts"
        );
        self.metrics.record_response(last_elapsed, false);
        WriteOutcome::failure(
            record_id,
            last_error,
            Some(last_status.unwrap_or(EXHAUSTED_STATUS)),
            last_elapsed,
        )
        .with_attempts(self.policy.attempts)
    }
}
