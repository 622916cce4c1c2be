//! HTTP API destination
//!
//! Each record becomes one JSON request to a fixed endpoint. Delivery goes
//! through the [`Dispatcher`], so retries, rate limiting and failure
//! classification are shared with any other transport.
//!
//! Settings:
//!
//! | key                       | default | meaning                                  |
//! |---------------------------|---------|------------------------------------------|
//! | `endpoint_url`            |         | absolute http(s) URL (required)          |
//! | `method`                  | `POST`  | `POST`, `PUT` or `PATCH`                 |
//! | `timeout_seconds`         | `30`    | per-request timeout                      |
//! | `retry_attempts`          | `3`     | total attempts per record, at least 1    |
//! | `retry_delay_seconds`     | `2`     | fixed wait between attempts              |
//! | `max_requests_per_second` | none    | token bucket rate and concurrency cap    |
//! | `retry_on_429`            | `false` | treat 429 as retryable                   |
//! | `headers`                 | `{}`    | extra request headers                    |
//! | `field_mapping`           | `{}`    | `target.path: source_field` or `=literal` |

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Destination, not_configured};
use crate::config::Settings;
use crate::dispatcher::{Dispatcher, RetryPolicy, Transport, TransportError, TransportResponse};
use crate::error::{Error, Result};
use crate::metrics::{DestinationMetrics, DestinationMetricsRecorder};
use crate::rate_limiter::RateLimiter;
use crate::record::{Record, ValidationOutcome, WriteOutcome};

const KIND: &str = "api";

/// Headers that describe the body rather than the request
const CONTENT_HEADERS: &[&str] = &[
    "content-type",
    "content-length",
    "content-encoding",
    "content-language",
    "content-location",
    "content-md5",
    "content-range",
    "expires",
    "last-modified",
];

/// Parsed API destination settings
#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// Target URL
    pub endpoint_url: Url,
    /// HTTP method
    pub method: Method,
    /// Per-request timeout
    pub timeout: Duration,
    /// Retry budget
    pub retry: RetryPolicy,
    /// Token bucket rate, `None` for unlimited
    pub max_requests_per_second: Option<u32>,
    /// Extra headers, content headers included
    pub headers: BTreeMap<String, String>,
    /// Payload mapping, target path to source field or `=literal`
    pub field_mapping: BTreeMap<String, String>,
}

impl ApiSettings {
    /// Parse and check settings
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let url = settings.require_string(KIND, "endpoint_url")?;
        let endpoint_url = Url::parse(&url)
            .map_err(|e| Error::configuration(KIND, format!("invalid endpoint_url '{url}': {e}")))?;
        if !matches!(endpoint_url.scheme(), "http" | "https") {
            return Err(Error::configuration(
                KIND,
                format!("endpoint_url must be http or https, got '{}'", endpoint_url.scheme()),
            ));
        }

        let method = match settings
            .string(KIND, "method")?
            .unwrap_or_else(|| "POST".to_string())
            .to_ascii_uppercase()
            .as_str()
        {
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "PATCH" => Method::PATCH,
            other => {
                return Err(Error::configuration(
                    KIND,
                    format!("unsupported method '{other}', expected POST, PUT or PATCH"),
                ));
            }
        };

        let timeout = settings
            .u64(KIND, "timeout_seconds")?
            .or(settings.u64(KIND, "timeout")?)
            .unwrap_or(30);
        if timeout == 0 {
            return Err(Error::configuration(KIND, "timeout_seconds must be greater than 0"));
        }

        let attempts = settings.u64(KIND, "retry_attempts")?.unwrap_or(3);
        let attempts = u32::try_from(attempts)
            .map_err(|_| Error::configuration(KIND, "retry_attempts is too large"))?;
        let delay = settings.u64(KIND, "retry_delay_seconds")?.unwrap_or(2);
        let retry = RetryPolicy::new(attempts, Duration::from_secs(delay))
            .map_err(|_| Error::configuration(KIND, "retry_attempts must be at least 1"))?
            .with_retry_on_429(settings.bool(KIND, "retry_on_429")?.unwrap_or(false));

        let max_requests_per_second = settings
            .u64(KIND, "max_requests_per_second")?
            .filter(|r| *r > 0)
            .map(|r| {
                u32::try_from(r)
                    .map_err(|_| Error::configuration(KIND, "max_requests_per_second is too large"))
            })
            .transpose()?;

        Ok(Self {
            endpoint_url,
            method,
            timeout: Duration::from_secs(timeout),
            retry,
            max_requests_per_second,
            headers: settings.string_map(KIND, "headers")?,
            field_mapping: settings.string_map(KIND, "field_mapping")?,
        })
    }
}

// ============================================================================
// Payload
// ============================================================================

#[derive(Debug, Clone)]
enum MappingSource {
    Field(String),
    Literal(String),
}

/// Builds request bodies from records
#[derive(Debug, Clone, Default)]
pub struct PayloadBuilder {
    mappings: Vec<(String, Vec<String>, MappingSource)>,
}

impl PayloadBuilder {
    /// Builder for a `target -> source` mapping; empty sends fields verbatim
    pub fn new(mapping: &BTreeMap<String, String>) -> Result<Self> {
        let mut mappings = Vec::with_capacity(mapping.len());
        for (target, source) in mapping {
            let path: Vec<String> = target.split('.').map(str::to_string).collect();
            if path.iter().any(|segment| segment.trim().is_empty()) {
                return Err(Error::configuration(
                    KIND,
                    format!("field_mapping target '{target}' has an empty path segment"),
                ));
            }
            let source = match source.strip_prefix('=') {
                Some(literal) => MappingSource::Literal(literal.to_string()),
                None => MappingSource::Field(source.clone()),
            };
            mappings.push((target.clone(), path, source));
        }
        Ok(Self { mappings })
    }

    /// JSON body for `record`
    pub fn build_value(&self, record: &Record) -> std::result::Result<Value, String> {
        if self.mappings.is_empty() {
            return Ok(Value::Object(record.fields.clone()));
        }

        let mut payload = Map::new();
        for (target, path, source) in &self.mappings {
            let value = match source {
                MappingSource::Literal(literal) => Value::String(literal.clone()),
                MappingSource::Field(field) => match record.fields.get(field) {
                    Some(value) => value.clone(),
                    None => continue,
                },
            };
            insert_path(&mut payload, path, value)
                .map_err(|conflict| format!("mapping target '{target}' conflicts with '{conflict}'"))?;
        }
        Ok(Value::Object(payload))
    }

    /// Serialized body for `record`
    pub fn build(&self, record: &Record) -> std::result::Result<String, String> {
        let value = self.build_value(record)?;
        serde_json::to_string(&value).map_err(|e| e.to_string())
    }

    /// Targets that are also a parent path of another target
    pub fn overlapping_targets(&self) -> Vec<String> {
        self.mappings
            .iter()
            .filter(|(target, _, _)| {
                let prefix = format!("{target}.");
                self.mappings.iter().any(|(other, _, _)| other.starts_with(&prefix))
            })
            .map(|(target, _, _)| target.clone())
            .collect()
    }
}

/// Insert at a dotted path, creating objects on the way. On conflict the
/// path prefix holding a non-object is returned.
fn insert_path(
    root: &mut Map<String, Value>,
    path: &[String],
    value: Value,
) -> std::result::Result<(), String> {
    let Some((last, parents)) = path.split_last() else {
        return Ok(());
    };
    let mut current = root;
    for (depth, segment) in parents.iter().enumerate() {
        let entry = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        current = match entry {
            Value::Object(map) => map,
            _ => return Err(path[..=depth].join(".")),
        };
    }
    if current.get(last).is_some_and(Value::is_object) {
        return Err(path.join("."));
    }
    current.insert(last.clone(), value);
    Ok(())
}

// ============================================================================
// Transport
// ============================================================================

/// reqwest backed [`Transport`]
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    url: Url,
    method: Method,
    headers: HeaderMap,
    body_headers: HeaderMap,
}

fn header_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| Error::configuration(KIND, format!("invalid header name '{name}': {e}")))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|e| Error::configuration(KIND, format!("invalid value for header '{name}': {e}")))?;
    Ok((header_name, header_value))
}

impl ReqwestTransport {
    /// Build a client for `settings`
    pub fn new(settings: &ApiSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| Error::configuration(KIND, format!("cannot build HTTP client: {e}")))?;

        let mut headers = HeaderMap::new();
        let mut body_headers = HeaderMap::new();
        for (name, value) in &settings.headers {
            let lower = name.to_ascii_lowercase();
            if lower == "content-length" {
                warn!(header = %name, "ignoring configured Content-Length, it is computed per request");
                continue;
            }
            let (name, value) = header_pair(name, value)?;
            if CONTENT_HEADERS.contains(&lower.as_str()) {
                body_headers.insert(name, value);
            } else {
                headers.insert(name, value);
            }
        }

        Ok(Self {
            client,
            url: settings.endpoint_url.clone(),
            method: settings.method.clone(),
            headers,
            body_headers,
        })
    }
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn is_refused(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        current = e.source();
    }
    false
}

fn classify(err: reqwest::Error) -> TransportError {
    let message = error_chain(&err);
    if err.is_timeout() {
        TransportError::Timeout(message)
    } else if err.is_builder() {
        TransportError::InvalidRequest(message)
    } else if err.is_connect() && is_refused(&err) {
        TransportError::Refused(message)
    } else {
        TransportError::Network(message)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, body: &str) -> std::result::Result<TransportResponse, TransportError> {
        let response = self
            .client
            .request(self.method.clone(), self.url.clone())
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .headers(self.body_headers.clone())
            .body(body.to_string())
            .send()
            .await
            .map_err(classify)?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(TransportResponse::new(status, body))
    }
}

// ============================================================================
// Destination
// ============================================================================

/// Sends each record as one HTTP request
#[derive(Default)]
pub struct ApiDestination {
    settings: Option<Settings>,
    transport: Option<Arc<dyn Transport>>,
    dispatcher: Option<Dispatcher>,
    payload: PayloadBuilder,
    concurrency: Option<usize>,
    metrics: DestinationMetricsRecorder,
}

impl std::fmt::Debug for ApiDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiDestination")
            .field("initialized", &self.dispatcher.is_some())
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl ApiDestination {
    /// A destination that builds a reqwest client on `initialize`
    pub fn new() -> Self {
        Self::default()
    }

    /// A destination that sends through `transport` instead of reqwest
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport: Some(transport),
            ..Self::default()
        }
    }
}

#[async_trait]
impl Destination for ApiDestination {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn initialize(&mut self, settings: &Settings) -> Result<()> {
        self.settings = Some(settings.clone());
        let config = ApiSettings::from_settings(settings)?;

        self.payload = PayloadBuilder::new(&config.field_mapping)?;
        if self.transport.is_none() {
            self.transport = Some(Arc::new(ReqwestTransport::new(&config)?));
        }

        let limiter = Arc::new(RateLimiter::from_config(config.max_requests_per_second));
        self.concurrency = config.max_requests_per_second.map(|r| r as usize);
        self.dispatcher = Some(Dispatcher::new(
            config.retry.clone(),
            limiter,
            self.metrics.clone(),
        ));
        self.metrics.start();

        info!(
            endpoint = %config.endpoint_url,
            method = %config.method,
            attempts = config.retry.attempts(),
            rate = ?config.max_requests_per_second,
            "api destination ready"
        );
        Ok(())
    }

    fn validate(&self) -> ValidationOutcome {
        let Some(settings) = &self.settings else {
            return not_configured(KIND);
        };
        let config = match ApiSettings::from_settings(settings) {
            Ok(config) => config,
            Err(e) => return ValidationOutcome::failure([e.to_string()]),
        };

        let mut outcome = ValidationOutcome::success();
        match PayloadBuilder::new(&config.field_mapping) {
            Ok(builder) => {
                for target in builder.overlapping_targets() {
                    outcome.add_warning(format!(
                        "field_mapping target '{target}' is also used as a parent path"
                    ));
                }
            }
            Err(e) => outcome.add_error(e.to_string()),
        }
        for (name, value) in &config.headers {
            if let Err(e) = header_pair(name, value) {
                outcome.add_error(e.to_string());
            }
        }
        if config.field_mapping.is_empty() {
            outcome.add_warning("no field_mapping configured, records are sent as-is");
        }
        outcome
    }

    async fn write_one(&self, record: &Record) -> Result<WriteOutcome> {
        let (Some(dispatcher), Some(transport)) = (&self.dispatcher, &self.transport) else {
            return Err(Error::NotInitialized {
                component: KIND.to_string(),
            });
        };
        let payload = self.payload.build(record);
        let outcome = dispatcher.dispatch(transport.as_ref(), &record.id, payload).await;
        if !outcome.success {
            debug!(record_id = %record.id, status = ?outcome.status_code, "record not delivered");
        }
        Ok(outcome)
    }

    fn max_concurrency(&self) -> Option<usize> {
        self.concurrency
    }

    fn metrics(&self) -> DestinationMetrics {
        self.metrics.snapshot()
    }

    async fn close(&mut self) -> Result<()> {
        if self.dispatcher.take().is_some() {
            debug!("api destination closed");
        }
        Ok(())
    }
}
