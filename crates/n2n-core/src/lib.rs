//! n2n Core Library
//!
//! This crate provides the building blocks of an n2n pipeline:
//! - Records and per-record outcomes
//! - Source and destination contracts with built-in connectors
//! - Token bucket rate limiting and the retrying dispatcher
//! - Durable checkpoints for resumable executions
//! - Filters, column validation and field transforms
//! - Pipeline configuration and the type-keyed component registries
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────────────┐   ┌────────────┐   ┌─────────────┐
//! │  Source  │──▶│ filter / validate / │──▶│ Dispatcher │──▶│ Destination │
//! │ (stream) │   │     transform       │   │ retry+rate │   │             │
//! └──────────┘   └─────────────────────┘   └────────────┘   └─────────────┘
//!                                                 │
//!                                          ┌─────────────┐
//!                                          │ Checkpoint  │
//!                                          └─────────────┘
//! ```
//!
//! The orchestration loop itself lives in `n2n-runtime`.
//!
//! # Example
//!
//! ```rust,ignore
//! use n2n_core::{PipelineConfig, SourceRegistry};
//!
//! let config = PipelineConfig::load("./pipeline.yaml")?;
//! let source = SourceRegistry::with_defaults()
//!     .create(&config.source.kind, &config.source.settings)
//!     .await?;
//! println!("about {:?} records", source.estimated_count().await);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint;
pub mod config;
pub mod connectors;
pub mod dispatcher;
pub mod error;
pub mod factory;
pub mod filter;
pub mod interpreter;
pub mod metrics;
pub mod rate_limiter;
pub mod record;
pub mod transforms;
pub mod validation;

pub use checkpoint::{Checkpoint, CheckpointStore, generate_execution_id};
pub use config::{ComponentConfig, PipelineConfig, ProcessingConfig, Settings};
pub use connectors::{Destination, RecordStream, Source};
pub use dispatcher::{Dispatcher, RetryPolicy, Transport, TransportError, TransportResponse};
pub use error::{Error, Result};
pub use factory::{DestinationRegistry, SourceRegistry};
pub use filter::FilterConfig;
pub use interpreter::Interpreter;
pub use metrics::{DestinationMetrics, SourceMetrics};
pub use rate_limiter::RateLimiter;
pub use record::{BatchOutcome, Fields, Record, ValidationOutcome, WriteOutcome};
pub use transforms::{TransformConfig, TransformOp};
pub use validation::{ColumnRule, ColumnType, RecordValidator};
