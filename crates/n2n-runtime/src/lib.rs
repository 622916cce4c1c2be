//! n2n Runtime
//!
//! This crate runs configured pipelines end to end.
//!
//! # Features
//!
//! - Pull, filter, validate, transform and batch records
//! - Bounded, rate limited batch dispatch through the destination
//! - Periodic and final checkpoints for resumable executions
//! - Per-execution failure log
//!
//! # Usage
//!
//! ```rust,ignore
//! use n2n_core::PipelineConfig;
//! use n2n_runtime::Pipeline;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = PipelineConfig::load("pipeline.yaml")?;
//! let report = Pipeline::new(config)
//!     .with_execution_id("3f1c...")
//!     .run(CancellationToken::new())
//!     .await?;
//! println!("{} records processed", report.total_processed);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod error;
pub mod failure_log;

pub use engine::{DryRunReport, Pipeline, PipelineReport, PipelineState};
pub use error::{Error, Result};
pub use failure_log::{FailureEntry, FailureLog, Stage};
