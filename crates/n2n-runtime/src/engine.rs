//! Pipeline execution engine
//!
//! Drives one execution of a configured pipeline:
//!
//! ```text
//! Idle ─▶ Initializing ─▶ Running ─┬─▶ Completed
//!              │                   └─▶ Cancelled
//!              └─▶ Failed
//! ```
//!
//! Records are pulled one at a time, filtered, validated and transformed,
//! then dispatched to the destination in batches. Totals and the source
//! offset are folded into the checkpoint only once a whole batch settled,
//! so a resumed run never skips or re-counts a record of a settled batch.

use anyhow::{Context, anyhow};
use futures::StreamExt;
use n2n_core::checkpoint::generate_execution_id;
use n2n_core::filter::passes;
use n2n_core::{
    Checkpoint, CheckpointStore, Destination, DestinationMetrics, DestinationRegistry,
    Interpreter, PipelineConfig, Record, RecordValidator, Source, SourceMetrics, SourceRegistry,
};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::failure_log::{FailureEntry, FailureLog, Stage};

const FILTERED_KEY: &str = "filtered";
const VALIDATION_ERRORS_KEY: &str = "validation_errors";

/// Lifecycle of a pipeline execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Not started
    Idle,
    /// Building components and loading the checkpoint
    Initializing,
    /// Moving records
    Running,
    /// Source exhausted or record cap reached
    Completed,
    /// Setup failed; nothing was processed
    Failed,
    /// Stopped by the cancellation signal
    Cancelled,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Initializing => "initializing",
            PipelineState::Running => "running",
            PipelineState::Completed => "completed",
            PipelineState::Failed => "failed",
            PipelineState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Summary of one execution
///
/// Totals are cumulative over every run of the execution. The source and
/// destination metrics cover this run only.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    /// Key to resume this execution with
    pub execution_id: String,
    /// Pipeline name
    pub pipeline_name: String,
    /// Final state, `Completed` or `Cancelled`
    pub state: PipelineState,
    /// Whether an existing checkpoint was picked up
    pub resumed: bool,
    /// Logical source offset this run started at
    pub start_offset: u64,
    /// Source records consumed, including earlier runs
    pub records_consumed: u64,
    /// Best-effort size of the input
    pub estimated_total: Option<u64>,
    /// Records dispatched (`success_count + error_count`)
    pub total_processed: u64,
    /// Records the destination accepted
    pub success_count: u64,
    /// Records the destination rejected
    pub error_count: u64,
    /// Records dropped by filters
    pub filtered: u64,
    /// Records dropped by the source, validation or transforms
    pub validation_errors: u64,
    /// Batches flushed in this run
    pub batches: u64,
    /// Wall-clock time of this run
    pub elapsed: Duration,
    /// Id of the last record of the last settled batch
    pub last_processed_record_id: String,
    /// Source counters of this run
    pub source: SourceMetrics,
    /// Destination counters of this run
    pub destination: DestinationMetrics,
    /// Checkpoint file of the execution
    pub checkpoint_path: PathBuf,
    /// Failure log, when anything was written to it
    pub failure_log: Option<PathBuf>,
}

/// Result of a dry run
#[derive(Debug, Clone, Serialize)]
pub struct DryRunReport {
    /// Pipeline name
    pub pipeline_name: String,
    /// Configured source type
    pub source_type: String,
    /// Configured destination type
    pub destination_type: String,
    /// Best-effort size of the input
    pub estimated_records: Option<u64>,
    /// Non fatal findings of the component checks
    pub warnings: Vec<String>,
}

/// Components and state ready to run
struct Prepared {
    source: Box<dyn Source>,
    destination: Box<dyn Destination>,
    validator: RecordValidator,
    interpreter: Interpreter,
}

/// Counters of the record loop
#[derive(Debug, Default)]
struct Progress {
    /// Logical source records consumed, including earlier runs
    consumed: u64,
    /// Records put into batches by this run
    accepted: u64,
    filtered: u64,
    validation_errors: u64,
    prior_filtered: u64,
    prior_validation_errors: u64,
    batches: u64,
}

impl Progress {
    fn total_filtered(&self) -> u64 {
        self.prior_filtered + self.filtered
    }

    fn total_validation_errors(&self) -> u64 {
        self.prior_validation_errors + self.validation_errors
    }
}

/// One configured pipeline
pub struct Pipeline {
    config: PipelineConfig,
    sources: SourceRegistry,
    destinations: DestinationRegistry,
    execution_id: Option<String>,
    state: PipelineState,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.config.name)
            .field("execution_id", &self.execution_id)
            .field("state", &self.state)
            .finish()
    }
}

impl Pipeline {
    /// A pipeline using the built-in sources and destinations
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            sources: SourceRegistry::with_defaults(),
            destinations: DestinationRegistry::with_defaults(),
            execution_id: None,
            state: PipelineState::Idle,
        }
    }

    /// Use custom component registries
    pub fn with_registries(
        mut self,
        sources: SourceRegistry,
        destinations: DestinationRegistry,
    ) -> Self {
        self.sources = sources;
        self.destinations = destinations;
        self
    }

    /// Resume (or start) the execution with this id
    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    /// Current lifecycle state
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// The pipeline configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn check_config(&self) -> Result<()> {
        let problems = self.config.validate();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("invalid pipeline configuration: {}", problems.join("; ")))
        }
    }

    async fn prepare(&self) -> Result<Prepared> {
        self.check_config()?;
        let validator = RecordValidator::new(&self.config.validation)
            .context("invalid validation rules")?;
        let interpreter =
            Interpreter::new(&self.config.transforms).context("invalid transforms")?;

        let source = self
            .sources
            .create(&self.config.source.kind, &self.config.source.settings)
            .await
            .context("failed to set up source")?;

        let destination = match self
            .destinations
            .create(&self.config.destination.kind, &self.config.destination.settings)
            .await
        {
            Ok(destination) => destination,
            Err(e) => {
                close_source(source).await;
                return Err(anyhow::Error::new(e).context("failed to set up destination"));
            }
        };

        Ok(Prepared {
            source,
            destination,
            validator,
            interpreter,
        })
    }

    /// Check the configuration and both components without moving records
    pub async fn dry_run(&mut self) -> Result<DryRunReport> {
        self.state = PipelineState::Initializing;
        let prepared = match self.prepare().await {
            Ok(prepared) => prepared,
            Err(e) => {
                self.state = PipelineState::Failed;
                return Err(e);
            }
        };

        let Prepared {
            source,
            destination,
            ..
        } = prepared;
        let mut warnings = Vec::new();
        warnings.extend(
            source
                .validate()
                .warnings
                .into_iter()
                .map(|w| format!("source: {w}")),
        );
        warnings.extend(
            destination
                .validate()
                .warnings
                .into_iter()
                .map(|w| format!("destination: {w}")),
        );
        let estimated_records = source.estimated_count().await;

        close_source(source).await;
        close_destination(destination).await;
        self.state = PipelineState::Idle;

        Ok(DryRunReport {
            pipeline_name: self.config.name.clone(),
            source_type: self.config.source.kind.clone(),
            destination_type: self.config.destination.kind.clone(),
            estimated_records,
            warnings,
        })
    }

    /// Run the pipeline until the source is exhausted, the record cap is
    /// reached or `cancel` fires.
    ///
    /// Returns `Err` only for setup problems and destination misuse;
    /// per-record failures are counted in the report.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<PipelineReport> {
        let started = Instant::now();
        self.state = PipelineState::Initializing;

        let prepared = match self.prepare().await {
            Ok(prepared) => prepared,
            Err(e) => {
                self.state = PipelineState::Failed;
                return Err(e);
            }
        };

        let store = CheckpointStore::new(&self.config.processing.checkpoint_dir);
        let (mut checkpoint, resumed) = match self.load_checkpoint(&store).await {
            Ok(loaded) => loaded,
            Err(e) => {
                close_source(prepared.source).await;
                close_destination(prepared.destination).await;
                self.state = PipelineState::Failed;
                return Err(e);
            }
        };

        let Prepared {
            mut source,
            destination,
            validator,
            interpreter,
        } = prepared;

        let start_offset = checkpoint.resume_offset();
        let estimated_total = source.estimated_count().await;
        info!(
            pipeline = %self.config.name,
            execution_id = %checkpoint.execution_id,
            resumed,
            start_offset,
            estimated_total = ?estimated_total,
            "pipeline starting"
        );

        self.state = PipelineState::Running;
        let mut failures =
            FailureLog::new(&self.config.processing.log_dir, &checkpoint.execution_id);
        let mut progress = Progress {
            consumed: start_offset,
            prior_filtered: checkpoint.counter(FILTERED_KEY),
            prior_validation_errors: checkpoint.counter(VALIDATION_ERRORS_KEY),
            ..Progress::default()
        };

        let run = RecordLoop {
            config: &self.config,
            store: &store,
            validator: &validator,
            interpreter: &interpreter,
            destination: destination.as_ref(),
            cancel: &cancel,
        };
        let outcome = run
            .execute(
                source.as_mut(),
                start_offset,
                &mut checkpoint,
                &mut progress,
                &mut failures,
            )
            .await;

        let source_metrics = source.metrics();
        let destination_metrics = destination.metrics();
        failures.flush();
        close_source(source).await;
        close_destination(destination).await;

        let cancelled = match outcome {
            Ok(cancelled) => cancelled,
            Err(e) => {
                self.state = PipelineState::Failed;
                return Err(e);
            }
        };

        self.state = if cancelled {
            PipelineState::Cancelled
        } else {
            PipelineState::Completed
        };

        let report = PipelineReport {
            execution_id: checkpoint.execution_id.clone(),
            pipeline_name: self.config.name.clone(),
            state: self.state,
            resumed,
            start_offset,
            records_consumed: progress.consumed,
            estimated_total,
            total_processed: checkpoint.total_processed,
            success_count: checkpoint.success_count,
            error_count: checkpoint.error_count,
            filtered: progress.total_filtered(),
            validation_errors: progress.total_validation_errors(),
            batches: progress.batches,
            elapsed: started.elapsed(),
            last_processed_record_id: checkpoint.last_processed_record_id.clone(),
            source: SourceMetrics {
                filtered: progress.filtered,
                validation_errors: progress.validation_errors,
                ..source_metrics
            },
            destination: destination_metrics,
            checkpoint_path: store.path_for(&checkpoint.execution_id),
            failure_log: (failures.written() > 0).then(|| failures.path().to_path_buf()),
        };

        info!(
            execution_id = %report.execution_id,
            state = %report.state,
            total_processed = report.total_processed,
            success = report.success_count,
            errors = report.error_count,
            filtered = report.filtered,
            validation_errors = report.validation_errors,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "pipeline finished"
        );
        Ok(report)
    }

    async fn load_checkpoint(&self, store: &CheckpointStore) -> Result<(Checkpoint, bool)> {
        let fresh = |execution_id: String| {
            Checkpoint::new(
                execution_id,
                self.config.name.clone(),
                self.config.source.kind.clone(),
                self.config.destination.kind.clone(),
            )
        };

        let Some(execution_id) = self.execution_id.clone() else {
            return Ok((fresh(generate_execution_id()), false));
        };

        match store
            .load(&execution_id)
            .await
            .context("failed to load checkpoint")?
        {
            Some(checkpoint) => {
                if checkpoint.pipeline_name != self.config.name
                    || !checkpoint
                        .source_type
                        .eq_ignore_ascii_case(&self.config.source.kind)
                {
                    warn!(
                        execution_id = %execution_id,
                        checkpoint_pipeline = %checkpoint.pipeline_name,
                        checkpoint_source = %checkpoint.source_type,
                        "checkpoint was written by a different pipeline"
                    );
                }
                Ok((checkpoint, true))
            }
            None => {
                info!(execution_id = %execution_id, "no checkpoint found, starting fresh");
                Ok((fresh(execution_id), false))
            }
        }
    }
}

/// Borrowed context of one pass over the source
struct RecordLoop<'a> {
    config: &'a PipelineConfig,
    store: &'a CheckpointStore,
    validator: &'a RecordValidator,
    interpreter: &'a Interpreter,
    destination: &'a dyn Destination,
    cancel: &'a CancellationToken,
}

impl RecordLoop<'_> {
    /// Returns whether the loop stopped because of cancellation
    async fn execute(
        &self,
        source: &mut dyn Source,
        start_offset: u64,
        checkpoint: &mut Checkpoint,
        progress: &mut Progress,
        failures: &mut FailureLog,
    ) -> Result<bool> {
        let processing = &self.config.processing;
        let batch_size = processing.batch_size.max(1);
        let interval = Duration::from_secs(processing.checkpoint_interval_seconds);
        let cap_reached = |accepted: u64| processing.max_records.is_some_and(|cap| accepted >= cap);

        let mut stream = source
            .read(start_offset, self.cancel.clone())
            .await
            .context("failed to open source stream")?;
        let mut batch: Vec<Record> = Vec::with_capacity(batch_size);
        let mut last_save = Instant::now();
        let mut cancelled = false;

        loop {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            if cap_reached(progress.accepted) {
                info!(max_records = ?processing.max_records, "record cap reached");
                break;
            }

            let item = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                item = stream.next() => item,
            };
            let Some(item) = item else { break };
            progress.consumed += 1;

            let Some(record) = self.admit(item, progress, failures) else {
                continue;
            };
            batch.push(record);
            progress.accepted += 1;

            if batch.len() >= batch_size || cap_reached(progress.accepted) {
                self.flush(&mut batch, checkpoint, progress, failures).await?;
                if last_save.elapsed() >= interval {
                    if let Err(e) = self.store.save(checkpoint).await {
                        warn!(error = %e, "periodic checkpoint save failed");
                    }
                    last_save = Instant::now();
                }
            }
        }
        drop(stream);

        if cancelled {
            info!(pending = batch.len(), "cancellation requested, settling last batch");
        }
        self.flush(&mut batch, checkpoint, progress, failures).await?;
        settle(checkpoint, progress);
        self.store
            .save(checkpoint)
            .await
            .context("failed to save final checkpoint")?;
        Ok(cancelled)
    }

    /// Run one source item through filters, validation and transforms
    fn admit(
        &self,
        item: n2n_core::Result<Record>,
        progress: &mut Progress,
        failures: &mut FailureLog,
    ) -> Option<Record> {
        let record = match item {
            Ok(record) => record,
            Err(e) => {
                progress.validation_errors += 1;
                let message = e.to_string();
                warn!(offset = progress.consumed, error = %message, "unreadable source record");
                failures.record(&FailureEntry::new("", Stage::Source, &message));
                return None;
            }
        };

        if !passes(&self.config.filters, &record) {
            progress.filtered += 1;
            return None;
        }

        let validation = self.validator.validate(&record);
        if !validation.valid {
            progress.validation_errors += 1;
            let message = validation.errors.join("; ");
            debug!(record_id = %record.id, error = %message, "record failed validation");
            failures.record(
                &FailureEntry::new(&record.id, Stage::Validation, &message)
                    .with_fields(&record.fields),
            );
            return None;
        }

        if self.interpreter.is_empty() {
            return Some(record);
        }
        let record_id = record.id.clone();
        match self.interpreter.apply(record) {
            Ok(record) => Some(record),
            Err(e) => {
                progress.validation_errors += 1;
                let message = e.to_string();
                debug!(record_id = %record_id, error = %message, "transform failed");
                failures.record(&FailureEntry::new(&record_id, Stage::Transform, &message));
                None
            }
        }
    }

    /// Dispatch the pending batch and fold its outcome into the checkpoint
    async fn flush(
        &self,
        batch: &mut Vec<Record>,
        checkpoint: &mut Checkpoint,
        progress: &mut Progress,
        failures: &mut FailureLog,
    ) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let capacity = batch.capacity();
        let records = std::mem::replace(batch, Vec::with_capacity(capacity));

        let outcome = self
            .destination
            .write_batch(&records)
            .await
            .context("destination failed to write batch")?;

        for (record, result) in records.iter().zip(&outcome.outcomes) {
            if !result.success {
                let message = result.error_message.as_deref().unwrap_or("write failed");
                failures.record(
                    &FailureEntry::new(&record.id, Stage::Destination, message)
                        .with_status(result.status_code)
                        .with_fields(&record.fields),
                );
            }
        }

        let last_id = records.last().map(|r| r.id.as_str()).unwrap_or_default();
        checkpoint.record_batch(&outcome, last_id);
        progress.batches += 1;
        settle(checkpoint, progress);

        debug!(
            batch = progress.batches,
            size = outcome.total,
            errors = outcome.error_count,
            elapsed_ms = outcome.elapsed_ms,
            total_processed = checkpoint.total_processed,
            "batch settled"
        );
        Ok(())
    }
}

/// Copy the loop counters into the checkpoint
fn settle(checkpoint: &mut Checkpoint, progress: &Progress) {
    checkpoint.set_offset(progress.consumed);
    checkpoint.set_counter(FILTERED_KEY, progress.total_filtered());
    checkpoint.set_counter(VALIDATION_ERRORS_KEY, progress.total_validation_errors());
}

async fn close_source(mut source: Box<dyn Source>) {
    if let Err(e) = source.close().await {
        warn!(source = source.kind(), error = %e, "failed to close source");
    }
}

async fn close_destination(mut destination: Box<dyn Destination>) {
    if let Err(e) = destination.close().await {
        warn!(destination = destination.kind(), error = %e, "failed to close destination");
    }
}
