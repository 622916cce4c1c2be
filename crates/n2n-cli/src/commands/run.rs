//! Run a pipeline

use anyhow::{Context, Result};
use n2n_core::PipelineConfig;
use n2n_runtime::{DryRunReport, Pipeline, PipelineReport, PipelineState};
use tokio_util::sync::CancellationToken;

/// Run the run command
pub async fn run(config_path: &str, execution_id: Option<&str>, dry_run: bool) -> Result<()> {
    let config = PipelineConfig::load(config_path)
        .with_context(|| format!("Failed to load pipeline from {config_path}"))?;

    let mut pipeline = Pipeline::new(config);
    if let Some(id) = execution_id {
        pipeline = pipeline.with_execution_id(id);
    }

    if dry_run {
        let report = pipeline.dry_run().await?;
        print_dry_run(&report);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current batch");
            on_interrupt.cancel();
        }
    });

    let report = pipeline.run(cancel).await?;
    print_report(&report);

    if report.state == PipelineState::Cancelled {
        println!();
        println!("Resume with:");
        println!(
            "  n2n run {} --execution-id {}",
            config_path, report.execution_id
        );
    }

    Ok(())
}

fn print_dry_run(report: &DryRunReport) {
    tracing::info!("✓ Dry run of '{}' passed", report.pipeline_name);
    println!("Pipeline:    {}", report.pipeline_name);
    println!("Source:      {}", report.source_type);
    println!("Destination: {}", report.destination_type);
    match report.estimated_records {
        Some(n) => println!("Estimated records: {n}"),
        None => println!("Estimated records: unknown"),
    }
    for warning in &report.warnings {
        println!("  ⚠ {warning}");
    }
}

fn print_report(report: &PipelineReport) {
    println!("Pipeline '{}' {}", report.pipeline_name, report.state);
    println!("  Execution id:   {}", report.execution_id);
    if report.resumed {
        println!("  Resumed at:     record {}", report.start_offset);
    }
    println!("  Consumed:       {}", report.records_consumed);
    if let Some(total) = report.estimated_total {
        println!("  Estimated:      {total}");
    }
    println!("  Processed:      {}", report.total_processed);
    println!("  Succeeded:      {}", report.success_count);
    println!("  Failed:         {}", report.error_count);
    println!("  Filtered:       {}", report.filtered);
    println!("  Invalid:        {}", report.validation_errors);
    println!("  Batches:        {}", report.batches);
    println!("  Elapsed:        {:.2?}", report.elapsed);
    if report.destination.retries > 0 {
        println!("  Retries:        {}", report.destination.retries);
    }
    println!("  Checkpoint:     {}", report.checkpoint_path.display());
    if let Some(path) = &report.failure_log {
        println!("  Failure log:    {}", path.display());
    }
}
