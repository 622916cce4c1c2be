//! Validate configuration command

use anyhow::{Context, Result};
use n2n_core::PipelineConfig;
use n2n_runtime::Pipeline;

/// Run the validate command
///
/// Static checks run first. When they pass, both components are built and
/// asked to validate themselves, exactly as a run would.
pub async fn run(config_path: &str) -> Result<()> {
    tracing::info!("Validating configuration: {}", config_path);

    let config = PipelineConfig::load(config_path).context("Failed to load configuration")?;

    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            tracing::error!("✗ {}", problem);
        }
        anyhow::bail!("Invalid configuration: {}", problems.join("; "));
    }

    tracing::info!("✓ Pipeline: {}", config.name);
    tracing::info!("✓ Source: {}", config.source.kind);
    tracing::info!("✓ Destination: {}", config.destination.kind);
    tracing::info!(
        "✓ {} filter(s), {} validation rule(s), {} transform(s)",
        config.filters.len(),
        config.validation.len(),
        config.transforms.len()
    );

    let report = Pipeline::new(config)
        .dry_run()
        .await
        .context("Component validation failed")?;
    for warning in &report.warnings {
        tracing::warn!("{}", warning);
    }

    tracing::info!("✓ Configuration is valid");
    Ok(())
}
