//! Inspect and remove checkpoints

use anyhow::{Context, Result};
use n2n_core::CheckpointStore;

/// List every checkpoint in `dir`
pub async fn list(dir: &str) -> Result<()> {
    let store = CheckpointStore::new(dir);
    let checkpoints = store
        .list()
        .await
        .with_context(|| format!("Failed to read checkpoints from {dir}"))?;

    if checkpoints.is_empty() {
        tracing::info!("No checkpoints in {}", dir);
        return Ok(());
    }

    println!(
        "{:<34} {:<20} {:<20} {:>10} {:>10} {:>8}",
        "EXECUTION ID", "PIPELINE", "UPDATED", "PROCESSED", "SUCCESS", "ERRORS"
    );
    for checkpoint in &checkpoints {
        println!(
            "{:<34} {:<20} {:<20} {:>10} {:>10} {:>8}",
            checkpoint.execution_id,
            checkpoint.pipeline_name,
            checkpoint.updated_at.format("%Y-%m-%d %H:%M:%S"),
            checkpoint.total_processed,
            checkpoint.success_count,
            checkpoint.error_count,
        );
    }
    Ok(())
}

/// Print the checkpoint of `id` as JSON
pub async fn show(dir: &str, id: &str) -> Result<()> {
    let store = CheckpointStore::new(dir);
    let Some(checkpoint) = store.load(id).await? else {
        anyhow::bail!("No checkpoint found for execution '{}' in {}", id, dir);
    };

    println!("{}", serde_json::to_string_pretty(&checkpoint)?);
    Ok(())
}

/// Delete the checkpoint of `id`
pub async fn delete(dir: &str, id: &str) -> Result<()> {
    let store = CheckpointStore::new(dir);
    if !store.delete(id).await? {
        anyhow::bail!("No checkpoint found for execution '{}' in {}", id, dir);
    }

    tracing::info!("✓ Deleted checkpoint {}", id);
    Ok(())
}
