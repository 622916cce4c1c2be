//! Scaffold a pipeline with sample data

use anyhow::Result;
use std::fs;
use std::path::Path;

const SAMPLE_CSV: &str = "\
id,name,status,email,signup_date
1,  Ada Lovelace ,active,ada@example.com,10/12/2023
2,Charles Babbage,inactive,charles@example.com,26/12/2023
3,Grace Hopper,active,grace@example.com,09/12/2023
4,Alan Turing,active,not-an-email,23/06/2023
5,Katherine Johnson,ACTIVE,katherine@example.com,26/08/2023
";

/// Run the init command
pub async fn run(path: &str, name: Option<&str>) -> Result<()> {
    let project_dir = Path::new(path);

    if !project_dir.exists() {
        fs::create_dir_all(project_dir)?;
    }

    let abs_path = project_dir.canonicalize()?;

    // Derive pipeline name from directory name if not provided
    let pipeline_name = match name {
        Some(n) => n.to_string(),
        None => abs_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Could not determine pipeline name from path"))?,
    };

    if project_dir.join("pipeline.yaml").exists() {
        anyhow::bail!(
            "Directory '{}' already contains a pipeline.yaml",
            project_dir.display()
        );
    }

    tracing::info!("Creating new pipeline: {}", pipeline_name);

    fs::create_dir_all(project_dir.join("data"))?;

    let config = format!(
        r#"# n2n pipeline configuration
name: {pipeline_name}
description: Copy active customers from CSV into a JSON lines file

source:
  type: csv
  settings:
    file_path: data/input.csv

destination:
  type: file
  settings:
    path: output/records.jsonl

# To push records to an HTTP endpoint instead:
#
# destination:
#   type: api
#   settings:
#     endpoint_url: https://api.example.com/customers
#     method: POST
#     headers:
#       Authorization: Bearer change-me
#     max_requests_per_second: 10
#     retry_attempts: 3
#     retry_delay_seconds: 2
#     field_mapping:
#       customer.id: id
#       customer.email: email
#       origin: "=n2n"

processing:
  batch_size: 100
  checkpoint_dir: checkpoints
  checkpoint_interval_seconds: 30
  log_dir: logs

filters:
  - field: status
    operator: equals
    value: active

validation:
  - column: email
    type: email
    required: true
  - column: signup_date
    type: date
    format: "%d/%m/%Y"

transforms:
  - {{ type: trim, field: name }}
  - {{ type: date_format, field: signup_date, from: "%d/%m/%Y", to: "%Y-%m-%d" }}
"#
    );
    fs::write(project_dir.join("pipeline.yaml"), config)?;
    fs::write(project_dir.join("data/input.csv"), SAMPLE_CSV)?;

    let gitignore = r#"# n2n
/checkpoints/
/logs/
/output/
"#;
    fs::write(project_dir.join(".gitignore"), gitignore)?;

    tracing::info!("✓ Pipeline '{}' created", pipeline_name);
    println!();
    println!("Next steps:");
    if path != "." {
        println!("  cd {}", path);
    }
    println!("  n2n validate");
    println!("  n2n run --dry-run");
    println!("  n2n run");

    Ok(())
}
