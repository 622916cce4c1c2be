//! Integration tests for configuration driven record processing
//!
//! Tests use temporary directories with real file fixtures to verify:
//! - Pipeline config loading and static validation
//! - Filters, validation and transforms built from YAML
//! - Component construction through the registries
//! - Error handling hierarchy

use futures::TryStreamExt;
use n2n_core::filter::passes;
use n2n_core::{
    DestinationRegistry, Error, Interpreter, PipelineConfig, Record, RecordValidator,
    SourceRegistry,
};
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Helper to create a temporary project directory with a data folder.
///
/// Returns a `TempDir` that automatically cleans up when dropped.
fn setup_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("data")).unwrap();
    dir
}

fn record(id: &str, fields: serde_json::Value) -> Record {
    match fields {
        serde_json::Value::Object(fields) => Record::new(id, fields),
        other => panic!("not an object: {other}"),
    }
}

const CUSTOMERS_PIPELINE: &str = r#"
name: customers
description: push active customers to the CRM
source:
  type: csv
  settings:
    file_path: data/customers.csv
destination:
  type: api
  settings:
    endpoint_url: https://crm.example.com/v1/customers
    method: PUT
    max_requests_per_second: 20
    field_mapping:
      customer.id: id
      customer.email: email
      source: "=batch-import"
processing:
  checkpoint_dir: state
  checkpoint_interval_seconds: 5
  batch_size: 50
  max_records: 1000
filters:
  - field: status
    operator: equals
    value: ACTIVE
  - any:
      - { field: age, operator: gte, value: 18 }
      - { field: guardian, operator: is_not_empty }
validation:
  - column: email
    type: email
    required: true
  - column: joined
    type: date
    format: "%d/%m/%Y"
  - column: id
    type: integer
    regex: "^[0-9]{1,6}$"
transforms:
  - { type: trim, field: name }
  - { type: upper, field: country }
  - { type: date_format, field: joined, from: "%d/%m/%Y", to: "%Y-%m-%d" }
  - { type: template, field: greeting, template: "Hello {{ name }}" }
  - { type: drop, field: age }
"#;

// =============================================================================
// Loading
// =============================================================================

#[test]
fn test_load_full_pipeline() {
    let dir = setup_project();
    let path = dir.path().join("pipeline.yaml");
    std::fs::write(&path, CUSTOMERS_PIPELINE).unwrap();

    let config = PipelineConfig::load(&path).unwrap();

    assert_eq!(config.name, "customers");
    assert_eq!(config.source.kind, "csv");
    assert_eq!(
        config.source.settings.string("csv", "FilePath").unwrap().as_deref(),
        Some("data/customers.csv")
    );
    assert_eq!(config.destination.kind, "api");
    assert_eq!(
        config
            .destination
            .settings
            .u64("api", "max-requests-per-second")
            .unwrap(),
        Some(20)
    );
    assert_eq!(config.processing.batch_size, 50);
    assert_eq!(config.processing.max_records, Some(1000));
    assert_eq!(config.processing.checkpoint_dir.to_str(), Some("state"));
    assert_eq!(config.processing.log_dir.to_str(), Some("logs"));
    assert_eq!(config.filters.len(), 2);
    assert_eq!(config.validation.len(), 3);
    assert_eq!(config.transforms.len(), 5);
    assert!(config.validate().is_empty());
}

#[test]
fn test_minimal_pipeline_uses_defaults() {
    let config = PipelineConfig::from_yaml(
        r#"
source: { type: jsonl, settings: { file_path: in.jsonl } }
destination: { type: memory }
"#,
    )
    .unwrap();

    assert_eq!(config.name, "default");
    assert_eq!(config.processing.batch_size, 100);
    assert_eq!(config.processing.checkpoint_interval_seconds, 30);
    assert!(config.processing.max_records.is_none());
    assert!(config.filters.is_empty());
    assert!(config.destination.settings.raw("anything").is_none());
}

#[test]
fn test_static_validation_collects_every_problem() {
    let config = PipelineConfig::from_yaml(
        r#"
name: " "
source: { type: "" }
destination: { type: memory }
processing: { batch_size: 0, checkpoint_interval_seconds: 0 }
"#,
    )
    .unwrap();

    let problems = config.validate();
    assert_eq!(problems.len(), 4, "{problems:?}");
    assert!(problems.iter().any(|p| p.contains("batch_size")));
}

// =============================================================================
// Record processing built from configuration
// =============================================================================

#[test]
fn test_filters_validation_and_transforms_from_yaml() {
    let config = PipelineConfig::from_yaml(CUSTOMERS_PIPELINE).unwrap();
    let validator = RecordValidator::new(&config.validation).unwrap();
    let interpreter = Interpreter::new(&config.transforms).unwrap();

    let adult = record(
        "2",
        json!({"id": "17", "status": "active", "age": "34", "name": "  Ada ",
               "email": "ada@example.com", "joined": "03/02/2021", "country": "gb"}),
    );
    let minor_with_guardian = record(
        "3",
        json!({"id": "18", "status": "Active", "age": "12", "guardian": "Bob",
               "email": "kid@example.com"}),
    );
    let minor_alone = record("4", json!({"id": "19", "status": "active", "age": "12"}));
    let inactive = record("5", json!({"id": "20", "status": "inactive", "age": "40"}));

    assert!(passes(&config.filters, &adult));
    assert!(passes(&config.filters, &minor_with_guardian));
    assert!(!passes(&config.filters, &minor_alone));
    assert!(!passes(&config.filters, &inactive));

    assert!(validator.validate(&adult).valid);
    assert!(validator.validate(&minor_with_guardian).valid);

    let out = interpreter.apply(adult).unwrap();
    assert_eq!(out.fields["name"], "Ada");
    assert_eq!(out.fields["country"], "GB");
    assert_eq!(out.fields["joined"], "2021-02-03");
    assert_eq!(out.fields["greeting"], "Hello Ada");
    assert!(!out.fields.contains_key("age"));
}

#[test]
fn test_validation_reports_each_failing_column() {
    let config = PipelineConfig::from_yaml(CUSTOMERS_PIPELINE).unwrap();
    let validator = RecordValidator::new(&config.validation).unwrap();

    let outcome = validator.validate(&record(
        "9",
        json!({"id": "12a", "email": "not-an-email", "joined": "2021-02-03"}),
    ));

    // id fails both its type and its pattern
    assert!(!outcome.valid);
    assert_eq!(outcome.errors.len(), 4, "{:?}", outcome.errors);
}

#[test]
fn test_bad_regex_is_configuration_error() {
    let config = PipelineConfig::from_yaml(
        r#"
source: { type: csv }
destination: { type: memory }
validation:
  - { column: id, regex: "([0-9" }
"#,
    )
    .unwrap();

    let err = RecordValidator::new(&config.validation).unwrap_err();
    assert!(err.is_configuration());
}

// =============================================================================
// Component construction
// =============================================================================

#[tokio::test]
async fn test_registry_builds_source_from_config() {
    let dir = setup_project();
    let csv = dir.path().join("data/customers.csv");
    std::fs::write(&csv, "id,name\n1,Ada\n2,Grace\n3,Edsger\n").unwrap();

    let yaml = format!(
        "source: {{ type: CSV, settings: {{ FilePath: '{}' }} }}\ndestination: {{ type: memory }}\n",
        csv.display()
    );
    let config = PipelineConfig::from_yaml(&yaml).unwrap();

    let mut source = SourceRegistry::with_defaults()
        .create(&config.source.kind, &config.source.settings)
        .await
        .unwrap();
    assert_eq!(source.estimated_count().await, Some(3));

    let records: Vec<Record> = source
        .read(1, CancellationToken::new())
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    let names: Vec<_> = records.iter().map(|r| r.fields["name"].clone()).collect();
    assert_eq!(names, vec![json!("Grace"), json!("Edsger")]);
    assert_eq!(records[0].id, "3");

    source.close().await.unwrap();
    source.close().await.unwrap();
}

#[tokio::test]
async fn test_registry_rejects_unknown_destination() {
    let config = PipelineConfig::from_yaml(
        "source: { type: csv }\ndestination: { type: kafka }\n",
    )
    .unwrap();

    let err = DestinationRegistry::with_defaults()
        .create(&config.destination.kind, &config.destination.settings)
        .await
        .err()
        .unwrap();

    assert!(matches!(err, Error::UnknownType { kind: "destination", .. }));
    assert!(err.is_configuration());
}

#[tokio::test]
async fn test_registry_rejects_bad_api_settings() {
    let config = PipelineConfig::from_yaml(
        r#"
source: { type: csv }
destination:
  type: api
  settings:
    endpoint_url: ftp://example.com/upload
"#,
    )
    .unwrap();

    let err = DestinationRegistry::with_defaults()
        .create(&config.destination.kind, &config.destination.settings)
        .await
        .err()
        .unwrap();
    assert!(err.is_configuration(), "{err}");
}

// =============================================================================
// Error Handling Hierarchy
// =============================================================================

#[test]
fn test_missing_file_is_config_not_found() {
    let dir = setup_project();
    let err = PipelineConfig::load(dir.path().join("nope.yaml")).unwrap_err();
    assert!(matches!(err, Error::ConfigNotFound { .. }));
    assert!(err.is_configuration());
}

#[test]
fn test_malformed_yaml_is_configuration_error() {
    let err = PipelineConfig::from_yaml("source: [unclosed").unwrap_err();
    assert!(matches!(err, Error::Yaml(_)));
    assert!(err.is_configuration());
}

#[test]
fn test_missing_source_is_rejected() {
    let err = PipelineConfig::from_yaml("destination: { type: memory }\n").unwrap_err();
    assert!(err.to_string().contains("source"));
}
