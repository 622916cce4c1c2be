//! Pipeline configuration parsing and validation
//!
//! A pipeline is described by a single YAML document:
//!
//! ```yaml
//! name: customers
//! source:
//!   type: csv
//!   settings:
//!     file_path: data/customers.csv
//! destination:
//!   type: api
//!   settings:
//!     endpoint_url: https://api.example.com/customers
//! processing:
//!   checkpoint_dir: checkpoints
//!   batch_size: 100
//! ```
//!
//! Component `settings` are opaque to the engine and handed to the named
//! source or destination as a [`Settings`] map.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::filter::FilterConfig;
use crate::transforms::TransformConfig;
use crate::validation::ColumnRule;

/// Root pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    #[serde(default = "default_name")]
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Where records come from
    pub source: ComponentConfig,

    /// Where records go
    pub destination: ComponentConfig,

    /// Batching and checkpoint behavior
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Record filters; the top-level list is an AND
    #[serde(default)]
    pub filters: Vec<FilterConfig>,

    /// Per-column validation rules
    #[serde(default)]
    pub validation: Vec<ColumnRule>,

    /// Field transforms applied to valid records
    #[serde(default)]
    pub transforms: Vec<TransformConfig>,
}

fn default_name() -> String {
    "default".to_string()
}

/// A source or destination declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentConfig {
    /// Registered type name (`csv`, `api`, ...)
    #[serde(rename = "type")]
    pub kind: String,

    /// Component specific settings
    #[serde(default)]
    pub settings: Settings,
}

impl ComponentConfig {
    /// Create a component declaration
    pub fn new(kind: impl Into<String>, settings: Settings) -> Self {
        Self {
            kind: kind.into(),
            settings,
        }
    }
}

/// Processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Directory for per-execution failure logs
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Directory holding checkpoint files
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,

    /// Minimum wall-clock seconds between periodic checkpoint saves
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval_seconds: u64,

    /// Records per dispatched batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Stop after this many records were accepted into batches in one run
    #[serde(default)]
    pub max_records: Option<u64>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            checkpoint_dir: default_checkpoint_dir(),
            checkpoint_interval_seconds: default_checkpoint_interval(),
            batch_size: default_batch_size(),
            max_records: None,
        }
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("checkpoints")
}

fn default_checkpoint_interval() -> u64 {
    30
}

fn default_batch_size() -> usize {
    100
}

impl PipelineConfig {
    /// Load a pipeline configuration file
    ///
    /// Relative `log_dir` and `checkpoint_dir` paths are kept as written;
    /// they resolve against the process working directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse a pipeline configuration from YAML text
    pub fn from_yaml(contents: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Static checks that don't need any component
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.name.trim().is_empty() {
            problems.push("pipeline name must not be empty".to_string());
        }
        if self.source.kind.trim().is_empty() {
            problems.push("source type must not be empty".to_string());
        }
        if self.destination.kind.trim().is_empty() {
            problems.push("destination type must not be empty".to_string());
        }
        if self.processing.batch_size == 0 {
            problems.push("processing.batch_size must be greater than 0".to_string());
        }
        if self.processing.checkpoint_interval_seconds == 0 {
            problems
                .push("processing.checkpoint_interval_seconds must be greater than 0".to_string());
        }
        if self.processing.max_records == Some(0) {
            problems.push("processing.max_records must be greater than 0 when set".to_string());
        }
        problems
    }
}

/// Opaque, string-keyed component settings
///
/// Keys are matched loosely: case is ignored, as are `_` and `-`, so
/// `FilePath`, `file_path` and `file-path` all name the same setting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(BTreeMap<String, Value>);

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

impl Settings {
    /// Empty settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a setting
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let normalized = normalize_key(&key);
        self.0.retain(|k, _| normalize_key(k) != normalized);
        self.0.insert(key, value.into());
    }

    /// Raw value of a setting
    pub fn raw(&self, key: &str) -> Option<&Value> {
        let wanted = normalize_key(key);
        self.0
            .iter()
            .find(|(k, _)| normalize_key(k) == wanted)
            .map(|(_, v)| v)
            .filter(|v| !v.is_null())
    }

    /// Whether the setting is present and not null
    pub fn contains(&self, key: &str) -> bool {
        self.raw(key).is_some()
    }

    /// Deserialize a setting into `T`
    pub fn get<T: DeserializeOwned>(&self, component: &str, key: &str) -> Result<Option<T>> {
        self.raw(key)
            .map(|v| {
                serde_json::from_value(v.clone()).map_err(|e| {
                    Error::configuration(component, format!("setting '{key}' is invalid: {e}"))
                })
            })
            .transpose()
    }

    /// A setting rendered as text; numbers and booleans are accepted
    pub fn string(&self, component: &str, key: &str) -> Result<Option<String>> {
        match self.raw(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(v @ (Value::Number(_) | Value::Bool(_))) => Ok(Some(v.to_string())),
            Some(_) => Err(Error::configuration(
                component,
                format!("setting '{key}' must be a string"),
            )),
        }
    }

    /// A required text setting
    pub fn require_string(&self, component: &str, key: &str) -> Result<String> {
        self.string(component, key)?
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| Error::configuration(component, format!("{key} is required")))
    }

    /// An unsigned integer setting; numeric strings are accepted
    pub fn u64(&self, component: &str, key: &str) -> Result<Option<u64>> {
        match self.raw(key) {
            None => Ok(None),
            Some(Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| {
                Error::configuration(
                    component,
                    format!("setting '{key}' must be a non-negative integer"),
                )
            }),
            Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| {
                Error::configuration(
                    component,
                    format!("setting '{key}' must be a non-negative integer, got '{s}'"),
                )
            }),
            Some(_) => Err(Error::configuration(
                component,
                format!("setting '{key}' must be a non-negative integer"),
            )),
        }
    }

    /// A boolean setting; `"true"`/`"false"` strings are accepted
    pub fn bool(&self, component: &str, key: &str) -> Result<Option<bool>> {
        match self.raw(key) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Some(true)),
                "false" | "no" | "0" => Ok(Some(false)),
                _ => Err(Error::configuration(
                    component,
                    format!("setting '{key}' must be a boolean, got '{s}'"),
                )),
            },
            Some(_) => Err(Error::configuration(
                component,
                format!("setting '{key}' must be a boolean"),
            )),
        }
    }

    /// A map of text values (headers, field mappings)
    pub fn string_map(&self, component: &str, key: &str) -> Result<BTreeMap<String, String>> {
        match self.raw(key) {
            None => Ok(BTreeMap::new()),
            Some(Value::Object(map)) => Ok(map
                .iter()
                .map(|(k, v)| (k.clone(), crate::record::value_as_text(v)))
                .collect()),
            Some(_) => Err(Error::configuration(
                component,
                format!("setting '{key}' must be a map"),
            )),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Settings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut settings = Settings::new();
        for (k, v) in iter {
            settings.insert(k, v);
        }
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r#"
source:
  type: csv
  settings:
    file_path: data/in.csv
destination:
  type: api
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.name, "default");
        assert_eq!(config.source.kind, "csv");
        assert_eq!(config.destination.kind, "api");
        assert_eq!(config.processing.batch_size, 100);
        assert_eq!(config.processing.checkpoint_interval_seconds, 30);
        assert_eq!(config.processing.checkpoint_dir, PathBuf::from("checkpoints"));
        assert!(config.processing.max_records.is_none());
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
name: customers
description: push customers to the CRM
source:
  type: csv
  settings:
    FilePath: data/customers.csv
    Delimiter: ";"
destination:
  type: api
  settings:
    endpoint_url: https://api.example.com/customers
    retry_attempts: 5
    headers:
      Authorization: Bearer abc
processing:
  log_dir: out/logs
  checkpoint_dir: out/checkpoints
  checkpoint_interval_seconds: 10
  batch_size: 50
  max_records: 1000
filters:
  - field: status
    operator: equals
    value: active
validation:
  - column: email
    type: email
    required: true
transforms:
  - type: upper
    field: name
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.name, "customers");
        assert_eq!(config.processing.batch_size, 50);
        assert_eq!(config.processing.max_records, Some(1000));
        assert_eq!(config.filters.len(), 1);
        assert_eq!(config.validation.len(), 1);
        assert_eq!(config.transforms.len(), 1);

        let source = &config.source.settings;
        assert_eq!(
            source.string("csv", "file_path").unwrap().as_deref(),
            Some("data/customers.csv")
        );
        assert_eq!(
            source.string("csv", "delimiter").unwrap().as_deref(),
            Some(";")
        );
        let dest = &config.destination.settings;
        assert_eq!(dest.u64("api", "RetryAttempts").unwrap(), Some(5));
        let headers = dest.string_map("api", "headers").unwrap();
        assert_eq!(headers.get("Authorization").map(String::as_str), Some("Bearer abc"));
    }

    #[test]
    fn test_validate_reports_problems() {
        let yaml = r#"
name: ""
source: { type: "" }
destination: { type: api }
processing: { batch_size: 0, checkpoint_interval_seconds: 0 }
"#;
        let problems = PipelineConfig::from_yaml(yaml).unwrap().validate();
        assert_eq!(problems.len(), 4);
    }

    #[test]
    fn test_load_missing_file() {
        let err = PipelineConfig::load("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.yaml");
        std::fs::write(
            &path,
            "name: from-file\nsource: { type: csv }\ndestination: { type: file }\n",
        )
        .unwrap();
        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.name, "from-file");
    }

    #[test]
    fn test_settings_lenient_numbers_and_bools() {
        let settings = Settings::new()
            .with("timeout", "45")
            .with("retry_on_429", "yes")
            .with("port", json!(8080));
        assert_eq!(settings.u64("api", "timeout").unwrap(), Some(45));
        assert_eq!(settings.u64("api", "port").unwrap(), Some(8080));
        assert_eq!(settings.bool("api", "retry-on-429").unwrap(), Some(true));
        assert_eq!(settings.u64("api", "missing").unwrap(), None);
    }

    #[test]
    fn test_settings_wrong_type_is_configuration_error() {
        let settings = Settings::new()
            .with("timeout", json!(-1))
            .with("headers", "not a map");
        let err = settings.u64("api", "timeout").unwrap_err();
        assert!(err.is_configuration());
        assert!(settings.string_map("api", "headers").is_err());
    }

    #[test]
    fn test_settings_insert_replaces_equivalent_key() {
        let mut settings = Settings::new().with("FilePath", "a.csv");
        settings.insert("file_path", "b.csv");
        assert_eq!(
            settings.require_string("csv", "filePath").unwrap(),
            "b.csv".to_string()
        );
    }

    #[test]
    fn test_require_string_rejects_blank() {
        let settings = Settings::new().with("file_path", "  ");
        assert!(settings.require_string("csv", "file_path").is_err());
    }
}
