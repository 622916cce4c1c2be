//! Records and the outcome types produced while moving them
//!
//! These are plain data carriers. A [`Record`] is produced by a source and
//! travels through the pipeline once; the outcome types describe what
//! happened to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field map of a record (column name -> value)
pub type Fields = Map<String, Value>;

/// One unit of data flowing through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Source-assigned identifier (line number, message id, ...)
    pub id: String,

    /// Record data
    pub fields: Fields,

    /// Source metadata (line number, file name, ...)
    #[serde(default)]
    pub metadata: Fields,

    /// When the source produced the record
    pub observed_at: DateTime<Utc>,
}

impl Record {
    /// Create a record observed now
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
            metadata: Fields::new(),
            observed_at: Utc::now(),
        }
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Field value rendered as text; strings are returned without quotes
    pub fn text(&self, field: &str) -> Option<String> {
        self.fields.get(field).map(value_as_text)
    }
}

/// Render a JSON value the way it would appear in a delimited file
pub fn value_as_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Result of a validation call. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationOutcome {
    /// Whether no errors were found
    pub valid: bool,
    /// Problems that make the subject unusable
    pub errors: Vec<String>,
    /// Problems worth reporting that do not block anything
    pub warnings: Vec<String>,
}

impl ValidationOutcome {
    /// An outcome with no errors
    pub fn success() -> Self {
        Self {
            valid: true,
            ..Default::default()
        }
    }

    /// An outcome carrying the given errors
    pub fn failure<I, S>(errors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let errors: Vec<String> = errors.into_iter().map(Into::into).collect();
        Self {
            valid: errors.is_empty(),
            errors,
            warnings: Vec::new(),
        }
    }

    /// Record an error, marking the outcome invalid
    pub fn add_error(&mut self, error: impl Into<String>) {
        self.valid = false;
        self.errors.push(error.into());
    }

    /// Record a warning
    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Merge another outcome into this one
    pub fn merge(&mut self, other: ValidationOutcome) {
        self.valid &= other.valid;
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// Outcome of writing one record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteOutcome {
    /// Id of the record this outcome belongs to
    pub record_id: String,
    /// Whether the destination accepted the record
    pub success: bool,
    /// Error text for failed writes
    pub error_message: Option<String>,
    /// Protocol status code, when the destination has one
    pub status_code: Option<u16>,
    /// Duration of the final attempt in milliseconds
    pub elapsed_ms: u64,
    /// Destination specific details
    #[serde(default)]
    pub metadata: Fields,
}

impl WriteOutcome {
    /// A successful write
    pub fn success(record_id: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            record_id: record_id.into(),
            success: true,
            elapsed_ms,
            ..Default::default()
        }
    }

    /// A failed write
    pub fn failure(
        record_id: impl Into<String>,
        message: impl Into<String>,
        status_code: Option<u16>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            success: false,
            error_message: Some(message.into()),
            status_code,
            elapsed_ms,
            metadata: Fields::new(),
        }
    }

    /// Set the status code
    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    /// Note how many attempts the write took
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.metadata.insert("attempts".to_string(), attempts.into());
        self
    }
}

/// Outcome of writing a batch.
///
/// `total == success_count + error_count == outcomes.len()` always holds for
/// values built through [`BatchOutcome::from_outcomes`] or [`BatchOutcome::push`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// Number of records in the batch
    pub total: usize,
    /// Records the destination accepted
    pub success_count: usize,
    /// Records that failed
    pub error_count: usize,
    /// Per-record outcomes, in batch order
    pub outcomes: Vec<WriteOutcome>,
    /// Wall-clock duration of the whole batch in milliseconds
    pub elapsed_ms: u64,
}

impl BatchOutcome {
    /// Aggregate per-record outcomes
    pub fn from_outcomes(outcomes: Vec<WriteOutcome>, elapsed_ms: u64) -> Self {
        let mut batch = Self {
            elapsed_ms,
            ..Default::default()
        };
        for outcome in outcomes {
            batch.push(outcome);
        }
        batch
    }

    /// Add one outcome, keeping the counters consistent
    pub fn push(&mut self, outcome: WriteOutcome) {
        self.total += 1;
        if outcome.success {
            self.success_count += 1;
        } else {
            self.error_count += 1;
        }
        self.outcomes.push(outcome);
    }

    /// Failed outcomes only
    pub fn failures(&self) -> impl Iterator<Item = &WriteOutcome> {
        self.outcomes.iter().filter(|o| !o.success)
    }

    /// Percentage of successful writes
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.success_count as f64 * 100.0 / self.total as f64
        }
    }
}
