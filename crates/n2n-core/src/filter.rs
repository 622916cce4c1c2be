//! Record filters
//!
//! A filter is either a single field comparison or an `all`/`any` group of
//! filters. The top-level list configured on a pipeline is an implicit
//! `all`. Evaluation short-circuits.
//!
//! ```yaml
//! filters:
//!   - field: status
//!     operator: equals
//!     value: active
//!   - any:
//!       - { field: age, operator: greater_than_or_equal, value: 18 }
//!       - { field: guardian, operator: is_not_empty }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use crate::record::{Record, value_as_text};

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// Field equals value
    #[serde(alias = "eq")]
    Equals,
    /// Field differs from value
    #[serde(alias = "ne")]
    NotEquals,
    /// Field contains value
    Contains,
    /// Field does not contain value
    NotContains,
    /// Field starts with value
    StartsWith,
    /// Field ends with value
    EndsWith,
    /// Field greater than value
    #[serde(alias = "gt")]
    GreaterThan,
    /// Field greater than or equal to value
    #[serde(alias = "gte")]
    GreaterThanOrEqual,
    /// Field less than value
    #[serde(alias = "lt")]
    LessThan,
    /// Field less than or equal to value
    #[serde(alias = "lte")]
    LessThanOrEqual,
    /// Field is missing or blank
    IsEmpty,
    /// Field is present and not blank
    IsNotEmpty,
}

/// A single field comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Field to inspect; a missing field reads as the empty string
    pub field: String,
    /// How to compare
    pub operator: Operator,
    /// Right-hand side; ignored by the emptiness operators
    #[serde(default)]
    pub value: Value,
    /// Compare text with case taken into account
    #[serde(default)]
    pub case_sensitive: bool,
}

/// A predicate tree over record fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterConfig {
    /// Every child must match
    All {
        /// Children
        all: Vec<FilterConfig>,
    },
    /// At least one child must match
    Any {
        /// Children
        any: Vec<FilterConfig>,
    },
    /// A leaf comparison
    Condition(Condition),
}

impl FilterConfig {
    /// Whether `record` passes this filter
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            FilterConfig::All { all } => all.iter().all(|f| f.matches(record)),
            FilterConfig::Any { any } => any.iter().any(|f| f.matches(record)),
            FilterConfig::Condition(condition) => condition.matches(record),
        }
    }
}

/// Whether `record` passes every filter in `filters`
pub fn passes(filters: &[FilterConfig], record: &Record) -> bool {
    filters.iter().all(|f| f.matches(record))
}

fn as_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

impl Condition {
    /// Evaluate against one record
    pub fn matches(&self, record: &Record) -> bool {
        let field = record.text(&self.field).unwrap_or_default();
        let value = value_as_text(&self.value);

        let (field, value) = if self.case_sensitive {
            (field, value)
        } else {
            (field.to_lowercase(), value.to_lowercase())
        };

        match self.operator {
            Operator::Equals => field == value,
            Operator::NotEquals => field != value,
            Operator::Contains => field.contains(&value),
            Operator::NotContains => !field.contains(&value),
            Operator::StartsWith => field.starts_with(&value),
            Operator::EndsWith => field.ends_with(&value),
            Operator::GreaterThan => compare(&field, &value) == Some(Ordering::Greater),
            Operator::GreaterThanOrEqual => matches!(
                compare(&field, &value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::LessThan => compare(&field, &value) == Some(Ordering::Less),
            Operator::LessThanOrEqual => matches!(
                compare(&field, &value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::IsEmpty => field.trim().is_empty(),
            Operator::IsNotEmpty => !field.trim().is_empty(),
        }
    }
}

/// Numeric when both sides parse, lexicographic otherwise
fn compare(left: &str, right: &str) -> Option<Ordering> {
    match (as_number(left), as_number(right)) {
        (Some(l), Some(r)) => l.partial_cmp(&r),
        _ => Some(left.cmp(right)),
    }
}
