//! Per-column record validation

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::record::{Record, ValidationOutcome};

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";
const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Expected type of a column
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// Any text
    #[default]
    String,
    /// Signed integer
    Integer,
    /// Floating point number
    Decimal,
    /// `true`/`false`, `yes`/`no` or `1`/`0`
    Boolean,
    /// Calendar date, `format` defaults to `%Y-%m-%d`
    Date,
    /// Date and time, RFC 3339 unless `format` is given
    Datetime,
    /// E-mail address
    Email,
}

impl ColumnType {
    fn name(self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::Decimal => "decimal",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::Datetime => "datetime",
            ColumnType::Email => "email",
        }
    }
}

/// Validation rule for one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnRule {
    /// Column name
    pub column: String,
    /// Expected type
    #[serde(rename = "type", default)]
    pub kind: ColumnType,
    /// Pattern the whole value must match
    #[serde(default)]
    pub regex: Option<String>,
    /// chrono format for dates and datetimes
    #[serde(default)]
    pub format: Option<String>,
    /// Reject missing or blank values
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug)]
struct CompiledRule {
    rule: ColumnRule,
    pattern: Option<Regex>,
}

/// Validates records against a set of column rules
#[derive(Debug)]
pub struct RecordValidator {
    rules: Vec<CompiledRule>,
    email: Regex,
}

impl RecordValidator {
    /// Compile `rules`; an invalid regex is a configuration error
    pub fn new(rules: &[ColumnRule]) -> Result<Self> {
        let compiled = rules
            .iter()
            .map(|rule| {
                let pattern = rule
                    .regex
                    .as_deref()
                    .map(|p| {
                        Regex::new(p).map_err(|e| {
                            Error::configuration(
                                "validation",
                                format!("invalid regex for column '{}': {e}", rule.column),
                            )
                        })
                    })
                    .transpose()?;
                Ok(CompiledRule {
                    rule: rule.clone(),
                    pattern,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let email = Regex::new(EMAIL_PATTERN)
            .map_err(|e| Error::configuration("validation", e.to_string()))?;

        Ok(Self {
            rules: compiled,
            email,
        })
    }

    /// Whether any rules are configured
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Check one record against every rule
    pub fn validate(&self, record: &Record) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::success();

        for CompiledRule { rule, pattern } in &self.rules {
            let column = &rule.column;
            let value = match record.text(column) {
                Some(v) if !v.trim().is_empty() => v,
                present => {
                    if rule.required {
                        outcome.add_error(format!("column '{column}' is required"));
                    } else if present.is_none() {
                        outcome.add_warning(format!("column '{column}' is missing"));
                    }
                    continue;
                }
            };
            let value = value.trim();

            if let Some(problem) = self.check_type(rule, value) {
                outcome.add_error(format!("column '{column}': {problem}"));
            }
            if let Some(pattern) = pattern.as_ref().filter(|p| !p.is_match(value)) {
                outcome.add_error(format!(
                    "column '{column}': '{value}' does not match /{}/",
                    pattern.as_str()
                ));
            }
        }

        outcome
    }

    fn check_type(&self, rule: &ColumnRule, value: &str) -> Option<String> {
        let ok = match rule.kind {
            ColumnType::String => true,
            ColumnType::Integer => value.parse::<i64>().is_ok(),
            ColumnType::Decimal => value.parse::<f64>().is_ok_and(f64::is_finite),
            ColumnType::Boolean => matches!(
                value.to_ascii_lowercase().as_str(),
                "true" | "false" | "yes" | "no" | "1" | "0"
            ),
            ColumnType::Date => {
                let format = rule.format.as_deref().unwrap_or(DEFAULT_DATE_FORMAT);
                NaiveDate::parse_from_str(value, format).is_ok()
            }
            ColumnType::Datetime => match rule.format.as_deref() {
                Some(format) => NaiveDateTime::parse_from_str(value, format).is_ok(),
                None => DateTime::parse_from_rfc3339(value).is_ok(),
            },
            ColumnType::Email => self.email.is_match(value),
        };
        (!ok).then(|| format!("'{value}' is not a valid {}", rule.kind.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Fields;
    use rstest::rstest;
    use serde_json::{Value, json};

    fn rule(column: &str, kind: ColumnType) -> ColumnRule {
        ColumnRule {
            column: column.to_string(),
            kind,
            regex: None,
            format: None,
            required: false,
        }
    }

    fn record_with(column: &str, value: Value) -> Record {
        let mut fields = Fields::new();
        fields.insert(column.to_string(), value);
        Record::new("1", fields)
    }

    #[rstest]
    #[case(ColumnType::Integer, json!("42"), true)]
    #[case(ColumnType::Integer, json!("4.2"), false)]
    #[case(ColumnType::Decimal, json!("4.2"), true)]
    #[case(ColumnType::Decimal, json!("abc"), false)]
    #[case(ColumnType::Boolean, json!("Yes"), true)]
    #[case(ColumnType::Boolean, json!("maybe"), false)]
    #[case(ColumnType::Date, json!("2024-02-29"), true)]
    #[case(ColumnType::Date, json!("2023-02-29"), false)]
    #[case(ColumnType::Datetime, json!("2024-01-01T10:00:00Z"), true)]
    #[case(ColumnType::Datetime, json!("yesterday"), false)]
    #[case(ColumnType::Email, json!("a@example.com"), true)]
    #[case(ColumnType::Email, json!("not-an-email"), false)]
    #[case(ColumnType::String, json!("anything"), true)]
    fn test_type_checks(#[case] kind: ColumnType, #[case] value: Value, #[case] valid: bool) {
        let validator = RecordValidator::new(&[rule("c", kind)]).unwrap();
        assert_eq!(validator.validate(&record_with("c", value)).valid, valid);
    }

    #[test]
    fn test_custom_date_format() {
        let mut r = rule("d", ColumnType::Date);
        r.format = Some("%d/%m/%Y".to_string());
        let validator = RecordValidator::new(&[r]).unwrap();
        assert!(validator.validate(&record_with("d", json!("31/12/2024"))).valid);
        assert!(!validator.validate(&record_with("d", json!("2024-12-31"))).valid);
    }

    #[test]
    fn test_required_and_optional_blanks() {
        let mut required = rule("name", ColumnType::String);
        required.required = true;
        let validator = RecordValidator::new(&[required]).unwrap();
        let outcome = validator.validate(&record_with("name", json!("  ")));
        assert!(!outcome.valid);
        assert_eq!(outcome.errors, vec!["column 'name' is required".to_string()]);

        let validator = RecordValidator::new(&[rule("age", ColumnType::Integer)]).unwrap();
        assert!(validator.validate(&record_with("age", json!(""))).valid);
        let outcome = validator.validate(&record_with("other", json!("x")));
        assert!(outcome.valid);
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn test_regex_rule() {
        let mut r = rule("code", ColumnType::String);
        r.regex = Some(r"^[A-Z]{3}-\d+$".to_string());
        let validator = RecordValidator::new(&[r]).unwrap();
        assert!(validator.validate(&record_with("code", json!("ABC-12"))).valid);
        assert!(!validator.validate(&record_with("code", json!("abc-12"))).valid);
    }

    #[test]
    fn test_bad_regex_is_configuration_error() {
        let mut r = rule("code", ColumnType::String);
        r.regex = Some("([".to_string());
        let err = RecordValidator::new(&[r]).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_collects_every_error() {
        let validator = RecordValidator::new(&[
            rule("age", ColumnType::Integer),
            rule("email", ColumnType::Email),
        ])
        .unwrap();
        let mut fields = Fields::new();
        fields.insert("age".into(), json!("old"));
        fields.insert("email".into(), json!("nope"));
        let outcome = validator.validate(&Record::new("1", fields));
        assert_eq!(outcome.errors.len(), 2);
    }

    #[test]
    fn test_rule_parses_from_yaml() {
        let rules: Vec<ColumnRule> =
            serde_yaml::from_str("- { column: email, type: email, required: true }\n- { column: note }")
                .unwrap();
        assert_eq!(rules[0].kind, ColumnType::Email);
        assert!(rules[0].required);
        assert_eq!(rules[1].kind, ColumnType::String);
    }
}
