//! Field transform configuration
//!
//! Transforms run on records that passed filters and validation, in the
//! order they are declared. Each transform targets one field.
//!
//! # Built-in Transforms
//!
//! - `upper`, `lower`, `trim` - Text case and whitespace
//! - `replace` - Substring replacement
//! - `default` - Fill a missing or blank field
//! - `date_format` - Re-format a date between chrono patterns
//! - `template` - Jinja template rendered over the record fields
//! - `set` - Overwrite with a constant
//! - `rename` - Move a field to a new name
//! - `drop` - Remove a field
//!
//! # Example
//!
//! ```yaml
//! transforms:
//!   - { type: trim, field: email }
//!   - { type: lower, field: email }
//!   - { type: template, field: full_name, template: "{{ first_name }} {{ last_name }}" }
//!   - { type: date_format, field: signup, from: "%d/%m/%Y", to: "%Y-%m-%d" }
//!   - { type: drop, field: internal_notes }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One configured transform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Field the transform reads and writes
    pub field: String,

    /// What to do with it
    #[serde(flatten)]
    pub op: TransformOp,
}

impl TransformConfig {
    /// Create a transform for `field`
    pub fn new(field: impl Into<String>, op: TransformOp) -> Self {
        Self {
            field: field.into(),
            op,
        }
    }
}

/// Transform operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransformOp {
    /// Uppercase text
    Upper,
    /// Lowercase text
    Lower,
    /// Strip surrounding whitespace
    Trim,
    /// Replace every occurrence of `from` with `to`
    Replace {
        /// Substring to look for
        from: String,
        /// Replacement
        #[serde(default)]
        to: String,
    },
    /// Fill the field when it is missing or blank
    Default {
        /// Fill value
        value: Value,
    },
    /// Parse with `from` and re-render with `to` (chrono patterns)
    DateFormat {
        /// Input pattern
        from: String,
        /// Output pattern
        to: String,
    },
    /// Render a Jinja template with the record fields as context
    Template {
        /// Template source
        template: String,
    },
    /// Overwrite with a constant
    Set {
        /// New value
        value: Value,
    },
    /// Move the field to `to`
    Rename {
        /// New field name
        to: String,
    },
    /// Remove the field
    Drop,
}

impl TransformOp {
    /// Short name used in logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            TransformOp::Upper => "upper",
            TransformOp::Lower => "lower",
            TransformOp::Trim => "trim",
            TransformOp::Replace { .. } => "replace",
            TransformOp::Default { .. } => "default",
            TransformOp::DateFormat { .. } => "date_format",
            TransformOp::Template { .. } => "template",
            TransformOp::Set { .. } => "set",
            TransformOp::Rename { .. } => "rename",
            TransformOp::Drop => "drop",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_every_transform() {
        let yaml = r#"
- { type: upper, field: a }
- { type: lower, field: a }
- { type: trim, field: a }
- { type: replace, field: a, from: "-", to: "" }
- { type: default, field: a, value: unknown }
- { type: date_format, field: a, from: "%d/%m/%Y", to: "%Y-%m-%d" }
- { type: template, field: a, template: "{{ b }}" }
- { type: set, field: a, value: 3 }
- { type: rename, field: a, to: b }
- { type: drop, field: a }
"#;
        let transforms: Vec<TransformConfig> = serde_yaml::from_str(yaml).unwrap();
        let names: Vec<_> = transforms.iter().map(|t| t.op.name()).collect();
        assert_eq!(
            names,
            vec![
                "upper",
                "lower",
                "trim",
                "replace",
                "default",
                "date_format",
                "template",
                "set",
                "rename",
                "drop"
            ]
        );
        assert_eq!(transforms[7].op, TransformOp::Set { value: json!(3) });
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result: std::result::Result<Vec<TransformConfig>, _> =
            serde_yaml::from_str("- { type: explode, field: a }");
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_roundtrip_keeps_tag() {
        let t = TransformConfig::new("name", TransformOp::Rename { to: "full_name".into() });
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json, json!({"field": "name", "type": "rename", "to": "full_name"}));
    }
}
