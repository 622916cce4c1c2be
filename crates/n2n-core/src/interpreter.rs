//! Transform interpreter
//!
//! Applies configured transforms to record fields. Templates and date
//! patterns are checked once, when the interpreter is built, so a typo
//! surfaces as a configuration error before any record is read.

use chrono::format::{Item, StrftimeItems};
use chrono::{NaiveDate, NaiveDateTime};
use minijinja::Environment;
use serde_json::Value;
use std::fmt::Write;

use crate::error::{Error, Result};
use crate::record::{Fields, Record, value_as_text};
use crate::transforms::{TransformConfig, TransformOp};

/// Compiled list of transforms
#[derive(Debug)]
pub struct Interpreter {
    transforms: Vec<TransformConfig>,
    env: Environment<'static>,
}

fn check_pattern(pattern: &str, field: &str) -> Result<()> {
    if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        return Err(Error::configuration(
            "transforms",
            format!("invalid date pattern '{pattern}' for field '{field}'"),
        ));
    }
    Ok(())
}

fn transform_error(op: &TransformOp, field: &str, message: impl std::fmt::Display) -> Error {
    Error::Transform {
        transform: format!("{}({field})", op.name()),
        message: message.to_string(),
    }
}

impl Interpreter {
    /// Check and keep `transforms`
    pub fn new(transforms: &[TransformConfig]) -> Result<Self> {
        let checker = Environment::new();
        for t in transforms {
            match &t.op {
                TransformOp::Template { template } => {
                    checker.template_from_str(template).map_err(|e| {
                        Error::configuration(
                            "transforms",
                            format!("invalid template for field '{}': {e}", t.field),
                        )
                    })?;
                }
                TransformOp::DateFormat { from, to } => {
                    check_pattern(from, &t.field)?;
                    check_pattern(to, &t.field)?;
                }
                TransformOp::Rename { to } if to.is_empty() => {
                    return Err(Error::configuration(
                        "transforms",
                        format!("rename of '{}' needs a target name", t.field),
                    ));
                }
                _ => {}
            }
        }
        Ok(Self {
            transforms: transforms.to_vec(),
            env: Environment::new(),
        })
    }

    /// Whether there is nothing to apply
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Apply every transform in order
    pub fn apply(&self, mut record: Record) -> Result<Record> {
        for t in &self.transforms {
            self.apply_one(&mut record.fields, t)?;
        }
        Ok(record)
    }

    fn apply_one(&self, fields: &mut Fields, t: &TransformConfig) -> Result<()> {
        let field = t.field.as_str();
        match &t.op {
            TransformOp::Upper => map_text(fields, field, |s| s.to_uppercase()),
            TransformOp::Lower => map_text(fields, field, |s| s.to_lowercase()),
            TransformOp::Trim => map_text(fields, field, |s| s.trim().to_string()),
            TransformOp::Replace { from, to } => {
                if !from.is_empty() {
                    map_text(fields, field, |s| s.replace(from.as_str(), to));
                }
            }
            TransformOp::Default { value } => {
                let blank = fields
                    .get(field)
                    .is_none_or(|v| value_as_text(v).trim().is_empty());
                if blank {
                    fields.insert(field.to_string(), value.clone());
                }
            }
            TransformOp::DateFormat { from, to } => {
                let Some(text) = fields.get(field).map(value_as_text) else {
                    return Ok(());
                };
                if text.trim().is_empty() {
                    return Ok(());
                }
                let formatted = reformat_date(text.trim(), from, to)
                    .map_err(|e| transform_error(&t.op, field, e))?;
                fields.insert(field.to_string(), Value::String(formatted));
            }
            TransformOp::Template { template } => {
                let rendered = self
                    .env
                    .render_str(template, &*fields)
                    .map_err(|e| transform_error(&t.op, field, e))?;
                fields.insert(field.to_string(), Value::String(rendered));
            }
            TransformOp::Set { value } => {
                fields.insert(field.to_string(), value.clone());
            }
            TransformOp::Rename { to } => {
                if let Some(value) = fields.remove(field) {
                    fields.insert(to.clone(), value);
                }
            }
            TransformOp::Drop => {
                fields.remove(field);
            }
        }
        Ok(())
    }
}

/// Rewrite a text field; missing and null fields are left alone
fn map_text(fields: &mut Fields, field: &str, f: impl FnOnce(&str) -> String) {
    if let Some(value) = fields.get_mut(field) {
        if value.is_null() {
            return;
        }
        let text = value_as_text(value);
        *value = Value::String(f(&text));
    }
}

fn reformat_date(text: &str, from: &str, to: &str) -> std::result::Result<String, String> {
    let mut out = String::new();
    let written = if let Ok(dt) = NaiveDateTime::parse_from_str(text, from) {
        write!(out, "{}", dt.format(to))
    } else {
        let date = NaiveDate::parse_from_str(text, from)
            .map_err(|e| format!("'{text}' does not match '{from}': {e}"))?;
        write!(out, "{}", date.format(to))
    };
    written.map_err(|_| format!("'{to}' cannot render '{text}'"))?;
    Ok(out)
}
