//! Values carried by tag updates and writes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A tag value.
///
/// Serialized untagged: scalars travel as bare JSON scalars, enums as
/// `{"index": n, "choices": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Int(i64),
    Double(f64),
    Text(String),
    Enum { index: u32, choices: Vec<String> },
}

/// Errors converting a requested value to a tag's native shape.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValueError {
    #[error("cannot convert '{value}' to {target}")]
    Unconvertible { value: String, target: &'static str },

    #[error("enum index {index} out of range (0..{len})")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("non-finite number {0}")]
    NonFinite(f64),
}

impl TagValue {
    /// Short type name used in error messages and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TagValue::Int(_) => "int",
            TagValue::Double(_) => "double",
            TagValue::Text(_) => "text",
            TagValue::Enum { .. } => "enum",
        }
    }

    /// Convert `self` into the shape of `template`, the tag's current value.
    ///
    /// Enum targets keep the template's choice list and accept either an
    /// index or the text of one of the choices.
    pub fn coerce_like(&self, template: &TagValue) -> Result<TagValue, ValueError> {
        match template {
            TagValue::Int(_) => self.to_int().map(TagValue::Int),
            TagValue::Double(_) => self.to_double().map(TagValue::Double),
            TagValue::Text(_) => Ok(TagValue::Text(self.to_string())),
            TagValue::Enum { choices, .. } => {
                let index = match self {
                    TagValue::Text(s) => match choices.iter().position(|c| c == s.trim()) {
                        Some(pos) => pos as i64,
                        None => self.to_int()?,
                    },
                    _ => self.to_int()?,
                };
                if index < 0 || index as usize >= choices.len() {
                    return Err(ValueError::IndexOutOfRange {
                        index,
                        len: choices.len(),
                    });
                }
                Ok(TagValue::Enum {
                    index: index as u32,
                    choices: choices.clone(),
                })
            }
        }
    }

    fn to_int(&self) -> Result<i64, ValueError> {
        match self {
            TagValue::Int(i) => Ok(*i),
            TagValue::Double(d) if !d.is_finite() => Err(ValueError::NonFinite(*d)),
            TagValue::Double(d) => Ok(d.trunc() as i64),
            TagValue::Text(s) => s.trim().parse().map_err(|_| ValueError::Unconvertible {
                value: s.clone(),
                target: "int",
            }),
            TagValue::Enum { index, .. } => Ok(i64::from(*index)),
        }
    }

    fn to_double(&self) -> Result<f64, ValueError> {
        match self {
            TagValue::Int(i) => Ok(*i as f64),
            TagValue::Double(d) => Ok(*d),
            TagValue::Text(s) => s.trim().parse().map_err(|_| ValueError::Unconvertible {
                value: s.clone(),
                target: "double",
            }),
            TagValue::Enum { index, .. } => Ok(f64::from(*index)),
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Int(i) => write!(f, "{i}"),
            TagValue::Double(d) => write!(f, "{d}"),
            TagValue::Text(s) => f.write_str(s),
            TagValue::Enum { index, choices } => match choices.get(*index as usize) {
                Some(label) => f.write_str(label),
                None => write!(f, "{index}"),
            },
        }
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        TagValue::Int(v)
    }
}

impl From<f64> for TagValue {
    fn from(v: f64) -> Self {
        TagValue::Double(v)
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        TagValue::Text(v.to_string())
    }
}

impl From<String> for TagValue {
    fn from(v: String) -> Self {
        TagValue::Text(v)
    }
}
