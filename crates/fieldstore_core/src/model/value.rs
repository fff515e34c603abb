//! Field values as received from forms and as written to storage.
//!
//! # Responsibility
//! - Model dynamic form input (`FieldValue`) without compile-time typing.
//! - Convert input into a SQL scalar (`StoredValue`) before persistence.
//!
//! # Invariants
//! - `StoredValue` never carries nested data; lists and objects are stored as
//!   JSON text.
//! - Emptiness follows form semantics: null, `false`, `0`, `""`, `"0"` and the
//!   empty list are all empty.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// One SQL scalar as read from or written to a table cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl StoredValue {
    /// Interprets this cell as a positive integer id.
    ///
    /// Numeric text is accepted because some schemas keep ids in text columns.
    pub fn as_id(&self) -> Option<i64> {
        match self {
            Self::Integer(value) if *value > 0 => Some(*value),
            Self::Text(value) => value.trim().parse::<i64>().ok().filter(|id| *id > 0),
            _ => None,
        }
    }
}

impl Display for StoredValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Real(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value}"),
        }
    }
}

impl From<i64> for StoredValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for StoredValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for StoredValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<StoredValue>> From<Option<T>> for StoredValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Raw value submitted for one field by the form layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// Builds a list value from anything convertible into field values.
    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<FieldValue>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// Returns whether the form layer considers this value empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Bool(value) => !value,
            Self::Integer(value) => *value == 0,
            Self::Real(value) => *value == 0.0,
            Self::Text(value) => value.is_empty() || value == "0",
            Self::List(items) => items.is_empty(),
        }
    }

    /// Converts this input into the scalar written to a table cell.
    pub fn to_storage(&self) -> StoredValue {
        match self {
            Self::Null => StoredValue::Null,
            Self::Bool(value) => StoredValue::Integer(i64::from(*value)),
            Self::Integer(value) => StoredValue::Integer(*value),
            Self::Real(value) => StoredValue::Real(*value),
            Self::Text(value) => StoredValue::Text(value.clone()),
            Self::List(_) => StoredValue::Text(serde_json::Value::from(self).to_string()),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<StoredValue> for FieldValue {
    fn from(value: StoredValue) -> Self {
        match value {
            StoredValue::Null => Self::Null,
            StoredValue::Integer(value) => Self::Integer(value),
            StoredValue::Real(value) => Self::Real(value),
            StoredValue::Text(value) => Self::Text(value),
        }
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(value) => Self::Bool(value),
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(value) => Self::Integer(value),
                None => Self::Real(number.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(value) => Self::Text(value),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Self::from).collect())
            }
            // Objects have no field-level meaning; keep them as JSON text.
            object @ serde_json::Value::Object(_) => Self::Text(object.to_string()),
        }
    }
}

impl From<&FieldValue> for serde_json::Value {
    fn from(value: &FieldValue) -> Self {
        match value {
            FieldValue::Null => serde_json::Value::Null,
            FieldValue::Bool(value) => serde_json::Value::Bool(*value),
            FieldValue::Integer(value) => serde_json::Value::from(*value),
            FieldValue::Real(value) => serde_json::Value::from(*value),
            FieldValue::Text(value) => serde_json::Value::String(value.clone()),
            FieldValue::List(items) => {
                serde_json::Value::Array(items.iter().map(serde_json::Value::from).collect())
            }
        }
    }
}
