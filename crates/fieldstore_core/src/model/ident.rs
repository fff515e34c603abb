//! Validated SQL identifiers for table and column names.
//!
//! # Responsibility
//! - Reject table/column names that are not plain SQL identifiers.
//! - Provide the only path by which dynamic names reach SQL text.
//!
//! # Invariants
//! - An `Identifier` always matches `^[A-Za-z_][A-Za-z0-9_]{0,63}$`.
//! - SQL text always embeds identifiers through `Identifier::quoted`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,63}$").expect("valid identifier regex"));
static LANGUAGE_CODE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z]{2,3}(-[A-Za-z0-9]{2,8})?$").expect("valid language code regex")
});

/// Returns whether `value` looks like a language code (`en`, `nl`, `pt-BR`).
pub fn is_language_code(value: &str) -> bool {
    LANGUAGE_CODE_RE.is_match(value)
}

/// Table or column name that passed allow-list validation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    /// Validates and wraps one identifier.
    pub fn new(value: impl Into<String>) -> Result<Self, IdentifierError> {
        let value = value.into();
        if value.is_empty() {
            return Err(IdentifierError::Empty);
        }
        if !IDENTIFIER_RE.is_match(&value) {
            return Err(IdentifierError::Invalid(value));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form used inside generated SQL.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Identifier {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for Identifier {
    type Error = IdentifierError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

/// Identifier validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    Empty,
    Invalid(String),
}

impl Display for IdentifierError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "identifier must not be empty"),
            Self::Invalid(value) => write!(f, "invalid sql identifier: `{value}`"),
        }
    }
}

impl Error for IdentifierError {}
