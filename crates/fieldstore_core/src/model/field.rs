//! Field descriptor: one logical value slot on an entity.

use crate::model::ident::{is_language_code, Identifier};
use crate::model::storage::{identifier, FieldDefinitionError, FieldStorage};
use serde::{Deserialize, Serialize};

/// One logical value slot and the storage that backs it.
///
/// Built by the form-definition layer and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    column: Identifier,
    #[serde(default)]
    key: Option<Identifier>,
    storage: FieldStorage,
}

impl Field {
    pub fn new(column: &str, storage: FieldStorage) -> Result<Self, FieldDefinitionError> {
        Ok(Self {
            column: identifier("column", column)?,
            key: None,
            storage,
        })
    }

    /// Sets the column holding associated ids (many-to-many).
    pub fn with_key(mut self, key: &str) -> Result<Self, FieldDefinitionError> {
        self.key = Some(identifier("key", key)?);
        Ok(self)
    }

    /// Parses and validates a JSON field definition.
    pub fn from_json(input: &str) -> Result<Self, FieldDefinitionError> {
        let field: Self = serde_json::from_str(input)?;
        if let Some(code) = field.storage.pinned_language() {
            if !is_language_code(code) {
                return Err(FieldDefinitionError::InvalidLanguageCode(code.to_string()));
            }
        }
        Ok(field)
    }

    pub fn column(&self) -> &Identifier {
        &self.column
    }

    /// Key column; falls back to `column` when not set.
    pub fn key(&self) -> &Identifier {
        self.key.as_ref().unwrap_or(&self.column)
    }

    pub fn storage(&self) -> &FieldStorage {
        &self.storage
    }
}
