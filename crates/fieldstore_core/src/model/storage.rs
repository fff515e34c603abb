//! Storage strategies describing where a field value physically lives.
//!
//! # Responsibility
//! - Define the closed set of storage strategies a field can use.
//! - Build the where-clause scope shared by one-to-one and many-to-many
//!   storage.
//!
//! # Invariants
//! - Every table/column name is a validated `Identifier`.
//! - A scope always contains the related field; it contains the language code
//!   field if and only if the storage is language scoped.

use crate::model::ident::{is_language_code, Identifier, IdentifierError};
use crate::model::value::StoredValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Column name → cell value, used for value sets and where clauses.
pub type ColumnMap = BTreeMap<Identifier, StoredValue>;

/// Errors raised while building field or storage definitions.
#[derive(Debug)]
pub enum FieldDefinitionError {
    /// A table or column name failed identifier validation.
    InvalidIdentifier {
        role: &'static str,
        source: IdentifierError,
    },
    /// A pinned language code is not a valid language tag.
    InvalidLanguageCode(String),
    /// A JSON field definition could not be parsed.
    Json(serde_json::Error),
}

impl Display for FieldDefinitionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidIdentifier { role, source } => write!(f, "invalid {role}: {source}"),
            Self::InvalidLanguageCode(value) => write!(f, "invalid language code: `{value}`"),
            Self::Json(err) => write!(f, "invalid field definition: {err}"),
        }
    }
}

impl Error for FieldDefinitionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidIdentifier { source, .. } => Some(source),
            Self::InvalidLanguageCode(_) => None,
            Self::Json(err) => Some(err),
        }
    }
}

impl From<serde_json::Error> for FieldDefinitionError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

pub(crate) fn identifier(
    role: &'static str,
    value: &str,
) -> Result<Identifier, FieldDefinitionError> {
    Identifier::new(value).map_err(|source| FieldDefinitionError::InvalidIdentifier { role, source })
}

/// How one field maps onto table rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldStorage {
    /// One row per scope in a side table; the field is one column of it.
    OneToOne(ScopedStorage),
    /// Orphan child rows adopted onto the edited entity.
    OneToMany(ChildStorage),
    /// Junction table rows, replaced as a whole on every store.
    ManyToMany(ScopedStorage),
}

/// Which strategy a storage uses, for logs and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    OneToOne,
    OneToMany,
    ManyToMany,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneToOne => "one_to_one",
            Self::OneToMany => "one_to_many",
            Self::ManyToMany => "many_to_many",
        }
    }
}

impl Display for StrategyKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FieldStorage {
    pub fn one_to_one(storage: ScopedStorage) -> Self {
        Self::OneToOne(storage)
    }

    pub fn one_to_many(storage: ChildStorage) -> Self {
        Self::OneToMany(storage)
    }

    pub fn many_to_many(storage: ScopedStorage) -> Self {
        Self::ManyToMany(storage)
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::OneToOne(_) => StrategyKind::OneToOne,
            Self::OneToMany(_) => StrategyKind::OneToMany,
            Self::ManyToMany(_) => StrategyKind::ManyToMany,
        }
    }

    /// Table holding the rows this storage reads and writes.
    pub fn table(&self) -> &Identifier {
        match self {
            Self::OneToOne(storage) | Self::ManyToMany(storage) => &storage.table,
            Self::OneToMany(storage) => &storage.table,
        }
    }

    /// Language code pinned on the storage, overriding the caller's.
    pub fn pinned_language(&self) -> Option<&str> {
        match self {
            Self::OneToOne(storage) | Self::ManyToMany(storage) => storage.language_code.as_deref(),
            Self::OneToMany(_) => None,
        }
    }
}

/// Table configuration shared by one-to-one and many-to-many storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopedStorage {
    pub(crate) table: Identifier,
    pub(crate) related_field: Identifier,
    #[serde(default)]
    pub(crate) default_values: ColumnMap,
    #[serde(default)]
    pub(crate) language_code_field: Option<Identifier>,
    #[serde(default)]
    pub(crate) language_code: Option<String>,
}

impl ScopedStorage {
    /// Creates storage on `table` whose rows point at the entity via `related_field`.
    pub fn new(table: &str, related_field: &str) -> Result<Self, FieldDefinitionError> {
        Ok(Self {
            table: identifier("table", table)?,
            related_field: identifier("related field", related_field)?,
            default_values: ColumnMap::new(),
            language_code_field: None,
            language_code: None,
        })
    }

    /// Adds a fixed column value that is part of every scope.
    pub fn with_default_value(
        mut self,
        column: &str,
        value: impl Into<StoredValue>,
    ) -> Result<Self, FieldDefinitionError> {
        self.default_values
            .insert(identifier("default value column", column)?, value.into());
        Ok(self)
    }

    /// Scopes rows by language, stored in `language_code_field`.
    pub fn scoped_by_language(
        mut self,
        language_code_field: &str,
    ) -> Result<Self, FieldDefinitionError> {
        self.language_code_field = Some(identifier("language code field", language_code_field)?);
        Ok(self)
    }

    /// Pins translation lookups for this storage to one language.
    pub fn with_pinned_language(mut self, code: &str) -> Result<Self, FieldDefinitionError> {
        if !is_language_code(code) {
            return Err(FieldDefinitionError::InvalidLanguageCode(code.to_string()));
        }
        self.language_code = Some(code.to_string());
        Ok(self)
    }

    pub fn table(&self) -> &Identifier {
        &self.table
    }

    pub fn related_field(&self) -> &Identifier {
        &self.related_field
    }

    pub fn default_values(&self) -> &ColumnMap {
        &self.default_values
    }

    pub fn language_code_field(&self) -> Option<&Identifier> {
        self.language_code_field.as_ref()
    }

    pub fn is_language_scoped(&self) -> bool {
        self.language_code_field.is_some()
    }

    /// Builds `default_values ∪ {related_field: relation_id} [∪ {lang_field: lang}]`.
    ///
    /// `language_code` is only consulted for language-scoped storage.
    pub fn scope(&self, relation_id: i64, language_code: Option<&str>) -> ColumnMap {
        let mut scope = self.default_values.clone();
        scope.insert(self.related_field.clone(), StoredValue::Integer(relation_id));
        if let Some(field) = &self.language_code_field {
            scope.insert(field.clone(), StoredValue::from(language_code));
        }
        scope
    }
}

/// Child table whose rows are adopted onto a parent entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildStorage {
    pub(crate) table: Identifier,
    pub(crate) parent_relation_key: Identifier,
}

impl ChildStorage {
    pub fn new(table: &str, parent_relation_key: &str) -> Result<Self, FieldDefinitionError> {
        Ok(Self {
            table: identifier("table", table)?,
            parent_relation_key: identifier("parent relation key", parent_relation_key)?,
        })
    }

    pub fn table(&self) -> &Identifier {
        &self.table
    }

    pub fn parent_relation_key(&self) -> &Identifier {
        &self.parent_relation_key
    }
}

#[cfg(test)]
mod tests {
    use super::{ChildStorage, FieldDefinitionError, FieldStorage, ScopedStorage, StrategyKind};
    use crate::model::value::StoredValue;

    #[test]
    fn scope_combines_defaults_relation_and_language() {
        let storage = ScopedStorage::new("page_language", "page_id")
            .unwrap()
            .with_default_value("kind", "title")
            .unwrap()
            .scoped_by_language("lang")
            .unwrap();

        let scope = storage.scope(7, Some("en"));
        assert_eq!(scope.len(), 3);
        let values: Vec<(&str, &StoredValue)> =
            scope.iter().map(|(k, v)| (k.as_str(), v)).collect();
        assert_eq!(
            values,
            vec![
                ("kind", &StoredValue::from("title")),
                ("lang", &StoredValue::from("en")),
                ("page_id", &StoredValue::Integer(7)),
            ]
        );
    }

    #[test]
    fn builder_records_storage_configuration() {
        let storage = ScopedStorage::new("page_tag", "page_id")
            .unwrap()
            .with_default_value("kind", 2_i64)
            .unwrap();
        assert_eq!(storage.table().as_str(), "page_tag");
        assert_eq!(storage.related_field().as_str(), "page_id");
        assert_eq!(storage.language_code_field(), None);
        assert!(!storage.is_language_scoped());
        assert_eq!(storage.default_values().len(), 1);

        let storage = storage.scoped_by_language("lang").unwrap();
        assert_eq!(
            storage.language_code_field().map(|field| field.as_str()),
            Some("lang")
        );
        assert!(storage.is_language_scoped());
    }

    #[test]
    fn language_is_ignored_when_not_scoped() {
        let storage = ScopedStorage::new("page_tag", "page_id").unwrap();
        assert_eq!(storage.scope(1, Some("en")).len(), 1);
    }

    #[test]
    fn rejects_invalid_names_and_language_codes() {
        let err = ScopedStorage::new("page; --", "page_id").unwrap_err();
        assert!(matches!(
            err,
            FieldDefinitionError::InvalidIdentifier { role: "table", .. }
        ));
        assert!(ChildStorage::new("block", "").is_err());
        assert!(matches!(
            ScopedStorage::new("page", "id")
                .unwrap()
                .with_pinned_language("ENGLISH"),
            Err(FieldDefinitionError::InvalidLanguageCode(_))
        ));
    }

    #[test]
    fn deserializes_tagged_storage() {
        let storage: FieldStorage = serde_json::from_str(
            r#"{"type":"many_to_many","table":"page_tag","related_field":"page_id",
                "default_values":{"kind":"main"},"language_code_field":"lang"}"#,
        )
        .unwrap();
        assert_eq!(storage.kind(), StrategyKind::ManyToMany);
        assert_eq!(storage.table().as_str(), "page_tag");

        let child: FieldStorage = serde_json::from_str(
            r#"{"type":"one_to_many","table":"block","parent_relation_key":"page_id"}"#,
        )
        .unwrap();
        assert_eq!(child.kind(), StrategyKind::OneToMany);
        assert_eq!(child.pinned_language(), None);

        assert!(serde_json::from_str::<FieldStorage>(
            r#"{"type":"one_to_one","table":"bad table","related_field":"id"}"#
        )
        .is_err());
    }
}
