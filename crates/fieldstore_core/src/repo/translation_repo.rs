//! Translation key resolver contract and SQLite implementation.
//!
//! # Responsibility
//! - Allocate translation keys shared by all language variants of one text.
//! - Read and write localized values per key and language.
//!
//! # Invariants
//! - Key ids are never reused; allocation always creates a new row.
//! - At most one value exists per `(key_id, language_code)`.
//! - Resolution falls back to the configured fallback language only when the
//!   requested language has no value.

use crate::config::StorageConfig;
use crate::repo::table_repo::RepoError;
use rusqlite::{params, Connection, OptionalExtension};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Opaque id shared by all language variants of one localized value.
pub type TranslationKeyId = i64;

pub type TranslationResult<T> = Result<T, TranslationError>;

/// Error returned by translation resolvers.
#[derive(Debug)]
pub enum TranslationError {
    UnknownKey(TranslationKeyId),
    Repo(RepoError),
}

impl Display for TranslationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownKey(key_id) => write!(f, "translation key not found: {key_id}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for TranslationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::UnknownKey(_) => None,
            Self::Repo(err) => Some(err),
        }
    }
}

impl From<RepoError> for TranslationError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<rusqlite::Error> for TranslationError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(RepoError::from(value))
    }
}

/// Narrow contract for translation key allocation and lookup.
pub trait TranslationResolver {
    /// Allocates a new, never used key id.
    fn allocate_key(&self) -> TranslationResult<TranslationKeyId>;
    /// Resolves the value of `key_id` in `language_code`, with fallback.
    fn resolve_value(
        &self,
        key_id: TranslationKeyId,
        language_code: &str,
    ) -> TranslationResult<Option<String>>;
    /// Sets (or clears, with `None`) the value of `key_id` in `language_code`.
    fn save_value(
        &self,
        key_id: TranslationKeyId,
        language_code: &str,
        value: Option<&str>,
    ) -> TranslationResult<()>;
}

/// SQLite-backed translation resolver over `translation_keys`/`translation_values`.
pub struct SqliteTranslationRepository<'conn> {
    conn: &'conn Connection,
    fallback_language_code: Option<String>,
}

impl<'conn> SqliteTranslationRepository<'conn> {
    /// Creates a resolver without language fallback.
    pub fn new(conn: &'conn Connection) -> Self {
        Self {
            conn,
            fallback_language_code: None,
        }
    }

    /// Creates a resolver using the fallback language from `config`.
    pub fn with_config(conn: &'conn Connection, config: &StorageConfig) -> Self {
        Self {
            conn,
            fallback_language_code: config.fallback_language_code.clone(),
        }
    }

    fn value_in(
        &self,
        key_id: TranslationKeyId,
        language_code: &str,
    ) -> TranslationResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value
                 FROM translation_values
                 WHERE key_id = ?1 AND language_code = ?2;",
                params![key_id, language_code],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(value.flatten())
    }

    fn key_exists(&self, key_id: TranslationKeyId) -> TranslationResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM translation_keys WHERE id = ?1);",
            [key_id],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }
}

impl TranslationResolver for SqliteTranslationRepository<'_> {
    fn allocate_key(&self) -> TranslationResult<TranslationKeyId> {
        self.conn
            .execute("INSERT INTO translation_keys DEFAULT VALUES;", [])?;
        Ok(self.conn.last_insert_rowid())
    }

    fn resolve_value(
        &self,
        key_id: TranslationKeyId,
        language_code: &str,
    ) -> TranslationResult<Option<String>> {
        if let Some(value) = self.value_in(key_id, language_code)? {
            return Ok(Some(value));
        }

        match self.fallback_language_code.as_deref() {
            Some(fallback) if fallback != language_code => self.value_in(key_id, fallback),
            _ => Ok(None),
        }
    }

    fn save_value(
        &self,
        key_id: TranslationKeyId,
        language_code: &str,
        value: Option<&str>,
    ) -> TranslationResult<()> {
        if !self.key_exists(key_id)? {
            return Err(TranslationError::UnknownKey(key_id));
        }

        self.conn.execute(
            "INSERT INTO translation_values (key_id, language_code, value)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (key_id, language_code) DO UPDATE SET value = excluded.value;",
            params![key_id, language_code, value],
        )?;
        Ok(())
    }
}
