//! SQLite connection bootstrap and schema migrations.
//!
//! # Responsibility
//! - Open and configure SQLite connections used by the storage engine.
//! - Apply the translation schema before any field is stored.
//!
//! # Invariants
//! - Schema version is tracked via `PRAGMA user_version`.
//! - Connections are only handed out after migrations succeed.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory, open_db_with_config};

pub type DbResult<T> = Result<T, DbError>;

/// Errors from opening a connection or migrating the translation schema.
#[derive(Debug)]
pub enum DbError {
    /// SQLite failure outside of a migration step.
    Sqlite(rusqlite::Error),
    /// A translation schema migration step failed; nothing of it was applied.
    MigrationFailed {
        version: u32,
        name: &'static str,
        source: rusqlite::Error,
    },
    /// The database carries a translation schema this build does not know.
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "sqlite error: {err}"),
            Self::MigrationFailed {
                version,
                name,
                source,
            } => write!(f, "schema migration {version} ({name}) failed: {source}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "translation schema version {db_version} is newer than this build supports ({latest_supported})"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) | Self::MigrationFailed { source: err, .. } => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
