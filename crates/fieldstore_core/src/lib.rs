//! Field-to-storage mapping engine.
//!
//! Lets a generic form layer store and retrieve field values without knowing
//! whether a value lives in a side table, adopted child rows, a junction
//! table, or behind a shared translation key.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, StorageConfig};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::field::Field;
pub use model::ident::{Identifier, IdentifierError};
pub use model::storage::{
    ChildStorage, ColumnMap, FieldDefinitionError, FieldStorage, ScopedStorage, StrategyKind,
};
pub use model::value::{FieldValue, StoredValue};
pub use repo::table_repo::{RepoError, RepoResult, SqliteTableRepository, TableRepository};
pub use repo::translation_repo::{
    SqliteTranslationRepository, TranslationError, TranslationKeyId, TranslationResolver,
    TranslationResult,
};
pub use service::field_storage_service::{
    EditId, FieldStorageError, FieldStorageResult, FieldStorageService, Retrieved, StoreReport,
};

/// Minimal health-check API for integration probes.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
