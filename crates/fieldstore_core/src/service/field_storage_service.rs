//! Field storage use-case service.
//!
//! # Responsibility
//! - Pick the storage strategy of a field and run its store/retrieve algorithm.
//! - Resolve translation keys for translated fields.
//!
//! # Invariants
//! - Dispatch is an exhaustive match over `FieldStorage`.
//! - One-to-one storage keeps at most one row per scope.
//! - Many-to-many storage leaves exactly the input ids in the scope, in input
//!   order and without de-duplication.
//! - One-to-many storage never deletes rows and only re-parents orphans.
//! - A translation key stored on an entity row is reused, never regenerated.
//! - Field values are never logged.

use crate::config::StorageConfig;
use crate::model::field::Field;
use crate::model::ident::Identifier;
use crate::model::storage::{ChildStorage, ColumnMap, FieldStorage, ScopedStorage, StrategyKind};
use crate::model::value::{FieldValue, StoredValue};
use crate::repo::table_repo::{RepoError, TableRepository};
use crate::repo::translation_repo::{TranslationError, TranslationKeyId, TranslationResolver};
use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

static PRIMARY_KEY: Lazy<Identifier> =
    Lazy::new(|| Identifier::new("id").expect("`id` is a valid identifier"));

pub type FieldStorageResult<T> = Result<T, FieldStorageError>;

/// Primary key of the entity being edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditId {
    /// The entity has not been persisted yet.
    New,
    Existing(i64),
}

impl EditId {
    /// Maps absent or non-positive raw ids to `New`.
    pub fn from_raw(raw: Option<i64>) -> Self {
        match raw {
            Some(id) if id > 0 => Self::Existing(id),
            _ => Self::New,
        }
    }

    pub fn id(self) -> Option<i64> {
        match self {
            Self::New => None,
            Self::Existing(id) => Some(id),
        }
    }
}

impl From<i64> for EditId {
    fn from(value: i64) -> Self {
        Self::from_raw(Some(value))
    }
}

/// Errors from field storage operations.
#[derive(Debug)]
pub enum FieldStorageError {
    /// The operation does not apply to the field's storage strategy.
    UnsupportedStorage {
        operation: &'static str,
        strategy: StrategyKind,
    },
    /// The value or parameters have the wrong shape for the strategy.
    InvalidArgument(String),
    /// Data-access failure, unchanged.
    DataAccess(RepoError),
    /// Translation resolver failure, unchanged.
    Translation(TranslationError),
    /// A multi-statement store failed after changing storage.
    ///
    /// `applied` of `requested` rows were written; earlier statements of the
    /// store (such as the many-to-many scope delete) are not undone.
    PartialWrite {
        strategy: StrategyKind,
        table: Identifier,
        applied: usize,
        requested: usize,
        source: RepoError,
    },
}

impl FieldStorageError {
    /// Collapses a partial write into its underlying data-access failure.
    ///
    /// Used once a unit of work was rolled back and nothing stayed applied.
    fn rolled_back(self) -> Self {
        match self {
            Self::PartialWrite { source, .. } => Self::DataAccess(source),
            other => other,
        }
    }
}

impl Display for FieldStorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedStorage {
                operation,
                strategy,
            } => write!(f, "{operation} is not supported for {strategy} storage"),
            Self::InvalidArgument(message) => write!(f, "invalid argument: {message}"),
            Self::DataAccess(err) => write!(f, "{err}"),
            Self::Translation(err) => write!(f, "{err}"),
            Self::PartialWrite {
                strategy,
                table,
                applied,
                requested,
                source,
            } => write!(
                f,
                "partial {strategy} write on `{table}`: {applied} of {requested} rows applied: {source}"
            ),
        }
    }
}

impl Error for FieldStorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::DataAccess(err) => Some(err),
            Self::Translation(err) => Some(err),
            Self::PartialWrite { source, .. } => Some(source),
            Self::UnsupportedStorage { .. } | Self::InvalidArgument(_) => None,
        }
    }
}

impl From<RepoError> for FieldStorageError {
    fn from(value: RepoError) -> Self {
        Self::DataAccess(value)
    }
}

impl From<TranslationError> for FieldStorageError {
    fn from(value: TranslationError) -> Self {
        Self::Translation(value)
    }
}

/// Outcome of a successful store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreReport {
    pub strategy: StrategyKind,
    /// Rows inserted, updated or adopted.
    pub rows_written: usize,
    /// One-to-many candidates that were not orphans and were left untouched.
    pub skipped: Vec<i64>,
}

impl StoreReport {
    fn written(strategy: StrategyKind, rows_written: usize) -> Self {
        Self {
            strategy,
            rows_written,
            skipped: Vec::new(),
        }
    }
}

/// Value read back for one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Retrieved {
    /// One-to-one cell value; `None` when no row exists for the scope.
    Value(Option<StoredValue>),
    /// Associated (many-to-many) or child (one-to-many) ids.
    Ids(Vec<StoredValue>),
}

/// Stores and retrieves field values through their storage strategy.
pub struct FieldStorageService<R: TableRepository, T: TranslationResolver> {
    repo: R,
    translations: T,
    config: StorageConfig,
}

impl<R: TableRepository, T: TranslationResolver> FieldStorageService<R, T> {
    /// Creates a service with default configuration.
    pub fn new(repo: R, translations: T) -> Self {
        Self::with_config(repo, translations, StorageConfig::default())
    }

    pub fn with_config(repo: R, translations: T, config: StorageConfig) -> Self {
        Self {
            repo,
            translations,
            config,
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Stores `value` for `field` on the entity `edit_id`.
    ///
    /// # Contract
    /// - One-to-one: `value` is written to the field column of the scope row.
    /// - One-to-many: `value` is the candidate orphan id collection to adopt.
    /// - Many-to-many: `value` is the full id collection for the scope.
    /// - `language_code` is required for language-scoped storage.
    ///
    /// # Errors
    /// - `InvalidArgument` for a new entity, a missing language code, or a
    ///   value of the wrong shape.
    /// - `PartialWrite` when a multi-statement store failed midway.
    /// - `DataAccess` for any other repository failure.
    pub fn store(
        &self,
        field: &Field,
        value: &FieldValue,
        edit_id: EditId,
        language_code: Option<&str>,
    ) -> FieldStorageResult<StoreReport> {
        let strategy = field.storage().kind();
        let relation_id = edit_id.id().ok_or_else(|| {
            FieldStorageError::InvalidArgument(format!(
                "{strategy} store on `{}` requires a persisted edit id",
                field.column()
            ))
        })?;

        let started_at = Instant::now();
        let result = self.in_unit_of_work(|| match field.storage() {
            FieldStorage::OneToOne(storage) => {
                self.store_one_to_one(field, storage, value, relation_id, language_code)
            }
            FieldStorage::OneToMany(storage) => self.store_one_to_many(storage, value, relation_id),
            FieldStorage::ManyToMany(storage) => {
                self.store_many_to_many(field, storage, value, relation_id, language_code)
            }
        });

        match &result {
            Ok(report) => info!(
                "event=field_store module=field_storage status=ok strategy={strategy} table={} column={} rows={} skipped={} duration_ms={}",
                field.storage().table(),
                field.column(),
                report.rows_written,
                report.skipped.len(),
                started_at.elapsed().as_millis()
            ),
            Err(FieldStorageError::PartialWrite {
                applied, requested, ..
            }) => warn!(
                "event=field_store module=field_storage status=partial strategy={strategy} table={} column={} applied={applied} requested={requested}",
                field.storage().table(),
                field.column()
            ),
            Err(err) => error!(
                "event=field_store module=field_storage status=error strategy={strategy} table={} column={} error={err}",
                field.storage().table(),
                field.column()
            ),
        }

        result
    }

    /// Reads the value of `field` for entity `id`, whatever its strategy.
    pub fn retrieve(
        &self,
        field: &Field,
        id: i64,
        language_code: Option<&str>,
    ) -> FieldStorageResult<Retrieved> {
        match field.storage() {
            FieldStorage::OneToOne(_) => self
                .retrieve_one_to_one(field, id, language_code)
                .map(Retrieved::Value),
            FieldStorage::OneToMany(_) => self.retrieve_one_to_many(field, id).map(Retrieved::Ids),
            FieldStorage::ManyToMany(_) => self
                .retrieve_many_to_many(field, id, language_code)
                .map(Retrieved::Ids),
        }
    }

    /// Reads the field column of the one-to-one scope row, if any.
    pub fn retrieve_one_to_one(
        &self,
        field: &Field,
        id: i64,
        language_code: Option<&str>,
    ) -> FieldStorageResult<Option<StoredValue>> {
        let FieldStorage::OneToOne(storage) = field.storage() else {
            return Err(unsupported("retrieve_one_to_one", field));
        };
        let scope = scope_for(storage, id, language_code)?;
        Ok(self
            .repo
            .select_scalar(storage.table(), field.column(), &scope)?)
    }

    /// Reads the ids of child rows adopted by entity `id`.
    pub fn retrieve_one_to_many(
        &self,
        field: &Field,
        id: i64,
    ) -> FieldStorageResult<Vec<StoredValue>> {
        let FieldStorage::OneToMany(storage) = field.storage() else {
            return Err(unsupported("retrieve_one_to_many", field));
        };
        let mut filter = ColumnMap::new();
        filter.insert(
            storage.parent_relation_key().clone(),
            StoredValue::Integer(id),
        );
        Ok(self
            .repo
            .select_column(storage.table(), &PRIMARY_KEY, &filter)?)
    }

    /// Reads the ids associated with entity `id`, in storage order.
    pub fn retrieve_many_to_many(
        &self,
        field: &Field,
        id: i64,
        language_code: Option<&str>,
    ) -> FieldStorageResult<Vec<StoredValue>> {
        let FieldStorage::ManyToMany(storage) = field.storage() else {
            return Err(unsupported("retrieve_many_to_many", field));
        };
        let scope = scope_for(storage, id, language_code)?;
        Ok(self.repo.select_column(storage.table(), field.key(), &scope)?)
    }

    /// Returns the translation key of `field` for entity `relation`.
    ///
    /// A new entity always gets a freshly allocated key. An existing entity
    /// reuses the key stored in the field column, or gets a new one when the
    /// column is empty.
    pub fn get_translation_key_id(
        &self,
        field: &Field,
        relation: EditId,
    ) -> FieldStorageResult<TranslationKeyId> {
        if let Some(relation_id) = relation.id() {
            let mut filter = ColumnMap::new();
            filter.insert(PRIMARY_KEY.clone(), StoredValue::Integer(relation_id));
            let stored = self
                .repo
                .select_scalar(field.storage().table(), field.column(), &filter)?;

            if let Some(key_id) = stored.as_ref().and_then(StoredValue::as_id) {
                debug!(
                    "event=translation_key module=field_storage status=reused table={} column={}",
                    field.storage().table(),
                    field.column()
                );
                return Ok(key_id);
            }
        }

        let key_id = self.translations.allocate_key()?;
        debug!(
            "event=translation_key module=field_storage status=allocated table={} column={}",
            field.storage().table(),
            field.column()
        );
        Ok(key_id)
    }

    /// Resolves the localized value of a translated field.
    ///
    /// A language code pinned on the storage overrides `language_code`.
    pub fn retrieve_translation(
        &self,
        field: &Field,
        id: EditId,
        language_code: Option<&str>,
    ) -> FieldStorageResult<Option<String>> {
        let language_code = translation_language(field, language_code)?;
        let key_id = self.get_translation_key_id(field, id)?;
        Ok(self.translations.resolve_value(key_id, language_code)?)
    }

    /// Saves the localized value of a translated field.
    ///
    /// The key id is written to the field column of an existing entity and
    /// returned, so callers creating a new entity can persist it themselves.
    pub fn store_translation(
        &self,
        field: &Field,
        value: Option<&str>,
        edit_id: EditId,
        language_code: Option<&str>,
    ) -> FieldStorageResult<TranslationKeyId> {
        let language_code = translation_language(field, language_code)?;

        self.in_unit_of_work(|| {
            let key_id = self.get_translation_key_id(field, edit_id)?;
            self.translations.save_value(key_id, language_code, value)?;

            if let Some(relation_id) = edit_id.id() {
                let mut set = ColumnMap::new();
                set.insert(field.column().clone(), StoredValue::Integer(key_id));
                let mut filter = ColumnMap::new();
                filter.insert(PRIMARY_KEY.clone(), StoredValue::Integer(relation_id));

                let changed = self
                    .repo
                    .update(field.storage().table(), &set, &filter)?;
                if changed == 0 {
                    warn!(
                        "event=translation_store module=field_storage status=entity_missing table={} column={}",
                        field.storage().table(),
                        field.column()
                    );
                }
            }

            info!(
                "event=translation_store module=field_storage status=ok table={} column={} language={language_code}",
                field.storage().table(),
                field.column()
            );
            Ok(key_id)
        })
    }

    fn store_one_to_one(
        &self,
        field: &Field,
        storage: &ScopedStorage,
        value: &FieldValue,
        relation_id: i64,
        language_code: Option<&str>,
    ) -> FieldStorageResult<StoreReport> {
        let scope = scope_for(storage, relation_id, language_code)?;
        let stored = value.to_storage();

        if self.repo.exists(storage.table(), &scope)? {
            let mut set = ColumnMap::new();
            set.insert(field.column().clone(), stored);
            self.repo.update(storage.table(), &set, &scope)?;
        } else {
            let mut row = scope;
            row.insert(field.column().clone(), stored);
            self.repo.insert(storage.table(), &row)?;
        }

        Ok(StoreReport::written(StrategyKind::OneToOne, 1))
    }

    fn store_one_to_many(
        &self,
        storage: &ChildStorage,
        value: &FieldValue,
        relation_id: i64,
    ) -> FieldStorageResult<StoreReport> {
        let candidates = candidate_ids(value)?;
        let parent_key = storage.parent_relation_key();

        let mut set = ColumnMap::new();
        set.insert(parent_key.clone(), StoredValue::Integer(relation_id));

        let mut adopted = 0;
        let mut skipped = Vec::new();
        for &candidate in &candidates {
            match self.adopt(storage.table(), parent_key, &set, candidate) {
                Ok(true) => adopted += 1,
                Ok(false) => skipped.push(candidate),
                Err(source) if adopted > 0 => {
                    return Err(FieldStorageError::PartialWrite {
                        strategy: StrategyKind::OneToMany,
                        table: storage.table().clone(),
                        applied: adopted,
                        requested: candidates.len(),
                        source,
                    });
                }
                Err(source) => return Err(source.into()),
            }
        }

        Ok(StoreReport {
            strategy: StrategyKind::OneToMany,
            rows_written: adopted,
            skipped,
        })
    }

    /// Re-parents `candidate` if its parent key is still zero or NULL.
    fn adopt(
        &self,
        table: &Identifier,
        parent_key: &Identifier,
        set: &ColumnMap,
        candidate: i64,
    ) -> Result<bool, RepoError> {
        for orphan_marker in [StoredValue::Integer(0), StoredValue::Null] {
            let mut filter = ColumnMap::new();
            filter.insert(PRIMARY_KEY.clone(), StoredValue::Integer(candidate));
            filter.insert(parent_key.clone(), orphan_marker);
            if self.repo.update(table, set, &filter)? > 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn store_many_to_many(
        &self,
        field: &Field,
        storage: &ScopedStorage,
        value: &FieldValue,
        relation_id: i64,
        language_code: Option<&str>,
    ) -> FieldStorageResult<StoreReport> {
        let ids = association_ids(value)?;
        let scope = scope_for(storage, relation_id, language_code)?;

        self.repo.delete(storage.table(), &scope)?;

        for (inserted, id) in ids.iter().enumerate() {
            let mut row = scope.clone();
            row.insert(field.key().clone(), id.clone());
            if let Err(source) = self.repo.insert(storage.table(), &row) {
                return Err(FieldStorageError::PartialWrite {
                    strategy: StrategyKind::ManyToMany,
                    table: storage.table().clone(),
                    applied: inserted,
                    requested: ids.len(),
                    source,
                });
            }
        }

        Ok(StoreReport::written(StrategyKind::ManyToMany, ids.len()))
    }

    /// Runs `operation` inside a repository unit of work when configured.
    fn in_unit_of_work<V>(
        &self,
        operation: impl FnOnce() -> FieldStorageResult<V>,
    ) -> FieldStorageResult<V> {
        if !self.config.transactional_store {
            return operation();
        }

        self.repo.begin()?;
        match operation() {
            Ok(value) => match self.repo.commit() {
                Ok(()) => Ok(value),
                Err(commit_err) => {
                    self.rollback_unit_of_work();
                    Err(FieldStorageError::DataAccess(commit_err))
                }
            },
            Err(err) => {
                if !self.rollback_unit_of_work() {
                    return Err(err);
                }
                Err(err.rolled_back())
            }
        }
    }

    /// Rolls back the open unit of work; returns whether it succeeded.
    fn rollback_unit_of_work(&self) -> bool {
        match self.repo.rollback() {
            Ok(()) => true,
            Err(rollback_err) => {
                error!(
                    "event=field_store_rollback module=field_storage status=error error={rollback_err}"
                );
                false
            }
        }
    }
}

fn unsupported(operation: &'static str, field: &Field) -> FieldStorageError {
    FieldStorageError::UnsupportedStorage {
        operation,
        strategy: field.storage().kind(),
    }
}

fn scope_for(
    storage: &ScopedStorage,
    relation_id: i64,
    language_code: Option<&str>,
) -> FieldStorageResult<ColumnMap> {
    if storage.is_language_scoped() && language_code.is_none() {
        return Err(FieldStorageError::InvalidArgument(format!(
            "storage on `{}` is language scoped and needs a language code",
            storage.table()
        )));
    }
    Ok(storage.scope(relation_id, language_code))
}

fn translation_language<'a>(
    field: &'a Field,
    language_code: Option<&'a str>,
) -> FieldStorageResult<&'a str> {
    field
        .storage()
        .pinned_language()
        .or(language_code)
        .ok_or_else(|| {
            FieldStorageError::InvalidArgument(format!(
                "translated field `{}` needs a language code",
                field.column()
            ))
        })
}

fn association_ids(value: &FieldValue) -> FieldStorageResult<Vec<StoredValue>> {
    if value.is_empty() {
        return Ok(Vec::new());
    }
    match value {
        FieldValue::List(items) => Ok(items.iter().map(FieldValue::to_storage).collect()),
        _ => Err(FieldStorageError::InvalidArgument(
            "many-to-many storage can only store a collection of ids".to_string(),
        )),
    }
}

fn candidate_ids(value: &FieldValue) -> FieldStorageResult<Vec<i64>> {
    if value.is_empty() {
        return Ok(Vec::new());
    }
    let FieldValue::List(items) = value else {
        return Err(FieldStorageError::InvalidArgument(
            "one-to-many storage expects a collection of candidate ids".to_string(),
        ));
    };

    items
        .iter()
        .map(|item| {
            item.to_storage().as_id().ok_or_else(|| {
                FieldStorageError::InvalidArgument(
                    "one-to-many candidate ids must be positive integers".to_string(),
                )
            })
        })
        .collect()
}
