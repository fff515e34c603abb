use fieldstore_core::db::open_db_in_memory;
use fieldstore_core::{
    ChildStorage, ColumnMap, EditId, Field, FieldStorage, FieldStorageError,
    FieldStorageService, FieldValue, Identifier, RepoError, RepoResult, ScopedStorage,
    SqliteTableRepository, SqliteTranslationRepository, StorageConfig, StoredValue,
    StrategyKind, TableRepository,
};
use rusqlite::Connection;
use std::cell::Cell;

/// Delegates to SQLite but fails writes once a budget is spent.
struct FlakyRepository<'conn> {
    inner: SqliteTableRepository<'conn>,
    writes_left: Cell<usize>,
    fail_commit: Cell<bool>,
}

impl<'conn> FlakyRepository<'conn> {
    fn new(conn: &'conn Connection, writes_before_failure: usize) -> Self {
        Self {
            inner: SqliteTableRepository::new(conn),
            writes_left: Cell::new(writes_before_failure),
            fail_commit: Cell::new(false),
        }
    }

    /// Allows every write but fails the next commit, like a busy release.
    fn failing_commit(conn: &'conn Connection) -> Self {
        let repo = Self::new(conn, usize::MAX);
        repo.fail_commit.set(true);
        repo
    }

    fn spend_write(&self) -> RepoResult<()> {
        match self.writes_left.get() {
            0 => Err(RepoError::InvalidData("injected write failure".to_string())),
            left => {
                self.writes_left.set(left - 1);
                Ok(())
            }
        }
    }
}

impl TableRepository for FlakyRepository<'_> {
    fn exists(&self, table: &Identifier, filter: &ColumnMap) -> RepoResult<bool> {
        self.inner.exists(table, filter)
    }

    fn insert(&self, table: &Identifier, values: &ColumnMap) -> RepoResult<()> {
        self.spend_write()?;
        self.inner.insert(table, values)
    }

    fn update(
        &self,
        table: &Identifier,
        values: &ColumnMap,
        filter: &ColumnMap,
    ) -> RepoResult<usize> {
        self.spend_write()?;
        self.inner.update(table, values, filter)
    }

    fn delete(&self, table: &Identifier, filter: &ColumnMap) -> RepoResult<usize> {
        self.spend_write()?;
        self.inner.delete(table, filter)
    }

    fn select_scalar(
        &self,
        table: &Identifier,
        column: &Identifier,
        filter: &ColumnMap,
    ) -> RepoResult<Option<StoredValue>> {
        self.inner.select_scalar(table, column, filter)
    }

    fn select_column(
        &self,
        table: &Identifier,
        column: &Identifier,
        filter: &ColumnMap,
    ) -> RepoResult<Vec<StoredValue>> {
        self.inner.select_column(table, column, filter)
    }

    fn begin(&self) -> RepoResult<()> {
        self.inner.begin()
    }

    fn commit(&self) -> RepoResult<()> {
        if self.fail_commit.replace(false) {
            return Err(RepoError::InvalidData("injected commit failure".to_string()));
        }
        self.inner.commit()
    }

    fn rollback(&self) -> RepoResult<()> {
        self.inner.rollback()
    }
}

fn setup() -> Connection {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE page_tag (page_id INTEGER NOT NULL, tag_id INTEGER NOT NULL);
        INSERT INTO page_tag (page_id, tag_id) VALUES (5, 1);
        CREATE TABLE block (id INTEGER PRIMARY KEY, page_id INTEGER);
        INSERT INTO block (id, page_id) VALUES (10, 0), (11, 0);",
    )
    .unwrap();
    conn
}

fn tags_field() -> Field {
    let storage = ScopedStorage::new("page_tag", "page_id").unwrap();
    Field::new("tag_id", FieldStorage::many_to_many(storage)).unwrap()
}

fn blocks_field() -> Field {
    let storage = ChildStorage::new("block", "page_id").unwrap();
    Field::new("blocks", FieldStorage::one_to_many(storage)).unwrap()
}

fn tag_ids(conn: &Connection) -> Vec<i64> {
    let mut stmt = conn
        .prepare("SELECT tag_id FROM page_tag WHERE page_id = 5 ORDER BY tag_id;")
        .unwrap();
    let rows = stmt.query_map([], |row| row.get::<_, i64>(0)).unwrap();
    rows.map(Result::unwrap).collect()
}

#[test]
fn many_to_many_insert_failure_is_reported_as_partial_write() {
    let conn = setup();
    // delete + one insert succeed, the second insert fails.
    let service = FieldStorageService::new(
        FlakyRepository::new(&conn, 2),
        SqliteTranslationRepository::new(&conn),
    );

    let err = service
        .store(
            &tags_field(),
            &FieldValue::list([2_i64, 3, 4]),
            EditId::from(5),
            None,
        )
        .unwrap_err();

    match err {
        FieldStorageError::PartialWrite {
            strategy,
            applied,
            requested,
            ..
        } => {
            assert_eq!(strategy, StrategyKind::ManyToMany);
            assert_eq!(applied, 1);
            assert_eq!(requested, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(tag_ids(&conn), vec![2]);
}

#[test]
fn many_to_many_failure_right_after_delete_leaves_scope_empty() {
    let conn = setup();
    let service = FieldStorageService::new(
        FlakyRepository::new(&conn, 1),
        SqliteTranslationRepository::new(&conn),
    );

    let err = service
        .store(&tags_field(), &FieldValue::list([2_i64]), EditId::from(5), None)
        .unwrap_err();
    assert!(matches!(
        err,
        FieldStorageError::PartialWrite { applied: 0, .. }
    ));
    assert!(tag_ids(&conn).is_empty());
}

#[test]
fn transactional_store_rolls_back_on_failure() {
    let conn = setup();
    let config = StorageConfig {
        transactional_store: true,
        ..StorageConfig::default()
    };
    let service = FieldStorageService::with_config(
        FlakyRepository::new(&conn, 2),
        SqliteTranslationRepository::new(&conn),
        config,
    );

    let err = service
        .store(
            &tags_field(),
            &FieldValue::list([2_i64, 3, 4]),
            EditId::from(5),
            None,
        )
        .unwrap_err();
    assert!(matches!(err, FieldStorageError::DataAccess(_)));
    assert_eq!(tag_ids(&conn), vec![1]);
}

#[test]
fn transactional_store_commits_on_success() {
    let conn = setup();
    let config = StorageConfig {
        transactional_store: true,
        ..StorageConfig::default()
    };
    let service = FieldStorageService::with_config(
        SqliteTableRepository::new(&conn),
        SqliteTranslationRepository::new(&conn),
        config,
    );

    service
        .store(&tags_field(), &FieldValue::list([6_i64, 7]), EditId::from(5), None)
        .unwrap();
    assert_eq!(tag_ids(&conn), vec![6, 7]);
    assert!(conn.is_autocommit());
}

#[test]
fn transactional_store_rolls_back_when_commit_fails() {
    let conn = setup();
    let config = StorageConfig {
        transactional_store: true,
        ..StorageConfig::default()
    };
    let service = FieldStorageService::with_config(
        FlakyRepository::failing_commit(&conn),
        SqliteTranslationRepository::new(&conn),
        config,
    );

    let err = service
        .store(&tags_field(), &FieldValue::list([1_i64, 2]), EditId::from(5), None)
        .unwrap_err();
    assert!(matches!(
        err,
        FieldStorageError::DataAccess(RepoError::InvalidData(_))
    ));
    assert!(conn.is_autocommit());
    assert_eq!(tag_ids(&conn), vec![1]);

    assert!(service.config().transactional_store);
    service
        .store(&tags_field(), &FieldValue::list([3_i64]), EditId::from(5), None)
        .unwrap();
    assert_eq!(tag_ids(&conn), vec![3]);
    assert!(conn.is_autocommit());
}

#[test]
fn one_to_many_stops_at_first_failure_without_rollback() {
    let conn = setup();
    let service = FieldStorageService::new(
        FlakyRepository::new(&conn, 1),
        SqliteTranslationRepository::new(&conn),
    );

    let err = service
        .store(
            &blocks_field(),
            &FieldValue::list([10_i64, 11]),
            EditId::from(5),
            None,
        )
        .unwrap_err();
    assert!(matches!(
        err,
        FieldStorageError::PartialWrite {
            strategy: StrategyKind::OneToMany,
            applied: 1,
            requested: 2,
            ..
        }
    ));

    let parents: Vec<i64> = [10_i64, 11]
        .iter()
        .map(|id| {
            conn.query_row("SELECT page_id FROM block WHERE id = ?1;", [id], |row| {
                row.get(0)
            })
            .unwrap()
        })
        .collect();
    assert_eq!(parents, vec![5, 0]);
}

#[test]
fn one_to_many_failure_before_any_adoption_is_a_plain_data_access_error() {
    let conn = setup();
    let service = FieldStorageService::new(
        FlakyRepository::new(&conn, 0),
        SqliteTranslationRepository::new(&conn),
    );

    let err = service
        .store(&blocks_field(), &FieldValue::list([10_i64]), EditId::from(5), None)
        .unwrap_err();
    assert!(matches!(err, FieldStorageError::DataAccess(_)));
}
