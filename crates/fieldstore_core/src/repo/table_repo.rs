//! Generic table access contract and SQLite implementation.
//!
//! # Responsibility
//! - Execute the handful of statements field storage needs against any table.
//! - Keep SQL text generation inside the persistence boundary.
//!
//! # Invariants
//! - Table and column names only enter SQL as quoted `Identifier`s.
//! - Every value is a bound parameter, never interpolated.
//! - `update` and `delete` refuse an empty filter.
//! - Filters compare with `IS`, so a NULL scope value matches a NULL cell.

use crate::db::DbError;
use crate::model::ident::Identifier;
use crate::model::storage::ColumnMap;
use crate::model::value::StoredValue;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection};
use std::error::Error;
use std::fmt::{Display, Formatter};

const SAVEPOINT_NAME: &str = "field_store";

pub type RepoResult<T> = Result<T, RepoError>;

/// Error returned by table repository operations.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    /// Refused to run an update/delete without a where clause.
    UnscopedWrite {
        statement: &'static str,
        table: Identifier,
    },
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::UnscopedWrite { statement, table } => {
                write!(f, "refusing unscoped {statement} on table `{table}`")
            }
            Self::InvalidData(message) => write!(f, "invalid stored data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::UnscopedWrite { .. } | Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Narrow data-access contract consumed by field storage.
///
/// Implementations must serialize individual statements. Multi-statement
/// atomicity is only provided between `begin` and `commit`/`rollback`.
pub trait TableRepository {
    /// Returns whether any row in `table` matches `filter`.
    fn exists(&self, table: &Identifier, filter: &ColumnMap) -> RepoResult<bool>;
    /// Inserts one row.
    fn insert(&self, table: &Identifier, values: &ColumnMap) -> RepoResult<()>;
    /// Sets `values` on rows matching `filter`; returns the changed row count.
    fn update(&self, table: &Identifier, values: &ColumnMap, filter: &ColumnMap)
        -> RepoResult<usize>;
    /// Deletes rows matching `filter`; returns the deleted row count.
    fn delete(&self, table: &Identifier, filter: &ColumnMap) -> RepoResult<usize>;
    /// Reads `column` of the first row matching `filter`.
    fn select_scalar(
        &self,
        table: &Identifier,
        column: &Identifier,
        filter: &ColumnMap,
    ) -> RepoResult<Option<StoredValue>>;
    /// Reads `column` of every row matching `filter`, in storage order.
    fn select_column(
        &self,
        table: &Identifier,
        column: &Identifier,
        filter: &ColumnMap,
    ) -> RepoResult<Vec<StoredValue>>;

    /// Starts a unit of work. No-op for repositories without transactions.
    fn begin(&self) -> RepoResult<()> {
        Ok(())
    }

    fn commit(&self) -> RepoResult<()> {
        Ok(())
    }

    fn rollback(&self) -> RepoResult<()> {
        Ok(())
    }
}

/// SQLite-backed table repository.
///
/// Units of work use a savepoint, so they nest inside a caller's transaction.
#[derive(Clone, Copy)]
pub struct SqliteTableRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTableRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl TableRepository for SqliteTableRepository<'_> {
    fn exists(&self, table: &Identifier, filter: &ColumnMap) -> RepoResult<bool> {
        let (where_sql, bind_values) = where_clause(filter);
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {where_sql});",
            table.quoted()
        );
        let exists: i64 =
            self.conn
                .query_row(&sql, params_from_iter(bind_values), |row| row.get(0))?;
        Ok(exists == 1)
    }

    fn insert(&self, table: &Identifier, values: &ColumnMap) -> RepoResult<()> {
        if values.is_empty() {
            self.conn
                .execute(&format!("INSERT INTO {} DEFAULT VALUES;", table.quoted()), [])?;
            return Ok(());
        }

        let columns = values
            .keys()
            .map(Identifier::quoted)
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; values.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({columns}) VALUES ({placeholders});",
            table.quoted()
        );
        self.conn
            .execute(&sql, params_from_iter(values.values().map(to_sql_value)))?;
        Ok(())
    }

    fn update(
        &self,
        table: &Identifier,
        values: &ColumnMap,
        filter: &ColumnMap,
    ) -> RepoResult<usize> {
        if filter.is_empty() {
            return Err(RepoError::UnscopedWrite {
                statement: "update",
                table: table.clone(),
            });
        }
        if values.is_empty() {
            return Ok(0);
        }

        let assignments = values
            .keys()
            .map(|column| format!("{} = ?", column.quoted()))
            .collect::<Vec<_>>()
            .join(", ");
        let (where_sql, where_values) = where_clause(filter);
        let sql = format!(
            "UPDATE {} SET {assignments} WHERE {where_sql};",
            table.quoted()
        );

        let mut bind_values: Vec<Value> = values.values().map(to_sql_value).collect();
        bind_values.extend(where_values);
        let changed = self.conn.execute(&sql, params_from_iter(bind_values))?;
        Ok(changed)
    }

    fn delete(&self, table: &Identifier, filter: &ColumnMap) -> RepoResult<usize> {
        if filter.is_empty() {
            return Err(RepoError::UnscopedWrite {
                statement: "delete",
                table: table.clone(),
            });
        }

        let (where_sql, bind_values) = where_clause(filter);
        let sql = format!("DELETE FROM {} WHERE {where_sql};", table.quoted());
        let deleted = self.conn.execute(&sql, params_from_iter(bind_values))?;
        Ok(deleted)
    }

    fn select_scalar(
        &self,
        table: &Identifier,
        column: &Identifier,
        filter: &ColumnMap,
    ) -> RepoResult<Option<StoredValue>> {
        let (where_sql, bind_values) = where_clause(filter);
        let sql = format!(
            "SELECT {} FROM {} WHERE {where_sql} LIMIT 1;",
            column.quoted(),
            table.quoted()
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        if let Some(row) = rows.next()? {
            return Ok(Some(from_sql_value(row.get_ref(0)?, table, column)?));
        }

        Ok(None)
    }

    fn select_column(
        &self,
        table: &Identifier,
        column: &Identifier,
        filter: &ColumnMap,
    ) -> RepoResult<Vec<StoredValue>> {
        let (where_sql, bind_values) = where_clause(filter);
        let sql = format!(
            "SELECT {} FROM {} WHERE {where_sql};",
            column.quoted(),
            table.quoted()
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut values = Vec::new();
        while let Some(row) = rows.next()? {
            values.push(from_sql_value(row.get_ref(0)?, table, column)?);
        }

        Ok(values)
    }

    fn begin(&self) -> RepoResult<()> {
        self.conn
            .execute_batch(&format!("SAVEPOINT {SAVEPOINT_NAME};"))?;
        Ok(())
    }

    fn commit(&self) -> RepoResult<()> {
        self.conn
            .execute_batch(&format!("RELEASE SAVEPOINT {SAVEPOINT_NAME};"))?;
        Ok(())
    }

    fn rollback(&self) -> RepoResult<()> {
        self.conn.execute_batch(&format!(
            "ROLLBACK TO SAVEPOINT {SAVEPOINT_NAME}; RELEASE SAVEPOINT {SAVEPOINT_NAME};"
        ))?;
        Ok(())
    }
}

fn where_clause(filter: &ColumnMap) -> (String, Vec<Value>) {
    if filter.is_empty() {
        return ("1 = 1".to_string(), Vec::new());
    }

    let sql = filter
        .keys()
        .map(|column| format!("{} IS ?", column.quoted()))
        .collect::<Vec<_>>()
        .join(" AND ");
    (sql, filter.values().map(to_sql_value).collect())
}

fn to_sql_value(value: &StoredValue) -> Value {
    match value {
        StoredValue::Null => Value::Null,
        StoredValue::Integer(value) => Value::Integer(*value),
        StoredValue::Real(value) => Value::Real(*value),
        StoredValue::Text(value) => Value::Text(value.clone()),
    }
}

fn from_sql_value(
    value: ValueRef<'_>,
    table: &Identifier,
    column: &Identifier,
) -> RepoResult<StoredValue> {
    match value {
        ValueRef::Null => Ok(StoredValue::Null),
        ValueRef::Integer(value) => Ok(StoredValue::Integer(value)),
        ValueRef::Real(value) => Ok(StoredValue::Real(value)),
        ValueRef::Text(bytes) => String::from_utf8(bytes.to_vec())
            .map(StoredValue::Text)
            .map_err(|_| RepoError::InvalidData(format!("non utf-8 text in {table}.{column}"))),
        ValueRef::Blob(_) => Err(RepoError::InvalidData(format!(
            "blob values are not supported in {table}.{column}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::{where_clause, RepoError, SqliteTableRepository, TableRepository};
    use crate::model::ident::Identifier;
    use crate::model::storage::ColumnMap;
    use crate::model::value::StoredValue;
    use rusqlite::Connection;

    fn ident(value: &str) -> Identifier {
        Identifier::new(value).unwrap()
    }

    fn columns(pairs: &[(&str, StoredValue)]) -> ColumnMap {
        pairs
            .iter()
            .map(|(column, value)| (ident(column), value.clone()))
            .collect()
    }

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE item (id INTEGER PRIMARY KEY, owner INTEGER, lang TEXT, label TEXT);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn where_clause_uses_is_comparisons_in_column_order() {
        let (sql, values) = where_clause(&columns(&[
            ("b", StoredValue::Integer(1)),
            ("a", StoredValue::Null),
        ]));
        assert_eq!(sql, "\"a\" IS ? AND \"b\" IS ?");
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn insert_exists_update_select_and_delete() {
        let conn = setup();
        let repo = SqliteTableRepository::new(&conn);
        let table = ident("item");
        let filter = columns(&[("owner", StoredValue::Integer(3))]);

        assert!(!repo.exists(&table, &filter).unwrap());
        repo.insert(
            &table,
            &columns(&[
                ("owner", StoredValue::Integer(3)),
                ("label", StoredValue::from("one")),
            ]),
        )
        .unwrap();
        assert!(repo.exists(&table, &filter).unwrap());

        let changed = repo
            .update(&table, &columns(&[("label", StoredValue::from("two"))]), &filter)
            .unwrap();
        assert_eq!(changed, 1);
        assert_eq!(
            repo.select_scalar(&table, &ident("label"), &filter).unwrap(),
            Some(StoredValue::from("two"))
        );
        assert_eq!(
            repo.select_column(&table, &ident("label"), &filter).unwrap(),
            vec![StoredValue::from("two")]
        );

        assert_eq!(repo.delete(&table, &filter).unwrap(), 1);
        assert_eq!(
            repo.select_scalar(&table, &ident("label"), &filter).unwrap(),
            None
        );
    }

    #[test]
    fn null_filter_values_match_null_cells() {
        let conn = setup();
        let repo = SqliteTableRepository::new(&conn);
        let table = ident("item");
        repo.insert(&table, &columns(&[("owner", StoredValue::Integer(1))]))
            .unwrap();

        let filter = columns(&[
            ("owner", StoredValue::Integer(1)),
            ("lang", StoredValue::Null),
        ]);
        assert!(repo.exists(&table, &filter).unwrap());
    }

    #[test]
    fn refuses_unscoped_writes() {
        let conn = setup();
        let repo = SqliteTableRepository::new(&conn);
        let table = ident("item");

        let err = repo.delete(&table, &ColumnMap::new()).unwrap_err();
        assert!(matches!(
            err,
            RepoError::UnscopedWrite {
                statement: "delete",
                ..
            }
        ));
        let err = repo
            .update(
                &table,
                &columns(&[("label", StoredValue::from("x"))]),
                &ColumnMap::new(),
            )
            .unwrap_err();
        assert!(matches!(err, RepoError::UnscopedWrite { .. }));
    }

    #[test]
    fn rollback_discards_unit_of_work() {
        let conn = setup();
        let repo = SqliteTableRepository::new(&conn);
        let table = ident("item");
        let values = columns(&[("owner", StoredValue::Integer(9))]);

        repo.begin().unwrap();
        repo.insert(&table, &values).unwrap();
        repo.rollback().unwrap();
        assert!(!repo.exists(&table, &values).unwrap());

        repo.begin().unwrap();
        repo.insert(&table, &values).unwrap();
        repo.commit().unwrap();
        assert!(repo.exists(&table, &values).unwrap());
    }

    #[test]
    fn missing_table_surfaces_db_error() {
        let conn = setup();
        let repo = SqliteTableRepository::new(&conn);
        let err = repo
            .exists(&ident("missing"), &columns(&[("id", StoredValue::Integer(1))]))
            .unwrap_err();
        assert!(matches!(err, RepoError::Db(_)));
    }
}
