//! SQLite implementation of [`IndexStore`].
//!
//! A single connection behind a mutex; every call runs on the blocking pool. Dates are stored as
//! fixed-width UTC text and compared as text.

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::Value as SqliteValue;
use rusqlite::{Connection, ErrorCode, params, params_from_iter};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use octofhir_core::{IndexRow, IndexValue, ResourceKey, format_index_instant};
use octofhir_storage::{IndexQuery, IndexStore, SqlDialect, SqlValue, StorageError};

use crate::schema;

/// Connection settings for [`SqliteIndexStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteOptions {
    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Use WAL journaling for file databases.
    #[serde(default = "default_true")]
    pub enable_wal: bool,
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_busy_timeout_ms(),
            enable_wal: true,
        }
    }
}

/// Map a rusqlite error onto the storage error taxonomy.
pub(crate) fn sqlite_error(error: rusqlite::Error) -> StorageError {
    match &error {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                StorageError::busy(error.to_string())
            }
            ErrorCode::CannotOpen | ErrorCode::NotADatabase | ErrorCode::SystemIoFailure => {
                StorageError::connection_error(error.to_string())
            }
            ErrorCode::ConstraintViolation => StorageError::invalid_resource(error.to_string()),
            _ => StorageError::internal(error.to_string()),
        },
        _ => StorageError::internal(error.to_string()),
    }
}

fn bind_value(value: &SqlValue) -> SqliteValue {
    match value {
        SqlValue::Text(s) => SqliteValue::Text(s.clone()),
        SqlValue::Integer(i) => SqliteValue::Integer(*i),
        SqlValue::Float(f) => SqliteValue::Real(*f),
        SqlValue::Timestamp(ts) => SqliteValue::Text(format_index_instant(*ts)),
    }
}

/// The nullable value columns of one `search_index` row.
#[derive(Default)]
struct ValueColumns<'a> {
    string: Option<&'a str>,
    token_system: Option<&'a str>,
    token_code: Option<&'a str>,
    token_display: Option<&'a str>,
    reference: Option<&'a str>,
    reference_raw: Option<&'a str>,
    date: Option<String>,
    number: Option<f64>,
}

impl<'a> ValueColumns<'a> {
    fn of(value: &'a IndexValue) -> Self {
        match value {
            IndexValue::String { value } => Self {
                string: Some(value),
                ..Self::default()
            },
            IndexValue::Token {
                system,
                code,
                display,
            } => Self {
                token_system: system.as_deref(),
                token_code: Some(code),
                token_display: display.as_deref(),
                ..Self::default()
            },
            IndexValue::Reference { reference, raw } => Self {
                reference: Some(reference),
                reference_raw: Some(raw),
                ..Self::default()
            },
            IndexValue::Date { instant } => Self {
                date: Some(format_index_instant(*instant)),
                ..Self::default()
            },
            IndexValue::Number { value } => Self {
                number: Some(*value),
                ..Self::default()
            },
        }
    }
}

/// Index store backed by one SQLite database.
#[derive(Clone)]
pub struct SqliteIndexStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl Debug for SqliteIndexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteIndexStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteIndexStore {
    /// Open or create a file database with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::open_with(path, &SqliteOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: &SqliteOptions) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(sqlite_error)?;
        Self::from_connection(conn, Some(path.to_path_buf()), options)
    }

    /// A private in-memory database.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(sqlite_error)?;
        Self::from_connection(conn, None, &SqliteOptions::default())
    }

    fn from_connection(
        conn: Connection,
        path: Option<PathBuf>,
        options: &SqliteOptions,
    ) -> Result<Self, StorageError> {
        conn.busy_timeout(Duration::from_millis(options.busy_timeout_ms))
            .map_err(sqlite_error)?;
        if options.enable_wal && path.is_some() {
            let mode: String = conn
                .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
                .map_err(sqlite_error)?;
            tracing::debug!(journal_mode = %mode, "sqlite journal mode set");
        }
        schema::initialize_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// File path, or `None` for an in-memory database.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| StorageError::internal(format!("sqlite task failed: {e}")))?
    }

    /// Number of indexed resources of `resource_type`.
    pub async fn resource_count(&self, resource_type: &str) -> Result<u64, StorageError> {
        let resource_type = resource_type.to_string();
        self.with_conn(move |conn| {
            let n: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM resources WHERE resource_type = ?1",
                    [&resource_type],
                    |row| row.get(0),
                )
                .map_err(sqlite_error)?;
            Ok(u64::try_from(n).unwrap_or_default())
        })
        .await
    }
}

fn write_rows_blocking(
    conn: &mut Connection,
    resource: &ResourceKey,
    last_updated: OffsetDateTime,
    rows: &[IndexRow],
) -> Result<(), StorageError> {
    let tx = conn
        .transaction()
        .map_err(|e| match sqlite_error(e) {
            StorageError::Internal { message } => StorageError::transaction_error(message),
            other => other,
        })?;

    tx.execute(
        "INSERT INTO resources (resource_type, id, last_updated) VALUES (?1, ?2, ?3) \
         ON CONFLICT (resource_type, id) DO UPDATE SET last_updated = excluded.last_updated",
        params![resource.resource_type, resource.id, format_index_instant(last_updated)],
    )
    .map_err(sqlite_error)?;
    tx.execute(
        "DELETE FROM search_index WHERE resource_type = ?1 AND resource_id = ?2",
        params![resource.resource_type, resource.id],
    )
    .map_err(sqlite_error)?;

    {
        let mut insert = tx
            .prepare_cached(
                "INSERT INTO search_index (resource_type, resource_id, param_name, param_type, \
                 value_string, value_token_system, value_token_code, value_token_display, \
                 value_reference, value_reference_raw, value_date, value_number) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )
            .map_err(sqlite_error)?;
        for row in rows {
            if row.resource_type != resource.resource_type || row.resource_id != resource.id {
                return Err(StorageError::invalid_resource(format!(
                    "row for {} handed to write of {resource}",
                    row.resource_key()
                )));
            }
            let columns = ValueColumns::of(&row.value);
            insert
                .execute(params![
                    row.resource_type,
                    row.resource_id,
                    row.param_name,
                    row.param_type().as_str(),
                    columns.string,
                    columns.token_system,
                    columns.token_code,
                    columns.token_display,
                    columns.reference,
                    columns.reference_raw,
                    columns.date,
                    columns.number,
                ])
                .map_err(sqlite_error)?;
        }
    }

    tx.commit().map_err(|e| match sqlite_error(e) {
        StorageError::Internal { message } => StorageError::transaction_error(message),
        other => other,
    })
}

fn delete_rows_blocking(conn: &mut Connection, resource: &ResourceKey) -> Result<bool, StorageError> {
    let tx = conn.transaction().map_err(sqlite_error)?;
    tx.execute(
        "DELETE FROM search_index WHERE resource_type = ?1 AND resource_id = ?2",
        params![resource.resource_type, resource.id],
    )
    .map_err(sqlite_error)?;
    let removed = tx
        .execute(
            "DELETE FROM resources WHERE resource_type = ?1 AND id = ?2",
            params![resource.resource_type, resource.id],
        )
        .map_err(sqlite_error)?;
    tx.commit().map_err(sqlite_error)?;
    Ok(removed > 0)
}

#[async_trait]
impl IndexStore for SqliteIndexStore {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    async fn write_rows(
        &self,
        resource: &ResourceKey,
        last_updated: OffsetDateTime,
        rows: &[IndexRow],
    ) -> Result<(), StorageError> {
        let resource = resource.clone();
        let rows = rows.to_vec();
        self.with_conn(move |conn| write_rows_blocking(conn, &resource, last_updated, &rows))
            .await
    }

    async fn delete_rows(&self, resource: &ResourceKey) -> Result<bool, StorageError> {
        let resource = resource.clone();
        self.with_conn(move |conn| delete_rows_blocking(conn, &resource))
            .await
    }

    async fn query_ids(&self, query: &IndexQuery) -> Result<Vec<String>, StorageError> {
        let sql = query.sql.clone();
        let values: Vec<SqliteValue> = query.params.iter().map(bind_value).collect();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql).map_err(sqlite_error)?;
            let ids = stmt
                .query_map(params_from_iter(values.iter()), |row| row.get::<_, String>(0))
                .map_err(sqlite_error)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(sqlite_error)?;
            Ok(ids)
        })
        .await
    }

    async fn query_keys(&self, query: &IndexQuery) -> Result<Vec<ResourceKey>, StorageError> {
        let sql = query.sql.clone();
        let values: Vec<SqliteValue> = query.params.iter().map(bind_value).collect();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql).map_err(sqlite_error)?;
            let keys = stmt
                .query_map(params_from_iter(values.iter()), |row| {
                    Ok(ResourceKey::new(
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                    ))
                })
                .map_err(sqlite_error)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(sqlite_error)?;
            Ok(keys)
        })
        .await
    }

    async fn count(&self, query: &IndexQuery) -> Result<u64, StorageError> {
        let sql = query.sql.clone();
        let values: Vec<SqliteValue> = query.params.iter().map(bind_value).collect();
        self.with_conn(move |conn| {
            let n: i64 = conn
                .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))
                .map_err(sqlite_error)?;
            Ok(u64::try_from(n).unwrap_or_default())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn token(rt: &str, id: &str, param: &str, code: &str) -> IndexRow {
        IndexRow::new(
            rt,
            id,
            param,
            IndexValue::Token {
                system: Some("http://loinc.org".into()),
                code: code.into(),
                display: None,
            },
        )
    }

    fn count_rows(store: &SqliteIndexStore) -> i64 {
        store
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM search_index", [], |row| row.get(0))
            .unwrap()
    }

    #[tokio::test]
    async fn test_write_replaces_previous_rows() {
        let store = SqliteIndexStore::open_in_memory().unwrap();
        let key = ResourceKey::new("Observation", "1");
        let at = datetime!(2024-01-01 00:00 UTC);

        store
            .write_rows(&key, at, &[token("Observation", "1", "code", "a"), token("Observation", "1", "code", "b")])
            .await
            .unwrap();
        assert_eq!(count_rows(&store), 2);

        store
            .write_rows(&key, at, &[token("Observation", "1", "code", "c")])
            .await
            .unwrap();
        assert_eq!(count_rows(&store), 1);
        assert_eq!(store.resource_count("Observation").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_write_rejects_foreign_rows() {
        let store = SqliteIndexStore::open_in_memory().unwrap();
        let key = ResourceKey::new("Observation", "1");
        let err = store
            .write_rows(&key, datetime!(2024-01-01 00:00 UTC), &[token("Observation", "2", "code", "a")])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidResource { .. }));
        // the transaction rolled back
        assert_eq!(store.resource_count("Observation").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_rows() {
        let store = SqliteIndexStore::open_in_memory().unwrap();
        let key = ResourceKey::new("Observation", "1");
        store
            .write_rows(&key, datetime!(2024-01-01 00:00 UTC), &[token("Observation", "1", "code", "a")])
            .await
            .unwrap();
        assert!(store.delete_rows(&key).await.unwrap());
        assert!(!store.delete_rows(&key).await.unwrap());
        assert_eq!(count_rows(&store), 0);
    }

    #[tokio::test]
    async fn test_query_binds_numbered_params() {
        let store = SqliteIndexStore::open_in_memory().unwrap();
        for id in ["1", "2"] {
            let key = ResourceKey::new("Observation", id);
            store
                .write_rows(&key, datetime!(2024-01-01 00:00 UTC), &[token("Observation", id, "code", id)])
                .await
                .unwrap();
        }
        // ?2 before ?1 in the text
        let query = IndexQuery::new(
            "SELECT resource_id FROM search_index WHERE value_token_code = ?2 AND resource_type = ?1",
            vec![SqlValue::text("Observation"), SqlValue::text("2")],
        );
        assert_eq!(store.query_ids(&query).await.unwrap(), vec!["2"]);

        let query = IndexQuery::new(
            "SELECT COUNT(*) FROM resources WHERE last_updated >= ?1",
            vec![SqlValue::Timestamp(datetime!(2023-12-31 23:00 -02:00))],
        );
        // 2024-01-01T01:00Z is after both rows
        assert_eq!(store.count(&query).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bad_sql_is_internal() {
        let store = SqliteIndexStore::open_in_memory().unwrap();
        let err = store
            .query_ids(&IndexQuery::new("SELECT nope FROM nowhere", vec![]))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        {
            let store = SqliteIndexStore::open(&path).unwrap();
            let key = ResourceKey::new("Patient", "p1");
            store
                .write_rows(&key, datetime!(2024-01-01 00:00 UTC), &[token("Patient", "p1", "_id", "p1")])
                .await
                .unwrap();
        }
        let store = SqliteIndexStore::open(&path).unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
        assert_eq!(store.resource_count("Patient").await.unwrap(), 1);
    }

    #[test]
    fn test_busy_maps_to_retryable() {
        let error = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".into()),
        );
        assert!(sqlite_error(error).is_retryable());
    }
}
