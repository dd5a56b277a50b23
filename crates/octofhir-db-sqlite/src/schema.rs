//! SQLite schema for the index store.

use rusqlite::{Connection, OptionalExtension};

use octofhir_storage::StorageError;

use crate::store::sqlite_error;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS resources (
    resource_type TEXT NOT NULL,
    id TEXT NOT NULL,
    last_updated TEXT NOT NULL,
    PRIMARY KEY (resource_type, id)
);

CREATE TABLE IF NOT EXISTS search_index (
    resource_type TEXT NOT NULL,
    resource_id TEXT NOT NULL,
    param_name TEXT NOT NULL,
    param_type TEXT NOT NULL,
    value_string TEXT,
    value_token_system TEXT,
    value_token_code TEXT,
    value_token_display TEXT,
    value_reference TEXT,
    value_reference_raw TEXT,
    value_date TEXT,
    value_number REAL
);

CREATE INDEX IF NOT EXISTS idx_search_token
    ON search_index (resource_type, param_name, value_token_code);
CREATE INDEX IF NOT EXISTS idx_search_reference
    ON search_index (resource_type, param_name, value_reference);
CREATE INDEX IF NOT EXISTS idx_search_date
    ON search_index (resource_type, param_name, value_date);
CREATE INDEX IF NOT EXISTS idx_search_string
    ON search_index (resource_type, param_name, value_string);
CREATE INDEX IF NOT EXISTS idx_search_number
    ON search_index (resource_type, param_name, value_number);
CREATE INDEX IF NOT EXISTS idx_search_resource
    ON search_index (resource_type, resource_id);
CREATE INDEX IF NOT EXISTS idx_resources_last_updated
    ON resources (resource_type, last_updated);
";

/// Create or upgrade the schema.
pub fn initialize_schema(conn: &Connection) -> Result<(), StorageError> {
    let current = get_schema_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(StorageError::internal(format!(
            "database schema version {current} is newer than supported version {SCHEMA_VERSION}"
        )));
    }
    if current < SCHEMA_VERSION {
        conn.execute_batch(SCHEMA_V1).map_err(sqlite_error)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
        tracing::debug!(version = SCHEMA_VERSION, "index schema initialized");
    }
    Ok(())
}

/// Schema version, or 0 for a fresh database.
pub fn get_schema_version(conn: &Connection) -> Result<i32, StorageError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )
    .map_err(sqlite_error)?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .optional()
        .map_err(sqlite_error)?;
    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), StorageError> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(sqlite_error)?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])
        .map_err(sqlite_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 0);
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);

        let indexes: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND tbl_name = 'search_index'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(indexes, 6);
    }

    #[test]
    fn test_newer_schema_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        set_schema_version(&conn, SCHEMA_VERSION + 1).unwrap();
        assert!(initialize_schema(&conn).is_err());
    }
}
