//! SQLite index store for OctoFHIR search.
//!
//! Implements [`IndexStore`](octofhir_storage::IndexStore) over an embedded SQLite database,
//! either file-backed or in memory.
//!
//! # Example
//!
//! ```ignore
//! use octofhir_db_sqlite::SqliteIndexStore;
//! use octofhir_search::{SearchEngine, SearchParameterRegistry, SearchSettings, parse_query_string};
//!
//! let store = SqliteIndexStore::open("index.db")?;
//! let engine = SearchEngine::new(
//!     Arc::new(SearchParameterRegistry::r4()),
//!     Arc::new(store),
//!     SearchSettings::default(),
//! );
//! let result = engine
//!     .search("Observation", &parse_query_string("code=http://loinc.org|8867-4"), 10, 0)
//!     .await?;
//! ```

pub mod schema;
pub mod store;

pub use schema::SCHEMA_VERSION;
pub use store::{SqliteIndexStore, SqliteOptions};

/// Shareable in-memory store, mostly for tests and one-shot tools.
pub fn create_in_memory_store() -> Result<octofhir_storage::DynIndexStore, octofhir_storage::StorageError> {
    Ok(std::sync::Arc::new(SqliteIndexStore::open_in_memory()?))
}
