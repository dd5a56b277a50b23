//! # octofhir-storage
//!
//! Index store abstraction layer for OctoFHIR search.
//!
//! This crate defines the contract between the search engine and whatever persists index
//! rows. It does not contain any implementations; those are provided by separate crates.
//!
//! ## Overview
//!
//! The main trait is [`IndexStore`], which defines:
//! - replacing the index rows of one resource (create/update)
//! - removing them (delete)
//! - executing compiled [`IndexQuery`] statements for ids, keys and counts
//!
//! A store also reports the [`SqlDialect`] its statements must be compiled for.
//!
//! ## Example
//!
//! ```ignore
//! use octofhir_storage::{IndexQuery, IndexStore, SqlValue, StorageError};
//!
//! async fn count_patients(store: &dyn IndexStore) -> Result<u64, StorageError> {
//!     let sql = format!(
//!         "SELECT COUNT(*) FROM resources r WHERE r.resource_type = {}",
//!         store.dialect().placeholder(1)
//!     );
//!     store.count(&IndexQuery::new(sql, vec![SqlValue::text("Patient")])).await
//! }
//! ```

mod error;
mod traits;
mod types;

pub use error::{ErrorCategory, StorageError};
pub use traits::IndexStore;
pub use types::{IndexQuery, SqlDialect, SqlValue};

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Type alias for a shared index store trait object.
pub type DynIndexStore = std::sync::Arc<dyn IndexStore>;
