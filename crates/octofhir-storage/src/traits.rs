//! Index store trait.
//!
//! Every backend that persists search index rows implements [`IndexStore`]. The search
//! engine compiles queries into [`IndexQuery`] values for the dialect the store reports
//! and hands them back to the store for execution.

use async_trait::async_trait;
use octofhir_core::{IndexRow, ResourceKey};
use time::OffsetDateTime;

use crate::error::StorageError;
use crate::types::{IndexQuery, SqlDialect};

/// The index persistence contract.
///
/// Implementations must be thread-safe (`Send + Sync`). Two tables are assumed:
///
/// - `resources(resource_type, id, last_updated)`: one row per indexed resource
/// - `search_index(...)`: the extracted rows, see [`IndexRow`]
///
/// # Example
///
/// ```ignore
/// use octofhir_storage::{IndexStore, StorageError};
/// use octofhir_core::ResourceKey;
///
/// async fn forget(store: &dyn IndexStore, id: &str) -> Result<bool, StorageError> {
///     store.delete_rows(&ResourceKey::new("Patient", id)).await
/// }
/// ```
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// The SQL dialect queries for this store must be compiled with.
    fn dialect(&self) -> SqlDialect;

    /// Replaces every index row of `resource` with `rows` in one transaction.
    ///
    /// The `resources` row is created or its `last_updated` refreshed. Either all rows are
    /// visible afterwards or none of the change is.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidResource` if a row belongs to another resource.
    async fn write_rows(
        &self,
        resource: &ResourceKey,
        last_updated: OffsetDateTime,
        rows: &[IndexRow],
    ) -> Result<(), StorageError>;

    /// Removes the resource and all of its index rows.
    ///
    /// Returns `false` if nothing was stored for the key.
    async fn delete_rows(&self, resource: &ResourceKey) -> Result<bool, StorageError>;

    /// Runs a query whose single selected column is the resource id.
    async fn query_ids(&self, query: &IndexQuery) -> Result<Vec<String>, StorageError>;

    /// Runs a query selecting `(resource_type, id)` pairs.
    async fn query_keys(&self, query: &IndexQuery) -> Result<Vec<ResourceKey>, StorageError>;

    /// Runs a query selecting a single count.
    async fn count(&self, query: &IndexQuery) -> Result<u64, StorageError>;
}
