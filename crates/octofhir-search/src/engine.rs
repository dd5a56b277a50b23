//! Search engine facade.
//!
//! Owns the registry, an [`IndexStore`](octofhir_storage::IndexStore) and the optional result
//! cache, and offers the write path (`index_resource`, `remove_resource`) and the query path
//! (`search`, `compile`).

use indexmap::IndexSet;
use octofhir_core::{
    CoreError, IndexRow, IndexValue, PartialDateTime, ResourceKey, now_utc, validate_id,
};
use octofhir_storage::{DynIndexStore, IndexQuery, SqlDialect, StorageError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;

use crate::config::SearchSettings;
use crate::extractor;
use crate::parser::{ParsedQuery, QueryError, QueryParser, RawQuery};
use crate::query_cache::{CacheKey, ResultCache};
use crate::registry::SearchParameterRegistry;
use crate::sql_builder::{SqlBuilderError, build_search};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Build(#[from] SqlBuilderError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Invalid(#[from] CoreError),
}

/// How a failure should be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Bad request input (400-class).
    Client,
    /// Store unreachable or busy.
    Infrastructure,
    Transaction,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Transaction => write!(f, "transaction"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

impl EngineError {
    pub fn is_client_error(&self) -> bool {
        self.category() == ErrorCategory::Client
    }

    /// The engine never retries; this only classifies the failure for callers.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_retryable())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Query(_) | Self::Build(_) => ErrorCategory::Client,
            Self::Invalid(e) if e.is_client_error() => ErrorCategory::Client,
            Self::Invalid(_) => ErrorCategory::Internal,
            Self::Storage(e) => match e.category() {
                octofhir_storage::ErrorCategory::Validation => ErrorCategory::Client,
                octofhir_storage::ErrorCategory::Infrastructure => ErrorCategory::Infrastructure,
                octofhir_storage::ErrorCategory::Transaction => ErrorCategory::Transaction,
                octofhir_storage::ErrorCategory::Internal => ErrorCategory::Internal,
            },
        }
    }
}

/// One page of matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Ids of the matching resources on this page.
    pub rows: Vec<String>,
    /// Matches across all pages.
    pub total: u64,
    /// Resources pulled in by `_include`/`_revinclude`.
    pub included: Vec<ResourceKey>,
    pub warnings: Vec<String>,
}

/// The statements a search would run.
#[derive(Debug, Clone)]
pub struct CompiledSearch {
    pub page: IndexQuery,
    pub count: IndexQuery,
    pub includes: Vec<IndexQuery>,
    pub warnings: Vec<String>,
}

impl fmt::Display for CompiledSearch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "-- page")?;
        write!(f, "{}", self.page)?;
        writeln!(f, "-- count")?;
        write!(f, "{}", self.count)?;
        for (i, include) in self.includes.iter().enumerate() {
            writeln!(f, "-- include {}", i + 1)?;
            write!(f, "{include}")?;
        }
        for warning in &self.warnings {
            writeln!(f, "-- warning: {warning}")?;
        }
        Ok(())
    }
}

/// Page size and offset after `_count`/`_offset`.
fn effective_paging(query: &ParsedQuery, settings: &SearchSettings, limit: u32, offset: u32) -> (u32, u32) {
    let limit = query.control.count.unwrap_or(limit).min(settings.max_count);
    (limit, query.control.offset.unwrap_or(offset))
}

/// Parse and compile a query without a store.
pub fn compile_search(
    registry: &SearchParameterRegistry,
    settings: &SearchSettings,
    dialect: SqlDialect,
    resource_type: &str,
    raw: &RawQuery,
    limit: u32,
    offset: u32,
) -> Result<CompiledSearch, EngineError> {
    let query = QueryParser::new(registry, settings).parse_query(resource_type, raw)?;
    let (limit, offset) = effective_paging(&query, settings, limit, offset);
    let built = build_search(dialect, &query, limit, offset)?;
    Ok(CompiledSearch {
        page: built.page,
        count: built.count,
        includes: built.includes,
        warnings: query.warnings,
    })
}

pub struct SearchEngine {
    registry: Arc<SearchParameterRegistry>,
    store: DynIndexStore,
    cache: Option<Arc<ResultCache>>,
    settings: SearchSettings,
}

impl SearchEngine {
    pub fn new(
        registry: Arc<SearchParameterRegistry>,
        store: DynIndexStore,
        settings: SearchSettings,
    ) -> Self {
        Self {
            registry,
            store,
            cache: None,
            settings,
        }
    }

    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn registry(&self) -> &SearchParameterRegistry {
        &self.registry
    }

    pub fn cache(&self) -> Option<&Arc<ResultCache>> {
        self.cache.as_ref()
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Extract index rows without writing them.
    pub fn extract(&self, resource_type: &str, body: &Value) -> Vec<IndexRow> {
        extractor::extract(&self.registry, resource_type, body)
    }

    /// Extract and store the rows of one resource, replacing any previous rows.
    pub async fn index_resource(
        &self,
        resource_type: &str,
        body: &Value,
    ) -> Result<ResourceKey, EngineError> {
        if !self.registry.is_known_resource_type(resource_type) {
            return Err(CoreError::invalid_resource_type(resource_type).into());
        }
        if !body.is_object() {
            return Err(CoreError::invalid_resource("resource body must be a JSON object").into());
        }
        if let Some(declared) = body.get("resourceType").and_then(Value::as_str)
            && declared != resource_type
        {
            return Err(CoreError::invalid_resource(format!(
                "resourceType {declared} does not match {resource_type}"
            ))
            .into());
        }
        let id = body
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::invalid_resource("resource has no id"))?;
        validate_id(id)?;

        let key = ResourceKey::new(resource_type, id);
        let last_updated = last_updated(body);
        let mut rows = self.extract(resource_type, body);
        if !rows.iter().any(|r| r.param_name == "_lastUpdated") {
            rows.push(IndexRow::new(
                resource_type,
                id,
                "_lastUpdated",
                IndexValue::Date {
                    instant: last_updated,
                },
            ));
        }

        self.store.write_rows(&key, last_updated, &rows).await?;
        tracing::debug!(resource = %key, rows = rows.len(), "resource indexed");
        self.invalidate(resource_type).await;
        Ok(key)
    }

    /// Remove a resource from the index. Returns `false` if it was not indexed.
    pub async fn remove_resource(&self, resource_type: &str, id: &str) -> Result<bool, EngineError> {
        let key = ResourceKey::new(resource_type, id);
        let removed = self.store.delete_rows(&key).await?;
        if removed {
            tracing::debug!(resource = %key, "resource removed from index");
            self.invalidate(resource_type).await;
        }
        Ok(removed)
    }

    async fn invalidate(&self, resource_type: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate(resource_type).await;
        }
    }

    /// Run a search. `_count`/`_offset` in `raw` take precedence over `limit`/`offset`.
    pub async fn search(
        &self,
        resource_type: &str,
        raw: &RawQuery,
        limit: u32,
        offset: u32,
    ) -> Result<SearchResult, EngineError> {
        let query = QueryParser::new(&self.registry, &self.settings).parse_query(resource_type, raw)?;
        let (limit, offset) = effective_paging(&query, &self.settings, limit, offset);

        let key = CacheKey::canonical(resource_type, raw, limit, offset);
        if let Some(cache) = &self.cache
            && let Some(hit) = cache.get(&key).await
        {
            return Ok((*hit).clone());
        }
        let observed = self
            .cache
            .as_ref()
            .map(|cache| cache.generations(query.referenced_types()));

        let built = build_search(self.store.dialect(), &query, limit, offset)?;
        let rows = self.store.query_ids(&built.page).await?;
        let total = self.store.count(&built.count).await?;

        let mut included = IndexSet::new();
        for include in &built.includes {
            included.extend(self.store.query_keys(include).await?);
        }

        let result = SearchResult {
            rows,
            total,
            included: included.into_iter().collect(),
            warnings: query.warnings.clone(),
        };
        tracing::debug!(
            resource_type = %resource_type,
            rows = result.rows.len(),
            total = result.total,
            "search executed"
        );

        if let (Some(cache), Some(observed)) = (&self.cache, observed) {
            cache.set(key, result.clone(), observed).await;
        }
        Ok(result)
    }

    /// The statements `search` would run, without running them.
    pub fn compile(
        &self,
        resource_type: &str,
        raw: &RawQuery,
        limit: u32,
        offset: u32,
    ) -> Result<CompiledSearch, EngineError> {
        compile_search(
            &self.registry,
            &self.settings,
            self.store.dialect(),
            resource_type,
            raw,
            limit,
            offset,
        )
    }
}

/// `meta.lastUpdated`, or now when absent or unparsable.
fn last_updated(body: &Value) -> OffsetDateTime {
    body.pointer("/meta/lastUpdated")
        .and_then(Value::as_str)
        .and_then(|s| PartialDateTime::parse(s).ok())
        .map(|d| d.start())
        .unwrap_or_else(now_utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_query_string;
    use async_trait::async_trait;
    use octofhir_storage::IndexStore;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Records writes and answers every query with canned data.
    #[derive(Default)]
    struct RecordingStore {
        writes: Mutex<Vec<(ResourceKey, Vec<IndexRow>)>>,
        queries: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl IndexStore for RecordingStore {
        fn dialect(&self) -> SqlDialect {
            SqlDialect::Sqlite
        }

        async fn write_rows(
            &self,
            resource: &ResourceKey,
            _last_updated: OffsetDateTime,
            rows: &[IndexRow],
        ) -> Result<(), StorageError> {
            self.writes.lock().push((resource.clone(), rows.to_vec()));
            Ok(())
        }

        async fn delete_rows(&self, _resource: &ResourceKey) -> Result<bool, StorageError> {
            Ok(true)
        }

        async fn query_ids(&self, _query: &IndexQuery) -> Result<Vec<String>, StorageError> {
            if self.fail {
                return Err(StorageError::busy("database is locked"));
            }
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(vec!["1".into()])
        }

        async fn query_keys(&self, _query: &IndexQuery) -> Result<Vec<ResourceKey>, StorageError> {
            Ok(vec![
                ResourceKey::new("Patient", "10"),
                ResourceKey::new("Patient", "10"),
            ])
        }

        async fn count(&self, _query: &IndexQuery) -> Result<u64, StorageError> {
            Ok(1)
        }
    }

    /// Serves `rows`; the first `query_ids` waits for `release` after signalling `entered`.
    #[derive(Default)]
    struct GatedStore {
        rows: Mutex<Vec<String>>,
        gate_used: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl IndexStore for GatedStore {
        fn dialect(&self) -> SqlDialect {
            SqlDialect::Sqlite
        }

        async fn write_rows(
            &self,
            _resource: &ResourceKey,
            _last_updated: OffsetDateTime,
            _rows: &[IndexRow],
        ) -> Result<(), StorageError> {
            Ok(())
        }

        async fn delete_rows(&self, _resource: &ResourceKey) -> Result<bool, StorageError> {
            Ok(true)
        }

        async fn query_ids(&self, _query: &IndexQuery) -> Result<Vec<String>, StorageError> {
            let rows = self.rows.lock().clone();
            if !self.gate_used.swap(true, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Ok(rows)
        }

        async fn query_keys(&self, _query: &IndexQuery) -> Result<Vec<ResourceKey>, StorageError> {
            Ok(Vec::new())
        }

        async fn count(&self, _query: &IndexQuery) -> Result<u64, StorageError> {
            Ok(self.rows.lock().len() as u64)
        }
    }

    fn engine(store: DynIndexStore) -> SearchEngine {
        SearchEngine::new(
            Arc::new(SearchParameterRegistry::r4()),
            store,
            SearchSettings::default(),
        )
        .with_cache(Arc::new(ResultCache::local(16, Duration::from_secs(60))))
    }

    #[tokio::test]
    async fn test_index_resource_adds_last_updated() {
        let store = Arc::new(RecordingStore::default());
        let engine = engine(store.clone());
        let key = engine
            .index_resource("Patient", &json!({"resourceType": "Patient", "id": "p1"}))
            .await
            .unwrap();
        assert_eq!(key.to_string(), "Patient/p1");

        let writes = store.writes.lock();
        let rows = &writes[0].1;
        assert!(rows.iter().any(|r| r.param_name == "_id"));
        assert_eq!(rows.iter().filter(|r| r.param_name == "_lastUpdated").count(), 1);
    }

    #[tokio::test]
    async fn test_index_resource_validation() {
        let engine = engine(Arc::new(RecordingStore::default()));
        for (rt, body) in [
            ("Patient", json!({"resourceType": "Observation", "id": "1"})),
            ("Patient", json!({"resourceType": "Patient"})),
            ("Patient", json!({"id": "bad id"})),
            ("Patient", json!(["not", "an", "object"])),
            ("Nope", json!({"id": "1"})),
        ] {
            let err = engine.index_resource(rt, &body).await.unwrap_err();
            assert!(err.is_client_error(), "{body}");
        }
    }

    #[tokio::test]
    async fn test_search_is_cached_until_write() {
        let store = Arc::new(RecordingStore::default());
        let engine = engine(store.clone());
        let raw = parse_query_string("subject.name=Smith&_include=Observation:subject");

        let first = engine.search("Observation", &raw, 10, 0).await.unwrap();
        assert_eq!(first.rows, vec!["1"]);
        assert_eq!(first.included, vec![ResourceKey::new("Patient", "10")]);
        engine.search("Observation", &raw, 10, 0).await.unwrap();
        assert_eq!(store.queries.load(Ordering::SeqCst), 1);

        // writing a type the query did not read keeps the entry
        engine
            .index_resource("Practitioner", &json!({"id": "x"}))
            .await
            .unwrap();
        engine.search("Observation", &raw, 10, 0).await.unwrap();
        assert_eq!(store.queries.load(Ordering::SeqCst), 1);

        // the chain read Patient
        engine
            .index_resource("Patient", &json!({"id": "10"}))
            .await
            .unwrap();
        engine.search("Observation", &raw, 10, 0).await.unwrap();
        assert_eq!(store.queries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_search_overlapping_write_is_not_cached() {
        let store = Arc::new(GatedStore::default());
        *store.rows.lock() = vec!["stale".to_string()];
        let engine = engine(store.clone());
        let raw = parse_query_string("code=a");

        let (first, ()) = tokio::join!(engine.search("Observation", &raw, 10, 0), async {
            store.entered.notified().await;
            *store.rows.lock() = vec!["fresh".to_string()];
            engine
                .index_resource("Observation", &json!({"id": "fresh"}))
                .await
                .unwrap();
            store.release.notify_one();
        });
        assert_eq!(first.unwrap().rows, vec!["stale"]);

        let after = engine.search("Observation", &raw, 10, 0).await.unwrap();
        assert_eq!(after.rows, vec!["fresh"]);
    }

    #[tokio::test]
    async fn test_error_classification() {
        let store = Arc::new(RecordingStore {
            fail: true,
            ..RecordingStore::default()
        });
        let engine = engine(store);

        let err = engine
            .search("Observation", &parse_query_string("code=a"), 10, 0)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.category(), ErrorCategory::Infrastructure);

        let err = engine
            .search("Observation", &parse_query_string("foo=bar"), 10, 0)
            .await
            .unwrap_err();
        assert!(err.is_client_error());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_compile_uses_count_and_offset() {
        let registry = SearchParameterRegistry::r4();
        let compiled = compile_search(
            &registry,
            &SearchSettings::default(),
            SqlDialect::Postgres,
            "Patient",
            &parse_query_string("_count=5&_offset=15&_sort=name"),
            10,
            0,
        )
        .unwrap();
        let n = compiled.page.params.len();
        assert_eq!(compiled.page.params[n - 2], octofhir_storage::SqlValue::Integer(5));
        assert_eq!(compiled.page.params[n - 1], octofhir_storage::SqlValue::Integer(15));
        assert_eq!(compiled.warnings.len(), 1);
        assert!(compiled.to_string().contains("-- warning:"));
    }
}
