pub mod extract;
pub mod index;
pub mod search;

use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use octofhir_db_sqlite::SqliteIndexStore;
use octofhir_search::{
    EngineConfig, RawQuery, SearchEngine, SearchParameterRegistry, create_result_cache,
    parse_query_string,
};
use serde_json::Value;

/// Read a JSON document from `file`, or stdin when `None`.
pub fn read_json(file: Option<&str>) -> Result<Value> {
    let content = match file {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("Failed to read file: {path}"))?
        }
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read from stdin")?;
            buf
        }
    };
    serde_json::from_str(&content).context("Invalid JSON")
}

/// Join `key=value` arguments (or whole query strings) into one raw query.
pub fn raw_query(params: &[String]) -> RawQuery {
    parse_query_string(&params.join("&"))
}

pub async fn open_engine(config: &EngineConfig, db: &Path) -> Result<SearchEngine> {
    let store = SqliteIndexStore::open(db)
        .with_context(|| format!("Failed to open index database: {}", db.display()))?;
    let engine = SearchEngine::new(
        Arc::new(SearchParameterRegistry::r4()),
        Arc::new(store),
        config.search.clone(),
    );
    Ok(match create_result_cache(&config.cache, &config.redis).await {
        Some(cache) => engine.with_cache(cache),
        None => engine,
    })
}
