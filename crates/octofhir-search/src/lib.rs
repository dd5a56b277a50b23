//! # octofhir-search
//!
//! FHIR search parameter indexing and query translation.
//!
//! - [`extractor`] turns a resource body into normalized index rows
//! - [`parser`] validates a search query against the [`registry`]
//! - [`sql_builder`] compiles the parsed query into parameterized SQL for an
//!   [`IndexStore`](octofhir_storage::IndexStore) dialect
//! - [`engine`] ties these together with the optional [`query_cache`]

pub mod chaining;
pub mod common;
pub mod config;
pub mod definitions;
pub mod engine;
pub mod extractor;
pub mod include;
pub mod parameters;
pub mod parser;
pub mod path;
pub mod query_cache;
pub mod registry;
pub mod reverse_chaining;
pub mod shared_cache;
pub mod sql_builder;
pub mod types;

pub use config::{
    CacheSettings, EngineConfig, LoggingSettings, MalformedValuePolicy, RedisSettings,
    SearchSettings,
};
pub use engine::{
    CompiledSearch, EngineError, ErrorCategory, SearchEngine, SearchResult, compile_search,
};
pub use extractor::{ExtractError, extract, extract_param};
pub use include::IncludeDirective;
pub use parameters::{ParamSpec, SearchModifier, SearchParameterType, SearchPrefix};
pub use parser::{
    ChainLink, ParsedParameter, ParsedQuery, ParsedValue, QueryError, QueryParser, RawQuery,
    parse_query_string,
};
pub use query_cache::{CacheKey, CacheStatsSnapshot, ResultCache};
pub use registry::SearchParameterRegistry;
pub use shared_cache::{SharedCache, create_result_cache};
pub use sql_builder::{BuiltSearch, SortKey, SortSpec, SqlBuilderError, build_search};
