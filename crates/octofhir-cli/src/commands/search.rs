use anyhow::Result;
use octofhir_search::{EngineConfig, SearchParameterRegistry, compile_search};

use crate::cli::{ExplainArgs, OutputFormat, SearchArgs};
use crate::commands::{open_engine, raw_query};
use crate::output::{print_json, print_result};

pub async fn search(config: &EngineConfig, args: &SearchArgs, format: OutputFormat) -> Result<()> {
    let engine = open_engine(config, &args.db).await?;
    let raw = raw_query(&args.params);
    let limit = args.limit.unwrap_or(config.search.default_count);
    let result = engine
        .search(&args.resource_type, &raw, limit, args.offset)
        .await?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => print_result(&args.resource_type, &result),
    }
    Ok(())
}

pub fn explain(config: &EngineConfig, args: &ExplainArgs) -> Result<()> {
    let registry = SearchParameterRegistry::r4();
    let compiled = compile_search(
        &registry,
        &config.search,
        args.dialect.into(),
        &args.resource_type,
        &raw_query(&args.params),
        args.limit.unwrap_or(config.search.default_count),
        args.offset,
    )?;
    print!("{compiled}");
    Ok(())
}
