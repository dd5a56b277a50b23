use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use octofhir_storage::SqlDialect;

#[derive(Parser)]
#[command(name = "octofhir-search")]
#[command(about = "OctoFHIR search: index FHIR resources and run FHIR searches locally")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to octofhir-search.toml when present)
    #[arg(short, long, global = true, env = "OCTOFHIR_SEARCH_CONFIG")]
    pub config: Option<String>,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the index rows a resource produces
    Extract(ExtractArgs),
    /// Index resources or Bundles into a SQLite database
    Index(IndexArgs),
    /// Search an index database
    Search(SearchArgs),
    /// Print the SQL a search compiles to
    Explain(ExplainArgs),
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum DialectArg {
    #[default]
    Postgres,
    Sqlite,
}

impl From<DialectArg> for SqlDialect {
    fn from(value: DialectArg) -> Self {
        match value {
            DialectArg::Postgres => SqlDialect::Postgres,
            DialectArg::Sqlite => SqlDialect::Sqlite,
        }
    }
}

#[derive(clap::Args)]
pub struct ExtractArgs {
    /// Resource type (e.g. Observation)
    pub resource_type: String,
    /// Path to JSON file (reads from stdin if omitted)
    pub file: Option<String>,
}

#[derive(clap::Args)]
pub struct IndexArgs {
    /// Index database path (created if missing)
    #[arg(long)]
    pub db: PathBuf,
    /// JSON files holding a resource or a Bundle
    #[arg(required = true)]
    pub files: Vec<String>,
}

#[derive(clap::Args)]
pub struct SearchArgs {
    /// Index database path
    #[arg(long)]
    pub db: PathBuf,
    /// Resource type (e.g. Patient)
    pub resource_type: String,
    /// Search parameters as key=value pairs or a query string (e.g. name=Smith birthdate=gt1990-01-01)
    pub params: Vec<String>,
    /// Page size (defaults to search.default_count)
    #[arg(long)]
    pub limit: Option<u32>,
    /// Number of matches to skip
    #[arg(long, default_value_t = 0)]
    pub offset: u32,
}

#[derive(clap::Args)]
pub struct ExplainArgs {
    /// Resource type (e.g. Patient)
    pub resource_type: String,
    /// Search parameters as key=value pairs or a query string
    pub params: Vec<String>,
    /// SQL dialect to compile for
    #[arg(long, default_value = "postgres")]
    pub dialect: DialectArg,
    /// Page size (defaults to search.default_count)
    #[arg(long)]
    pub limit: Option<u32>,
    /// Number of matches to skip
    #[arg(long, default_value_t = 0)]
    pub offset: u32,
}
