use anyhow::Result;
use octofhir_search::{SearchParameterRegistry, extract as extract_rows};

use crate::cli::OutputFormat;
use crate::commands::read_json;
use crate::output::{print_json, print_rows};

pub fn extract(resource_type: &str, file: &Option<String>, format: OutputFormat) -> Result<()> {
    let body = read_json(file.as_deref())?;
    let registry = SearchParameterRegistry::r4();
    if !registry.is_known_resource_type(resource_type) {
        anyhow::bail!("Unknown resource type: {resource_type}");
    }
    let rows = extract_rows(&registry, resource_type, &body);
    match format {
        OutputFormat::Json => print_json(&rows)?,
        OutputFormat::Table => print_rows(&rows),
    }
    Ok(())
}
