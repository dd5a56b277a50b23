use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use octofhir_core::generate_id;
use octofhir_search::EngineConfig;
use serde_json::Value;

use crate::commands::{open_engine, read_json};
use crate::output::{print_success, print_warning};

/// Give `resource` an id if it has none: the uuid of a `urn:uuid:` full URL, or a fresh one.
fn ensure_id(mut resource: Value, full_url: Option<&str>) -> Value {
    if let Value::Object(map) = &mut resource
        && !map.contains_key("id")
    {
        let id = full_url
            .and_then(|url| url.strip_prefix("urn:uuid:"))
            .map(str::to_string)
            .unwrap_or_else(generate_id);
        map.insert("id".to_string(), Value::String(id));
    }
    resource
}

/// Resources held by a document: the entries of a Bundle, or the document itself.
fn resources(document: Value) -> Vec<Value> {
    if document.get("resourceType").and_then(Value::as_str) != Some("Bundle") {
        return vec![ensure_id(document, None)];
    }
    let Value::Object(mut bundle) = document else {
        return Vec::new();
    };
    match bundle.remove("entry") {
        Some(Value::Array(entries)) => entries
            .into_iter()
            .filter_map(|mut entry| {
                let full_url = entry
                    .get("fullUrl")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let resource = entry.get_mut("resource").map(Value::take)?;
                Some(ensure_id(resource, full_url.as_deref()))
            })
            .collect(),
        _ => Vec::new(),
    }
}

pub async fn index(config: &EngineConfig, db: &Path, files: &[String]) -> Result<()> {
    let engine = open_engine(config, db).await?;
    let mut indexed = 0usize;
    let mut failed = 0usize;

    for file in files {
        let document = read_json(Some(file))?;
        for resource in resources(document) {
            let Some(resource_type) = resource.get("resourceType").and_then(Value::as_str) else {
                print_warning(&format!("{file}: skipping entry without resourceType"));
                failed += 1;
                continue;
            };
            match engine.index_resource(resource_type, &resource).await {
                Ok(key) => {
                    tracing::debug!(file = %file, resource = %key, "indexed");
                    indexed += 1;
                }
                Err(e) => {
                    print_warning(&format!("{file}: {resource_type}: {e}"));
                    failed += 1;
                }
            }
        }
    }

    print_success(&format!(
        "Indexed {} resources into {}",
        indexed.to_string().cyan(),
        db.display()
    ));
    if failed > 0 {
        anyhow::bail!("{failed} resources could not be indexed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bundle_entries_are_unwrapped() {
        let bundle = json!({
            "resourceType": "Bundle",
            "entry": [
                {"resource": {"resourceType": "Patient", "id": "1"}},
                {"fullUrl": "urn:uuid:x"},
                {"resource": {"resourceType": "Observation", "id": "2"}}
            ]
        });
        let found = resources(bundle);
        assert_eq!(found.len(), 2);
        assert_eq!(found[1]["resourceType"], "Observation");

        let single = resources(json!({"resourceType": "Patient", "id": "1"}));
        assert_eq!(single.len(), 1);
        assert!(resources(json!({"resourceType": "Bundle"})).is_empty());
    }

    #[test]
    fn test_missing_ids_are_assigned() {
        let bundle = json!({
            "resourceType": "Bundle",
            "entry": [
                {"fullUrl": "urn:uuid:0c3a1f6e", "resource": {"resourceType": "Patient"}},
                {"resource": {"resourceType": "Patient"}},
                {"fullUrl": "urn:uuid:ignored", "resource": {"resourceType": "Patient", "id": "kept"}}
            ]
        });
        let found = resources(bundle);
        assert_eq!(found[0]["id"], "0c3a1f6e");
        assert!(found[1]["id"].as_str().is_some_and(|id| id.len() == 36));
        assert_eq!(found[2]["id"], "kept");
    }
}
