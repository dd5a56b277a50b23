//! Forward chaining for reference parameters.
//!
//! Chaining searches on properties of referenced resources:
//! - `Observation?subject.name=Smith` - observations whose subject has name Smith
//! - `Observation?subject:Patient.name=Smith` - restrict the hop to Patient targets
//!
//! Each hop compiles to an `EXISTS` over the reference rows of the current resource, joined
//! to the resource rows they resolve to, with the rest of the chain correlated against the
//! joined resource.

use crate::parameters::SearchParameterType;
use crate::parser::QueryError;
use crate::registry::SearchParameterRegistry;
use crate::sql_builder::SqlBuilder;

/// Target types a forward hop `name[:qualifier]` from `resource_type` may land on.
pub fn chain_candidates(
    registry: &SearchParameterRegistry,
    resource_type: &str,
    name: &str,
    qualifier: Option<&str>,
) -> Result<Vec<String>, QueryError> {
    let spec = registry
        .lookup(resource_type, name)
        .ok_or_else(|| QueryError::UnknownParameter {
            resource_type: resource_type.to_string(),
            name: name.to_string(),
        })?;

    if spec.param_type != SearchParameterType::Reference {
        return Err(QueryError::invalid_chain(format!(
            "{resource_type}.{name} is a {} parameter, not a reference",
            spec.param_type
        )));
    }

    match qualifier {
        Some(target) if spec.targets(target) => Ok(vec![target.to_string()]),
        Some(target) => Err(QueryError::invalid_chain(format!(
            "{target} is not a valid target of {resource_type}.{name}"
        ))),
        None if spec.reference_targets.is_empty() => Err(QueryError::invalid_chain(format!(
            "{resource_type}.{name} has no target types"
        ))),
        None => Ok(spec.reference_targets.clone()),
    }
}

/// `column` holds a reference that points at the resource row aliased `resource`.
pub fn reference_resolves(column: &str, resource: &str) -> String {
    format!(
        "({column} = {resource}.resource_type || '/' || {resource}.id \
         OR {column} = 'urn:uuid:' || {resource}.id \
         OR {column} = {resource}.id)"
    )
}

/// Compile one forward hop. `inner` is already correlated with `target`.
pub fn forward_exists(
    builder: &mut SqlBuilder,
    outer: &str,
    param: &str,
    target_types: &[String],
    target: &str,
    inner: &str,
) -> String {
    let si = builder.next_alias("si");
    let p = builder.bind_text(param);
    let types = builder.bind_list(target_types.iter().map(String::as_str));
    format!(
        "EXISTS (SELECT 1 FROM search_index {si} JOIN resources {target} ON {resolves} \
         WHERE {si}.resource_type = {outer}.resource_type AND {si}.resource_id = {outer}.id \
         AND {si}.param_name = {p} AND {target}.resource_type IN {types} AND {inner})",
        resolves = reference_resolves(&format!("{si}.value_reference"), target),
    )
}
