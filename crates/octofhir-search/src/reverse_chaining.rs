//! Reverse chaining (`_has`).
//!
//! `Patient?_has:Observation:patient:code=1234` finds patients referenced by an Observation
//! (through its `patient` parameter) whose code is 1234. `_has` nests to any depth and may
//! be mixed with forward chains; every level compiles the same way.

use crate::parameters::SearchParameterType;
use crate::parser::QueryError;
use crate::registry::SearchParameterRegistry;
use crate::sql_builder::SqlBuilder;

/// The `Type:refParam:` head of a `_has` key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HasLink<'a> {
    pub source_type: String,
    pub reference_param: String,
    /// Key text after the head, parsed against `source_type`.
    pub remainder: &'a str,
}

/// Parse and validate the part of a `_has` key after the `_has:` prefix.
pub fn parse_has<'a>(
    registry: &SearchParameterRegistry,
    current: &str,
    key: &'a str,
) -> Result<HasLink<'a>, QueryError> {
    let mut parts = key.splitn(3, ':');
    let (Some(source_type), Some(reference_param), Some(remainder)) =
        (parts.next(), parts.next(), parts.next())
    else {
        return Err(QueryError::invalid_chain(format!(
            "_has:{key} must have the form _has:Type:reference:parameter"
        )));
    };
    if source_type.is_empty() || reference_param.is_empty() || remainder.is_empty() {
        return Err(QueryError::invalid_chain(format!(
            "_has:{key} has an empty segment"
        )));
    }

    if !registry.is_known_resource_type(source_type) {
        return Err(QueryError::invalid_chain(format!(
            "unknown resource type {source_type} in _has"
        )));
    }

    let spec = registry
        .lookup(source_type, reference_param)
        .ok_or_else(|| QueryError::UnknownParameter {
            resource_type: source_type.to_string(),
            name: reference_param.to_string(),
        })?;
    if spec.param_type != SearchParameterType::Reference {
        return Err(QueryError::invalid_chain(format!(
            "{source_type}.{reference_param} is not a reference parameter"
        )));
    }
    if !spec.targets(current) {
        return Err(QueryError::invalid_chain(format!(
            "{source_type}.{reference_param} cannot reference {current}"
        )));
    }

    Ok(HasLink {
        source_type: source_type.to_string(),
        reference_param: reference_param.to_string(),
        remainder,
    })
}

/// Compile one `_has` hop. `inner` is already correlated with `source`.
pub fn reverse_exists(
    builder: &mut SqlBuilder,
    outer: &str,
    source_type: &str,
    reference_param: &str,
    source: &str,
    inner: &str,
) -> String {
    let rf = builder.next_alias("ref");
    let st = builder.bind_text(source_type);
    let p = builder.bind_text(reference_param);
    format!(
        "EXISTS (SELECT 1 FROM resources {source} JOIN search_index {rf} \
         ON {rf}.resource_type = {source}.resource_type AND {rf}.resource_id = {source}.id \
         WHERE {source}.resource_type = {st} AND {rf}.param_name = {p} \
         AND {rf}.value_reference IN \
         ({outer}.resource_type || '/' || {outer}.id, 'urn:uuid:' || {outer}.id, {outer}.id) \
         AND {inner})"
    )
}
