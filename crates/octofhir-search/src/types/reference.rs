//! Reference search.
//!
//! Stored references may be `Type/id`, `urn:uuid:id` or a bare id depending on the source,
//! so a query value matches every form of the same target. An untyped query value also
//! matches typed stored values through a case-sensitive `/id` suffix. Values that do not name a resource
//! (external URLs, non-uuid URNs) match the raw stored text.

use octofhir_core::{ReferenceIdentity, UnresolvableReference};

use crate::parser::ParsedValue;
use crate::sql_builder::{SqlBuilder, SqlBuilderError};

pub fn build_reference_condition(
    builder: &mut SqlBuilder,
    si: &str,
    value: &ParsedValue,
) -> Result<String, SqlBuilderError> {
    let identity = match ReferenceIdentity::parse(&value.raw) {
        Ok(identity) => identity,
        Err(UnresolvableReference::Contained(id)) => {
            return Err(SqlBuilderError::InvalidSearchValue(format!(
                "contained reference #{id} cannot be searched"
            )));
        }
        Err(_) => {
            let raw = builder.bind_text(&value.raw);
            return Ok(format!("{si}.value_reference_raw = {raw}"));
        }
    };

    let forms = builder.bind_list(identity.equivalent_forms());
    let raw = builder.bind_text(&value.raw);
    let mut condition = format!(
        "({si}.value_reference IN {forms} OR {si}.value_reference_raw = {raw}"
    );
    if identity.resource_type().is_none() {
        let suffix = builder.ends_with(&format!("{si}.value_reference"), &format!("/{}", identity.id()));
        condition.push_str(&format!(" OR {suffix}"));
    }
    condition.push(')');
    Ok(condition)
}
