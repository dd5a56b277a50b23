//! Per-type value predicates over `search_index` rows.
//!
//! - String: case-insensitive substring by default, `:exact` byte equality
//! - Token: `system|code` with `|code`, `system|` and `:text`
//! - Reference: matches every stored form of the same target
//! - Date: precision ranges of the query literal
//! - Number: direct comparison per prefix
//!
//! [`compile_terminal`] wraps the value predicates of one parameter in its `EXISTS` subquery.

pub mod date;
pub mod number;
pub mod reference;
pub mod string;
pub mod token;

pub use date::build_date_condition;
pub use number::build_number_condition;
pub use reference::build_reference_condition;
pub use string::build_string_condition;
pub use token::{TokenValue, build_token_condition};

use crate::parameters::{SearchModifier, SearchParameterType};
use crate::parser::ParsedParameter;
use crate::sql_builder::{SqlBuilder, SqlBuilderError, build_or_clause};

/// Compile the last segment of a parameter against the resource row aliased `outer`.
pub fn compile_terminal(
    builder: &mut SqlBuilder,
    outer: &str,
    param: &ParsedParameter,
) -> Result<String, SqlBuilderError> {
    let si = builder.next_alias("si");
    let name = builder.bind_text(&param.name);
    let scope = format!(
        "{si}.resource_type = {outer}.resource_type AND {si}.resource_id = {outer}.id \
         AND {si}.param_name = {name}"
    );
    let exists = format!("EXISTS (SELECT 1 FROM search_index {si} WHERE {scope})");

    if param.is_missing() {
        // presence of any row, no value predicate
        let wants_missing = param.values.iter().any(|v| v.raw == "true");
        let wants_present = param.values.iter().any(|v| v.raw == "false");
        return Ok(match (wants_missing, wants_present) {
            (true, true) => "TRUE".to_string(),
            (true, false) => format!("NOT {exists}"),
            _ => exists,
        });
    }

    let mut conditions = Vec::with_capacity(param.values.len());
    for value in &param.values {
        let condition = match param.param_type {
            SearchParameterType::String => {
                build_string_condition(builder, &si, param.modifier.as_ref(), value)?
            }
            SearchParameterType::Token => {
                build_token_condition(builder, &si, param.modifier.as_ref(), value)?
            }
            SearchParameterType::Reference => build_reference_condition(builder, &si, value)?,
            SearchParameterType::Date => build_date_condition(builder, &si, value)?,
            SearchParameterType::Number => build_number_condition(builder, &si, value)?,
        };
        conditions.push(condition);
    }

    let exists = format!(
        "EXISTS (SELECT 1 FROM search_index {si} WHERE {scope} AND {})",
        build_or_clause(conditions)
    );
    if param.modifier == Some(SearchModifier::Not) {
        Ok(format!("NOT {exists}"))
    } else {
        Ok(exists)
    }
}
