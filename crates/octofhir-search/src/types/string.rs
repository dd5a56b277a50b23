//! String search.
//!
//! - (default): contains, case-insensitive
//! - :exact: byte equality
//! - :contains: contains, case-insensitive

use crate::parameters::SearchModifier;
use crate::parser::ParsedValue;
use crate::sql_builder::{SqlBuilder, SqlBuilderError, escape_like_pattern};

pub fn build_string_condition(
    builder: &mut SqlBuilder,
    si: &str,
    modifier: Option<&SearchModifier>,
    value: &ParsedValue,
) -> Result<String, SqlBuilderError> {
    let column = format!("{si}.value_string");
    match modifier {
        None | Some(SearchModifier::Contains) => {
            let pattern = format!("%{}%", escape_like_pattern(&value.raw));
            Ok(builder.like_ci(&column, pattern))
        }
        Some(SearchModifier::Exact) => {
            let p = builder.bind_text(&value.raw);
            Ok(format!("{column} = {p}"))
        }
        Some(other) => Err(SqlBuilderError::InvalidModifier(other.to_string())),
    }
}
