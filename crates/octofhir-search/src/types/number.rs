//! Number search: direct comparison per prefix, no implicit tolerance.

use octofhir_storage::SqlValue;

use crate::parameters::SearchPrefix;
use crate::parser::ParsedValue;
use crate::sql_builder::{SqlBuilder, SqlBuilderError};

pub fn build_number_condition(
    builder: &mut SqlBuilder,
    si: &str,
    value: &ParsedValue,
) -> Result<String, SqlBuilderError> {
    let number = value
        .raw
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| SqlBuilderError::InvalidSearchValue(format!("'{}' is not a number", value.raw)))?;

    let op = match value.prefix.unwrap_or_default() {
        SearchPrefix::Eq => "=",
        SearchPrefix::Ne => "<>",
        SearchPrefix::Gt | SearchPrefix::Sa => ">",
        SearchPrefix::Ge => ">=",
        SearchPrefix::Lt | SearchPrefix::Eb => "<",
        SearchPrefix::Le => "<=",
    };
    let p = builder.bind(SqlValue::Float(number));
    Ok(format!("{si}.value_number {op} {p}"))
}
