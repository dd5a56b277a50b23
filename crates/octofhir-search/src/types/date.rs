//! Date search.
//!
//! The query literal denotes the half-open range `[s, e)` of its written precision. Stored
//! values are instants, compared against that range per prefix:
//!
//! | prefix | condition |
//! |---|---|
//! | eq | `v >= s AND v < e` |
//! | ne | `NOT (v >= s AND v < e)` |
//! | gt, sa | `v >= e` |
//! | ge | `v >= s` |
//! | lt, eb | `v < s` |
//! | le | `v < e` |

use octofhir_core::PartialDateTime;
use octofhir_storage::SqlValue;

use crate::parameters::SearchPrefix;
use crate::parser::ParsedValue;
use crate::sql_builder::{SqlBuilder, SqlBuilderError};

pub fn build_date_condition(
    builder: &mut SqlBuilder,
    si: &str,
    value: &ParsedValue,
) -> Result<String, SqlBuilderError> {
    let literal = PartialDateTime::parse(&value.raw)
        .map_err(|e| SqlBuilderError::InvalidSearchValue(e.to_string()))?;
    let start = literal.start();
    let end = literal
        .end()
        .map_err(|e| SqlBuilderError::InvalidSearchValue(e.to_string()))?;
    let column = format!("{si}.value_date");

    Ok(match value.prefix.unwrap_or_default() {
        SearchPrefix::Eq => {
            let s = builder.bind(SqlValue::Timestamp(start));
            let e = builder.bind(SqlValue::Timestamp(end));
            format!("({column} >= {s} AND {column} < {e})")
        }
        SearchPrefix::Ne => {
            let s = builder.bind(SqlValue::Timestamp(start));
            let e = builder.bind(SqlValue::Timestamp(end));
            format!("NOT ({column} >= {s} AND {column} < {e})")
        }
        SearchPrefix::Gt | SearchPrefix::Sa => {
            let e = builder.bind(SqlValue::Timestamp(end));
            format!("{column} >= {e}")
        }
        SearchPrefix::Ge => {
            let s = builder.bind(SqlValue::Timestamp(start));
            format!("{column} >= {s}")
        }
        SearchPrefix::Lt | SearchPrefix::Eb => {
            let s = builder.bind(SqlValue::Timestamp(start));
            format!("{column} < {s}")
        }
        SearchPrefix::Le => {
            let e = builder.bind(SqlValue::Timestamp(end));
            format!("{column} < {e}")
        }
    })
}
