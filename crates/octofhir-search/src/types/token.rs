//! Token search.
//!
//! Token search is used for coded elements (CodeableConcept, Coding, Identifier, code, etc.):
//! - (default): exact, case-sensitive match on system and code
//! - :not: handled by the caller, which negates the whole subquery
//! - :text: case-insensitive match on the display text

use crate::parameters::SearchModifier;
use crate::parser::ParsedValue;
use crate::sql_builder::{SqlBuilder, SqlBuilderError, escape_like_pattern};

/// A token query value split on its first `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenValue<'a> {
    /// `code`, or `|code`: the code in any system.
    Code(&'a str),
    /// `system|`: any code in the system.
    System(&'a str),
    /// `system|code`
    SystemCode(&'a str, &'a str),
}

impl<'a> TokenValue<'a> {
    pub fn parse(value: &'a str) -> Result<Self, SqlBuilderError> {
        match value.split_once('|') {
            None if !value.is_empty() => Ok(Self::Code(value)),
            Some(("", code)) if !code.is_empty() => Ok(Self::Code(code)),
            Some((system, "")) if !system.is_empty() => Ok(Self::System(system)),
            Some((system, code)) if !system.is_empty() && !code.is_empty() => {
                Ok(Self::SystemCode(system, code))
            }
            _ => Err(SqlBuilderError::InvalidSearchValue(format!(
                "token '{value}' has neither system nor code"
            ))),
        }
    }
}

pub fn build_token_condition(
    builder: &mut SqlBuilder,
    si: &str,
    modifier: Option<&SearchModifier>,
    value: &ParsedValue,
) -> Result<String, SqlBuilderError> {
    match modifier {
        None | Some(SearchModifier::Not) => {}
        Some(SearchModifier::Text) => {
            let pattern = format!("%{}%", escape_like_pattern(&value.raw));
            return Ok(builder.like_ci(&format!("{si}.value_token_display"), pattern));
        }
        Some(other) => return Err(SqlBuilderError::InvalidModifier(other.to_string())),
    }

    Ok(match TokenValue::parse(&value.raw)? {
        TokenValue::Code(code) => {
            let c = builder.bind_text(code);
            format!("{si}.value_token_code = {c}")
        }
        TokenValue::System(system) => {
            let s = builder.bind_text(system);
            format!("{si}.value_token_system = {s}")
        }
        TokenValue::SystemCode(system, code) => {
            let s = builder.bind_text(system);
            let c = builder.bind_text(code);
            format!("({si}.value_token_system = {s} AND {si}.value_token_code = {c})")
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use octofhir_storage::{SqlDialect, SqlValue};

    fn value(raw: &str) -> ParsedValue {
        ParsedValue {
            prefix: None,
            raw: raw.to_string(),
        }
    }

    #[test]
    fn test_parse_token_value() {
        assert_eq!(
            TokenValue::parse("http://loinc.org|8867-4").unwrap(),
            TokenValue::SystemCode("http://loinc.org", "8867-4")
        );
        assert_eq!(TokenValue::parse("|8867-4").unwrap(), TokenValue::Code("8867-4"));
        assert_eq!(
            TokenValue::parse("http://loinc.org|").unwrap(),
            TokenValue::System("http://loinc.org")
        );
        assert_eq!(TokenValue::parse("male").unwrap(), TokenValue::Code("male"));
        // split on the first bar only
        assert_eq!(
            TokenValue::parse("urn:x|a|b").unwrap(),
            TokenValue::SystemCode("urn:x", "a|b")
        );
        assert!(TokenValue::parse("|").is_err());
    }

    #[test]
    fn test_system_and_code_condition() {
        let mut builder = SqlBuilder::new(SqlDialect::Postgres);
        let sql = build_token_condition(&mut builder, "si2", None, &value("http://loinc.org|8867-4"))
            .unwrap();
        assert_eq!(sql, "(si2.value_token_system = $1 AND si2.value_token_code = $2)");
        assert_eq!(
            builder.params(),
            &[SqlValue::text("http://loinc.org"), SqlValue::text("8867-4")]
        );
    }

    #[test]
    fn test_text_searches_display() {
        let mut builder = SqlBuilder::new(SqlDialect::Sqlite);
        let sql = build_token_condition(
            &mut builder,
            "si1",
            Some(&SearchModifier::Text),
            &value("heart rate"),
        )
        .unwrap();
        assert_eq!(sql, "si1.value_token_display LIKE ?1 ESCAPE '\\'");
    }
}
