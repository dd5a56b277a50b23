//! `_include` and `_revinclude`.
//!
//! - `_include=Observation:subject[:Patient]`: resources the page's matches reference
//! - `_revinclude=Observation:subject`: resources that reference the page's matches
//!
//! Both run as a separate statement with the page query embedded as a subquery, so they see
//! exactly the ids of the returned page.

use octofhir_storage::{IndexQuery, SqlDialect};

use crate::chaining::reference_resolves;
use crate::parameters::SearchParameterType;
use crate::parser::QueryError;
use crate::registry::SearchParameterRegistry;
use crate::sql_builder::SqlBuilder;

/// A parsed `_include` or `_revinclude` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeDirective {
    /// Type holding the reference parameter.
    pub source_type: String,
    pub param: String,
    /// Types the reference may resolve to.
    pub target_types: Vec<String>,
    pub reverse: bool,
}

impl IncludeDirective {
    fn control_name(&self) -> &'static str {
        if self.reverse { "_revinclude" } else { "_include" }
    }
}

/// Parse `Type:param[:Target]` for a search on `base_type`.
pub fn parse_include(
    registry: &SearchParameterRegistry,
    base_type: &str,
    value: &str,
    reverse: bool,
) -> Result<IncludeDirective, QueryError> {
    let name = if reverse { "_revinclude" } else { "_include" };
    let parts: Vec<&str> = value.split(':').collect();
    let (source_type, param, target) = match parts.as_slice() {
        [source, param] => (*source, *param, None),
        [source, param, target] => (*source, *param, Some(*target)),
        _ => {
            return Err(QueryError::invalid_value(
                name,
                format!("'{value}' must have the form Type:parameter[:Target]"),
            ));
        }
    };

    if !reverse && source_type != base_type {
        return Err(QueryError::invalid_value(
            name,
            format!("{source_type} does not match the searched type {base_type}"),
        ));
    }

    let spec = registry
        .lookup(source_type, param)
        .ok_or_else(|| QueryError::UnknownParameter {
            resource_type: source_type.to_string(),
            name: param.to_string(),
        })?;
    if spec.param_type != SearchParameterType::Reference {
        return Err(QueryError::invalid_value(
            name,
            format!("{source_type}.{param} is not a reference parameter"),
        ));
    }

    let target_types = if reverse {
        let target = target.unwrap_or(base_type);
        if target != base_type || !spec.targets(base_type) {
            return Err(QueryError::invalid_value(
                name,
                format!("{source_type}.{param} cannot reference {base_type}"),
            ));
        }
        vec![base_type.to_string()]
    } else {
        match target {
            Some(t) if spec.targets(t) => vec![t.to_string()],
            Some(t) => {
                return Err(QueryError::invalid_value(
                    name,
                    format!("{t} is not a valid target of {source_type}.{param}"),
                ));
            }
            None => spec.reference_targets.clone(),
        }
    };

    Ok(IncludeDirective {
        source_type: source_type.to_string(),
        param: param.to_string(),
        target_types,
        reverse,
    })
}

/// Build the `(resource_type, id)` statement for one directive over the page query.
pub fn build_include_query(
    dialect: SqlDialect,
    base_type: &str,
    directive: &IncludeDirective,
    page: &IndexQuery,
) -> IndexQuery {
    let mut builder = SqlBuilder::with_params(dialect, page.params.clone());
    let source = builder.bind_text(&directive.source_type);
    let param = builder.bind_text(&directive.param);
    tracing::trace!(directive = directive.control_name(), source_type = %directive.source_type, "building include query");

    let sql = if directive.reverse {
        let base = builder.bind_text(base_type);
        format!(
            "SELECT DISTINCT src.resource_type, src.id FROM resources src \
             JOIN search_index si ON si.resource_type = src.resource_type AND si.resource_id = src.id \
             JOIN resources m ON m.resource_type = {base} AND m.id IN ({page_sql}) \
             WHERE src.resource_type = {source} AND si.param_name = {param} \
             AND si.value_reference IN (m.resource_type || '/' || m.id, 'urn:uuid:' || m.id, m.id)",
            page_sql = page.sql,
        )
    } else {
        let targets = builder.bind_list(directive.target_types.iter().map(String::as_str));
        format!(
            "SELECT DISTINCT t.resource_type, t.id FROM search_index si \
             JOIN resources t ON {resolves} \
             WHERE si.resource_type = {source} AND si.param_name = {param} \
             AND t.resource_type IN {targets} AND si.resource_id IN ({page_sql})",
            resolves = reference_resolves("si.value_reference", "t"),
            page_sql = page.sql,
        )
    };

    IndexQuery::new(sql, builder.into_params())
}

#[cfg(test)]
mod tests {
    use super::*;
    use octofhir_storage::SqlValue;

    #[test]
    fn test_parse_include() {
        let registry = SearchParameterRegistry::r4();
        let d = parse_include(&registry, "Observation", "Observation:subject", false).unwrap();
        assert_eq!(d.target_types, vec!["Patient", "Group", "Device", "Location"]);

        let d = parse_include(&registry, "Observation", "Observation:subject:Patient", false).unwrap();
        assert_eq!(d.target_types, vec!["Patient"]);

        let d = parse_include(&registry, "Patient", "Observation:patient", true).unwrap();
        assert!(d.reverse);
        assert_eq!(d.source_type, "Observation");
        assert_eq!(d.target_types, vec!["Patient"]);
    }

    #[test]
    fn test_parse_include_errors() {
        let registry = SearchParameterRegistry::r4();
        assert!(parse_include(&registry, "Observation", "Observation", false).is_err());
        assert!(parse_include(&registry, "Observation", "Patient:organization", false).is_err());
        assert!(parse_include(&registry, "Observation", "Observation:code", false).is_err());
        assert!(matches!(
            parse_include(&registry, "Observation", "Observation:nope", false),
            Err(QueryError::UnknownParameter { .. })
        ));
        assert!(parse_include(&registry, "Observation", "Observation:subject:Medication", false).is_err());
        // Observation.encounter cannot point at a Patient
        assert!(parse_include(&registry, "Patient", "Observation:encounter", true).is_err());
    }

    #[test]
    fn test_include_query_continues_numbering() {
        let page = IndexQuery::new(
            "SELECT r.id FROM resources r WHERE r.resource_type = $1 ORDER BY r.id ASC LIMIT $2 OFFSET $3",
            vec![SqlValue::text("Observation"), SqlValue::Integer(10), SqlValue::Integer(0)],
        );
        let directive = IncludeDirective {
            source_type: "Observation".into(),
            param: "subject".into(),
            target_types: vec!["Patient".into()],
            reverse: false,
        };
        let query = build_include_query(SqlDialect::Postgres, "Observation", &directive, &page);
        assert!(query.sql.contains("si.resource_type = $4 AND si.param_name = $5"));
        assert!(query.sql.contains("t.resource_type IN ($6)"));
        assert!(query.sql.ends_with(&format!("si.resource_id IN ({}))", page.sql)));
        assert_eq!(query.params.len(), 6);
    }
}
