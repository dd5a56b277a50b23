//! Index row extraction.
//!
//! Walks a resource body with the parameters registered for its type and emits normalized
//! [`IndexRow`]s. Extraction is best-effort: a parameter whose values cannot be normalized is
//! logged and skipped, and the remaining parameters are still indexed.

use octofhir_core::{
    CoreError, IndexRow, IndexValue, PartialDateTime, ReferenceIdentity, UnresolvableReference,
};
use serde_json::Value;

use crate::parameters::{ParamSpec, SearchParameterType};
use crate::registry::SearchParameterRegistry;

/// Why one parameter of one resource could not be indexed. Logged, never surfaced.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unsupported value shape for {param_type} parameter: {found}")]
    UnsupportedShape {
        param_type: SearchParameterType,
        found: &'static str,
    },

    #[error("invalid date: {0}")]
    InvalidDate(#[from] CoreError),

    #[error("invalid reference: {0}")]
    InvalidReference(#[from] UnresolvableReference),

    #[error("invalid number: {0}")]
    InvalidNumber(String),
}

impl ExtractError {
    fn shape(param_type: SearchParameterType, value: &Value) -> Self {
        Self::UnsupportedShape {
            param_type,
            found: json_kind(value),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Extract every index row of a resource.
///
/// Returns no rows for a body without a string `id`, because rows cannot be keyed.
pub fn extract(registry: &SearchParameterRegistry, resource_type: &str, body: &Value) -> Vec<IndexRow> {
    let Some(resource_id) = body.get("id").and_then(Value::as_str) else {
        tracing::warn!(resource_type = %resource_type, "resource has no id; nothing indexed");
        return Vec::new();
    };

    let mut rows = Vec::new();
    for spec in registry.params_for(resource_type) {
        match extract_param(&spec, body) {
            Ok(values) => rows.extend(
                values
                    .into_iter()
                    .map(|v| IndexRow::new(resource_type, resource_id, &spec.code, v)),
            ),
            Err(e) => {
                tracing::warn!(
                    resource_type = %resource_type,
                    id = %resource_id,
                    param = %spec.code,
                    error = %e,
                    "search parameter extraction failed; parameter skipped"
                );
            }
        }
    }

    if !rows.iter().any(|r| r.param_name == "_id") {
        rows.push(IndexRow::new(
            resource_type,
            resource_id,
            "_id",
            IndexValue::Token {
                system: None,
                code: resource_id.to_string(),
                display: None,
            },
        ));
    }
    rows
}

/// Normalize every value one parameter selects.
///
/// A value that cannot be normalized is skipped and the other values of the parameter are kept.
/// The parameter fails only when it selected something and none of it could be normalized.
pub fn extract_param(spec: &ParamSpec, body: &Value) -> Result<Vec<IndexValue>, ExtractError> {
    let mut out: Vec<IndexValue> = Vec::new();
    let mut skipped: Vec<ExtractError> = Vec::new();
    for raw in spec.extractor.values(body) {
        match normalize(spec, raw) {
            Ok(values) => {
                for value in values {
                    if !out.contains(&value) {
                        out.push(value);
                    }
                }
            }
            Err(e) => skipped.push(e),
        }
    }

    if out.is_empty() && !skipped.is_empty() {
        return Err(skipped.remove(0));
    }
    for e in &skipped {
        tracing::debug!(param = %spec.code, error = %e, "value skipped");
    }
    Ok(out)
}

fn normalize(spec: &ParamSpec, value: &Value) -> Result<Vec<IndexValue>, ExtractError> {
    match spec.param_type {
        SearchParameterType::String => string_values(value),
        SearchParameterType::Token => token_values(value),
        SearchParameterType::Reference => reference_values(spec, value),
        SearchParameterType::Date => date_values(value),
        SearchParameterType::Number => number_values(value),
    }
}

const NAME_AND_ADDRESS_PARTS: &[&str] = &[
    "text",
    "family",
    "given",
    "prefix",
    "suffix",
    "line",
    "city",
    "district",
    "state",
    "postalCode",
    "country",
];

fn string_values(value: &Value) -> Result<Vec<IndexValue>, ExtractError> {
    match value {
        Value::String(s) => Ok(string_value(s).into_iter().collect()),
        Value::Object(map) => {
            let mut parts = Vec::new();
            let mut recognized = false;
            for key in NAME_AND_ADDRESS_PARTS {
                match map.get(*key) {
                    Some(Value::String(s)) => {
                        recognized = true;
                        parts.extend(string_value(s));
                    }
                    Some(Value::Array(items)) => {
                        recognized = true;
                        parts.extend(items.iter().filter_map(Value::as_str).filter_map(string_value));
                    }
                    _ => {}
                }
            }
            if recognized {
                Ok(parts)
            } else {
                Err(ExtractError::shape(SearchParameterType::String, value))
            }
        }
        other => Err(ExtractError::shape(SearchParameterType::String, other)),
    }
}

fn string_value(s: &str) -> Option<IndexValue> {
    let s = s.trim();
    (!s.is_empty()).then(|| IndexValue::String { value: s.to_string() })
}

fn token(system: Option<&str>, code: &str, display: Option<&str>) -> Option<IndexValue> {
    if code.is_empty() {
        return None;
    }
    Some(IndexValue::Token {
        system: system.filter(|s| !s.is_empty()).map(str::to_string),
        code: code.to_string(),
        display: display.filter(|d| !d.is_empty()).map(str::to_string),
    })
}

fn str_field<'a>(value: &'a Value, name: &str) -> Option<&'a str> {
    value.get(name).and_then(Value::as_str)
}

fn token_values(value: &Value) -> Result<Vec<IndexValue>, ExtractError> {
    match value {
        Value::String(s) => Ok(match s.split_once('|') {
            Some((system, code)) => token(Some(system), code, None),
            None => token(None, s, None),
        }
        .into_iter()
        .collect()),
        Value::Bool(b) => Ok(token(None, if *b { "true" } else { "false" }, None)
            .into_iter()
            .collect()),
        Value::Object(map) if map.contains_key("coding") || map.contains_key("text") => {
            // CodeableConcept
            let text = str_field(value, "text");
            let codings = map.get("coding").and_then(Value::as_array);
            Ok(codings
                .into_iter()
                .flatten()
                .filter_map(|coding| {
                    let code = str_field(coding, "code")?;
                    token(
                        str_field(coding, "system"),
                        code,
                        str_field(coding, "display").or(text),
                    )
                })
                .collect())
        }
        Value::Object(map) if map.contains_key("code") => {
            // Coding
            let code = str_field(value, "code")
                .ok_or_else(|| ExtractError::shape(SearchParameterType::Token, value))?;
            Ok(token(str_field(value, "system"), code, str_field(value, "display"))
                .into_iter()
                .collect())
        }
        Value::Object(map) if map.contains_key("value") => {
            // Identifier or ContactPoint
            let code = str_field(value, "value")
                .ok_or_else(|| ExtractError::shape(SearchParameterType::Token, value))?;
            let display = value
                .get("type")
                .and_then(|t| str_field(t, "text"));
            Ok(token(str_field(value, "system"), code, display)
                .into_iter()
                .collect())
        }
        other => Err(ExtractError::shape(SearchParameterType::Token, other)),
    }
}

fn reference_values(spec: &ParamSpec, value: &Value) -> Result<Vec<IndexValue>, ExtractError> {
    let raw = match value {
        Value::String(s) => s.as_str(),
        Value::Object(map) => match map.get("reference") {
            Some(Value::String(s)) => s.as_str(),
            // identifier-only or display-only references carry nothing to match on
            None => return Ok(Vec::new()),
            Some(other) => return Err(ExtractError::shape(SearchParameterType::Reference, other)),
        },
        other => return Err(ExtractError::shape(SearchParameterType::Reference, other)),
    };

    let reference = match ReferenceIdentity::parse(raw) {
        // a typed value outside the parameter's targets belongs to a sibling parameter
        Ok(ReferenceIdentity::Typed(typed))
            if !spec.reference_targets.is_empty() && !spec.targets(&typed.resource_type) =>
        {
            return Ok(Vec::new());
        }
        Ok(identity) => identity.normalized(),
        Err(UnresolvableReference::Contained(_)) => return Ok(Vec::new()),
        Err(UnresolvableReference::Urn(_) | UnresolvableReference::External(_)) => raw.trim().to_string(),
        Err(e @ UnresolvableReference::Invalid(_)) => return Err(e.into()),
    };
    Ok(vec![IndexValue::Reference {
        reference,
        raw: raw.to_string(),
    }])
}

fn date_values(value: &Value) -> Result<Vec<IndexValue>, ExtractError> {
    let literal = match value {
        Value::String(s) => s.as_str(),
        Value::Object(map) if map.contains_key("start") || map.contains_key("end") => {
            // Period
            match map.get("start").or_else(|| map.get("end")).and_then(Value::as_str) {
                Some(s) => s,
                None => return Err(ExtractError::shape(SearchParameterType::Date, value)),
            }
        }
        other => return Err(ExtractError::shape(SearchParameterType::Date, other)),
    };
    let parsed = PartialDateTime::parse(literal)?;
    Ok(vec![IndexValue::Date {
        instant: parsed.start(),
    }])
}

fn number_values(value: &Value) -> Result<Vec<IndexValue>, ExtractError> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::Object(map) => match map.get("value") {
            // Quantity
            Some(Value::Number(n)) => n.as_f64(),
            _ => return Err(ExtractError::shape(SearchParameterType::Number, value)),
        },
        Value::String(s) => s.trim().parse::<f64>().ok(),
        other => return Err(ExtractError::shape(SearchParameterType::Number, other)),
    };
    match number {
        Some(v) if v.is_finite() => Ok(vec![IndexValue::Number { value: v }]),
        _ => Err(ExtractError::InvalidNumber(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    fn registry() -> SearchParameterRegistry {
        SearchParameterRegistry::r4()
    }

    fn values_of<'a>(rows: &'a [IndexRow], param: &str) -> Vec<&'a IndexValue> {
        rows.iter()
            .filter(|r| r.param_name == param)
            .map(|r| &r.value)
            .collect()
    }

    #[test]
    fn test_patient_names_and_identifier() {
        let patient = json!({
            "resourceType": "Patient",
            "id": "p1",
            "name": [{"family": "Smith", "given": ["John", "Q"]}],
            "identifier": [{"system": "http://mrn", "value": "123"}],
            "gender": "male",
            "birthDate": "1980-02"
        });
        let rows = extract(&registry(), "Patient", &patient);

        let names = values_of(&rows, "name");
        assert_eq!(names.len(), 3);
        assert!(names.contains(&&IndexValue::String { value: "Smith".into() }));

        assert_eq!(
            values_of(&rows, "identifier"),
            vec![&IndexValue::Token {
                system: Some("http://mrn".into()),
                code: "123".into(),
                display: None
            }]
        );
        assert_eq!(
            values_of(&rows, "birthdate"),
            vec![&IndexValue::Date { instant: datetime!(1980-02-01 00:00:00 UTC) }]
        );
        assert_eq!(
            values_of(&rows, "_id"),
            vec![&IndexValue::Token { system: None, code: "p1".into(), display: None }]
        );
    }

    #[test]
    fn test_codeable_concept_rows_per_coding() {
        let observation = json!({
            "resourceType": "Observation",
            "id": "o1",
            "code": {
                "text": "Heart rate",
                "coding": [
                    {"system": "http://loinc.org", "code": "8867-4"},
                    {"system": "http://snomed.info/sct", "code": "364075005", "display": "HR"}
                ]
            }
        });
        let rows = extract(&registry(), "Observation", &observation);
        let codes = values_of(&rows, "code");
        assert_eq!(codes.len(), 2);
        assert_eq!(
            codes[0],
            &IndexValue::Token {
                system: Some("http://loinc.org".into()),
                code: "8867-4".into(),
                display: Some("Heart rate".into())
            }
        );
        assert!(matches!(codes[1], IndexValue::Token { display: Some(d), .. } if d == "HR"));
    }

    #[test]
    fn test_reference_forms_are_normalized() {
        let observation = json!({
            "resourceType": "Observation",
            "id": "o1",
            "subject": {"reference": "http://example.org/fhir/Patient/10"},
            "encounter": {"reference": "urn:uuid:abc"},
            "performer": [{"reference": "#contained"}, {"display": "Dr. Nobody"}]
        });
        let rows = extract(&registry(), "Observation", &observation);
        assert_eq!(
            values_of(&rows, "subject"),
            vec![&IndexValue::Reference {
                reference: "Patient/10".into(),
                raw: "http://example.org/fhir/Patient/10".into()
            }]
        );
        assert_eq!(
            values_of(&rows, "encounter"),
            vec![&IndexValue::Reference {
                reference: "urn:uuid:abc".into(),
                raw: "urn:uuid:abc".into()
            }]
        );
        assert!(values_of(&rows, "performer").is_empty());
    }

    #[test]
    fn test_choice_dates_and_quantities() {
        let condition = json!({
            "resourceType": "Condition",
            "id": "c1",
            "onsetDateTime": "2020-06-15T10:00:00Z",
            "abatementPeriod": {"end": "2021-01-01"}
        });
        let rows = extract(&registry(), "Condition", &condition);
        assert_eq!(
            values_of(&rows, "onset-date"),
            vec![&IndexValue::Date { instant: datetime!(2020-06-15 10:00:00 UTC) }]
        );
        assert_eq!(
            values_of(&rows, "abatement-date"),
            vec![&IndexValue::Date { instant: datetime!(2021-01-01 00:00:00 UTC) }]
        );

        let risk = json!({
            "resourceType": "RiskAssessment",
            "id": "r1",
            "prediction": [{"probabilityDecimal": 0.25}]
        });
        let rows = extract(&registry(), "RiskAssessment", &risk);
        assert_eq!(values_of(&rows, "probability"), vec![&IndexValue::Number { value: 0.25 }]);
    }

    #[test]
    fn test_failed_parameter_does_not_block_others() {
        let condition = json!({
            "resourceType": "Condition",
            "id": "c2",
            "onsetString": "in childhood",
            "code": {"coding": [{"system": "http://snomed.info/sct", "code": "44054006"}]}
        });
        let rows = extract(&registry(), "Condition", &condition);
        assert!(values_of(&rows, "onset-date").is_empty());
        assert_eq!(values_of(&rows, "code").len(), 1);
        assert_eq!(values_of(&rows, "_id").len(), 1);
    }

    #[test]
    fn test_unusable_sibling_values_are_skipped() {
        let patient = json!({
            "resourceType": "Patient",
            "id": "p3",
            "name": [{"family": "Smith"}, {"use": "old"}],
            "identifier": [{"system": "http://mrn", "value": "7"}, {"system": "http://ssn"}]
        });
        let rows = extract(&registry(), "Patient", &patient);
        assert_eq!(
            values_of(&rows, "name"),
            vec![&IndexValue::String { value: "Smith".into() }]
        );
        assert_eq!(values_of(&rows, "identifier").len(), 1);

        let only_bad = json!({"resourceType": "Patient", "id": "p4", "name": [{"use": "old"}]});
        let spec = registry().lookup("Patient", "name").unwrap();
        assert!(extract_param(&spec, &only_bad).is_err());
    }

    #[test]
    fn test_typed_reference_outside_targets_not_indexed() {
        let observation = json!({
            "resourceType": "Observation",
            "id": "o2",
            "subject": {"reference": "Group/10"}
        });
        let rows = extract(&registry(), "Observation", &observation);
        assert_eq!(
            values_of(&rows, "subject"),
            vec![&IndexValue::Reference {
                reference: "Group/10".into(),
                raw: "Group/10".into()
            }]
        );
        assert!(values_of(&rows, "patient").is_empty());

        let untyped = json!({
            "resourceType": "Observation",
            "id": "o3",
            "subject": {"reference": "urn:uuid:abc"}
        });
        let rows = extract(&registry(), "Observation", &untyped);
        assert_eq!(values_of(&rows, "patient").len(), 1);
    }

    #[test]
    fn test_missing_id_yields_no_rows() {
        let body = json!({"resourceType": "Patient", "name": [{"family": "X"}]});
        assert!(extract(&registry(), "Patient", &body).is_empty());
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let body = json!({
            "resourceType": "Patient",
            "id": "p9",
            "name": [{"family": "Doe", "given": ["Jane"]}, {"text": "Jane Doe"}],
            "telecom": [{"system": "phone", "value": "555"}],
            "active": true
        });
        let first = extract(&registry(), "Patient", &body);
        let second = extract(&registry(), "Patient", &body);
        assert_eq!(first, second);
        assert_eq!(
            values_of(&first, "active"),
            vec![&IndexValue::Token { system: None, code: "true".into(), display: None }]
        );
    }

    #[test]
    fn test_token_string_split() {
        let values = token_values(&json!("http://sys|abc")).unwrap();
        assert_eq!(
            values,
            vec![IndexValue::Token {
                system: Some("http://sys".into()),
                code: "abc".into(),
                display: None
            }]
        );
        assert_eq!(
            token_values(&json!("|abc")).unwrap(),
            vec![IndexValue::Token { system: None, code: "abc".into(), display: None }]
        );
        assert!(token_values(&json!(12)).is_err());
    }
}
