//! A small accessor language over resource bodies.
//!
//! A [`JsonPath`] is a list of steps. Each step maps a set of JSON values to a new set, so
//! arrays fan out naturally and missing fields simply produce nothing:
//!
//! ```
//! use octofhir_search::path::JsonPath;
//! use serde_json::json;
//!
//! let patient = json!({"name": [{"given": ["Ann", "Marie"]}, {"given": ["Annie"]}]});
//! let given = JsonPath::from_dotted("name.given");
//! assert_eq!(given.values(&patient), vec!["Ann", "Marie", "Annie"]);
//! ```

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Object member by name.
    Field(String),
    /// Every element of an array; non-arrays pass through unchanged.
    Each,
    /// Polymorphic element: any member named `prefix` + an upper-case type suffix.
    Choice(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    steps: Vec<Step>,
}

impl JsonPath {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    /// Build a path from `a.b.c` notation. Every segment also unwraps arrays, and a segment
    /// ending in `[x]` matches any choice-type variant (`onset[x]` -> `onsetDateTime`, ...).
    pub fn from_dotted(path: &str) -> Self {
        let mut steps = Vec::new();
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            match segment.strip_suffix("[x]") {
                Some(prefix) => steps.push(Step::Choice(prefix.to_string())),
                None => steps.push(Step::Field(segment.to_string())),
            }
            steps.push(Step::Each);
        }
        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Evaluate against `root`, returning borrowed values in document order.
    pub fn values<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
        let mut current = vec![root];
        for step in &self.steps {
            let mut next = Vec::with_capacity(current.len());
            for value in current {
                apply_step(step, value, &mut next);
            }
            if next.is_empty() {
                return next;
            }
            current = next;
        }
        current
    }
}

fn apply_step<'a>(step: &Step, value: &'a Value, out: &mut Vec<&'a Value>) {
    match step {
        Step::Field(name) => {
            if let Some(v) = value.get(name) {
                out.push(v);
            }
        }
        Step::Each => match value {
            Value::Array(items) => out.extend(items.iter()),
            Value::Null => {}
            other => out.push(other),
        },
        Step::Choice(prefix) => {
            if let Value::Object(map) = value {
                out.extend(
                    map.iter()
                        .filter(|(key, _)| is_choice_of(key, prefix))
                        .map(|(_, v)| v),
                );
            }
        }
    }
}

fn is_choice_of(key: &str, prefix: &str) -> bool {
    key.strip_prefix(prefix)
        .and_then(|suffix| suffix.chars().next())
        .is_some_and(|c| c.is_ascii_uppercase())
}

/// One or more alternative paths whose results are concatenated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExtractor {
    paths: Vec<JsonPath>,
}

impl PathExtractor {
    pub fn new(paths: Vec<JsonPath>) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &[JsonPath] {
        &self.paths
    }

    pub fn values<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
        self.paths.iter().flat_map(|p| p.values(root)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_dotted_steps() {
        let path = JsonPath::from_dotted("onset[x]");
        assert_eq!(
            path.steps(),
            &[Step::Choice("onset".into()), Step::Each]
        );
    }

    #[test]
    fn test_missing_field_yields_nothing() {
        let body = json!({"id": "1"});
        assert!(JsonPath::from_dotted("name.family").values(&body).is_empty());
    }

    #[test]
    fn test_choice_matches_typed_variants_only() {
        let body = json!({
            "onsetDateTime": "2020-06-15T10:00:00Z",
            "onsetdate": "ignored",
            "onset": "ignored"
        });
        let values = JsonPath::from_dotted("onset[x]").values(&body);
        assert_eq!(values, vec![&json!("2020-06-15T10:00:00Z")]);
    }

    #[test]
    fn test_nested_arrays_fan_out() {
        let body = json!({
            "category": [
                {"coding": [{"code": "a"}, {"code": "b"}]},
                {"coding": [{"code": "c"}]}
            ]
        });
        let codes = JsonPath::from_dotted("category.coding.code").values(&body);
        assert_eq!(codes, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_extractor_concatenates_alternatives() {
        let body = json!({"subject": {"reference": "Patient/1"}, "patient": {"reference": "Patient/2"}});
        let extractor = PathExtractor::new(vec![
            JsonPath::from_dotted("subject"),
            JsonPath::from_dotted("patient"),
        ]);
        assert_eq!(extractor.values(&body).len(), 2);
    }
}
