use serde::{Deserialize, Serialize};
use std::fmt;

use crate::path::{JsonPath, PathExtractor};

pub use octofhir_core::SearchParameterType;

/// Supported search modifiers.
/// Applied as suffix to parameter name: `name:modifier`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchModifier {
    Exact,
    Contains,
    Missing,
    Not,
    Text,
    Identifier,   // for reference parameters
    Type(String), // e.g., subject:Patient
}

impl SearchModifier {
    /// Parse one of the fixed modifiers. Resource-type qualifiers are resolved by the parser.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "exact" => Some(Self::Exact),
            "contains" => Some(Self::Contains),
            "missing" => Some(Self::Missing),
            "not" => Some(Self::Not),
            "text" => Some(Self::Text),
            "identifier" => Some(Self::Identifier),
            _ => None,
        }
    }

    /// Check if this modifier is applicable to the given parameter type.
    pub fn applicable_to(&self, param_type: SearchParameterType) -> bool {
        match self {
            Self::Missing => true,
            Self::Exact | Self::Contains => matches!(param_type, SearchParameterType::String),
            Self::Not | Self::Text => matches!(param_type, SearchParameterType::Token),
            Self::Type(_) | Self::Identifier => {
                matches!(param_type, SearchParameterType::Reference)
            }
        }
    }
}

impl fmt::Display for SearchModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => f.write_str("exact"),
            Self::Contains => f.write_str("contains"),
            Self::Missing => f.write_str("missing"),
            Self::Not => f.write_str("not"),
            Self::Text => f.write_str("text"),
            Self::Identifier => f.write_str("identifier"),
            Self::Type(t) => f.write_str(t),
        }
    }
}

/// Prefixes for number/date search values
/// e.g., `ge2020-01-01`, `lt5.0`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchPrefix {
    #[default]
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Sa, // starts after
    Eb, // ends before
}

impl fmt::Display for SearchPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SearchPrefix::Eq => "eq",
            SearchPrefix::Ne => "ne",
            SearchPrefix::Gt => "gt",
            SearchPrefix::Lt => "lt",
            SearchPrefix::Ge => "ge",
            SearchPrefix::Le => "le",
            SearchPrefix::Sa => "sa",
            SearchPrefix::Eb => "eb",
        };
        f.write_str(s)
    }
}

impl SearchPrefix {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "eq" => Some(Self::Eq),
            "ne" => Some(Self::Ne),
            "gt" => Some(Self::Gt),
            "lt" => Some(Self::Lt),
            "ge" => Some(Self::Ge),
            "le" => Some(Self::Le),
            "sa" => Some(Self::Sa),
            "eb" => Some(Self::Eb),
            _ => None,
        }
    }

    /// Split a leading two-letter prefix off a date/number value.
    pub fn split(value: &str) -> (Self, &str) {
        if value.len() > 2 && value.is_char_boundary(2) {
            if let Some(prefix) = Self::parse(&value[..2]) {
                return (prefix, &value[2..]);
            }
        }
        (Self::Eq, value)
    }
}

/// A search parameter definition for one resource type.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    /// The code used in search queries (e.g., "name", "identifier")
    pub code: String,
    /// The type of search parameter (token, string, reference, etc.)
    pub param_type: SearchParameterType,
    /// Where the values live in a resource body
    pub extractor: PathExtractor,
    /// Target resource types for reference parameters
    pub reference_targets: Vec<String>,
    /// Human-readable description
    pub description: String,
}

impl ParamSpec {
    /// Create a parameter reading the given dotted paths (alternatives are OR-ed).
    pub fn new(code: impl Into<String>, param_type: SearchParameterType, paths: &[&str]) -> Self {
        Self {
            code: code.into(),
            param_type,
            extractor: PathExtractor::new(paths.iter().map(|p| JsonPath::from_dotted(p)).collect()),
            reference_targets: Vec::new(),
            description: String::new(),
        }
    }

    /// Set target resource types.
    #[must_use]
    pub fn with_targets(mut self, targets: &[&str]) -> Self {
        self.reference_targets = targets.iter().map(|t| (*t).to_string()).collect();
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn targets(&self, resource_type: &str) -> bool {
        self.reference_targets.iter().any(|t| t == resource_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modifier_applicability() {
        assert!(SearchModifier::Exact.applicable_to(SearchParameterType::String));
        assert!(!SearchModifier::Exact.applicable_to(SearchParameterType::Token));
        assert!(SearchModifier::Not.applicable_to(SearchParameterType::Token));
        assert!(SearchModifier::Missing.applicable_to(SearchParameterType::Date));
        assert!(SearchModifier::Type("Patient".into()).applicable_to(SearchParameterType::Reference));
        assert!(!SearchModifier::Text.applicable_to(SearchParameterType::Number));
    }

    #[test]
    fn test_prefix_split() {
        assert_eq!(SearchPrefix::split("ge2020-01-01"), (SearchPrefix::Ge, "2020-01-01"));
        assert_eq!(SearchPrefix::split("2020"), (SearchPrefix::Eq, "2020"));
        assert_eq!(SearchPrefix::split("sa5"), (SearchPrefix::Sa, "5"));
        // a bare prefix is a value, not a prefix
        assert_eq!(SearchPrefix::split("lt"), (SearchPrefix::Eq, "lt"));
    }

    #[test]
    fn test_param_spec_targets() {
        let spec = ParamSpec::new("subject", SearchParameterType::Reference, &["subject"])
            .with_targets(&["Patient", "Group"]);
        assert!(spec.targets("Patient"));
        assert!(!spec.targets("Practitioner"));
    }
}
