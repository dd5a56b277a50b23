//! Index row model shared by the extractor, the index store and the query builder.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// FHIR search parameter types supported by the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchParameterType {
    String,
    Token,
    Reference,
    Date,
    Number,
}

impl SearchParameterType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "string" => Some(Self::String),
            "token" => Some(Self::Token),
            "reference" => Some(Self::Reference),
            "date" => Some(Self::Date),
            "number" => Some(Self::Number),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Token => "token",
            Self::Reference => "reference",
            Self::Date => "date",
            Self::Number => "number",
        }
    }
}

impl fmt::Display for SearchParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a stored resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub resource_type: String,
    pub id: String,
}

impl ResourceKey {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.id)
    }
}

/// The typed value carried by an index row. Exactly one group per parameter type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IndexValue {
    String {
        value: String,
    },
    Token {
        system: Option<String>,
        code: String,
        /// Free-text label used by `:text` (coding display or concept text).
        display: Option<String>,
    },
    Reference {
        /// `Type/id`, `urn:uuid:id` or a bare id.
        reference: String,
        /// The reference exactly as written in the resource.
        raw: String,
    },
    Date {
        #[serde(with = "time::serde::rfc3339")]
        instant: OffsetDateTime,
    },
    Number {
        value: f64,
    },
}

impl IndexValue {
    pub fn param_type(&self) -> SearchParameterType {
        match self {
            Self::String { .. } => SearchParameterType::String,
            Self::Token { .. } => SearchParameterType::Token,
            Self::Reference { .. } => SearchParameterType::Reference,
            Self::Date { .. } => SearchParameterType::Date,
            Self::Number { .. } => SearchParameterType::Number,
        }
    }
}

/// One extracted fact about one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRow {
    pub resource_type: String,
    pub resource_id: String,
    pub param_name: String,
    pub value: IndexValue,
}

impl IndexRow {
    pub fn new(
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        param_name: impl Into<String>,
        value: IndexValue,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            param_name: param_name.into(),
            value,
        }
    }

    pub fn param_type(&self) -> SearchParameterType {
        self.value.param_type()
    }

    pub fn resource_key(&self) -> ResourceKey {
        ResourceKey::new(&self.resource_type, &self.resource_id)
    }
}
