//! FHIR Reference parsing utilities.
//!
//! Upstream data writes the same link in several ways, and the index has to match all of
//! them. This module reduces a reference string to the identity it carries:
//!
//! - Relative: `Patient/123` (optionally `/_history/1`)
//! - Absolute URL: `http://example.org/fhir/Patient/123`
//! - URN: `urn:uuid:xxx`
//! - Bare id: `123`
//!
//! Contained (`#id`) references and non-uuid URNs carry no resolvable identity.
//!
//! # Example
//!
//! ```
//! use octofhir_core::fhir_reference::ReferenceIdentity;
//!
//! let identity = ReferenceIdentity::parse("http://example.org/fhir/Patient/123").unwrap();
//! assert_eq!(identity.normalized(), "Patient/123");
//! assert_eq!(identity.id(), "123");
//!
//! let urn = ReferenceIdentity::parse("urn:uuid:abc").unwrap();
//! assert_eq!(urn.normalized(), "urn:uuid:abc");
//! assert_eq!(urn.resource_type(), None);
//! ```

use std::fmt;

use url::Url;

use crate::fhir::is_valid_resource_type_name;

/// A successfully parsed typed FHIR reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FhirReference {
    /// The resource type (e.g., "Patient", "Observation")
    pub resource_type: String,
    /// The resource ID
    pub id: String,
    /// Optional version ID from `_history` suffix
    pub version: Option<String>,
}

impl FhirReference {
    /// Returns the reference as a relative string (Type/id).
    pub fn to_relative(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }
}

impl fmt::Display for FhirReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_relative())
    }
}

/// Represents a reference that carries no identity the index can match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnresolvableReference {
    /// A contained reference (starts with `#`)
    Contained(String),
    /// A URN that is not `urn:uuid:` (e.g. `urn:oid:`)
    Urn(String),
    /// An absolute URL whose path does not end in `Type/id`
    External(String),
    /// A malformed or invalid reference
    Invalid(String),
}

impl fmt::Display for UnresolvableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contained(id) => write!(f, "contained reference: #{id}"),
            Self::Urn(urn) => write!(f, "URN reference: {urn}"),
            Self::External(url) => write!(f, "external reference: {url}"),
            Self::Invalid(reason) => write!(f, "invalid reference: {reason}"),
        }
    }
}

impl std::error::Error for UnresolvableReference {}

/// The identity a reference string points at, independent of how it was written.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReferenceIdentity {
    /// `Type/id`, possibly recovered from the tail of an absolute URL.
    Typed(FhirReference),
    /// `urn:uuid:<id>`; the target type is not known.
    Urn { id: String },
    /// A bare logical id; the target type is not known.
    Bare { id: String },
}

impl ReferenceIdentity {
    /// Parse a reference string.
    pub fn parse(reference: &str) -> Result<Self, UnresolvableReference> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(UnresolvableReference::Invalid("empty reference".to_string()));
        }

        if let Some(contained_id) = reference.strip_prefix('#') {
            return Err(UnresolvableReference::Contained(contained_id.to_string()));
        }

        if let Some(id) = reference.strip_prefix("urn:uuid:") {
            if id.is_empty() {
                return Err(UnresolvableReference::Invalid(
                    "urn:uuid reference without id".to_string(),
                ));
            }
            return Ok(Self::Urn { id: id.to_string() });
        }
        if reference.starts_with("urn:") {
            return Err(UnresolvableReference::Urn(reference.to_string()));
        }

        if reference.contains("://") {
            return parse_absolute(reference).map(Self::Typed);
        }

        if reference.contains('/') {
            return parse_relative(reference).map(Self::Typed);
        }

        Ok(Self::Bare {
            id: reference.to_string(),
        })
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Typed(reference) => &reference.id,
            Self::Urn { id } | Self::Bare { id } => id,
        }
    }

    pub fn resource_type(&self) -> Option<&str> {
        match self {
            Self::Typed(reference) => Some(&reference.resource_type),
            Self::Urn { .. } | Self::Bare { .. } => None,
        }
    }

    /// The form stored in the index: `Type/id`, `urn:uuid:id` or the bare id.
    pub fn normalized(&self) -> String {
        match self {
            Self::Typed(reference) => reference.to_relative(),
            Self::Urn { id } => format!("urn:uuid:{id}"),
            Self::Bare { id } => id.clone(),
        }
    }

    /// Every stored form that denotes the same target as this identity.
    ///
    /// A typed identity also matches untyped forms of the same id, because the stored
    /// value may have been written without its type. An untyped identity lists only the
    /// untyped forms; typed stored values are matched with a `%/id` suffix pattern.
    pub fn equivalent_forms(&self) -> Vec<String> {
        let id = self.id();
        let mut forms = Vec::with_capacity(3);
        if let Self::Typed(reference) = self {
            forms.push(reference.to_relative());
        }
        forms.push(format!("urn:uuid:{id}"));
        forms.push(id.to_string());
        forms
    }
}

impl fmt::Display for ReferenceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.normalized())
    }
}

fn parse_relative(path: &str) -> Result<FhirReference, UnresolvableReference> {
    // "ResourceType/id" or "ResourceType/id/_history/version"
    let parts: Vec<&str> = path.split('/').collect();
    let resource_type = parts[0];
    let id = parts.get(1).copied().unwrap_or_default();

    if !is_valid_resource_type_name(resource_type) {
        return Err(UnresolvableReference::Invalid(format!(
            "resource type must be an upper-case name: {resource_type}"
        )));
    }
    if id.is_empty() {
        return Err(UnresolvableReference::Invalid(
            "resource id cannot be empty".to_string(),
        ));
    }

    let version = match parts.as_slice() {
        [_, _] => None,
        [_, _, "_history", version] => Some((*version).to_string()),
        _ => {
            return Err(UnresolvableReference::Invalid(format!(
                "unexpected reference path: {path}"
            )));
        }
    };

    Ok(FhirReference {
        resource_type: resource_type.to_string(),
        id: id.to_string(),
        version,
    })
}

fn parse_absolute(reference: &str) -> Result<FhirReference, UnresolvableReference> {
    let url =
        Url::parse(reference).map_err(|e| UnresolvableReference::Invalid(e.to_string()))?;
    let segments: Vec<&str> = url
        .path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    // Walk back past an optional `_history/version` suffix to the `Type/id` pair.
    let tail = match segments.as_slice() {
        [.., t, id, "_history", version] => Some((*t, *id, Some(*version))),
        [.., t, id] => Some((*t, *id, None)),
        _ => None,
    };

    match tail {
        Some((resource_type, id, version)) if is_valid_resource_type_name(resource_type) => {
            Ok(FhirReference {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
                version: version.map(str::to_string),
            })
        }
        _ => Err(UnresolvableReference::External(reference.to_string())),
    }
}
