//! Query parsing.
//!
//! Turns a decoded query string (`name -> [values]`, keys in request order) into
//! [`ParsedParameter`]s resolved against the registry, plus the result-control settings.
//!
//! Keys are parsed by recursive descent:
//!
//! ```text
//! key      := "_has:" Type ":" refParam ":" key
//!           | param [":" qualifier] "." key
//!           | param [":" modifier]
//! ```
//!
//! so chains and `_has` compose to any depth. Every parameter must resolve in the registry;
//! an unknown name fails the whole query.

use indexmap::IndexMap;
use octofhir_core::{PartialDateTime, ReferenceIdentity, UnresolvableReference};
use std::sync::Arc;
use thiserror::Error;
use url::form_urlencoded;

use crate::chaining;
use crate::config::{MalformedValuePolicy, SearchSettings};
use crate::include::{self, IncludeDirective};
use crate::parameters::{ParamSpec, SearchModifier, SearchParameterType, SearchPrefix};
use crate::registry::SearchParameterRegistry;
use crate::reverse_chaining;
use crate::sql_builder::{SortKey, SortSpec};
use crate::types::TokenValue;

/// A decoded query string. Repeated keys keep one entry per occurrence.
pub type RawQuery = IndexMap<String, Vec<String>>;

/// Parameters that shape the response rather than select resources.
const RESULT_SHAPING: &[&str] = &["_format", "_pretty", "_summary", "_elements", "_total"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Unknown resource type: {0}")]
    UnknownResourceType(String),

    #[error("Unknown search parameter '{name}' for resource type '{resource_type}'")]
    UnknownParameter { resource_type: String, name: String },

    #[error("Invalid chain: {reason}")]
    InvalidChain { reason: String },

    #[error("Invalid modifier '{modifier}' for parameter '{name}'")]
    InvalidModifier { name: String, modifier: String },

    #[error("Invalid value for {param}: {message}")]
    InvalidValue { param: String, message: String },
}

impl QueryError {
    pub(crate) fn invalid_chain(reason: impl Into<String>) -> Self {
        Self::InvalidChain {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_value(param: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            param: param.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedValue {
    /// Set for date and number parameters only; defaults to `eq`.
    pub prefix: Option<SearchPrefix>,
    pub raw: String,
}

/// One hop from the current resource type to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainLink {
    /// Follow reference parameter `param` into one of `target_types`.
    Forward {
        param: String,
        target_types: Vec<String>,
    },
    /// `_has`: resources of `source_type` whose `reference_param` points back here.
    Reverse {
        source_type: String,
        reference_param: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedParameter {
    /// The query key as written, e.g. `subject:Patient.name`.
    pub key: String,
    /// The parameter the values are matched against (last segment).
    pub name: String,
    pub chain: Vec<ChainLink>,
    /// Resource type `name` is evaluated on.
    pub target: String,
    pub param_type: SearchParameterType,
    pub modifier: Option<SearchModifier>,
    /// OR-combined.
    pub values: Vec<ParsedValue>,
}

impl ParsedParameter {
    pub fn is_missing(&self) -> bool {
        self.modifier == Some(SearchModifier::Missing)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchControl {
    pub count: Option<u32>,
    pub offset: Option<u32>,
    /// Resolved sort keys; empty means the default order.
    pub sort: Vec<SortSpec>,
    pub includes: Vec<IncludeDirective>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedQuery {
    pub resource_type: String,
    /// AND-combined.
    pub params: Vec<ParsedParameter>,
    pub control: SearchControl,
    pub warnings: Vec<String>,
}

impl ParsedQuery {
    /// Every resource type whose index rows this query reads, sorted.
    pub fn referenced_types(&self) -> Vec<String> {
        let mut types = vec![self.resource_type.clone()];
        for param in &self.params {
            for link in &param.chain {
                match link {
                    ChainLink::Forward { target_types, .. } => {
                        types.extend(target_types.iter().cloned())
                    }
                    ChainLink::Reverse { source_type, .. } => types.push(source_type.clone()),
                }
            }
        }
        for directive in &self.control.includes {
            types.push(directive.source_type.clone());
            types.extend(directive.target_types.iter().cloned());
        }
        types.sort();
        types.dedup();
        types
    }
}

/// Decode an `application/x-www-form-urlencoded` query string.
pub fn parse_query_string(query: &str) -> RawQuery {
    let query = query.strip_prefix('?').unwrap_or(query);
    let mut raw = RawQuery::new();
    for (k, v) in form_urlencoded::parse(query.as_bytes()) {
        raw.entry(k.into_owned()).or_default().push(v.into_owned());
    }
    raw
}

/// Split on unescaped commas; `\,` is a literal comma.
pub fn split_values(value: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut current = String::new();
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&',') => {
                current.push(',');
                chars.next();
            }
            ',' => values.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    values.push(current);
    values
}

/// A resolved query key, before values are attached.
#[derive(Debug)]
struct KeyPath {
    chain: Vec<ChainLink>,
    name: String,
    target: String,
    spec: Arc<ParamSpec>,
    modifier: Option<SearchModifier>,
}

fn split_modifier(key: &str) -> (&str, Option<&str>) {
    match key.split_once(':') {
        Some((name, modifier)) => (name, Some(modifier)),
        None => (key, None),
    }
}

pub struct QueryParser<'a> {
    registry: &'a SearchParameterRegistry,
    settings: &'a SearchSettings,
}

impl<'a> QueryParser<'a> {
    pub fn new(registry: &'a SearchParameterRegistry, settings: &'a SearchSettings) -> Self {
        Self { registry, settings }
    }

    /// Parse the selection parameters only.
    pub fn parse(
        &self,
        resource_type: &str,
        raw: &RawQuery,
    ) -> Result<Vec<ParsedParameter>, QueryError> {
        self.parse_query(resource_type, raw).map(|q| q.params)
    }

    pub fn parse_query(&self, resource_type: &str, raw: &RawQuery) -> Result<ParsedQuery, QueryError> {
        if !self.registry.is_known_resource_type(resource_type) {
            return Err(QueryError::UnknownResourceType(resource_type.to_string()));
        }

        let mut query = ParsedQuery {
            resource_type: resource_type.to_string(),
            ..ParsedQuery::default()
        };

        for (key, values) in raw {
            match key.as_str() {
                "_count" => {
                    let count = self.parse_unsigned(key, values)?;
                    query.control.count = Some(count.min(self.settings.max_count));
                }
                "_offset" => query.control.offset = Some(self.parse_unsigned(key, values)?),
                "_sort" => {
                    for value in values {
                        self.parse_sort(value, &mut query)?;
                    }
                }
                "_include" | "_revinclude" => {
                    let reverse = key == "_revinclude";
                    for value in values {
                        query.control.includes.push(include::parse_include(
                            self.registry,
                            resource_type,
                            value,
                            reverse,
                        )?);
                    }
                }
                k if RESULT_SHAPING.contains(&k) => {
                    tracing::debug!(param = %k, "result shaping parameter ignored");
                }
                _ => {
                    // each occurrence of a repeated key is its own AND-ed parameter
                    for value in values {
                        if let Some(param) =
                            self.parse_parameter(resource_type, key, value, &mut query.warnings)?
                        {
                            query.params.push(param);
                        }
                    }
                }
            }
        }

        Ok(query)
    }

    fn parse_unsigned(&self, key: &str, values: &[String]) -> Result<u32, QueryError> {
        let raw = values
            .last()
            .ok_or_else(|| QueryError::invalid_value(key, "missing value"))?;
        raw.trim()
            .parse::<u32>()
            .map_err(|_| QueryError::invalid_value(key, format!("'{raw}' is not a non-negative integer")))
    }

    fn parse_sort(&self, value: &str, query: &mut ParsedQuery) -> Result<(), QueryError> {
        let mut requested = 0;
        for item in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            requested += 1;
            let (descending, name) = match item.strip_prefix('-') {
                Some(name) => (true, name),
                None => (false, item),
            };
            let spec = match name {
                "_lastUpdated" => SortSpec { key: SortKey::LastUpdated, descending },
                "_id" => SortSpec { key: SortKey::Id, descending },
                other => {
                    // the unsupported key's position is taken by _lastUpdated descending
                    let warning = format!(
                        "_sort by '{other}' is not supported; ordering by _lastUpdated descending in its place"
                    );
                    tracing::warn!(resource_type = %query.resource_type, sort = %other, "{warning}");
                    query.warnings.push(warning);
                    SortSpec { key: SortKey::LastUpdated, descending: true }
                }
            };
            if !query.control.sort.iter().any(|s| s.key == spec.key) {
                query.control.sort.push(spec);
            }
        }
        if requested == 0 {
            return Err(QueryError::invalid_value("_sort", "empty sort specification"));
        }
        Ok(())
    }

    fn parse_parameter(
        &self,
        resource_type: &str,
        key: &str,
        value: &str,
        warnings: &mut Vec<String>,
    ) -> Result<Option<ParsedParameter>, QueryError> {
        let path = self.parse_key(resource_type, key)?;

        let mut values = Vec::new();
        for raw in split_values(value) {
            match parse_value(&path, &raw) {
                Ok(parsed) => values.push(parsed),
                Err(message) => match self.settings.malformed_values {
                    MalformedValuePolicy::Reject => {
                        return Err(QueryError::invalid_value(key, message));
                    }
                    MalformedValuePolicy::Drop => {
                        let warning = format!("ignored value '{raw}' for {key}: {message}");
                        tracing::warn!(resource_type = %resource_type, param = %key, "{warning}");
                        warnings.push(warning);
                    }
                },
            }
        }

        if values.is_empty() {
            warnings.push(format!("parameter {key} dropped: no usable values"));
            return Ok(None);
        }

        Ok(Some(ParsedParameter {
            key: key.to_string(),
            name: path.name,
            chain: path.chain,
            target: path.target,
            param_type: path.spec.param_type,
            modifier: path.modifier,
            values,
        }))
    }

    fn parse_key(&self, current: &str, key: &str) -> Result<KeyPath, QueryError> {
        if let Some(rest) = key.strip_prefix("_has:") {
            let has = reverse_chaining::parse_has(self.registry, current, rest)?;
            let mut inner = self.parse_key(&has.source_type, has.remainder)?;
            inner.chain.insert(
                0,
                ChainLink::Reverse {
                    source_type: has.source_type,
                    reference_param: has.reference_param,
                },
            );
            return Ok(inner);
        }

        if let Some((head, rest)) = key.split_once('.') {
            let (name, qualifier) = split_modifier(head);
            let candidates = chaining::chain_candidates(self.registry, current, name, qualifier)?;

            let mut resolved: Option<KeyPath> = None;
            let mut matched = Vec::new();
            let mut first_error = None;
            for target in candidates {
                match self.parse_key(&target, rest) {
                    Ok(path) => {
                        if resolved.is_none() {
                            resolved = Some(path);
                        }
                        matched.push(target);
                    }
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                }
            }

            let Some(mut inner) = resolved else {
                return Err(first_error.unwrap_or_else(|| {
                    QueryError::invalid_chain(format!("{current}.{name} has no target types"))
                }));
            };
            inner.chain.insert(
                0,
                ChainLink::Forward {
                    param: name.to_string(),
                    target_types: matched,
                },
            );
            return Ok(inner);
        }

        let (name, modifier) = split_modifier(key);
        let spec = self
            .registry
            .lookup(current, name)
            .ok_or_else(|| QueryError::UnknownParameter {
                resource_type: current.to_string(),
                name: name.to_string(),
            })?;

        let modifier = match modifier {
            Some(m) => Some(self.resolve_modifier(&spec, m)?),
            None => None,
        };

        if modifier == Some(SearchModifier::Identifier) {
            return self.identifier_path(current, &spec);
        }

        Ok(KeyPath {
            chain: Vec::new(),
            name: name.to_string(),
            target: current.to_string(),
            spec,
            modifier,
        })
    }

    fn resolve_modifier(&self, spec: &ParamSpec, modifier: &str) -> Result<SearchModifier, QueryError> {
        let invalid = || QueryError::InvalidModifier {
            name: spec.code.clone(),
            modifier: modifier.to_string(),
        };

        let resolved = match SearchModifier::parse(modifier) {
            Some(m) => m,
            None if self.registry.is_known_resource_type(modifier) => {
                SearchModifier::Type(modifier.to_string())
            }
            None => return Err(invalid()),
        };

        if !resolved.applicable_to(spec.param_type) {
            return Err(invalid());
        }
        if let SearchModifier::Type(t) = &resolved
            && !spec.targets(t)
        {
            return Err(invalid());
        }
        Ok(resolved)
    }

    /// `subject:identifier=sys|val` searches the targets' `identifier` instead.
    fn identifier_path(&self, current: &str, spec: &Arc<ParamSpec>) -> Result<KeyPath, QueryError> {
        let mut targets = Vec::new();
        let mut identifier = None;
        for target in &spec.reference_targets {
            if let Some(id_spec) = self.registry.lookup(target, "identifier")
                && id_spec.param_type == SearchParameterType::Token
            {
                identifier.get_or_insert(id_spec);
                targets.push(target.clone());
            }
        }

        let Some(id_spec) = identifier else {
            return Err(QueryError::InvalidModifier {
                name: spec.code.clone(),
                modifier: "identifier".to_string(),
            });
        };
        tracing::trace!(resource_type = %current, param = %spec.code, "identifier modifier rewritten to chain");

        Ok(KeyPath {
            chain: vec![ChainLink::Forward {
                param: spec.code.clone(),
                target_types: targets.clone(),
            }],
            name: "identifier".to_string(),
            target: targets.first().cloned().unwrap_or_default(),
            spec: id_spec,
            modifier: None,
        })
    }
}

/// Validate one value against the resolved parameter. The error is a human-readable reason.
fn parse_value(path: &KeyPath, raw: &str) -> Result<ParsedValue, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty value".to_string());
    }

    if path.modifier == Some(SearchModifier::Missing) {
        return match raw {
            "true" | "false" => Ok(ParsedValue {
                prefix: None,
                raw: raw.to_string(),
            }),
            other => Err(format!(":missing expects true or false, got '{other}'")),
        };
    }

    match path.spec.param_type {
        SearchParameterType::Date => {
            let (prefix, literal) = SearchPrefix::split(raw);
            PartialDateTime::parse(literal).map_err(|e| e.to_string())?;
            Ok(ParsedValue {
                prefix: Some(prefix),
                raw: literal.to_string(),
            })
        }
        SearchParameterType::Number => {
            let (prefix, literal) = SearchPrefix::split(raw);
            match literal.parse::<f64>() {
                Ok(n) if n.is_finite() => Ok(ParsedValue {
                    prefix: Some(prefix),
                    raw: literal.to_string(),
                }),
                _ => Err(format!("'{literal}' is not a number")),
            }
        }
        SearchParameterType::Token => {
            if path.modifier != Some(SearchModifier::Text) && TokenValue::parse(raw).is_err() {
                return Err(format!("token '{raw}' has neither system nor code"));
            }
            Ok(ParsedValue {
                prefix: None,
                raw: raw.to_string(),
            })
        }
        SearchParameterType::Reference => match ReferenceIdentity::parse(raw) {
            Err(UnresolvableReference::Contained(id)) => {
                Err(format!("contained reference #{id} cannot be searched"))
            }
            _ => Ok(ParsedValue {
                prefix: None,
                raw: raw.to_string(),
            }),
        },
        SearchParameterType::String => Ok(ParsedValue {
            prefix: None,
            raw: raw.to_string(),
        }),
    }
}
