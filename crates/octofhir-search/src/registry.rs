//! Search parameter registry for indexing and lookup.
//!
//! Parameters are indexed by:
//! - Resource type and code (for efficient lookup)
//! - Common parameters (applicable to all resources)
//!
//! The registry is filled once at start-up from the static R4 table and is read-only
//! afterwards.

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::common::register_common_parameters;
use crate::definitions::register_r4_parameters;
use crate::parameters::ParamSpec;

/// Base under which common parameters are registered.
pub const COMMON_BASE: &str = "Resource";

#[derive(Debug, Default)]
pub struct SearchParameterRegistry {
    /// Parameters indexed by (resource_type, code) as composite key
    by_resource: DashMap<(String, String), Arc<ParamSpec>>,
    /// Common parameters (apply to all resources)
    common: DashMap<String, Arc<ParamSpec>>,
}

impl SearchParameterRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry populated with the common parameters and the R4 table.
    pub fn r4() -> Self {
        let registry = Self::new();
        register_common_parameters(&registry);
        register_r4_parameters(&registry);
        tracing::debug!(
            resource_types = registry.resource_types().len(),
            parameters = registry.len(),
            "search parameter registry built"
        );
        registry
    }

    /// Register a parameter for `base`. A base of `Resource` makes it common.
    pub fn register(&self, base: &str, param: ParamSpec) {
        let param = Arc::new(param);
        if base == COMMON_BASE {
            self.common.insert(param.code.clone(), param);
        } else {
            self.by_resource
                .insert((base.to_string(), param.code.clone()), param);
        }
    }

    /// Get a search parameter for a specific resource type and code.
    ///
    /// First checks resource-specific parameters, then falls back to common parameters.
    pub fn lookup(&self, resource_type: &str, code: &str) -> Option<Arc<ParamSpec>> {
        let key = (resource_type.to_string(), code.to_string());
        if let Some(param) = self.by_resource.get(&key) {
            return Some(param.clone());
        }
        self.common.get(code).map(|p| p.clone())
    }

    /// All parameters applicable to a resource type, common ones first, sorted by code.
    pub fn params_for(&self, resource_type: &str) -> Vec<Arc<ParamSpec>> {
        let mut common: Vec<_> = self.common.iter().map(|e| e.value().clone()).collect();
        common.sort_by(|a, b| a.code.cmp(&b.code));

        let mut specific: Vec<_> = self
            .by_resource
            .iter()
            .filter(|e| e.key().0 == resource_type)
            .map(|e| e.value().clone())
            .collect();
        specific.sort_by(|a, b| a.code.cmp(&b.code));

        // A type-specific definition shadows a common one of the same code
        common.retain(|c| !specific.iter().any(|s| s.code == c.code));
        common.extend(specific);
        common
    }

    /// Resource types with at least one type-specific parameter, sorted.
    pub fn resource_types(&self) -> Vec<String> {
        let types: BTreeSet<String> = self.by_resource.iter().map(|e| e.key().0.clone()).collect();
        types.into_iter().collect()
    }

    /// True if the type has registry entries or is a standard R4 resource type.
    pub fn is_known_resource_type(&self, resource_type: &str) -> bool {
        self.by_resource.iter().any(|e| e.key().0 == resource_type)
            || octofhir_core::is_known_resource_type(resource_type)
    }

    /// Get the total number of registered parameters.
    pub fn len(&self) -> usize {
        self.by_resource.len() + self.common.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::SearchParameterType;

    #[test]
    fn test_lookup_prefers_resource_specific() {
        let registry = SearchParameterRegistry::new();
        registry.register(
            COMMON_BASE,
            ParamSpec::new("_id", SearchParameterType::Token, &["id"]),
        );
        registry.register(
            "Patient",
            ParamSpec::new("name", SearchParameterType::String, &["name"]),
        );

        assert_eq!(
            registry.lookup("Patient", "name").map(|p| p.param_type),
            Some(SearchParameterType::String)
        );
        assert!(registry.lookup("Patient", "_id").is_some());
        assert!(registry.lookup("Observation", "_id").is_some());
        assert!(registry.lookup("Observation", "name").is_none());
    }

    #[test]
    fn test_params_for_includes_common() {
        let registry = SearchParameterRegistry::new();
        registry.register(
            COMMON_BASE,
            ParamSpec::new("_id", SearchParameterType::Token, &["id"]),
        );
        registry.register(
            "Patient",
            ParamSpec::new("gender", SearchParameterType::Token, &["gender"]),
        );
        let codes: Vec<_> = registry
            .params_for("Patient")
            .iter()
            .map(|p| p.code.clone())
            .collect();
        assert_eq!(codes, vec!["_id", "gender"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_r4_registry_knows_core_types() {
        let registry = SearchParameterRegistry::r4();
        assert!(registry.is_known_resource_type("Patient"));
        assert!(registry.is_known_resource_type("Observation"));
        assert!(!registry.is_known_resource_type("NotAType"));
        assert!(registry.resource_types().contains(&"RiskAssessment".to_string()));
        assert_eq!(
            registry.lookup("Observation", "code").map(|p| p.param_type),
            Some(SearchParameterType::Token)
        );
    }
}
