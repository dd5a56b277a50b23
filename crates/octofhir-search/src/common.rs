//! Common search parameters that apply to all FHIR resources.
//!
//! They are registered under base `Resource` before the per-type table, so any
//! resource type resolves them.

use crate::parameters::{ParamSpec, SearchParameterType};
use crate::registry::{COMMON_BASE, SearchParameterRegistry};

/// Register all common (Resource-level) search parameters.
pub fn register_common_parameters(registry: &SearchParameterRegistry) {
    // _id - logical id of the resource, always indexed
    registry.register(
        COMMON_BASE,
        ParamSpec::new("_id", SearchParameterType::Token, &["id"])
            .with_description("Logical id of this artifact"),
    );

    // _lastUpdated - when the resource was last changed
    registry.register(
        COMMON_BASE,
        ParamSpec::new("_lastUpdated", SearchParameterType::Date, &["meta.lastUpdated"])
            .with_description("When the resource version last changed"),
    );

    registry.register(
        COMMON_BASE,
        ParamSpec::new("_tag", SearchParameterType::Token, &["meta.tag"])
            .with_description("Tags applied to this resource"),
    );

    registry.register(
        COMMON_BASE,
        ParamSpec::new("_security", SearchParameterType::Token, &["meta.security"])
            .with_description("Security Labels applied to this resource"),
    );

    // _profile is a uri in FHIR; indexed as a code-only token
    registry.register(
        COMMON_BASE,
        ParamSpec::new("_profile", SearchParameterType::Token, &["meta.profile"])
            .with_description("Profiles this resource claims to conform to"),
    );

    registry.register(
        COMMON_BASE,
        ParamSpec::new("_source", SearchParameterType::Token, &["meta.source"])
            .with_description("Identifies where the resource comes from"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_parameters_apply_everywhere() {
        let registry = SearchParameterRegistry::new();
        register_common_parameters(&registry);

        for code in ["_id", "_lastUpdated", "_tag", "_security", "_profile", "_source"] {
            assert!(registry.lookup("Patient", code).is_some(), "{code}");
            assert!(registry.lookup("Basic", code).is_some(), "{code}");
        }
        assert_eq!(
            registry.lookup("Patient", "_lastUpdated").map(|p| p.param_type),
            Some(SearchParameterType::Date)
        );
    }
}
