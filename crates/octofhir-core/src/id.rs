use std::sync::LazyLock;

use regex::Regex;

use crate::error::{CoreError, Result};

static ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9\-\.]{1,64}$").expect("static id pattern"));

pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Validate a logical id against the FHIR `id` datatype pattern.
pub fn validate_id(id: &str) -> Result<()> {
    if ID_PATTERN.is_match(id) {
        Ok(())
    } else {
        Err(CoreError::invalid_id(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_id_is_valid() {
        let id = generate_id();
        assert!(validate_id(&id).is_ok());
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("123").is_ok());
        assert!(validate_id("pat-1.a").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("has space").is_err());
        assert!(validate_id("under_score").is_err());
        assert!(validate_id(&"x".repeat(65)).is_err());
    }
}
