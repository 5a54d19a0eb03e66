//! JSON schema validation for written documents

use crate::error::{Error, Result};
use serde_json::Value;
use std::path::Path;

/// Maximum number of violations carried into log lines and errors
const MAX_REPORTED_ERRORS: usize = 10;

/// Compiled JSON schema
pub struct SchemaValidator {
    name: String,
    validator: jsonschema::Validator,
}

impl std::fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaValidator")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl SchemaValidator {
    /// Compile a schema document
    pub fn new(name: impl Into<String>, schema: &Value) -> Result<Self> {
        let name = name.into();
        let validator = jsonschema::validator_for(schema).map_err(|e| Error::Config {
            message: format!("invalid JSON schema {}: {}", name, e),
            key: Some("schema_path".to_string()),
        })?;
        Ok(Self { name, validator })
    }

    /// Read and compile a schema file
    pub async fn from_file(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read(path).await.map_err(|e| Error::Config {
            message: format!("failed to read JSON schema {}: {}", path.display(), e),
            key: Some("schema_path".to_string()),
        })?;
        let schema: Value = serde_json::from_slice(&raw)?;
        Self::new(path.display().to_string(), &schema)
    }

    /// Name used in log messages and errors
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Violations of `instance`, at most a handful, formatted as "path: message"
    pub fn violations(&self, instance: &Value) -> Vec<String> {
        self.validator
            .iter_errors(instance)
            .take(MAX_REPORTED_ERRORS)
            .map(|e| format!("{}: {}", e.instance_path, e))
            .collect()
    }

    /// Validate `instance`, logging violations
    ///
    /// In strict mode violations are returned as [`Error::Validation`];
    /// otherwise they only produce warnings.
    pub fn check(&self, document_name: &str, instance: &Value, strict: bool) -> Result<()> {
        let violations = self.violations(instance);
        if violations.is_empty() {
            tracing::debug!(schema = %self.name, document = document_name, "document is valid");
            return Ok(());
        }

        for violation in &violations {
            tracing::warn!(
                schema = %self.name,
                document = document_name,
                "schema violation: {}",
                violation
            );
        }

        if strict {
            return Err(Error::Validation {
                name: document_name.to_string(),
                message: violations.join("; "),
            });
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> SchemaValidator {
        SchemaValidator::new(
            "test",
            &json!({
                "type": "object",
                "required": ["totalResults", "format"],
                "properties": {
                    "totalResults": {"type": "integer", "minimum": 0},
                    "format": {"type": "string"}
                }
            }),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_document() {
        let validator = schema();
        let document = json!({"totalResults": 3, "format": "NVD_CVE"});
        assert!(validator.violations(&document).is_empty());
        assert!(validator.check("nvd-cves.json", &document, true).is_ok());
    }

    #[test]
    fn test_lenient_mode_only_warns() {
        let validator = schema();
        let document = json!({"totalResults": -1});
        assert_eq!(validator.violations(&document).len(), 2);
        assert!(validator.check("nvd-cves.json", &document, false).is_ok());
    }

    #[test]
    fn test_strict_mode_fails() {
        let validator = schema();
        let document = json!({"totalResults": "many", "format": "NVD_CVE"});
        let err = validator.check("nvd-cves.json", &document, true).unwrap_err();
        match err {
            Error::Validation { name, message } => {
                assert_eq!(name, "nvd-cves.json");
                assert!(message.contains("/totalResults"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_schema_is_config_error() {
        let result = SchemaValidator::new("broken", &json!({"type": 12}));
        assert!(matches!(result, Err(Error::Config { .. })));
    }
}
