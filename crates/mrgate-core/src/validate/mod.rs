//! Schema validators for governed documents.
//!
//! Validators are pure: they take a typed document plus the file path it
//! came from and accumulate every violation into a [`ValidationResult`].
//! Nothing here touches the repository.
//!
//! # Modules
//!
//! - [`masking`]: `MaskingPolicy` documents
//! - [`tag`]: `Tag` documents
//! - [`product`]: `product.yaml` shapes shared by the consumer and warehouse rules
//! - [`warehouse`]: warehouse size table and target/source diffing

pub mod masking;
pub mod product;
pub mod tag;
pub mod warehouse;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

pub use masking::{validate_masking_policy, MaskingPolicyDocument};
pub use tag::{validate_tag, TagDocument};

/// One recorded violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

/// Ordered collection of violations found in one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub errors: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationIssue {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// One `"<field>: <message>"` entry per error, in recording order.
    pub fn error_messages(&self) -> Vec<String> {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect()
    }
}

/// Render a YAML scalar as text; `None` for null, empty strings and collections.
pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

pub(crate) fn opt_text(value: &Option<Value>) -> Option<String> {
    value.as_ref().and_then(scalar_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_keep_recording_order() {
        let mut result = ValidationResult::new();
        assert!(result.is_valid());
        result.add_error("name", "does not match pattern");
        result.add_error("cases[0].strategy", "is required");
        result.add_error("name", "second problem");
        assert!(!result.is_valid());
        assert_eq!(
            result.error_messages(),
            vec![
                "name: does not match pattern",
                "cases[0].strategy: is required",
                "name: second problem",
            ]
        );
    }

    #[test]
    fn test_scalar_text() {
        assert_eq!(scalar_text(&Value::from("  x ")), Some("x".to_string()));
        assert_eq!(scalar_text(&Value::from(0)), Some("0".to_string()));
        assert_eq!(scalar_text(&Value::from(-1.5)), Some("-1.5".to_string()));
        assert_eq!(scalar_text(&Value::from("")), None);
        assert_eq!(scalar_text(&Value::Null), None);
    }
}
