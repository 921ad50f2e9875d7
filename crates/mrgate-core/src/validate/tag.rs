//! Tag validation.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use super::masking::POLICY_NAME_RE;
use super::{opt_text, scalar_text, ValidationResult};
use crate::domain::path::DataProductPath;

static TAG_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]{3,30}_[a-z0-9]+$").expect("tag name pattern"));

static DATA_PRODUCT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]{3,30}$").expect("data product pattern"));

pub const MAX_ALLOWED_VALUES: usize = 20;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyRef {
    #[serde(default)]
    pub name: Option<Value>,
}

/// Parsed `Tag` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagDocument {
    #[serde(default)]
    pub kind: Option<Value>,
    #[serde(default)]
    pub name: Option<Value>,
    #[serde(default)]
    pub description: Option<Value>,
    #[serde(default, alias = "dataProduct")]
    pub data_product: Option<Value>,
    #[serde(default, alias = "maskingPolicies")]
    pub masking_policies: Option<Vec<PolicyRef>>,
    #[serde(default, alias = "allowedValues")]
    pub allowed_values: Option<Vec<Value>>,
}

impl TagDocument {
    pub fn from_value(value: &Value) -> Result<Self, String> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_yaml::from_value(value.clone()).map_err(|e| e.to_string())
    }

    pub fn kind(&self) -> Option<String> {
        opt_text(&self.kind)
    }

    pub fn name(&self) -> Option<String> {
        opt_text(&self.name)
    }

    pub fn data_product(&self) -> Option<String> {
        opt_text(&self.data_product)
    }

    /// Referenced masking policy names, skipping entries without a name.
    pub fn policy_names(&self) -> Vec<String> {
        self.masking_policies
            .iter()
            .flatten()
            .filter_map(|p| opt_text(&p.name))
            .collect()
    }
}

/// Validate a tag document located at `file_path`.
pub fn validate_tag(doc: &TagDocument, file_path: &str) -> ValidationResult {
    let mut result = ValidationResult::new();

    let kind = doc.kind();
    let name = doc.name();
    let data_product = doc.data_product();
    for (value, field) in [
        (&kind, "kind"),
        (&name, "name"),
        (&opt_text(&doc.description), "description"),
        (&data_product, "data_product"),
    ] {
        if value.is_none() {
            result.add_error(field, "is required");
        }
    }
    if doc.masking_policies.is_none() {
        result.add_error("masking_policies", "is required");
    }
    let allowed = match &doc.allowed_values {
        None => {
            result.add_error("allowed_values", "is required");
            None
        }
        Some(values) => Some(values),
    };
    let (Some(kind), Some(name), Some(data_product), Some(allowed)) =
        (kind, name, data_product, allowed)
    else {
        return result;
    };
    if !result.is_valid() {
        return result;
    }

    if kind != "Tag" {
        result.add_error("kind", format!("must be 'Tag', got '{kind}'"));
    }

    if !DATA_PRODUCT_RE.is_match(&data_product) {
        result.add_error(
            "data_product",
            format!("'{data_product}' must be 3-30 lowercase alphanumeric characters"),
        );
    }
    if let Some(loc) = DataProductPath::parse(file_path) {
        if data_product != loc.data_product {
            result.add_error(
                "data_product",
                format!(
                    "'{data_product}' does not match data product '{}' in path",
                    loc.data_product
                ),
            );
        }
    }

    let prefix = format!("{data_product}_");
    if !TAG_NAME_RE.is_match(&name) {
        result.add_error("name", format!("'{name}' must match <dataproduct>_<tag>"));
    } else if !name.starts_with(&prefix) {
        result.add_error("name", format!("'{name}' must be prefixed with '{prefix}'"));
    }

    if allowed.is_empty() || allowed.len() > MAX_ALLOWED_VALUES {
        result.add_error(
            "allowed_values",
            format!(
                "must contain between 1 and {MAX_ALLOWED_VALUES} entries, got {}",
                allowed.len()
            ),
        );
    }
    for (i, value) in allowed.iter().enumerate() {
        if scalar_text(value).is_none() {
            result.add_error(format!("allowed_values[{i}]"), "must be a non-empty scalar");
        }
    }

    for (i, policy) in doc.masking_policies.iter().flatten().enumerate() {
        let field = format!("masking_policies[{i}].name");
        let Some(policy_name) = opt_text(&policy.name) else {
            result.add_error(field, "is required");
            continue;
        };
        if !POLICY_NAME_RE.is_match(&policy_name) {
            result.add_error(
                field,
                format!("'{policy_name}' is not a valid masking policy name"),
            );
        } else if !policy_name.starts_with(&prefix) {
            result.add_error(
                field,
                format!("'{policy_name}' is not owned by data product '{data_product}'"),
            );
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATH: &str = "dataproducts/source/analytics/prod/analytics_tags.yaml";

    const VALID: &str = "\
kind: Tag
name: analytics_sensitivity
description: Sensitivity of a column
data_product: analytics
masking_policies:
  - name: analytics_pii_string_policy
allowed_values:
  - low
  - high
";

    fn doc(yaml: &str) -> TagDocument {
        TagDocument::from_value(&serde_yaml::from_str(yaml).unwrap()).unwrap()
    }

    #[test]
    fn test_valid_tag() {
        let result = validate_tag(&doc(VALID), PATH);
        assert!(result.is_valid(), "{:?}", result.error_messages());
    }

    #[test]
    fn test_missing_fields_are_all_reported() {
        let result = validate_tag(&doc("kind: Tag\n"), PATH);
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["name", "description", "data_product", "masking_policies", "allowed_values"]
        );
    }

    #[test]
    fn test_camel_case_aliases() {
        let yaml = VALID
            .replace("data_product:", "dataProduct:")
            .replace("masking_policies:", "maskingPolicies:")
            .replace("allowed_values:", "allowedValues:");
        assert!(validate_tag(&doc(&yaml), PATH).is_valid());
    }

    #[test]
    fn test_name_must_carry_data_product_prefix() {
        let yaml = VALID.replace("analytics_sensitivity", "sales_sensitivity");
        let msgs = validate_tag(&doc(&yaml), PATH).error_messages();
        assert_eq!(msgs, vec!["name: 'sales_sensitivity' must be prefixed with 'analytics_'"]);
    }

    #[test]
    fn test_policy_reference_ownership() {
        let yaml = VALID.replace("analytics_pii_string_policy", "sales_pii_string_policy");
        let msgs = validate_tag(&doc(&yaml), PATH).error_messages();
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].contains("not owned by data product 'analytics'"));

        let yaml = VALID.replace("analytics_pii_string_policy", "analytics_policy");
        let msgs = validate_tag(&doc(&yaml), PATH).error_messages();
        assert!(msgs[0].contains("not a valid masking policy name"));
    }

    #[test]
    fn test_allowed_values_bounds() {
        let yaml = VALID.replace("  - low\n  - high\n", "");
        let yaml = yaml.replace("allowed_values:\n", "allowed_values: []\n");
        let msgs = validate_tag(&doc(&yaml), PATH).error_messages();
        assert_eq!(msgs, vec!["allowed_values: must contain between 1 and 20 entries, got 0"]);

        let many: String = (0..21).map(|i| format!("  - v{i}\n")).collect();
        let yaml = VALID.replace("  - low\n  - high\n", &many);
        assert_eq!(validate_tag(&doc(&yaml), PATH).errors.len(), 1);
    }

    #[test]
    fn test_path_data_product_mismatch() {
        let result = validate_tag(&doc(VALID), "dataproducts/source/sales/prod/sales_tags.yaml");
        assert!(result
            .error_messages()
            .iter()
            .any(|m| m.starts_with("data_product: 'analytics' does not match")));
    }

    #[test]
    fn test_kind_is_case_sensitive() {
        let yaml = VALID.replace("kind: Tag", "kind: tag");
        let msgs = validate_tag(&doc(&yaml), PATH).error_messages();
        assert_eq!(msgs, vec!["kind: must be 'Tag', got 'tag'"]);
    }
}
