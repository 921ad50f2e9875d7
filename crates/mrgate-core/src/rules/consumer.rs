//! Data product consumer rule.
//!
//! Owns the `consumers:` blocks of `product.yaml`. Consumer-only edits are
//! approved on the data product owner's say-so in any environment; a product
//! listing itself as a consumer is always sent to review.

use async_trait::async_trait;

use mrgate_repo::model::DiffLineKind;
use mrgate_repo::FileChange;

use super::references::yaml_value;
use super::Rule;
use crate::domain::path::{environment_segment, file_name, DataProductPath, KNOWN_ENVIRONMENTS};
use crate::domain::{GateError, LineRange, Verdict};
use crate::section::Section;
use crate::validate::product::ProductDocument;

pub const RULE_NAME: &str = "data_product_consumer";

const PRODUCT_FILE: &str = "product.yaml";

#[derive(Debug, Clone)]
pub struct DataProductConsumerRule {
    /// Environments named in approval messages.
    environments: Vec<String>,
}

impl Default for DataProductConsumerRule {
    fn default() -> Self {
        Self::new(vec!["preprod".to_string(), "prod".to_string()])
    }
}

impl DataProductConsumerRule {
    pub fn new(environments: Vec<String>) -> Self {
        Self { environments }
    }

    fn environment<'a>(&self, path: &'a str) -> Option<&'a str> {
        environment_segment(path, &self.environments).or_else(|| {
            path.split('/')
                .find(|seg| KNOWN_ENVIRONMENTS.contains(seg))
        })
    }
}

fn is_consumer_line(text: &str) -> bool {
    let t = text.trim();
    t.is_empty()
        || t.starts_with('#')
        || t == "consumers:"
        || t.starts_with("consumers: ")
        || t.starts_with("- name:")
        || t.starts_with("kind:")
}

/// One `- ` item seen on the new side of the diff.
#[derive(Default)]
struct DiffItem<'a> {
    added: bool,
    name: Option<&'a str>,
    kind: Option<&'a str>,
}

/// Whether the diff adds a `data_product` consumer named `product`.
///
/// Works from the diff alone, so it still holds when the engine only had the
/// hunk text to rebuild the file from.
fn diff_adds_self_consumer(change: &FileChange, product: &str) -> bool {
    let mut items: Vec<DiffItem<'_>> = Vec::new();
    for line in change.diff_lines() {
        if line.kind == DiffLineKind::Removed {
            continue;
        }
        if line.text.trim_start().starts_with("- ") {
            items.push(DiffItem::default());
        }
        let Some(item) = items.last_mut() else {
            continue;
        };
        item.added |= line.kind == DiffLineKind::Added;
        if let Some(name) = yaml_value(line.text, "name") {
            item.name = Some(name);
        } else if let Some(kind) = yaml_value(line.text, "kind") {
            item.kind = Some(kind);
        }
    }
    items.iter().any(|item| {
        item.added
            && item.name == Some(product)
            && item.kind.is_some_and(|k| k.eq_ignore_ascii_case("data_product"))
    })
}

#[async_trait]
impl Rule for DataProductConsumerRule {
    fn name(&self) -> &str {
        RULE_NAME
    }

    fn description(&self) -> &str {
        "Approves consumer-only product changes and rejects self-consumers"
    }

    fn covered_lines(&self, section: &Section<'_>) -> Vec<LineRange> {
        if file_name(section.file_path) != PRODUCT_FILE {
            return Vec::new();
        }
        section.blocks("consumers")
    }

    async fn validate_lines(
        &self,
        section: &Section<'_>,
        _ranges: &[LineRange],
    ) -> Result<Verdict, GateError> {
        let doc = ProductDocument::from_value(section.value)
            .map_err(|message| GateError::rule(RULE_NAME, message))?;

        let product = doc
            .name()
            .or_else(|| DataProductPath::parse(section.file_path).map(|p| p.data_product));
        if let Some(product) = &product {
            let self_consumer = doc
                .consumers()
                .any(|c| c.is_data_product() && c.name().as_deref() == Some(product.as_str()))
                || diff_adds_self_consumer(section.change, product);
            if self_consumer {
                return Ok(Verdict::manual_review(format!(
                    "Self-consumer detected: data product '{product}' cannot be added as a consumer of itself"
                )));
            }
        }

        let changed: Vec<&str> = section
            .change
            .diff_lines()
            .into_iter()
            .filter(|l| l.kind != DiffLineKind::Context)
            .map(|l| l.text)
            .filter(|t| !t.trim().is_empty())
            .collect();
        let consumer_only = !changed.is_empty() && changed.iter().all(|t| is_consumer_line(t));

        if consumer_only {
            let env = self.environment(section.file_path).unwrap_or("unknown");
            return Ok(Verdict::approve(format!(
                "Consumer access changes in `{env}` - data product owner approval sufficient, no TOC approval required"
            )));
        }
        Ok(Verdict::approve("No consumer-only changes detected"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_lines() {
        assert!(is_consumer_line("        consumers:"));
        assert!(is_consumer_line("          - name: finance"));
        assert!(is_consumer_line("            kind: consumer_group"));
        assert!(!is_consumer_line("    size: LARGE"));
        assert!(!is_consumer_line("  - type: user"));
    }

    #[test]
    fn test_diff_adds_self_consumer() {
        let diff = "@@ -8,0 +9,2 @@\n+          - name: analytics\n+            kind: data_product\n";
        let change = FileChange::modified("p/product.yaml", diff);
        assert!(diff_adds_self_consumer(&change, "analytics"));
        assert!(!diff_adds_self_consumer(&change, "finance"));

        let group = diff.replace("data_product", "consumer_group");
        let change = FileChange::modified("p/product.yaml", group);
        assert!(!diff_adds_self_consumer(&change, "analytics"));

        // An existing entry shown as context is not an addition.
        let context = "@@ -7,2 +7,3 @@\n           - name: analytics\n             kind: data_product\n+          - name: finance\n";
        let change = FileChange::modified("p/product.yaml", context);
        assert!(!diff_adds_self_consumer(&change, "analytics"));
    }

    #[test]
    fn test_environment_prefers_allow_list() {
        let rule = DataProductConsumerRule::default();
        assert_eq!(
            rule.environment("dataproducts/source/a/prod/product.yaml"),
            Some("prod")
        );
        assert_eq!(
            rule.environment("dataproducts/source/a/sandbox/product.yaml"),
            Some("sandbox")
        );
        assert_eq!(rule.environment("dataproducts/source/a/product.yaml"), None);
    }
}
