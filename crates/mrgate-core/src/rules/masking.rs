//! Masking policy rule.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use mrgate_repo::{MrContext, RepositoryReader};

use super::references::{added_in_mr, lookup, Lookup};
use super::{ContextBinding, Rule};
use crate::domain::path::{file_name, DataProductPath, KNOWN_ENVIRONMENTS, PRODUCT_TYPES};
use crate::domain::{GateError, LineRange, Verdict};
use crate::section::Section;
use crate::validate::masking::{KIND_CONSUMER_GROUP, KIND_SERVICE_ACCOUNT};
use crate::validate::{validate_masking_policy, MaskingPolicyDocument};

pub const RULE_NAME: &str = "masking_policy";

/// Validates `*masking.yaml` documents and checks that every consumer exists.
#[derive(Clone, Default)]
pub struct MaskingPolicyRule {
    repo: Option<Arc<dyn RepositoryReader>>,
    ctx: Option<Arc<MrContext>>,
}

/// Whether the path names a masking policy file.
pub fn is_masking_file(path: &str) -> bool {
    let base = file_name(path).to_lowercase();
    (base.ends_with("masking.yaml") || base.ends_with("masking.yml")) && !base.contains("tag")
}

impl MaskingPolicyRule {
    pub fn new(repo: Option<Arc<dyn RepositoryReader>>) -> Self {
        Self { repo, ctx: None }
    }

    /// Consumers that are neither added by the MR nor present on the target branch.
    async fn missing_consumers(&self, doc: &MaskingPolicyDocument, file_path: &str) -> Vec<String> {
        let (Some(repo), Some(ctx)) = (&self.repo, &self.ctx) else {
            debug!(file_path, "no repository reader bound, skipping consumer existence check");
            return Vec::new();
        };

        let environment = DataProductPath::parse(file_path)
            .and_then(|p| p.known_environment().map(str::to_string));
        let mut missing = Vec::new();
        let mut seen = BTreeSet::new();

        for (kind, name) in doc.consumers() {
            if !seen.insert((kind.to_lowercase(), name.clone())) {
                continue;
            }
            let candidates = match kind.to_lowercase().as_str() {
                KIND_CONSUMER_GROUP => {
                    if added_in_mr(ctx, file_path, "groups", KIND_CONSUMER_GROUP, &name) {
                        continue;
                    }
                    group_paths(&name)
                }
                KIND_SERVICE_ACCOUNT => {
                    if added_in_mr(ctx, file_path, "serviceaccounts", KIND_SERVICE_ACCOUNT, &name) {
                        continue;
                    }
                    service_account_paths(&name, environment.as_deref())
                }
                _ => continue,
            };

            let mut found = false;
            for path in &candidates {
                match lookup(&**repo, ctx.project_id, path, &ctx.target_branch).await {
                    Lookup::Found | Lookup::Unavailable => {
                        found = true;
                        break;
                    }
                    Lookup::Missing => {}
                }
            }
            if !found {
                missing.push(name);
            }
        }
        missing
    }
}

/// `dataproducts/<type>/<dp>/groups/<name>.yaml` for each product type, with
/// the owning data product taken from the third dash-separated token.
fn group_paths(name: &str) -> Vec<String> {
    let Some(dp) = name.split('-').nth(2) else {
        return Vec::new();
    };
    PRODUCT_TYPES
        .iter()
        .map(|t| format!("dataproducts/{t}/{dp}/groups/{name}.yaml"))
        .collect()
}

/// `serviceaccounts/<env>/<name>.yaml`; the environment comes from the policy
/// path, else from the account name itself.
fn service_account_paths(name: &str, environment: Option<&str>) -> Vec<String> {
    let env = environment.map(str::to_string).or_else(|| {
        name.strip_suffix("_appuser")
            .and_then(|rest| rest.rsplit('_').next())
            .filter(|env| KNOWN_ENVIRONMENTS.contains(env))
            .map(str::to_string)
    });
    match env {
        Some(env) => vec![format!("serviceaccounts/{env}/{name}.yaml")],
        None => Vec::new(),
    }
}

#[async_trait]
impl Rule for MaskingPolicyRule {
    fn name(&self) -> &str {
        RULE_NAME
    }

    fn description(&self) -> &str {
        "Validates masking policy structure, naming and consumer references"
    }

    fn covered_lines(&self, section: &Section<'_>) -> Vec<LineRange> {
        if is_masking_file(section.file_path) {
            vec![section.whole_range()]
        } else {
            Vec::new()
        }
    }

    async fn validate_lines(
        &self,
        section: &Section<'_>,
        _ranges: &[LineRange],
    ) -> Result<Verdict, GateError> {
        if section.is_deletion() {
            return Ok(Verdict::manual_review(
                "Masking policy deletion requires manual review",
            ));
        }

        let doc = match MaskingPolicyDocument::from_value(section.value) {
            Ok(doc) => doc,
            Err(e) => {
                return Ok(Verdict::manual_review("Masking policy validation failed")
                    .with_details(vec![format!("document: invalid structure ({e})")]))
            }
        };

        let result = validate_masking_policy(&doc, section.file_path);
        if !result.is_valid() {
            return Ok(Verdict::manual_review(format!(
                "Masking policy validation failed with {} error(s)",
                result.errors.len()
            ))
            .with_details(result.error_messages()));
        }

        let missing = self.missing_consumers(&doc, section.file_path).await;
        if !missing.is_empty() {
            return Ok(Verdict::manual_review(format!(
                "Masking policy references consumers that do not exist: {}",
                missing.join(", ")
            ))
            .with_details(missing));
        }

        let name = doc.name().unwrap_or_default();
        Ok(Verdict::approve(format!("Masking policy '{name}' is valid")))
    }

    fn context_binding(&self) -> Option<&dyn ContextBinding> {
        Some(self)
    }
}

impl ContextBinding for MaskingPolicyRule {
    fn bind(&self, ctx: Arc<MrContext>) -> Arc<dyn Rule> {
        Arc::new(Self {
            repo: self.repo.clone(),
            ctx: Some(ctx),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_applicability() {
        assert!(is_masking_file("dataproducts/source/a/prod/a_masking.yaml"));
        assert!(is_masking_file("x/Masking.yml"));
        assert!(!is_masking_file("dataproducts/source/a/prod/a_tag_masking.yaml"));
        assert!(!is_masking_file("dataproducts/source/a/prod/product.yaml"));
    }

    #[test]
    fn test_group_paths_use_third_token() {
        assert_eq!(
            group_paths("dataverse-source-analytics-readers"),
            vec![
                "dataproducts/source/analytics/groups/dataverse-source-analytics-readers.yaml",
                "dataproducts/aggregate/analytics/groups/dataverse-source-analytics-readers.yaml",
                "dataproducts/platform/analytics/groups/dataverse-source-analytics-readers.yaml",
            ]
        );
        assert!(group_paths("broken").is_empty());
    }

    #[test]
    fn test_service_account_env_fallback_to_name() {
        assert_eq!(
            service_account_paths("analytics_dbt_prod_appuser", None),
            vec!["serviceaccounts/prod/analytics_dbt_prod_appuser.yaml"]
        );
        assert_eq!(
            service_account_paths("analytics_dbt_prod_appuser", Some("preprod")),
            vec!["serviceaccounts/preprod/analytics_dbt_prod_appuser.yaml"]
        );
        assert!(service_account_paths("analytics_dbt_mars_appuser", None).is_empty());
    }
}
