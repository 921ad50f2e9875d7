//! Tag rule and cross-file duplicate detection.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_yaml::Value;
use tracing::{debug, warn};

use mrgate_repo::{FileChange, MrContext, RepositoryReader};

use super::masking::is_masking_file;
use super::references::{masking_policy_added_in_mr, text_declares, yaml_value};
use super::{ContextBinding, Rule};
use crate::domain::path::{file_name, is_yaml, DataProductPath, PRODUCT_TYPES};
use crate::domain::{GateError, LineRange, Verdict};
use crate::section::Section;
use crate::validate::{validate_tag, TagDocument};

pub const RULE_NAME: &str = "tag";

/// Validates `Tag` documents and checks that referenced masking policies exist.
#[derive(Clone, Default)]
pub struct TagRule {
    repo: Option<Arc<dyn RepositoryReader>>,
    ctx: Option<Arc<MrContext>>,
}

fn under_dataproducts(path: &str) -> bool {
    path.split('/').any(|seg| seg == "dataproducts")
}

/// Whether a document at `path` with parsed `value` is a tag.
pub fn is_tag_document(path: &str, value: &Value) -> bool {
    if !under_dataproducts(path) || !is_yaml(path) {
        return false;
    }
    match value.get("kind").and_then(Value::as_str) {
        Some(kind) => kind.eq_ignore_ascii_case("Tag"),
        None => file_name(path).to_lowercase().contains("tag"),
    }
}

enum Search {
    Found,
    Missing,
    Unavailable,
}

impl TagRule {
    pub fn new(repo: Option<Arc<dyn RepositoryReader>>) -> Self {
        Self { repo, ctx: None }
    }

    async fn missing_policies(&self, doc: &TagDocument, file_path: &str) -> Vec<String> {
        let (Some(repo), Some(ctx)) = (&self.repo, &self.ctx) else {
            debug!(file_path, "no repository reader bound, skipping masking policy existence check");
            return Vec::new();
        };
        let Some(data_product) = doc.data_product() else {
            return Vec::new();
        };
        let environment = DataProductPath::parse(file_path)
            .and_then(|p| p.known_environment().map(str::to_string));

        let mut missing = Vec::new();
        let mut seen = BTreeSet::new();
        for policy in doc.policy_names() {
            if !seen.insert(policy.clone()) || masking_policy_added_in_mr(ctx, file_path, &policy) {
                continue;
            }
            let search = search_policy(
                &**repo,
                ctx,
                &data_product,
                environment.as_deref(),
                &policy,
            )
            .await;
            if matches!(search, Search::Missing) {
                missing.push(policy);
            }
        }
        missing
    }
}

/// Subdirectories of `path`; `None` when the listing itself failed.
async fn list_dirs(repo: &dyn RepositoryReader, ctx: &MrContext, path: &str) -> Option<Vec<String>> {
    match repo.list_directory(ctx.project_id, path, &ctx.target_branch).await {
        Ok(entries) => Some(
            entries
                .into_iter()
                .filter(|e| e.is_dir())
                .map(|e| e.path)
                .collect(),
        ),
        Err(e) if e.is_not_found() => Some(Vec::new()),
        Err(e) => {
            warn!(path, error = %e, "directory listing failed");
            None
        }
    }
}

/// Look for a masking file declaring `name: <policy>` below
/// `dataproducts/<type>/<dp>/<env>/` for every product type.
async fn search_policy(
    repo: &dyn RepositoryReader,
    ctx: &MrContext,
    data_product: &str,
    environment: Option<&str>,
    policy: &str,
) -> Search {
    let mut unavailable = false;
    for product_type in PRODUCT_TYPES {
        let base = format!("dataproducts/{product_type}/{data_product}");
        let dirs = match environment {
            Some(env) => vec![format!("{base}/{env}")],
            None => match list_dirs(repo, ctx, &base).await {
                Some(dirs) => dirs,
                None => {
                    unavailable = true;
                    continue;
                }
            },
        };

        for dir in dirs {
            let entries = match repo
                .list_directory(ctx.project_id, &dir, &ctx.target_branch)
                .await
            {
                Ok(entries) => entries,
                Err(e) if e.is_not_found() => continue,
                Err(e) => {
                    warn!(path = %dir, error = %e, "directory listing failed");
                    unavailable = true;
                    continue;
                }
            };
            for entry in entries.iter().filter(|e| e.is_file() && is_masking_file(&e.path)) {
                match repo
                    .get_file(ctx.project_id, &entry.path, &ctx.target_branch)
                    .await
                {
                    Ok(content) if text_declares(&content, "name", policy) => return Search::Found,
                    Ok(_) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => {
                        warn!(path = %entry.path, error = %e, "masking policy fetch failed");
                        unavailable = true;
                    }
                }
            }
        }
    }
    if unavailable {
        Search::Unavailable
    } else {
        Search::Missing
    }
}

#[async_trait]
impl Rule for TagRule {
    fn name(&self) -> &str {
        RULE_NAME
    }

    fn description(&self) -> &str {
        "Validates tag documents and their masking policy references"
    }

    fn covered_lines(&self, section: &Section<'_>) -> Vec<LineRange> {
        if is_tag_document(section.file_path, section.value) {
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
            return Ok(Verdict::manual_review("Tag deletion requires manual review"));
        }

        let doc = match TagDocument::from_value(section.value) {
            Ok(doc) => doc,
            Err(e) => {
                return Ok(Verdict::manual_review("Tag validation failed")
                    .with_details(vec![format!("document: invalid structure ({e})")]))
            }
        };

        let result = validate_tag(&doc, section.file_path);
        if !result.is_valid() {
            return Ok(Verdict::manual_review(format!(
                "Tag validation failed with {} error(s)",
                result.errors.len()
            ))
            .with_details(result.error_messages()));
        }

        let missing = self.missing_policies(&doc, section.file_path).await;
        if !missing.is_empty() {
            return Ok(Verdict::manual_review(format!(
                "Tag references masking policies that do not exist: {}",
                missing.join(", ")
            ))
            .with_details(missing));
        }

        let name = doc.name().unwrap_or_default();
        Ok(Verdict::approve(format!("Tag '{name}' is valid")))
    }

    fn context_binding(&self) -> Option<&dyn ContextBinding> {
        Some(self)
    }
}

impl ContextBinding for TagRule {
    fn bind(&self, ctx: Arc<MrContext>) -> Arc<dyn Rule> {
        Arc::new(Self {
            repo: self.repo.clone(),
            ctx: Some(ctx),
        })
    }
}

// ---------------------------------------------------------------------------
// Duplicate detection
// ---------------------------------------------------------------------------

/// Top-level `name:` of a change that adds a `kind: Tag` document.
fn added_tag_name(change: &FileChange) -> Option<String> {
    let path = change.path();
    if change.deleted_file || !under_dataproducts(path) || !is_yaml(path) {
        return None;
    }
    let content = change.reconstruct_new_content().text;
    let top_level = |key: &str| {
        content
            .lines()
            .filter(|l| !l.starts_with(' ') && !l.starts_with('\t'))
            .find_map(|l| yaml_value(l, key).map(str::to_string))
    };
    let kind = top_level("kind")?;
    if !kind.eq_ignore_ascii_case("Tag") {
        return None;
    }
    top_level("name").filter(|n| !n.is_empty())
}

/// Tag names declared by more than one file of the MR, as warning lines.
pub fn find_duplicate_tag_names(changes: &[FileChange]) -> Vec<String> {
    let mut by_name: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for change in changes {
        if let Some(name) = added_tag_name(change) {
            by_name.entry(name).or_default().push(change.path());
        }
    }
    by_name
        .into_iter()
        .filter(|(_, paths)| paths.len() > 1)
        .map(|(name, mut paths)| {
            paths.sort_unstable();
            format!("duplicate tag name '{name}' declared in {}", paths.join(", "))
        })
        .collect()
}
