//! Warehouse rule and the branch analyzer behind it.
//!
//! Warehouse sizing drives cost, so no warehouse change is ever approved
//! automatically. The rule only approves when it has compared both branches
//! and found nothing but consumer edits outside the warehouses.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use mrgate_repo::{FileChange, MrContext, RepositoryReader};

use super::{ContextBinding, Rule};
use crate::domain::path::file_name;
use crate::domain::{GateError, LineRange, Verdict};
use crate::section::Section;
use crate::validate::warehouse::{diff_warehouses, WarehouseDiff};

pub const RULE_NAME: &str = "warehouse";

const PRODUCT_FILE: &str = "product.yaml";

/// Compares a product file between the target branch and the MR's source branch.
#[derive(Clone)]
pub struct WarehouseAnalyzer {
    repo: Arc<dyn RepositoryReader>,
}

impl WarehouseAnalyzer {
    pub fn new(repo: Arc<dyn RepositoryReader>) -> Self {
        Self { repo }
    }

    async fn fetch_or_empty(&self, project_id: u64, path: &str, reference: &str) -> Result<String, GateError> {
        match self.repo.get_file(project_id, path, reference).await {
            Ok(content) => Ok(content),
            Err(e) if e.is_not_found() => {
                debug!(project_id, path, reference, "file absent on branch");
                Ok(String::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Diff the warehouses of `change`. Missing files count as empty, so new
    /// files are pure additions and deleted files pure removals.
    pub async fn analyze(&self, ctx: &MrContext, change: &FileChange) -> Result<WarehouseDiff, GateError> {
        let target = if change.new_file {
            String::new()
        } else {
            let old = if change.old_path.is_empty() {
                change.path()
            } else {
                change.old_path.as_str()
            };
            self.fetch_or_empty(ctx.project_id, old, &ctx.target_branch)
                .await?
        };
        let source = if change.deleted_file {
            String::new()
        } else {
            self.fetch_or_empty(ctx.source_project(), change.path(), &ctx.source_branch)
                .await?
        };
        diff_warehouses(&target, &source).map_err(|message| GateError::Parse {
            path: change.path().to_string(),
            message,
        })
    }
}

#[derive(Clone, Default)]
pub struct WarehouseRule {
    analyzer: Option<WarehouseAnalyzer>,
    ctx: Option<Arc<MrContext>>,
}

impl WarehouseRule {
    pub fn new(analyzer: Option<WarehouseAnalyzer>) -> Self {
        Self {
            analyzer,
            ctx: None,
        }
    }
}

#[async_trait]
impl Rule for WarehouseRule {
    fn name(&self) -> &str {
        RULE_NAME
    }

    fn description(&self) -> &str {
        "Sends every warehouse addition, removal or resize to manual review"
    }

    fn covered_lines(&self, section: &Section<'_>) -> Vec<LineRange> {
        if file_name(section.file_path) != PRODUCT_FILE {
            return Vec::new();
        }
        let blocks = section.blocks("warehouses");
        if !blocks.is_empty() {
            return blocks;
        }
        let removed_block = section
            .change
            .removed_lines()
            .iter()
            .any(|l| l.trim_start().starts_with("warehouses:"));
        if removed_block {
            vec![LineRange::placeholder(section.file_path)]
        } else {
            Vec::new()
        }
    }

    async fn validate_lines(
        &self,
        section: &Section<'_>,
        _ranges: &[LineRange],
    ) -> Result<Verdict, GateError> {
        let (Some(analyzer), Some(ctx)) = (&self.analyzer, &self.ctx) else {
            return Ok(Verdict::manual_review("Warehouse changes require manual review"));
        };

        let diff = analyzer.analyze(ctx, section.change).await?;
        let mut details: Vec<String> = diff
            .changes
            .iter()
            .map(|c| format!("{}: {c}", c.kind))
            .collect();
        if diff.non_warehouse_changes {
            details.push("non-warehouse fields changed as well".to_string());
        }

        if let Some(message) = diff.message() {
            return Ok(Verdict::manual_review(message).with_details(details));
        }
        if diff.ungoverned_changes {
            return Ok(Verdict::manual_review(
                "Product changes outside warehouses and consumers require manual review",
            )
            .with_details(details));
        }
        Ok(Verdict::approve("No warehouse changes detected").with_details(details))
    }

    fn context_binding(&self) -> Option<&dyn ContextBinding> {
        Some(self)
    }
}

impl ContextBinding for WarehouseRule {
    fn bind(&self, ctx: Arc<MrContext>) -> Arc<dyn Rule> {
        Arc::new(Self {
            analyzer: self.analyzer.clone(),
            ctx: Some(ctx),
        })
    }
}
