//! Rule engine.
//!
//! Maps every changed file to its [`FileConfig`], hands each configured
//! section to the rules bound to it, checks that the changed lines of the
//! section were claimed by some rule, and folds everything into one
//! [`RuleEvaluation`] under "most restrictive wins".
//!
//! # Coverage
//!
//! A changed, non-blank, non-comment line inside a section span that no
//! invoked rule claimed forces the section to manual review, even when every
//! rule approved. Removed lines count at the new-side line they sat in front
//! of. A placeholder claim covers the whole section span.

use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use serde_yaml::Value;
use tracing::{debug, Instrument};
use uuid::Uuid;

use mrgate_repo::{FileChange, MrContext, RepositoryReader};

use crate::config::{FileConfig, FileMatcher, ParserKind, RuleConfig, SectionConfig, SectionSelector};
use crate::domain::path::is_yaml;
use crate::domain::{
    ConfigError, Decision, FileSummary, LineRange, RuleEvaluation, RuleOutcome, SectionSummary,
    Verdict,
};
use crate::metrics::METRICS;
use crate::obs;
use crate::rules::{find_duplicate_tag_names, BoundRules, Rule, RuleRegistry};
use crate::section::{extract, parse_document, section_span, significant_lines, Section};

/// Evaluates merge requests against a fixed rule config and registry.
pub struct RuleEngine {
    config: RuleConfig,
    matchers: Vec<FileMatcher>,
    registry: Arc<RuleRegistry>,
    repo: Option<Arc<dyn RepositoryReader>>,
    digest: String,
}

/// New-side text of a file and the line numbers, within that text, that the
/// MR changed.
struct Content {
    text: String,
    changed: BTreeSet<u32>,
    /// Where removed lines sat, clamped to the last line of `text`.
    removed: BTreeSet<u32>,
}

impl Content {
    fn new(text: String, changed: BTreeSet<u32>, removals: BTreeSet<u32>) -> Self {
        let last = (text.lines().count() as u32).max(1);
        let removed = removals.into_iter().map(|n| n.min(last)).collect();
        Self {
            text,
            changed,
            removed,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn review_file(path: &str, file_config: Option<&str>, reason: impl Into<String>) -> FileSummary {
    FileSummary {
        path: path.to_string(),
        file_config: file_config.map(str::to_string),
        decision: Decision::ManualReview,
        reasons: vec![reason.into()],
        sections: Vec::new(),
    }
}

fn approve_file(path: &str, reason: impl Into<String>) -> FileSummary {
    FileSummary {
        path: path.to_string(),
        file_config: None,
        decision: Decision::Approve,
        reasons: vec![reason.into()],
        sections: Vec::new(),
    }
}

impl RuleEngine {
    /// Compile the config's matchers. Rule names are resolved per evaluation;
    /// use [`RuleConfig::validate`] to reject unknown names up front.
    pub fn new(config: RuleConfig, registry: Arc<RuleRegistry>) -> Result<Self, ConfigError> {
        let matchers = config.compile()?;
        let digest = config.digest();
        Ok(Self {
            config,
            matchers,
            registry,
            repo: None,
            digest,
        })
    }

    /// Read file content from `repo` instead of rebuilding it from diffs.
    pub fn with_repository(mut self, repo: Arc<dyn RepositoryReader>) -> Self {
        self.repo = Some(repo);
        self
    }

    pub fn config(&self) -> &RuleConfig {
        &self.config
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    /// Evaluate one merge request. Never fails: anything that prevents a
    /// judgement becomes a manual review with a reason.
    pub async fn evaluate(&self, ctx: &MrContext) -> RuleEvaluation {
        let started = Instant::now();
        let ctx = Arc::new(ctx.clone());
        METRICS.inc_evaluations();
        obs::emit_evaluation_started(ctx.project_id, ctx.mr_iid, ctx.changes.len());

        let (verdict, files, warnings) = self
            .evaluate_changes(&ctx)
            .instrument(obs::evaluation_span(ctx.project_id, ctx.mr_iid))
            .await;

        let approved_files = files.iter().filter(|f| f.decision.is_approve()).count();
        let uncovered_files = files.iter().filter(|f| f.has_coverage_gap()).count();
        let duration_ms = started.elapsed().as_millis() as u64;
        if !verdict.is_approved() {
            METRICS.inc_manual_reviews();
        }
        obs::emit_evaluation_finished(
            ctx.project_id,
            ctx.mr_iid,
            verdict.decision,
            files.len() - approved_files,
            duration_ms,
        );

        RuleEvaluation {
            evaluation_id: Uuid::new_v4(),
            project_id: ctx.project_id,
            mr_iid: ctx.mr_iid,
            verdict,
            total_files: ctx.changes.len(),
            approved_files,
            review_files: files.len() - approved_files,
            uncovered_files,
            files,
            warnings,
            config_digest: self.digest.clone(),
            duration_ms,
            evaluated_at: Utc::now(),
        }
    }

    async fn evaluate_changes(
        &self,
        ctx: &Arc<MrContext>,
    ) -> (Verdict, Vec<FileSummary>, Vec<String>) {
        if ctx.changes.is_empty() {
            let verdict = Verdict::manual_review("no file changes").with_summary("Empty MR");
            return (verdict, Vec::new(), Vec::new());
        }
        if ctx.changes.iter().all(FileChange::is_empty_diff) {
            let verdict =
                Verdict::manual_review("no substantive changes").with_summary("Net-zero changes");
            return (verdict, Vec::new(), Vec::new());
        }
        if !self.config.enabled {
            let verdict = Verdict::manual_review("rule engine disabled")
                .with_summary("Rule engine disabled");
            return (verdict, Vec::new(), Vec::new());
        }

        let warnings = find_duplicate_tag_names(&ctx.changes);
        let bound = self.registry.bind(ctx);

        let mut files = Vec::with_capacity(ctx.changes.len());
        for change in &ctx.changes {
            let path = change.path();
            let outcome = AssertUnwindSafe(self.evaluate_file(ctx, &bound, change))
                .catch_unwind()
                .await;
            let summary = match outcome {
                Ok(summary) => summary,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    obs::emit_rule_failed(path, "engine", &message);
                    METRICS.inc_rule_failures();
                    review_file(path, None, format!("internal error: {message}"))
                }
            };
            METRICS.inc_files_evaluated();
            if summary.has_coverage_gap() {
                METRICS.inc_coverage_gaps();
            }
            obs::emit_file_evaluated(path, summary.decision, summary.sections.len());
            files.push(summary);
        }

        (aggregate(&files), files, warnings)
    }

    async fn load_content(&self, ctx: &MrContext, change: &FileChange) -> Result<Content, String> {
        if change.deleted_file {
            return Ok(Content::new(String::new(), BTreeSet::new(), BTreeSet::new()));
        }
        if let Some(repo) = &self.repo {
            match repo
                .get_file(ctx.source_project(), change.path(), &ctx.source_branch)
                .await
            {
                Ok(text) => {
                    return Ok(Content::new(
                        text,
                        change.added_line_numbers(),
                        change.removal_positions(),
                    ))
                }
                Err(e) if e.is_not_found() => {
                    debug!(path = change.path(), "not on source branch, rebuilding from diff");
                }
                Err(e) => return Err(format!("failed to fetch content: {e}")),
            }
        }
        let rebuilt = change.reconstruct_new_content();
        Ok(Content::new(rebuilt.text, rebuilt.added, rebuilt.removals))
    }

    async fn evaluate_file(
        &self,
        ctx: &MrContext,
        bound: &BoundRules,
        change: &FileChange,
    ) -> FileSummary {
        let path = change.path();
        let matched = self.matchers.iter().find(|m| m.matches(path));
        let file_config = matched.map(|m| &self.config.files[m.index]);

        if file_config.is_none() && !is_yaml(path) {
            return approve_file(path, "out of policy scope");
        }

        let content = match self.load_content(ctx, change).await {
            Ok(content) => content,
            Err(reason) => {
                return review_file(path, file_config.map(|f| f.name.as_str()), reason);
            }
        };

        match file_config {
            Some(file_config) => self.evaluate_configured(bound, change, &content, file_config).await,
            None => self.evaluate_unmatched(bound, change, &content).await,
        }
    }

    async fn evaluate_configured(
        &self,
        bound: &BoundRules,
        change: &FileChange,
        content: &Content,
        file_config: &FileConfig,
    ) -> FileSummary {
        let path = change.path();
        let root = match parse_document(path, &content.text, file_config.parser_type) {
            Ok(root) => root,
            Err(e) => {
                return review_file(path, Some(&file_config.name), format!("failed to parse: {e}"))
            }
        };

        let mut sections = Vec::with_capacity(file_config.sections.len());
        for section_config in &file_config.sections {
            let summary = self
                .evaluate_section(bound, change, content, &root, section_config)
                .await;
            sections.push(summary);
        }

        let decision = sections
            .iter()
            .fold(Decision::Approve, |acc, s| acc.most_restrictive(s.decision));
        let reasons: Vec<String> = sections
            .iter()
            .filter(|s| s.decision == decision)
            .flat_map(|s| s.reasons.iter().cloned())
            .collect();

        FileSummary {
            path: path.to_string(),
            file_config: Some(file_config.name.clone()),
            decision,
            reasons: if reasons.is_empty() {
                vec!["no sections configured".to_string()]
            } else {
                reasons
            },
            sections,
        }
    }

    async fn evaluate_section(
        &self,
        bound: &BoundRules,
        change: &FileChange,
        content: &Content,
        root: &Value,
        config: &SectionConfig,
    ) -> SectionSummary {
        let path = change.path();
        let mut summary = SectionSummary {
            name: config.name.clone(),
            decision: Decision::Approve,
            reasons: Vec::new(),
            rules: Vec::new(),
            uncovered_lines: Vec::new(),
        };

        let Some(value) = extract(root, &config.yaml_path) else {
            if config.required {
                summary.decision = Decision::ManualReview;
                summary.reasons.push("missing required section".to_string());
            } else {
                summary.reasons.push("section not present".to_string());
            }
            return summary;
        };

        let span = section_span(&content.text, &config.yaml_path)
            .or_else(|| section_span(&content.text, &SectionSelector::WholeDocument));
        let section = Section {
            name: &config.name,
            file_path: path,
            change,
            content: &content.text,
            value,
            span,
        };

        let mut claimed: Vec<LineRange> = Vec::new();
        for rule_name in config.active_rules() {
            let Some(rule) = bound.get(rule_name) else {
                summary.rules.push(RuleOutcome {
                    rule: rule_name.to_string(),
                    verdict: Verdict::manual_review(format!("unknown rule '{rule_name}'")),
                    ranges: Vec::new(),
                });
                continue;
            };
            if let Some(outcome) = run_rule(&**rule, &section).await {
                claimed.extend(outcome.ranges.iter().cloned());
                summary.rules.push(outcome);
            }
        }

        summary.uncovered_lines = uncovered(&section, content, &claimed);

        let mut decision = Decision::Approve;
        for outcome in &summary.rules {
            decision = decision.most_restrictive(outcome.verdict.decision);
        }
        if !summary.uncovered_lines.is_empty() {
            decision = Decision::ManualReview;
        }

        for outcome in &summary.rules {
            if outcome.verdict.decision == decision {
                summary.reasons.push(outcome.verdict.reason.clone());
            }
        }
        if !summary.uncovered_lines.is_empty() {
            let lines: Vec<String> = summary.uncovered_lines.iter().map(ToString::to_string).collect();
            summary.reasons.push(format!("uncovered lines: {}", lines.join(", ")));
        }

        if decision.is_approve() && !config.auto_approve {
            decision = Decision::ManualReview;
            summary.reasons = vec![format!("auto-approve disabled for section '{}'", config.name)];
        }
        if summary.reasons.is_empty() {
            summary.reasons.push("no changes in section".to_string());
        }
        summary.decision = decision;
        summary
    }

    /// Files no config matches: any rule may still claim them.
    async fn evaluate_unmatched(
        &self,
        bound: &BoundRules,
        change: &FileChange,
        content: &Content,
    ) -> FileSummary {
        let path = change.path();
        let parsed = parse_document(path, &content.text, ParserKind::Yaml);
        let null = Value::Null;
        let value = parsed.as_ref().unwrap_or(&null);
        let section = Section {
            name: "document",
            file_path: path,
            change,
            content: &content.text,
            value,
            span: section_span(&content.text, &SectionSelector::WholeDocument),
        };

        let mut rules = Vec::new();
        for rule in bound.iter() {
            if let Some(outcome) = run_rule(&**rule, &section).await {
                rules.push(outcome);
            }
        }
        if rules.is_empty() {
            return approve_file(path, "out of policy scope");
        }
        if let Err(e) = &parsed {
            return review_file(path, None, format!("failed to parse: {e}"));
        }

        let decision = rules
            .iter()
            .fold(Decision::Approve, |acc, o| acc.most_restrictive(o.verdict.decision));
        let reasons: Vec<String> = rules
            .iter()
            .filter(|o| o.verdict.decision == decision)
            .map(|o| o.verdict.reason.clone())
            .collect();
        FileSummary {
            path: path.to_string(),
            file_config: None,
            decision,
            reasons: reasons.clone(),
            sections: vec![SectionSummary {
                name: section.name.to_string(),
                decision,
                reasons,
                rules,
                uncovered_lines: Vec::new(),
            }],
        }
    }
}

/// Ask one rule to claim and judge a section. `None` when it declines.
async fn run_rule(rule: &dyn Rule, section: &Section<'_>) -> Option<RuleOutcome> {
    let name = rule.name().to_string();
    let ranges = match std::panic::catch_unwind(AssertUnwindSafe(|| rule.covered_lines(section))) {
        Ok(ranges) => ranges,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            return Some(failed(section.file_path, name, &message));
        }
    };
    if ranges.is_empty() {
        return None;
    }

    let verdict = match AssertUnwindSafe(rule.validate_lines(section, &ranges))
        .catch_unwind()
        .await
    {
        Ok(Ok(verdict)) => verdict,
        Ok(Err(e)) => {
            obs::emit_rule_failed(section.file_path, &name, &e);
            METRICS.inc_rule_failures();
            Verdict::manual_review(format!("rule '{name}' could not evaluate: {e}"))
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            return Some(RuleOutcome {
                ranges,
                ..failed(section.file_path, name, &message)
            });
        }
    };
    Some(RuleOutcome {
        rule: name,
        verdict,
        ranges,
    })
}

fn failed(path: &str, rule: String, message: &str) -> RuleOutcome {
    obs::emit_rule_failed(path, &rule, &message);
    METRICS.inc_rule_failures();
    RuleOutcome {
        verdict: Verdict::manual_review(format!("rule '{rule}' panicked: {message}")),
        rule,
        ranges: Vec::new(),
    }
}

/// Changed lines of the section span that no claim covers: significant
/// added lines and the positions of removed ones.
fn uncovered(section: &Section<'_>, content: &Content, claimed: &[LineRange]) -> Vec<LineRange> {
    let Some((lo, hi)) = section.span else {
        return Vec::new();
    };
    if claimed.iter().any(LineRange::is_placeholder) {
        return Vec::new();
    }
    let missing = significant_lines(section.content)
        .into_iter()
        .filter(|n| content.changed.contains(n))
        .chain(content.removed.iter().copied())
        .filter(|n| (lo..=hi).contains(n))
        .filter(|n| !claimed.iter().any(|r| r.contains(*n)));
    LineRange::compress(section.file_path, missing)
}

/// MR-level verdict: most restrictive file decision, with every non-approve
/// reason as a sorted, de-duplicated `path: reason` list.
fn aggregate(files: &[FileSummary]) -> Verdict {
    let decision = files
        .iter()
        .fold(Decision::Approve, |acc, f| acc.most_restrictive(f.decision));
    let total = files.len();

    if decision.is_approve() {
        return Verdict::approve(format!("all {total} file(s) approved"))
            .with_summary(format!("{total} of {total} files auto-approved"));
    }

    let review: Vec<&FileSummary> = files.iter().filter(|f| !f.decision.is_approve()).collect();
    let details: Vec<String> = review
        .iter()
        .flat_map(|f| f.reasons.iter().map(move |r| format!("{}: {r}", f.path)))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    Verdict::manual_review(details.join("; "))
        .with_summary(format!("{} of {total} files require manual review", review.len()))
        .with_details(details)
}
