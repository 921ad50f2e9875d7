//! Engine output types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::decision::{Decision, Verdict};
use super::lines::LineRange;

/// What one rule said about one section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub rule: String,
    pub verdict: Verdict,
    /// Ranges the rule claimed, as returned by the rule.
    pub ranges: Vec<LineRange>,
}

/// Aggregated judgement of one configured section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionSummary {
    pub name: String,
    pub decision: Decision,
    pub reasons: Vec<String>,
    pub rules: Vec<RuleOutcome>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uncovered_lines: Vec<LineRange>,
}

/// Aggregated judgement of one changed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummary {
    pub path: String,
    /// Name of the matched file config, if any.
    pub file_config: Option<String>,
    pub decision: Decision,
    /// Non-approve reasons, or the approval reason when approved.
    pub reasons: Vec<String>,
    pub sections: Vec<SectionSummary>,
}

impl FileSummary {
    pub fn uncovered_lines(&self) -> impl Iterator<Item = &LineRange> {
        self.sections.iter().flat_map(|s| s.uncovered_lines.iter())
    }

    pub fn has_coverage_gap(&self) -> bool {
        self.uncovered_lines().next().is_some()
    }
}

/// Final result of evaluating one merge request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEvaluation {
    pub evaluation_id: Uuid,
    pub project_id: u64,
    pub mr_iid: u64,
    /// MR-level decision with the aggregate reason.
    pub verdict: Verdict,
    pub files: Vec<FileSummary>,
    pub total_files: usize,
    pub approved_files: usize,
    pub review_files: usize,
    pub uncovered_files: usize,
    /// Non-blocking findings (e.g. duplicate tag names across files).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// SHA-256 of the canonical rule config in force.
    pub config_digest: String,
    pub duration_ms: u64,
    pub evaluated_at: DateTime<Utc>,
}

impl RuleEvaluation {
    pub fn decision(&self) -> Decision {
        self.verdict.decision
    }

    pub fn summary(&self) -> Option<&str> {
        self.verdict.summary.as_deref()
    }

    pub fn file(&self, path: &str) -> Option<&FileSummary> {
        self.files.iter().find(|f| f.path == path)
    }
}
