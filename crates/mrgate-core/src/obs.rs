//! Structured observability hooks for evaluation lifecycle events.
//!
//! - [`evaluation_span`] scopes everything logged while one MR is evaluated
//! - `emit_*` functions log the key lifecycle events at `info!`/`warn!`

use tracing::{info, warn, Span};

use crate::domain::Decision;

/// Span tagged with the MR under evaluation. Attach it to the evaluation
/// future with `tracing::Instrument` so it survives `.await` points.
pub fn evaluation_span(project_id: u64, mr_iid: u64) -> Span {
    tracing::info_span!("mrgate.evaluation", project_id, mr_iid)
}

/// Emit event: evaluation started.
pub fn emit_evaluation_started(project_id: u64, mr_iid: u64, files: usize) {
    info!(event = "evaluation.started", project_id, mr_iid, files);
}

/// Emit event: one file judged.
pub fn emit_file_evaluated(path: &str, decision: Decision, sections: usize) {
    info!(
        event = "file.evaluated",
        path = %path,
        decision = %decision,
        sections = sections,
    );
}

/// Emit event: a rule errored or panicked; the file goes to manual review.
pub fn emit_rule_failed(path: &str, rule: &str, error: &dyn std::fmt::Display) {
    warn!(event = "rule.failed", path = %path, rule = %rule, error = %error);
}

/// Emit event: evaluation finished.
pub fn emit_evaluation_finished(
    project_id: u64,
    mr_iid: u64,
    decision: Decision,
    review_files: usize,
    duration_ms: u64,
) {
    info!(
        event = "evaluation.finished",
        project_id,
        mr_iid,
        decision = %decision,
        review_files = review_files,
        duration_ms = duration_ms,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_and_emitters_do_not_panic() {
        let span = evaluation_span(1, 2);
        let _guard = span.enter();
        emit_evaluation_started(1, 2, 3);
        emit_file_evaluated("a.yaml", Decision::Approve, 1);
        emit_rule_failed("a.yaml", "tag", &"boom");
        emit_evaluation_finished(1, 2, Decision::ManualReview, 1, 5);
    }
}
