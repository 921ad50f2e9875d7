//! Global atomic counters for MR Gate.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single `tracing::info!`
//! event, e.g. before a process exits.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters.
pub struct Metrics {
    evaluations: AtomicU64,
    files_evaluated: AtomicU64,
    manual_reviews: AtomicU64,
    rule_failures: AtomicU64,
    coverage_gaps: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            evaluations: AtomicU64::new(0),
            files_evaluated: AtomicU64::new(0),
            manual_reviews: AtomicU64::new(0),
            rule_failures: AtomicU64::new(0),
            coverage_gaps: AtomicU64::new(0),
        }
    }

    pub fn inc_evaluations(&self) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "evaluations", "counter incremented");
    }

    pub fn inc_files_evaluated(&self) {
        self.files_evaluated.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "files_evaluated", "counter incremented");
    }

    /// Counted once per MR that ends in manual review.
    pub fn inc_manual_reviews(&self) {
        self.manual_reviews.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "manual_reviews", "counter incremented");
    }

    pub fn inc_rule_failures(&self) {
        self.rule_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "rule_failures", "counter incremented");
    }

    pub fn inc_coverage_gaps(&self) {
        self.coverage_gaps.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "coverage_gaps", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            evaluations = self.evaluations(),
            files_evaluated = self.files_evaluated(),
            manual_reviews = self.manual_reviews(),
            rule_failures = self.rule_failures(),
            coverage_gaps = self.coverage_gaps(),
        );
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    pub fn files_evaluated(&self) -> u64 {
        self.files_evaluated.load(Ordering::Relaxed)
    }

    pub fn manual_reviews(&self) -> u64 {
        self.manual_reviews.load(Ordering::Relaxed)
    }

    pub fn rule_failures(&self) -> u64 {
        self.rule_failures.load(Ordering::Relaxed)
    }

    pub fn coverage_gaps(&self) -> u64 {
        self.coverage_gaps.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.evaluations.store(0, Ordering::Relaxed);
        self.files_evaluated.store(0, Ordering::Relaxed);
        self.manual_reviews.store(0, Ordering::Relaxed);
        self.rule_failures.store(0, Ordering::Relaxed);
        self.coverage_gaps.store(0, Ordering::Relaxed);
    }
}
