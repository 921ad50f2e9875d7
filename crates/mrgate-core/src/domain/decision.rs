//! Decisions and verdicts.
//!
//! [`Decision`] is totally ordered so aggregation is a plain `max`:
//! `Approve < ManualReview`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome of judging a rule, section, file or whole MR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    ManualReview,
}

impl Decision {
    /// The more restrictive of the two.
    pub fn most_restrictive(self, other: Decision) -> Decision {
        self.max(other)
    }

    pub fn is_approve(self) -> bool {
        self == Decision::Approve
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Approve => write!(f, "approve"),
            Decision::ManualReview => write!(f, "manual_review"),
        }
    }
}

/// A decision with its human-readable justification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub decision: Decision,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl Verdict {
    pub fn approve(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Approve,
            reason: reason.into(),
            summary: None,
            details: Vec::new(),
        }
    }

    pub fn manual_review(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::ManualReview,
            reason: reason.into(),
            summary: None,
            details: Vec::new(),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details.extend(details);
        self
    }

    pub fn is_approved(&self) -> bool {
        self.decision.is_approve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_review_is_more_restrictive() {
        assert!(Decision::ManualReview > Decision::Approve);
        assert_eq!(
            Decision::Approve.most_restrictive(Decision::ManualReview),
            Decision::ManualReview
        );
        assert_eq!(
            Decision::Approve.most_restrictive(Decision::Approve),
            Decision::Approve
        );
    }

    #[test]
    fn test_decision_serde_names() {
        let json = serde_json::to_string(&Decision::ManualReview).unwrap();
        assert_eq!(json, "\"manual_review\"");
        assert_eq!(Decision::Approve.to_string(), "approve");
    }

    #[test]
    fn test_verdict_builders() {
        let v = Verdict::manual_review("uncovered lines")
            .with_summary("Coverage gap")
            .with_details(vec!["line 3".to_string()]);
        assert!(!v.is_approved());
        assert_eq!(v.summary.as_deref(), Some("Coverage gap"));
        assert_eq!(v.details, vec!["line 3"]);
    }
}
