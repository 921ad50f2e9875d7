//! Domain models for MR Gate.
//!
//! Canonical definitions for the core entities:
//! - `Decision` / `Verdict`: outcome of a judgement and why
//! - `LineRange`: lines a rule claims to have judged
//! - `DataProductPath`: repository path conventions
//! - `RuleEvaluation`: what the engine hands back to its caller

pub mod decision;
pub mod error;
pub mod evaluation;
pub mod lines;
pub mod path;

// Re-export main types and errors
pub use decision::{Decision, Verdict};
pub use error::{ConfigError, GateError, Result};
pub use evaluation::{FileSummary, RuleEvaluation, RuleOutcome, SectionSummary};
pub use lines::LineRange;
pub use path::DataProductPath;
