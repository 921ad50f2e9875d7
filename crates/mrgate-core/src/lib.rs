//! MR Gate Core Library
//!
//! Rule evaluation and decision aggregation for merge requests against a
//! declarative YAML repository: section extraction, schema validators, rule
//! plugins, the line-coverage check and the MR-level verdict.
//!
//! ## Layer 1 - Policy kernel
//!
//! - `config`: declarative rule configuration and file matching
//! - `section`: document parsing, section values and line spans
//! - `validate`: pure schema validators
//! - `rules`: rule plugins and the immutable [`RuleRegistry`]
//! - `engine`: the [`RuleEngine`] orchestrator

pub mod config;
pub mod domain;
pub mod engine;
pub mod metrics;
pub mod obs;
pub mod rules;
pub mod section;
pub mod telemetry;
pub mod validate;

pub use config::{FileConfig, ParserKind, RuleBinding, RuleConfig, SectionConfig, SectionSelector};

pub use domain::{
    ConfigError, DataProductPath, Decision, FileSummary, GateError, LineRange, Result,
    RuleEvaluation, RuleOutcome, SectionSummary, Verdict,
};

pub use engine::RuleEngine;

pub use rules::{
    find_duplicate_tag_names, ContextBinding, DataProductConsumerRule, MaskingPolicyRule, Rule,
    RuleRegistry, TagRule, WarehouseAnalyzer, WarehouseRule,
};

pub use section::Section;

pub use validate::{
    validate_masking_policy, validate_tag, MaskingPolicyDocument, TagDocument, ValidationIssue,
    ValidationResult,
};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
