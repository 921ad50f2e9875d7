//! Error taxonomy for the governance engine.
//!
//! Recoverable validation failures never surface as errors: they become
//! `ManualReview` verdicts. Errors here are what rules and the engine use to
//! signal that a judgement could not be made at all.

use mrgate_repo::RepoError;

/// Rule configuration problems, reported together.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("config io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid rule config: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Engine and rule errors.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("rule {rule} failed: {message}")]
    Rule { rule: String, message: String },

    #[error("repository error: {0}")]
    Repository(#[from] RepoError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GateError {
    pub fn rule(rule: impl Into<String>, message: impl Into<String>) -> Self {
        GateError::Rule {
            rule: rule.into(),
            message: message.into(),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, GateError>;
