//! Declarative rule configuration.
//!
//! A [`RuleConfig`] tells the engine, per file matcher, which sections a
//! document has, how to extract each one and which named rules judge it.
//! It is loaded once at startup and shared read-only between evaluations.
//!
//! ```yaml
//! enabled: true
//! files:
//!   - name: masking_policies
//!     path: "dataproducts/**"
//!     filename: "*masking.y*ml"
//!     parser_type: yaml
//!     sections:
//!       - name: policy
//!         yaml_path: "."
//!         required: true
//!         rule_configs:
//!           - name: masking_policy
//!         auto_approve: true
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use globset::{GlobBuilder, GlobMatcher};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::error::ConfigError;
use crate::domain::path::file_name;
use crate::rules::RuleRegistry;

fn enabled_by_default() -> bool {
    true
}

/// Root of the rule configuration tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub files: Vec<FileConfig>,
}

/// Which files a set of sections applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConfig {
    pub name: String,
    /// Glob tested against the parent directory (or the full path).
    #[serde(default)]
    pub path: String,
    /// Glob tested against the base file name.
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub parser_type: ParserKind,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub sections: Vec<SectionConfig>,
}

/// Document format of a matched file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParserKind {
    #[default]
    Yaml,
    Json,
}

/// One extractable sub-tree of a document and the rules that judge it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionConfig {
    pub name: String,
    #[serde(default)]
    pub yaml_path: SectionSelector,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub rule_configs: Vec<RuleBinding>,
    /// Only consulted when every rule approved; never overrides a ManualReview.
    #[serde(default = "enabled_by_default")]
    pub auto_approve: bool,
}

/// Reference to a registered rule by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleBinding {
    pub name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

/// Where a section lives inside its document.
///
/// Serialised as the dotted path string; `"."` (or empty) selects the whole
/// document. Numeric segments index into sequences.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SectionSelector {
    #[default]
    WholeDocument,
    Path(Vec<String>),
}

impl From<String> for SectionSelector {
    fn from(raw: String) -> Self {
        SectionSelector::parse(&raw)
    }
}

impl From<SectionSelector> for String {
    fn from(selector: SectionSelector) -> Self {
        selector.to_string()
    }
}

impl SectionSelector {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "." {
            return SectionSelector::WholeDocument;
        }
        let segments: Vec<String> = trimmed
            .trim_start_matches('.')
            .split('.')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if segments.is_empty() {
            SectionSelector::WholeDocument
        } else {
            SectionSelector::Path(segments)
        }
    }
}

impl fmt::Display for SectionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SectionSelector::WholeDocument => write!(f, "."),
            SectionSelector::Path(segments) => write!(f, "{}", segments.join(".")),
        }
    }
}

impl SectionConfig {
    pub fn new(name: impl Into<String>, selector: SectionSelector) -> Self {
        Self {
            name: name.into(),
            yaml_path: selector,
            required: false,
            rule_configs: Vec::new(),
            auto_approve: true,
        }
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_rule(mut self, name: impl Into<String>) -> Self {
        self.rule_configs.push(RuleBinding {
            name: name.into(),
            enabled: true,
        });
        self
    }

    pub fn auto_approve(mut self, auto_approve: bool) -> Self {
        self.auto_approve = auto_approve;
        self
    }

    /// Enabled rule names, in configured order.
    pub fn active_rules(&self) -> impl Iterator<Item = &str> {
        self.rule_configs
            .iter()
            .filter(|b| b.enabled)
            .map(|b| b.name.as_str())
    }
}

impl FileConfig {
    pub fn new(name: impl Into<String>, path: &str, filename: &str) -> Self {
        Self {
            name: name.into(),
            path: path.to_string(),
            filename: filename.to_string(),
            parser_type: ParserKind::Yaml,
            enabled: true,
            sections: Vec::new(),
        }
    }

    pub fn with_parser(mut self, parser: ParserKind) -> Self {
        self.parser_type = parser;
        self
    }

    pub fn with_section(mut self, section: SectionConfig) -> Self {
        self.sections.push(section);
        self
    }
}

impl RuleConfig {
    /// Built-in configuration covering tags, masking policies and product files.
    pub fn standard() -> Self {
        Self {
            enabled: true,
            files: vec![
                FileConfig::new("tags", "dataproducts/**", "*tag*.y*ml").with_section(
                    SectionConfig::new("tag", SectionSelector::WholeDocument)
                        .required(true)
                        .with_rule("tag"),
                ),
                FileConfig::new("masking_policies", "dataproducts/**", "*masking.y*ml")
                    .with_section(
                        SectionConfig::new("policy", SectionSelector::WholeDocument)
                            .required(true)
                            .with_rule("masking_policy"),
                    ),
                FileConfig::new("data_products", "dataproducts/**", "product.yaml").with_section(
                    SectionConfig::new("product", SectionSelector::WholeDocument)
                        .required(true)
                        .with_rule("data_product_consumer")
                        .with_rule("warehouse"),
                ),
            ],
        }
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    /// SHA-256 of the canonical JSON encoding, for audit trails.
    pub fn digest(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        hex::encode(hasher.finalize())
    }

    /// Check names, globs and rule references. All problems are reported together.
    pub fn validate(&self, registry: &RuleRegistry) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        if self.enabled && self.files.is_empty() {
            problems.push("no file configs defined".to_string());
        }

        let mut names = BTreeSet::new();
        for file in &self.files {
            if file.name.trim().is_empty() {
                problems.push("file config with empty name".to_string());
            } else if !names.insert(file.name.as_str()) {
                problems.push(format!("duplicate file config '{}'", file.name));
            }
            if let Err(e) = FileMatcher::compile(file) {
                problems.push(e);
            }
            for section in &file.sections {
                if section.name.trim().is_empty() {
                    problems.push(format!("file config '{}' has a section with empty name", file.name));
                }
                for binding in &section.rule_configs {
                    if !registry.contains(&binding.name) {
                        problems.push(format!(
                            "section '{}.{}' references unknown rule '{}'",
                            file.name, section.name, binding.name
                        ));
                    }
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    /// Compile matchers for enabled file configs, keeping config order.
    pub fn compile(&self) -> Result<Vec<FileMatcher>, ConfigError> {
        let mut matchers = Vec::new();
        let mut problems = Vec::new();
        for (index, file) in self.files.iter().enumerate() {
            if !file.enabled {
                continue;
            }
            match FileMatcher::compile(file) {
                Ok(m) => matchers.push(FileMatcher { index, ..m }),
                Err(e) => problems.push(e),
            }
        }
        if problems.is_empty() {
            Ok(matchers)
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}

/// Compiled path/filename globs of one [`FileConfig`].
#[derive(Debug, Clone)]
pub struct FileMatcher {
    /// Position of the file config in [`RuleConfig::files`].
    pub index: usize,
    path: Option<GlobMatcher>,
    filename: Option<GlobMatcher>,
}

fn compile_glob(pattern: &str, owner: &str) -> Result<Option<GlobMatcher>, String> {
    if pattern.trim().is_empty() {
        return Ok(None);
    }
    GlobBuilder::new(pattern.trim())
        .literal_separator(true)
        .build()
        .map(|g| Some(g.compile_matcher()))
        .map_err(|e| format!("file config '{owner}' has invalid glob '{pattern}': {e}"))
}

impl FileMatcher {
    fn compile(file: &FileConfig) -> Result<Self, String> {
        Ok(Self {
            index: 0,
            path: compile_glob(&file.path, &file.name)?,
            filename: compile_glob(&file.filename, &file.name)?,
        })
    }

    /// Path and filename globs are independent; both must match.
    pub fn matches(&self, path: &str) -> bool {
        let path = path.trim_start_matches('/');
        let name = file_name(path);
        let dir = path
            .strip_suffix(name)
            .unwrap_or("")
            .trim_end_matches('/');

        let path_ok = self
            .path
            .as_ref()
            .map_or(true, |g| g.is_match(dir) || g.is_match(path));
        let name_ok = self.filename.as_ref().map_or(true, |g| g.is_match(name));
        path_ok && name_ok
    }
}
