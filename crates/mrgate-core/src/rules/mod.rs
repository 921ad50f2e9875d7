//! Rule plugins and the registry that names them.
//!
//! A [`Rule`] claims lines of a section ([`Rule::covered_lines`]) and then
//! judges exactly those lines ([`Rule::validate_lines`]). Rules that need the
//! merge request itself (existence checks, branch diffs) additionally expose
//! a [`ContextBinding`]; the engine binds them once per evaluation so the
//! registry itself never changes after startup.

pub mod consumer;
pub mod masking;
pub mod references;
pub mod tag;
pub mod warehouse;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use mrgate_repo::{MrContext, RepositoryReader};

use crate::domain::{GateError, LineRange, Verdict};
use crate::section::Section;

pub use consumer::DataProductConsumerRule;
pub use masking::MaskingPolicyRule;
pub use tag::{find_duplicate_tag_names, TagRule};
pub use warehouse::{WarehouseAnalyzer, WarehouseRule};

/// A named governance check over one section of a document.
#[async_trait]
pub trait Rule: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Lines this rule takes responsibility for. Empty means the rule does not
    /// apply. A placeholder range claims the whole section.
    fn covered_lines(&self, section: &Section<'_>) -> Vec<LineRange>;

    async fn validate_lines(
        &self,
        section: &Section<'_>,
        ranges: &[LineRange],
    ) -> Result<Verdict, GateError>;

    /// Optional capability for rules that read the merge request.
    fn context_binding(&self) -> Option<&dyn ContextBinding> {
        None
    }
}

/// Produces a copy of a rule that knows the merge request under evaluation.
pub trait ContextBinding: Send + Sync {
    fn bind(&self, ctx: Arc<MrContext>) -> Arc<dyn Rule>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Immutable name → rule map, built at startup and shared by reference.
#[derive(Clone, Default)]
pub struct RuleRegistry {
    rules: BTreeMap<String, Arc<dyn Rule>>,
}

impl std::fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("rules", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The four built-in rules. Without a reader the masking and tag rules
    /// skip existence checks and the warehouse rule always asks for review.
    pub fn standard(repo: Option<Arc<dyn RepositoryReader>>) -> Self {
        let mut registry = Self::new();
        let rules: [Arc<dyn Rule>; 4] = [
            Arc::new(MaskingPolicyRule::new(repo.clone())),
            Arc::new(TagRule::new(repo.clone())),
            Arc::new(DataProductConsumerRule::default()),
            Arc::new(WarehouseRule::new(repo.map(WarehouseAnalyzer::new))),
        ];
        for rule in rules {
            registry.rules.insert(rule.name().to_string(), rule);
        }
        registry
    }

    pub fn register(&mut self, rule: Arc<dyn Rule>) -> Result<(), GateError> {
        let name = rule.name().to_string();
        if self.rules.contains_key(&name) {
            return Err(GateError::rule(name, "rule already registered"));
        }
        self.rules.insert(name, rule);
        Ok(())
    }

    pub fn with_rule(mut self, rule: Arc<dyn Rule>) -> Result<Self, GateError> {
        self.register(rule)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Rule>> {
        self.rules.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules for one evaluation, with context-aware rules bound to `ctx`.
    pub fn bind(&self, ctx: &Arc<MrContext>) -> BoundRules {
        let rules = self
            .rules
            .iter()
            .map(|(name, rule)| {
                let bound = match rule.context_binding() {
                    Some(binding) => binding.bind(Arc::clone(ctx)),
                    None => Arc::clone(rule),
                };
                (name.clone(), bound)
            })
            .collect();
        BoundRules { rules }
    }
}

/// Per-evaluation view of the registry.
pub struct BoundRules {
    rules: BTreeMap<String, Arc<dyn Rule>>,
}

impl BoundRules {
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Rule>> {
        self.rules.get(name)
    }

    /// All rules, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Rule>> {
        self.rules.values()
    }
}
