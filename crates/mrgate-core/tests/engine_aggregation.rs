//! End-to-end engine behaviour: short-circuits, coverage, aggregation and
//! isolation of misbehaving rules.

use std::sync::Arc;

use async_trait::async_trait;
use mrgate_core::{
    Decision, FileConfig, GateError, LineRange, Rule, RuleConfig, RuleEngine, RuleRegistry,
    Section, SectionConfig, SectionSelector, Verdict,
};
use mrgate_repo::fakes::MemoryRepository;
use mrgate_repo::{FileChange, MrContext, RepositoryReader};

const POLICY_PATH: &str = "dataproducts/source/analytics/prod/analytics_masking.yaml";

const VALID_POLICY: &str = "\
kind: MaskingPolicy
name: analytics_pii_string_policy
data_product: analytics
datatype: string
mask: \"==MASKED==\"
cases:
  - strategy: UNMASKED
    consumers:
      - kind: consumer_group
        name: dataverse-source-analytics
";

fn engine(config: RuleConfig) -> RuleEngine {
    RuleEngine::new(config, Arc::new(RuleRegistry::standard(None))).unwrap()
}

fn mr() -> MrContext {
    MrContext::new(42, 7).with_branches("feature", "main")
}

struct Exploding;

#[async_trait]
impl Rule for Exploding {
    fn name(&self) -> &str {
        "exploding"
    }

    fn description(&self) -> &str {
        "panics while validating"
    }

    fn covered_lines(&self, section: &Section<'_>) -> Vec<LineRange> {
        vec![section.whole_range()]
    }

    async fn validate_lines(
        &self,
        _section: &Section<'_>,
        _ranges: &[LineRange],
    ) -> Result<Verdict, GateError> {
        panic!("boom");
    }
}

struct Failing;

#[async_trait]
impl Rule for Failing {
    fn name(&self) -> &str {
        "failing"
    }

    fn description(&self) -> &str {
        "returns an error"
    }

    fn covered_lines(&self, section: &Section<'_>) -> Vec<LineRange> {
        vec![section.whole_range()]
    }

    async fn validate_lines(
        &self,
        _section: &Section<'_>,
        _ranges: &[LineRange],
    ) -> Result<Verdict, GateError> {
        Err(GateError::rule("failing", "upstream unavailable"))
    }
}

fn config_with(extra: FileConfig) -> RuleConfig {
    let mut config = RuleConfig::standard();
    config.files.insert(0, extra);
    config
}

// ---- short-circuits ----

#[tokio::test]
async fn empty_mr_requires_review() {
    let eval = engine(RuleConfig::standard()).evaluate(&mr()).await;
    assert_eq!(eval.decision(), Decision::ManualReview);
    assert_eq!(eval.summary(), Some("Empty MR"));
    assert_eq!(eval.verdict.reason, "no file changes");
    assert_eq!(eval.total_files, 0);
}

#[tokio::test]
async fn net_zero_changes_require_review() {
    let ctx = mr()
        .with_change(FileChange::modified("README.md", ""))
        .with_change(FileChange::modified(POLICY_PATH, "  \n"));
    let eval = engine(RuleConfig::standard()).evaluate(&ctx).await;
    assert_eq!(eval.decision(), Decision::ManualReview);
    assert_eq!(eval.summary(), Some("Net-zero changes"));
    assert_eq!(eval.total_files, 2);
}

#[tokio::test]
async fn disabled_engine_requires_review() {
    let mut config = RuleConfig::standard();
    config.enabled = false;
    let ctx = mr().with_change(FileChange::added("README.md", "hello\n"));
    let eval = engine(config).evaluate(&ctx).await;
    assert_eq!(eval.decision(), Decision::ManualReview);
    assert_eq!(eval.verdict.reason, "rule engine disabled");
}

// ---- scope ----

#[tokio::test]
async fn unmatched_files_are_out_of_scope() {
    let ctx = mr()
        .with_change(FileChange::added("README.md", "# docs\n"))
        .with_change(FileChange::added("ci/pipeline.yaml", "stages: [test]\n"));
    let eval = engine(RuleConfig::standard()).evaluate(&ctx).await;
    assert_eq!(eval.decision(), Decision::Approve);
    assert_eq!(eval.approved_files, 2);
    assert_eq!(eval.file("README.md").unwrap().reasons, vec!["out of policy scope"]);
}

#[tokio::test]
async fn unmatched_file_claimed_by_a_rule_is_judged() {
    let ctx = mr().with_change(FileChange::added(
        "legacy/analytics_masking.yaml",
        "kind: MaskingPolicy\nname: nope\n",
    ));
    let eval = engine(RuleConfig::standard()).evaluate(&ctx).await;
    assert_eq!(eval.decision(), Decision::ManualReview);
    let file = eval.file("legacy/analytics_masking.yaml").unwrap();
    assert!(file.file_config.is_none());
    assert_eq!(file.sections[0].rules[0].rule, "masking_policy");
}

// ---- aggregation ----

#[tokio::test]
async fn valid_policy_is_approved() {
    let ctx = mr().with_change(FileChange::added(POLICY_PATH, VALID_POLICY));
    let config = RuleConfig::standard();
    let digest = config.digest();
    let eval = engine(config).evaluate(&ctx).await;
    assert_eq!(eval.decision(), Decision::Approve, "{:?}", eval.verdict);
    assert_eq!(eval.approved_files, 1);
    assert_eq!(eval.review_files, 0);
    assert_eq!(eval.config_digest, digest);
    let file = eval.file(POLICY_PATH).unwrap();
    assert_eq!(file.file_config.as_deref(), Some("masking_policies"));
    assert!(!file.has_coverage_gap());
}

#[tokio::test]
async fn most_restrictive_file_wins_and_reasons_are_sorted() {
    let bad = VALID_POLICY.replace("datatype: string", "datatype: text");
    let ctx = mr()
        .with_change(FileChange::added("README.md", "docs\n"))
        .with_change(FileChange::added(
            "dataproducts/source/zeta/prod/zeta_masking.yaml",
            &bad.replace("analytics", "zeta"),
        ))
        .with_change(FileChange::added(POLICY_PATH, &bad));
    let eval = engine(RuleConfig::standard()).evaluate(&ctx).await;

    assert_eq!(eval.decision(), Decision::ManualReview);
    assert_eq!(eval.total_files, 3);
    assert_eq!(eval.approved_files, 1);
    assert_eq!(eval.review_files, 2);
    assert_eq!(eval.verdict.details.len(), 2);
    assert!(eval.verdict.details[0].starts_with("dataproducts/source/analytics/"));
    assert!(eval.verdict.details[1].starts_with("dataproducts/source/zeta/"));
    assert!(eval.verdict.reason.contains("Masking policy validation failed"));
    assert_eq!(eval.summary(), Some("2 of 3 files require manual review"));
}

#[tokio::test]
async fn parse_failure_is_review_not_fatal() {
    let ctx = mr()
        .with_change(FileChange::added(POLICY_PATH, "kind: [unterminated\n"))
        .with_change(FileChange::added("README.md", "docs\n"));
    let eval = engine(RuleConfig::standard()).evaluate(&ctx).await;
    assert_eq!(eval.decision(), Decision::ManualReview);
    let file = eval.file(POLICY_PATH).unwrap();
    assert!(file.reasons[0].starts_with("failed to parse"));
    assert_eq!(eval.file("README.md").unwrap().decision, Decision::Approve);
}

// ---- coverage ----

#[tokio::test]
async fn uncovered_lines_force_review_even_when_rules_approve() {
    let config = config_with(
        FileConfig::new("consumers_only", "", "product.yaml").with_section(
            SectionConfig::new("product", SectionSelector::WholeDocument)
                .required(true)
                .with_rule("data_product_consumer"),
        ),
    );
    let product = "\
name: analytics
data_product_db:
  - name: db
    presentation_schemas:
      - name: marts
        consumers:
          - name: finance
            kind: data_product
";
    let path = "dataproducts/aggregate/analytics/prod/product.yaml";
    let ctx = mr().with_change(FileChange::added(path, product));
    let eval = engine(config).evaluate(&ctx).await;

    assert_eq!(eval.decision(), Decision::ManualReview);
    assert_eq!(eval.uncovered_files, 1);
    let file = eval.file(path).unwrap();
    let section = &file.sections[0];
    assert_eq!(section.rules[0].verdict.decision, Decision::Approve);
    assert_eq!(
        section.uncovered_lines,
        vec![LineRange::new(path, 1, 5)]
    );
    assert!(file.reasons.iter().any(|r| r.starts_with("uncovered lines")));
}

#[tokio::test]
async fn section_without_rules_is_entirely_uncovered() {
    let config = config_with(
        FileConfig::new("notes", "", "*.notes.yaml")
            .with_section(SectionConfig::new("all", SectionSelector::WholeDocument)),
    );
    let ctx = mr().with_change(FileChange::added("a.notes.yaml", "a: 1\n\nb: 2\n"));
    let eval = engine(config).evaluate(&ctx).await;
    let section = &eval.file("a.notes.yaml").unwrap().sections[0];
    assert_eq!(
        section.uncovered_lines,
        vec![LineRange::new("a.notes.yaml", 1, 1), LineRange::new("a.notes.yaml", 3, 3)]
    );
}

#[tokio::test]
async fn missing_required_section() {
    let config = config_with(
        FileConfig::new("products", "dataproducts/**", "product.yaml").with_section(
            SectionConfig::new("warehouses", SectionSelector::parse("warehouses"))
                .required(true)
                .with_rule("warehouse"),
        ),
    );
    let path = "dataproducts/source/analytics/product.yaml";
    let ctx = mr().with_change(FileChange::added(path, "name: analytics\n"));
    let eval = engine(config).evaluate(&ctx).await;
    let file = eval.file(path).unwrap();
    assert_eq!(file.decision, Decision::ManualReview);
    assert_eq!(file.reasons, vec!["missing required section"]);
}

#[tokio::test]
async fn optional_missing_section_is_fine() {
    let config = config_with(
        FileConfig::new("notes", "", "*.notes.yaml").with_section(
            SectionConfig::new("extra", SectionSelector::parse("extra")).with_rule("tag"),
        ),
    );
    let ctx = mr().with_change(FileChange::added("a.notes.yaml", "a: 1\n"));
    let eval = engine(config).evaluate(&ctx).await;
    assert_eq!(eval.decision(), Decision::Approve);
}

#[tokio::test]
async fn removed_line_nobody_claims_is_uncovered() {
    let path = "dataproducts/source/analytics/prod/product.yaml";
    let source = "name: analytics\ntags:\n  tier: gold\n";
    let diff = "@@ -2,1 +1,0 @@\n-roverGroup: analytics-owners\n";
    let repo: Arc<dyn RepositoryReader> =
        Arc::new(MemoryRepository::new().with_file(42, "feature", path, source));
    let ctx = mr().with_change(FileChange::modified(path, diff));
    let eval = RuleEngine::new(
        RuleConfig::standard(),
        Arc::new(RuleRegistry::standard(Some(repo.clone()))),
    )
    .unwrap()
    .with_repository(repo)
    .evaluate(&ctx)
    .await;

    assert_eq!(eval.decision(), Decision::ManualReview);
    let file = eval.file(path).unwrap();
    assert!(file.sections[0].rules.is_empty());
    assert_eq!(file.sections[0].uncovered_lines, vec![LineRange::new(path, 2, 2)]);
    assert_eq!(file.reasons, vec![format!("uncovered lines: {path}:2")]);
}

// ---- auto-approve ----

#[tokio::test]
async fn auto_approve_false_downgrades_only_approvals() {
    let mut config = RuleConfig::standard();
    for file in &mut config.files {
        for section in &mut file.sections {
            section.auto_approve = false;
        }
    }
    let ctx = mr().with_change(FileChange::added(POLICY_PATH, VALID_POLICY));
    let eval = engine(config.clone()).evaluate(&ctx).await;
    let file = eval.file(POLICY_PATH).unwrap();
    assert_eq!(file.decision, Decision::ManualReview);
    assert_eq!(file.reasons, vec!["auto-approve disabled for section 'policy'"]);

    let ctx = mr().with_change(FileChange::deleted(POLICY_PATH, VALID_POLICY));
    let eval = engine(config).evaluate(&ctx).await;
    let file = eval.file(POLICY_PATH).unwrap();
    assert_eq!(file.reasons, vec!["Masking policy deletion requires manual review"]);
}

// ---- rule failures ----

#[tokio::test]
async fn unknown_rule_requires_review() {
    let config = config_with(
        FileConfig::new("x", "", "*.x.yaml").with_section(
            SectionConfig::new("all", SectionSelector::WholeDocument).with_rule("nope"),
        ),
    );
    let ctx = mr().with_change(FileChange::added("a.x.yaml", "a: 1\n"));
    let eval = engine(config).evaluate(&ctx).await;
    let file = eval.file("a.x.yaml").unwrap();
    assert_eq!(file.decision, Decision::ManualReview);
    assert!(file.reasons.contains(&"unknown rule 'nope'".to_string()));
}

#[tokio::test]
async fn panicking_rule_does_not_block_other_files() {
    let registry = RuleRegistry::standard(None)
        .with_rule(Arc::new(Exploding))
        .unwrap();
    let config = config_with(
        FileConfig::new("boom", "", "*.boom.yaml").with_section(
            SectionConfig::new("all", SectionSelector::WholeDocument).with_rule("exploding"),
        ),
    );
    let engine = RuleEngine::new(config, Arc::new(registry)).unwrap();
    let ctx = mr()
        .with_change(FileChange::added("a.boom.yaml", "a: 1\n"))
        .with_change(FileChange::added(POLICY_PATH, VALID_POLICY));
    let eval = engine.evaluate(&ctx).await;

    let boom = eval.file("a.boom.yaml").unwrap();
    assert_eq!(boom.decision, Decision::ManualReview);
    assert!(boom.reasons[0].contains("panicked: boom"));
    assert_eq!(eval.file(POLICY_PATH).unwrap().decision, Decision::Approve);
    assert_eq!(eval.review_files, 1);
}

#[tokio::test]
async fn erroring_rule_downgrades_to_review() {
    let registry = RuleRegistry::standard(None)
        .with_rule(Arc::new(Failing))
        .unwrap();
    let config = config_with(
        FileConfig::new("fail", "", "*.fail.yaml").with_section(
            SectionConfig::new("all", SectionSelector::WholeDocument).with_rule("failing"),
        ),
    );
    let engine = RuleEngine::new(config, Arc::new(registry)).unwrap();
    let ctx = mr().with_change(FileChange::added("a.fail.yaml", "a: 1\n"));
    let eval = engine.evaluate(&ctx).await;
    let file = eval.file("a.fail.yaml").unwrap();
    assert_eq!(file.decision, Decision::ManualReview);
    assert!(file.reasons[0].contains("upstream unavailable"));
}

// ---- content resolution ----

#[tokio::test]
async fn repository_content_uses_diff_line_numbers() {
    let product = "\
name: analytics
kind: source
data_product_db:
  - name: db
    presentation_schemas:
      - name: marts
        consumers:
          - name: finance
            kind: consumer_group
          - name: dataverse-consumer-bi
            kind: consumer_group
";
    let path = "dataproducts/source/analytics/prod/product.yaml";
    let diff = "\
@@ -9,0 +10,2 @@
+          - name: dataverse-consumer-bi
+            kind: consumer_group
";
    let repo: Arc<dyn RepositoryReader> =
        Arc::new(MemoryRepository::new().with_file(42, "feature", path, product));
    let ctx = mr().with_change(FileChange::modified(path, diff));
    let engine = RuleEngine::new(
        RuleConfig::standard(),
        Arc::new(RuleRegistry::standard(Some(repo.clone()))),
    )
    .unwrap()
    .with_repository(repo);
    let eval = engine.evaluate(&ctx).await;

    assert_eq!(eval.decision(), Decision::Approve, "{:?}", eval.verdict);
    let reasons = &eval.file(path).unwrap().reasons;
    assert!(reasons.iter().any(|r| r.contains("Consumer access changes in `prod`")));
}

#[tokio::test]
async fn duplicate_tag_names_surface_as_warnings() {
    let tag = "kind: Tag\nname: analytics_tier\n";
    let ctx = mr()
        .with_change(FileChange::added("dataproducts/source/analytics/prod/a_tags.yaml", tag))
        .with_change(FileChange::added("dataproducts/source/analytics/prod/b_tags.yaml", tag));
    let eval = engine(RuleConfig::standard()).evaluate(&ctx).await;
    assert_eq!(eval.warnings.len(), 1);
    assert!(eval.warnings[0].contains("analytics_tier"));
}
