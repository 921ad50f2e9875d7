//! MR Gate CLI
//!
//! The `mrgate` command runs the governance gate locally.
//!
//! ## Commands
//!
//! - `evaluate`: judge a merge request described by a JSON file
//! - `check-config`: validate a rule configuration
//! - `lint`: run the masking policy and tag validators over YAML files
//! - `rules`: list the registered rules
//!
//! `evaluate` and `lint` exit with status 2 when a human has to look.

use std::path::{Component, Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_yaml::Value;
use tracing::{info, Level};

use mrgate_core::metrics::METRICS;
use mrgate_core::rules::masking::is_masking_file;
use mrgate_core::rules::tag::is_tag_document;
use mrgate_core::{
    validate_masking_policy, validate_tag, Decision, MaskingPolicyDocument, RuleConfig,
    RuleEngine, RuleEvaluation, RuleRegistry, TagDocument, ValidationResult,
};
use mrgate_repo::fs::{FileMergeRequestSource, FsRepository};
use mrgate_repo::{MergeRequestSource, MrContext, RepositoryReader};

/// Exit status for a manual-review outcome.
const EXIT_REVIEW: u8 = 2;

#[derive(Parser)]
#[command(name = "mrgate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Merge-request governance gate for data-product repositories", long_about = None)]
struct Cli {
    /// Rule configuration file (built-in rules when omitted)
    #[arg(short, long, global = true, env = "MRGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a merge request
    Evaluate {
        /// MR description file (JSON)
        #[arg(long, conflicts_with = "mr_dir")]
        mr: Option<PathBuf>,

        /// Directory of `<project>-<iid>.json` MR descriptions
        #[arg(long, requires_all = ["project", "iid"])]
        mr_dir: Option<PathBuf>,

        /// Project id to load from --mr-dir
        #[arg(long)]
        project: Option<u64>,

        /// MR iid to load from --mr-dir
        #[arg(long)]
        iid: Option<u64>,

        /// Checkout serving every ref without its own --ref
        #[arg(long)]
        repo_root: Option<PathBuf>,

        /// Checkout for one ref, as NAME=DIR (repeatable)
        #[arg(long = "ref", value_name = "NAME=DIR", value_parser = parse_ref)]
        refs: Vec<(String, PathBuf)>,

        /// Print the full evaluation as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate the rule configuration
    CheckConfig,

    /// Validate masking policy and tag documents
    Lint {
        /// Files to check
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Repository root the file paths are relative to
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// List registered rules
    Rules,
}

fn parse_ref(raw: &str) -> Result<(String, PathBuf), String> {
    match raw.split_once('=') {
        Some((name, dir)) if !name.trim().is_empty() && !dir.trim().is_empty() => {
            Ok((name.trim().to_string(), PathBuf::from(dir.trim())))
        }
        _ => Err(format!("expected NAME=DIR, got '{raw}'")),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    mrgate_core::telemetry::init_tracing(cli.json_logs, level);

    let config = load_config(cli.config.as_deref())?;

    let code = match cli.command {
        Commands::Evaluate {
            mr,
            mr_dir,
            project,
            iid,
            repo_root,
            refs,
            json,
        } => {
            let ctx = load_mr(mr.as_deref(), mr_dir.as_deref(), project, iid).await?;
            let repo = build_repository(repo_root, refs);
            let decision = cmd_evaluate(config, &ctx, repo, json).await?;
            exit_for(decision)
        }
        Commands::CheckConfig => {
            cmd_check_config(&config)?;
            ExitCode::SUCCESS
        }
        Commands::Lint { files, root } => exit_for(cmd_lint(&files, root.as_deref())?),
        Commands::Rules => {
            cmd_rules();
            ExitCode::SUCCESS
        }
    };

    METRICS.flush();
    Ok(code)
}

fn exit_for(decision: Decision) -> ExitCode {
    match decision {
        Decision::Approve => ExitCode::SUCCESS,
        Decision::ManualReview => ExitCode::from(EXIT_REVIEW),
    }
}

fn load_config(path: Option<&Path>) -> Result<RuleConfig> {
    match path {
        Some(path) => RuleConfig::from_path(path)
            .with_context(|| format!("Failed to load rule config from {}", path.display())),
        None => Ok(RuleConfig::standard()),
    }
}

async fn load_mr(
    file: Option<&Path>,
    dir: Option<&Path>,
    project: Option<u64>,
    iid: Option<u64>,
) -> Result<MrContext> {
    match (file, dir, project, iid) {
        (Some(file), _, _, _) => FileMergeRequestSource::read_file(file)
            .await
            .with_context(|| format!("Failed to read MR description {}", file.display())),
        (None, Some(dir), Some(project), Some(iid)) => FileMergeRequestSource::new(dir)
            .load_context(project, iid)
            .await
            .with_context(|| format!("Failed to load MR {project}!{iid}")),
        _ => bail!("Either --mr or --mr-dir with --project and --iid is required"),
    }
}

fn build_repository(
    root: Option<PathBuf>,
    refs: Vec<(String, PathBuf)>,
) -> Option<Arc<dyn RepositoryReader>> {
    if root.is_none() && refs.is_empty() {
        return None;
    }
    let mut repo = FsRepository::new(root.unwrap_or_else(|| PathBuf::from(".")));
    for (name, dir) in refs {
        repo = repo.with_ref(name, dir);
    }
    Some(Arc::new(repo))
}

async fn cmd_evaluate(
    config: RuleConfig,
    ctx: &MrContext,
    repo: Option<Arc<dyn RepositoryReader>>,
    json: bool,
) -> Result<Decision> {
    let registry = RuleRegistry::standard(repo.clone());
    config
        .validate(&registry)
        .context("Rule config is invalid")?;

    let mut engine = RuleEngine::new(config, Arc::new(registry))?;
    if let Some(repo) = repo {
        engine = engine.with_repository(repo);
    }

    let evaluation = engine.evaluate(ctx).await;
    info!(
        evaluation_id = %evaluation.evaluation_id,
        decision = %evaluation.decision(),
        "evaluation complete"
    );
    if json {
        println!("{}", serde_json::to_string_pretty(&evaluation)?);
    } else {
        println!("{}", render_evaluation_text(&evaluation));
    }
    Ok(evaluation.decision())
}

fn render_evaluation_text(evaluation: &RuleEvaluation) -> String {
    let mut out = format!(
        "MR {}!{}: {}\n",
        evaluation.project_id,
        evaluation.mr_iid,
        evaluation.decision()
    );
    if let Some(summary) = evaluation.summary() {
        out.push_str(&format!("{summary}\n"));
    }
    out.push_str(&format!("Reason: {}\n", evaluation.verdict.reason));

    if !evaluation.files.is_empty() {
        out.push_str("\nFiles:\n");
        for file in &evaluation.files {
            let config = file.file_config.as_deref().unwrap_or("-");
            out.push_str(&format!(
                "  [{}] {} ({})\n",
                file.decision, file.path, config
            ));
            for reason in &file.reasons {
                out.push_str(&format!("      {reason}\n"));
            }
        }
    }
    if !evaluation.warnings.is_empty() {
        out.push_str("\nWarnings:\n");
        for warning in &evaluation.warnings {
            out.push_str(&format!("  - {warning}\n"));
        }
    }
    out.push_str(&format!(
        "\nConfig digest: {}",
        &evaluation.config_digest[..12.min(evaluation.config_digest.len())]
    ));
    out
}

fn cmd_check_config(config: &RuleConfig) -> Result<()> {
    let registry = RuleRegistry::standard(None);
    config
        .validate(&registry)
        .context("Rule config is invalid")?;
    let matchers = config.compile()?;
    println!(
        "Config OK: {} file config(s), {} enabled",
        config.files.len(),
        matchers.len()
    );
    println!("Digest: {}", config.digest());
    if !config.enabled {
        println!("Note: rule engine is disabled; every MR will need manual review");
    }
    Ok(())
}

/// What `lint` made of one document.
#[derive(Debug, PartialEq)]
enum LintOutcome {
    Valid,
    Invalid(Vec<String>),
    Skipped,
}

fn lint_document(path: &str, content: &str) -> LintOutcome {
    let value: Value = match serde_yaml::from_str(content) {
        Ok(value) => value,
        Err(e) => return LintOutcome::Invalid(vec![format!("document: {e}")]),
    };
    let declared_kind = value.get("kind").and_then(Value::as_str).unwrap_or("");

    let result: ValidationResult =
        if is_masking_file(path) || declared_kind.eq_ignore_ascii_case("MaskingPolicy") {
            match MaskingPolicyDocument::from_value(&value) {
                Ok(doc) => validate_masking_policy(&doc, path),
                Err(e) => return LintOutcome::Invalid(vec![format!("document: invalid structure ({e})")]),
            }
        } else if is_tag_document(path, &value) {
            match TagDocument::from_value(&value) {
                Ok(doc) => validate_tag(&doc, path),
                Err(e) => return LintOutcome::Invalid(vec![format!("document: invalid structure ({e})")]),
            }
        } else {
            return LintOutcome::Skipped;
        };

    if result.is_valid() {
        LintOutcome::Valid
    } else {
        LintOutcome::Invalid(result.error_messages())
    }
}

/// Repository-relative, slash-separated form of `file`.
fn repo_path(file: &Path, root: Option<&Path>) -> String {
    let relative = root
        .and_then(|root| file.strip_prefix(root).ok())
        .unwrap_or(file);
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn cmd_lint(files: &[PathBuf], root: Option<&Path>) -> Result<Decision> {
    let mut decision = Decision::Approve;
    for file in files {
        let content = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let path = repo_path(file, root);
        match lint_document(&path, &content) {
            LintOutcome::Valid => println!("ok    {path}"),
            LintOutcome::Skipped => println!("skip  {path} (not a masking policy or tag)"),
            LintOutcome::Invalid(errors) => {
                decision = Decision::ManualReview;
                println!("FAIL  {path}");
                for error in errors {
                    println!("        - {error}");
                }
            }
        }
    }
    Ok(decision)
}

fn cmd_rules() {
    let registry = RuleRegistry::standard(None);
    for name in registry.names() {
        if let Some(rule) = registry.get(name) {
            println!("{:<24} {}", name, rule.description());
        }
    }
}
