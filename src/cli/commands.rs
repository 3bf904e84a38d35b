//! CLI command definitions for content-forge.
//!
//! `assess` and `generate` run task files through the retry pipeline and
//! print the validated results as JSON; `rubrics` shows the effective rubric
//! table.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::PipelineFailure;
use crate::llm::{LiteLlmClient, ModelGateway, ProviderGateway, ThrottledGateway, DEFAULT_MODEL};
use crate::metrics::{export_metrics, init_metrics};
use crate::pipeline::{PipelineConfig, PipelineOutcome, RetryController};
use crate::prompts::PromptBuilder;
use crate::rubric::RubricTable;
use crate::task::{TaskKind, TaskSpec};

/// How long a call may wait for a free gateway slot.
const DEFAULT_QUEUE_TIMEOUT_SECS: u64 = 60;

/// Structured-content generation and assessment through an LLM.
#[derive(Parser)]
#[command(name = "content-forge")]
#[command(about = "Generate and assess language-learning content with validated LLM output")]
#[command(version)]
#[command(
    long_about = "content-forge sends assessment and question-generation requests to an LLM, repairs and validates every reply, and retries with escalated sampling penalties until a reply passes.\n\nExample usage:\n  content-forge assess --task answer.json\n  content-forge generate --task topic.yaml --out practice.json"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Score student responses against their rubric.
    Assess(RunArgs),

    /// Generate question sets for topics.
    #[command(alias = "gen")]
    Generate(RunArgs),

    /// Print the effective rubric table.
    Rubrics(RubricsArgs),
}

/// Arguments shared by `assess` and `generate`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Task file (JSON or YAML): one task spec or a list of them.
    #[arg(short, long)]
    pub task: String,

    /// Write results here instead of stdout.
    #[arg(short, long)]
    pub out: Option<String>,

    /// Pipeline configuration file (YAML). Defaults to CONTENT_FORGE_* variables.
    #[arg(short, long)]
    pub config: Option<String>,

    /// Rubric overrides file (YAML).
    #[arg(long)]
    pub rubrics: Option<String>,

    /// Model id; overrides the configured model.
    #[arg(short, long)]
    pub model: Option<String>,

    /// LiteLLM-compatible endpoint.
    #[arg(long, env = "LITELLM_API_BASE")]
    pub api_base: Option<String>,

    /// API key for the endpoint.
    #[arg(long, env = "LITELLM_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Print the built prompts without calling the model.
    #[arg(long)]
    pub dry_run: bool,

    /// Maximum model calls in flight.
    #[arg(long, default_value = "4")]
    pub max_concurrent: usize,

    /// Minimum spacing between model calls, in milliseconds.
    #[arg(long, default_value = "0")]
    pub min_interval_ms: u64,

    /// Print Prometheus metrics to stderr when done.
    #[arg(long)]
    pub print_metrics: bool,
}

/// Arguments for `content-forge rubrics`.
#[derive(Parser, Debug)]
pub struct RubricsArgs {
    /// Rubric overrides file (YAML) merged over the built-in table.
    #[arg(short, long)]
    pub config: Option<String>,

    /// Print JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

/// Task files hold either one spec or a list.
#[derive(Deserialize)]
#[serde(untagged)]
enum TaskFile {
    Many(Vec<TaskSpec>),
    One(Box<TaskSpec>),
}

/// One line of the results report.
#[derive(Debug, Serialize)]
struct RequestReport {
    task_id: String,
    kind: TaskKind,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<PipelineOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_raw_reply: Option<String>,
}

impl RequestReport {
    fn new(spec: &TaskSpec, result: Result<PipelineOutcome, PipelineFailure>) -> Self {
        match result {
            Ok(outcome) => Self {
                task_id: spec.id.clone(),
                kind: spec.kind(),
                status: "succeeded",
                outcome: Some(outcome),
                error: None,
                reasons: Vec::new(),
                last_raw_reply: None,
            },
            Err(failure) => {
                let status = failure.label();
                let error = Some(failure.to_string());
                let (reasons, last_raw_reply) = match failure {
                    PipelineFailure::Exhausted {
                        last_reasons,
                        last_raw_reply,
                        ..
                    } => (last_reasons, last_raw_reply),
                    _ => (Vec::new(), None),
                };
                Self {
                    task_id: spec.id.clone(),
                    kind: spec.kind(),
                    status,
                    outcome: None,
                    error,
                    reasons,
                    last_raw_reply,
                }
            }
        }
    }
}

/// Parse CLI arguments without running any command.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse CLI arguments and run the selected command.
///
/// For control over logging initialization, use `parse_cli()` and `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with already parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Assess(args) => run_pipeline_command(args, Mode::Assess).await,
        Commands::Generate(args) => run_pipeline_command(args, Mode::Generate).await,
        Commands::Rubrics(args) => run_rubrics_command(args),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Assess,
    Generate,
}

impl Mode {
    fn accepts(&self, kind: TaskKind) -> bool {
        match self {
            Mode::Assess => kind.is_assessment(),
            Mode::Generate => kind == TaskKind::BulkQuestionGeneration,
        }
    }
}

async fn run_pipeline_command(args: RunArgs, mode: Mode) -> anyhow::Result<()> {
    let specs = load_task_file(&args.task)?;
    if let Some(spec) = specs.iter().find(|s| !mode.accepts(s.kind())) {
        bail!(
            "Task '{}' is a {} request; use the matching subcommand",
            spec.id,
            spec.kind()
        );
    }

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load pipeline config from {}", path))?,
        None => PipelineConfig::from_env().context("Invalid CONTENT_FORGE_* configuration")?,
    };
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if config.model.trim().is_empty() {
        config.model = DEFAULT_MODEL.to_string();
    }
    config.validate()?;

    let rubrics = match &args.rubrics {
        Some(path) => RubricTable::from_yaml_file(path)
            .with_context(|| format!("Failed to load rubrics from {}", path))?,
        None => RubricTable::new(),
    };

    if args.dry_run {
        let builder = PromptBuilder::new(&rubrics);
        let prompts: Vec<_> = specs.iter().map(|spec| builder.build(spec)).collect();
        return write_json(&prompts, args.out.as_deref());
    }

    init_metrics().context("Failed to initialize metrics")?;

    let api_base = args
        .api_base
        .filter(|base| !base.trim().is_empty())
        .context("No LLM endpoint: pass --api-base or set LITELLM_API_BASE")?;
    let client = Arc::new(LiteLlmClient::new(api_base, args.api_key, config.model.clone())?);
    info!(
        model = %config.model,
        endpoint = %client.api_base(),
        requests = specs.len(),
        "Starting pipeline"
    );

    let provider_gateway: Arc<dyn ModelGateway> =
        Arc::new(ProviderGateway::new(client, config.model.clone()));
    let gateway = ThrottledGateway::new(
        provider_gateway,
        args.max_concurrent,
        Duration::from_secs(DEFAULT_QUEUE_TIMEOUT_SECS),
    )
    .with_min_interval(Duration::from_millis(args.min_interval_ms));

    let concurrency = config.batch_concurrency;
    let controller =
        RetryController::new(Arc::new(gateway), config).with_rubrics(Arc::new(rubrics));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling outstanding requests");
            on_interrupt.cancel();
        }
    });

    let results = controller
        .submit_all_with_cancel(&specs, concurrency, cancel)
        .await;

    let reports: Vec<RequestReport> = specs
        .iter()
        .zip(results)
        .map(|(spec, result)| RequestReport::new(spec, result))
        .collect();
    let failed = reports.iter().filter(|r| r.status != "succeeded").count();

    write_json(&reports, args.out.as_deref())?;

    if args.print_metrics {
        eprintln!("{}", export_metrics());
    }

    info!(
        total = reports.len(),
        succeeded = reports.len() - failed,
        failed,
        "Pipeline finished"
    );
    if failed > 0 {
        bail!("{} of {} request(s) failed", failed, reports.len());
    }
    Ok(())
}

fn run_rubrics_command(args: RubricsArgs) -> anyhow::Result<()> {
    let table = match &args.config {
        Some(path) => RubricTable::from_yaml_file(path)
            .with_context(|| format!("Failed to load rubrics from {}", path))?,
        None => RubricTable::new(),
    };

    if args.json {
        let entries: Vec<_> = table
            .entries()
            .into_iter()
            .map(|(variant, rubric)| {
                serde_json::json!({
                    "kind": variant.kind(),
                    "section": variant.section_name(),
                    "overridden": table.is_overridden(variant),
                    "max_score": rubric.max_score(),
                    "criteria": rubric.criteria(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for (variant, rubric) in table.entries() {
        let criteria: Vec<String> = rubric
            .criteria()
            .iter()
            .map(|c| format!("{} {}", c.name, c.max))
            .collect();
        let marker = if table.is_overridden(variant) { " *" } else { "" };
        println!(
            "{:<40} max {:>3}  [{}]{}",
            variant.to_string(),
            rubric.max_score(),
            criteria.join(", "),
            marker
        );
    }
    Ok(())
}

fn load_task_file(path: &str) -> anyhow::Result<Vec<TaskSpec>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read task file {}", path))?;
    let parsed: TaskFile = if is_json_path(path) {
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse task file {}", path))?
    } else {
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse task file {}", path))?
    };

    let specs = match parsed {
        TaskFile::Many(specs) => specs,
        TaskFile::One(spec) => vec![*spec],
    };
    if specs.is_empty() {
        bail!("Task file {} contains no tasks", path);
    }
    Ok(specs)
}

fn is_json_path(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

fn write_json<T: Serialize>(value: &T, out: Option<&str>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match out {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("Failed to write {}", path))?;
            info!(path = %path, "Results written");
        }
        None => println!("{}", json),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Write;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_generate_alias() {
        let cli = Cli::try_parse_from([
            "content-forge",
            "gen",
            "--task",
            "topic.yaml",
            "--dry-run",
            "--api-base",
            "http://localhost:4000",
        ])
        .expect("valid args");
        match cli.command {
            Commands::Generate(args) => {
                assert_eq!(args.task, "topic.yaml");
                assert!(args.dry_run);
                assert_eq!(args.max_concurrent, 4);
            }
            _ => panic!("expected generate"),
        }
    }

    #[test]
    fn test_mode_accepts_matching_kinds() {
        assert!(Mode::Assess.accepts(TaskKind::SpokenAssessment));
        assert!(Mode::Assess.accepts(TaskKind::WrittenAssessment));
        assert!(!Mode::Assess.accepts(TaskKind::BulkQuestionGeneration));
        assert!(Mode::Generate.accepts(TaskKind::BulkQuestionGeneration));
    }

    #[test]
    fn test_load_single_and_list_task_files() {
        let mut single = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .expect("tempfile");
        write!(
            single,
            r#"{{"id": "t1", "language": "es", "tier": "higher", "kind": "bulk_question_generation",
                "topic": {{"name": "ser_vs_estar", "category": "verbs", "slug": "ser_estar"}}}}"#
        )
        .expect("write");
        let specs = load_task_file(single.path().to_str().expect("utf8")).expect("parses");
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].id, "t1");

        let mut list = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .expect("tempfile");
        write!(
            list,
            "- id: a\n  language: fr\n  tier: foundation\n  kind: spoken_assessment\n  section: roleplay\n  material:\n    response_text: Bonjour\n- id: b\n  language: fr\n  tier: foundation\n  kind: written_assessment\n  section: translation\n  material:\n    response_text: Hello\n"
        )
        .expect("write");
        let specs = load_task_file(list.path().to_str().expect("utf8")).expect("parses");
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1].kind(), TaskKind::WrittenAssessment);
    }

    #[test]
    fn test_failure_report_keeps_raw_reply() {
        let spec = TaskSpec::questions(
            crate::task::Language::Es,
            crate::task::Tier::Higher,
            crate::task::TopicMetadata::new("ser_vs_estar", "verbs", "ser_estar"),
        );
        let report = RequestReport::new(
            &spec,
            Err(PipelineFailure::Exhausted {
                last_reasons: vec!["count mismatch: expected 15 items, got 14".into()],
                last_raw_reply: Some("[]".into()),
                attempts: 3,
            }),
        );
        assert_eq!(report.status, "exhausted");
        assert_eq!(report.last_raw_reply.as_deref(), Some("[]"));
        assert_eq!(report.reasons.len(), 1);
    }
}
