//! Thin process harness: parses arguments, wires the Change Source and Rule
//! Engine into the Orchestrator with a real LLM Client and Sandboxed Tool
//! Executor, and prints the resulting `{ fileName, violations[] }` sequence
//! to stdout as JSON. No review logic lives here.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use tokio::sync::Mutex;

use wisp_adapters::{collect_changes, Config, ConfigOverrides, ReviewCache};
use wisp_core::{discover_rules, Violation};
use wisp_engine::orchestrator::{
    CancellationToken, FileOutcome, LifecycleEvent, Orchestrator, OrchestratorDeps,
    OrchestratorHooks,
};
use wisp_engine::LlmClient;

#[derive(Parser, Debug)]
#[command(
    name = "wisp",
    about = "Runs the rule-based AI code review engine over a set of changed files",
    version
)]
struct Args {
    /// Workspace root to review (defaults to the current directory).
    #[arg(default_value = ".")]
    workspace_root: PathBuf,

    /// Revision to diff against (defaults to HEAD).
    #[arg(long)]
    base_revision: Option<String>,

    /// Root directory to search for `.wispbit/rules/` files, if different
    /// from the workspace root.
    #[arg(long)]
    rules_root: Option<PathBuf>,

    /// Override the concurrency cap from configuration.
    #[arg(long)]
    concurrency: Option<usize>,
}

#[derive(Serialize)]
struct FileReport {
    file_name: String,
    violations: Vec<Violation>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    run(args).await
}

async fn run(args: Args) -> Result<()> {
    let workspace_root = args
        .workspace_root
        .canonicalize()
        .with_context(|| format!("resolving workspace root {}", args.workspace_root.display()))?;

    let config = Config::load(ConfigOverrides {
        concurrency: args.concurrency,
        ..Default::default()
    });
    let Some(api_key) = config.api_key().map(str::to_string) else {
        bail!("no API key configured; set WISP_API_KEY or OPENAI_API_KEY, or use the system keyring");
    };

    let rules_root = args.rules_root.unwrap_or_else(|| workspace_root.clone());
    let rules = discover_rules(&rules_root).context("discovering .wispbit rules")?;

    let change_set =
        collect_changes(&workspace_root, args.base_revision.as_deref()).context("collecting file changes")?;
    tracing::info!(
        branch = %change_set.current_branch,
        commit = %change_set.current_commit,
        file_count = change_set.files.len(),
        "collected changes"
    );

    let cache = ReviewCache::open(&config.cache_dir, &workspace_root).context("opening review cache")?;
    let cache = Arc::new(Mutex::new(cache));

    let client = LlmClient::new(config.base_url.clone(), api_key).context("constructing LLM client")?;

    let cancel = CancellationToken::new();
    let cancel_for_signal = cancel.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("received interrupt; cancelling in-flight reviews");
        cancel_for_signal.cancel();
    })
    .context("installing Ctrl-C handler")?;

    let deps = OrchestratorDeps {
        client: &client,
        review_model: &config.review_model,
        validator_model: &config.validator_model,
        workspace_root: &workspace_root,
        ripgrep_binary: &config.ripgrep_binary,
        concurrency: config.concurrency,
    };
    let orchestrator = Orchestrator::new(deps, cache, cancel);

    let hooks = StderrHooks;
    let outcomes = orchestrator.run(change_set.files, &rules, &hooks).await;

    let reports: Vec<FileReport> = outcomes.into_iter().map(to_report).collect();
    println!("{}", serde_json::to_string_pretty(&reports)?);

    Ok(())
}

fn to_report(outcome: FileOutcome) -> FileReport {
    match outcome {
        FileOutcome::Completed { filename, analysis } => FileReport {
            file_name: filename,
            violations: analysis.violations,
        },
        FileOutcome::Skipped { filename, analysis, .. } => FileReport {
            file_name: filename,
            violations: analysis.map(|a| a.violations).unwrap_or_default(),
        },
    }
}

/// Prints per-file lifecycle transitions to stderr; stdout is reserved for
/// the final JSON report.
struct StderrHooks;

impl OrchestratorHooks for StderrHooks {
    fn on_start(&self, filename: &str) {
        tracing::debug!(filename, "queued for review");
    }

    fn on_update_file(&self, filename: &str, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Queued => {}
            LifecycleEvent::Processing => tracing::info!(filename, "reviewing"),
            LifecycleEvent::Completed => tracing::info!(filename, "completed"),
            LifecycleEvent::Skipped => tracing::info!(filename, "skipped"),
        }
    }

    fn on_complete(&self, outcomes: &[FileOutcome]) {
        tracing::info!(file_count = outcomes.len(), "review run complete");
    }

    fn on_abort(&self) {
        tracing::warn!("review run aborted by cancellation");
    }
}
