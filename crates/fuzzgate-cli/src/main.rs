//! fuzzgate - evaluate generated fuzz harnesses and report rewards
//!
//! ## Commands
//!
//! - `evaluate`: run the gate chain for one `(epoch, completion)`
//! - `batch`: evaluate a JSONL file of completions as one generation round
//! - `coverage`: build and run the coverage variant of a harness
//! - `summary`: aggregate rewards over a tree of evaluation logs
//! - `scaffold`: create the per-project output directories
//!
//! Rewards and records go to stdout as JSON; logs go to stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fuzzgate_core::{
    find_header_names, summarize, ArtifactStore, Candidate, CandidateId, FuzzgateConfig,
    ProjectMetadata, SourceKind,
};
use fuzzgate_pipeline::{
    BatchEvaluator, BatchItem, EvaluationPipeline, EvaluationSession, RetryPolicy,
};
use serde::{Deserialize, Serialize};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "fuzzgate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Staged evaluation and rewards for generated fuzz harnesses", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// TOML configuration file
    #[arg(short, long, global = true, env = "FUZZGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Workspace root (overrides `root` from the config file)
    #[arg(long, global = true, env = "FUZZGATE_ROOT")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one harness and print its record
    Evaluate {
        /// Target project name
        #[arg(short, long)]
        project: String,

        #[arg(short, long)]
        epoch: u32,

        #[arg(short = 'n', long)]
        completion: u32,

        /// Harness file to write before evaluating (default: use the one on disk)
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Prompt recorded in the evaluation log
        #[arg(long, default_value = "")]
        prompt: String,

        /// Project metadata (default: projects/<project>/data.json)
        #[arg(long)]
        metadata: Option<PathBuf>,
    },

    /// Evaluate a JSONL file of `{"completion": ..., "prompt": ...}` lines
    Batch {
        #[arg(short, long)]
        project: String,

        /// JSONL input
        input: PathBuf,

        /// Epoch for this round (default: one past the newest on disk)
        #[arg(short, long)]
        epoch: Option<u32>,

        /// Override scheduler concurrency
        #[arg(long)]
        concurrency: Option<usize>,

        /// Print full records instead of rewards
        #[arg(long)]
        records: bool,

        #[arg(long)]
        metadata: Option<PathBuf>,
    },

    /// Build and run the coverage variant of an evaluated harness
    Coverage {
        #[arg(short, long)]
        project: String,

        #[arg(short, long)]
        epoch: u32,

        #[arg(short = 'n', long)]
        completion: u32,

        #[arg(long)]
        metadata: Option<PathBuf>,
    },

    /// Summarise rewards in a directory of evaluation logs
    Summary {
        /// Directory to scan (default: projects/<project>/harnesses)
        dir: Option<PathBuf>,

        #[arg(short, long)]
        project: Option<String>,
    },

    /// Create the output directories for a project
    Scaffold {
        #[arg(short, long)]
        project: String,
    },
}

/// One line of `batch` input.
#[derive(Debug, Deserialize)]
struct BatchLine {
    completion: String,
    #[serde(default)]
    prompt: String,
}

#[derive(Debug, Serialize)]
struct BatchOutput {
    project: String,
    epoch: u32,
    rewards: Vec<f64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    fuzzgate_core::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref(), cli.root)?;

    match cli.command {
        Commands::Evaluate {
            project,
            epoch,
            completion,
            source,
            prompt,
            metadata,
        } => {
            let id = CandidateId::new(project, epoch, completion);
            cmd_evaluate(config, &id, source.as_deref(), &prompt, metadata.as_deref()).await
        }
        Commands::Batch {
            project,
            input,
            epoch,
            concurrency,
            records,
            metadata,
        } => {
            cmd_batch(
                config,
                &project,
                &input,
                epoch,
                concurrency,
                records,
                metadata.as_deref(),
            )
            .await
        }
        Commands::Coverage {
            project,
            epoch,
            completion,
            metadata,
        } => {
            let id = CandidateId::new(project, epoch, completion);
            cmd_coverage(config, &id, metadata.as_deref()).await
        }
        Commands::Summary { dir, project } => cmd_summary(&config, dir, project.as_deref()),
        Commands::Scaffold { project } => cmd_scaffold(&config, &project),
    }
}

fn load_config(path: Option<&Path>, root: Option<PathBuf>) -> Result<FuzzgateConfig> {
    let mut config = match path {
        Some(path) => FuzzgateConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => FuzzgateConfig::default(),
    };
    if let Some(root) = root {
        config.root = root;
    }
    Ok(config)
}

fn load_metadata(
    config: &FuzzgateConfig,
    project: &str,
    path: Option<&Path>,
) -> Result<ProjectMetadata> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => ArtifactStore::new(&config.root)
            .layout()
            .metadata_file(project),
    };
    ProjectMetadata::load(&path)
        .with_context(|| format!("Failed to load project metadata {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Evaluate one harness
async fn cmd_evaluate(
    config: FuzzgateConfig,
    id: &CandidateId,
    source: Option<&Path>,
    prompt: &str,
    metadata: Option<&Path>,
) -> Result<()> {
    let metadata = load_metadata(&config, &id.project, metadata)?;
    let retry = RetryPolicy::from_config(&config.scheduler);
    let pipeline = EvaluationPipeline::new(config, metadata);

    let record = match source {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read harness {}", path.display()))?;
            let kind = SourceKind::from_path(path).unwrap_or(SourceKind::Cpp);
            let candidate = Candidate::new(id.clone(), text, kind);
            pipeline.evaluate_with_retry(&candidate, prompt, &retry).await
        }
        None => {
            pipeline
                .evaluate_existing_with_retry(id, prompt, &retry)
                .await
        }
    };
    print_json(&record)
}

/// Evaluate a JSONL batch as one generation round
async fn cmd_batch(
    config: FuzzgateConfig,
    project: &str,
    input: &Path,
    epoch: Option<u32>,
    concurrency: Option<usize>,
    records: bool,
    metadata: Option<&Path>,
) -> Result<()> {
    let lines = read_batch_lines(input)?;
    if lines.is_empty() {
        bail!("No completions in {}", input.display());
    }

    let metadata = load_metadata(&config, project, metadata)?;
    let store = ArtifactStore::new(&config.root);
    let rewrites = config.include_rewrites.clone();
    let mut session = match epoch {
        Some(epoch) => EvaluationSession::starting_at(project, epoch.saturating_sub(1)),
        None => EvaluationSession::resume(&store, project)
            .context("Failed to scan existing harness directories")?,
    }
    .with_rewrites(rewrites);
    let epoch = session.next_round();

    let completions: Vec<String> = lines.iter().map(|l| l.completion.clone()).collect();
    let items: Vec<BatchItem> = session
        .candidates(&completions)
        .into_iter()
        .zip(&lines)
        .map(|(candidate, line)| BatchItem::new(candidate, line.prompt.clone()))
        .collect();

    let mut evaluator = BatchEvaluator::new(Arc::new(EvaluationPipeline::new(config, metadata)));
    if let Some(concurrency) = concurrency {
        evaluator = evaluator.with_concurrency(concurrency);
    }
    info!(project, epoch, size = items.len(), "evaluating batch");

    let results = evaluator.evaluate_batch(items).await;
    if records {
        return print_json(&results);
    }
    print_json(&BatchOutput {
        project: project.to_string(),
        epoch,
        rewards: results.iter().map(|r| r.reward).collect(),
    })
}

fn read_batch_lines(input: &Path) -> Result<Vec<BatchLine>> {
    let content = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read batch input {}", input.display()))?;
    parse_batch_lines(&content)
}

fn parse_batch_lines(content: &str) -> Result<Vec<BatchLine>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("Invalid batch line {}", n + 1))
        })
        .collect()
}

/// Run the coverage side path for one harness
async fn cmd_coverage(
    config: FuzzgateConfig,
    id: &CandidateId,
    metadata: Option<&Path>,
) -> Result<()> {
    let metadata = load_metadata(&config, &id.project, metadata)?;
    let retry = RetryPolicy::from_config(&config.scheduler);
    let pipeline = EvaluationPipeline::new(config, metadata);
    let report = pipeline.run_coverage(id, &retry).await;
    print_json(&report)
}

/// Summarise rewards under a directory
fn cmd_summary(config: &FuzzgateConfig, dir: Option<PathBuf>, project: Option<&str>) -> Result<()> {
    let dir = match (dir, project) {
        (Some(dir), _) => dir,
        (None, Some(project)) => ArtifactStore::new(&config.root)
            .layout()
            .project_dir(project)
            .join("harnesses"),
        (None, None) => bail!("Pass a directory or --project"),
    };
    let summary =
        summarize(&dir).with_context(|| format!("Failed to summarise {}", dir.display()))?;
    print_json(&summary)
}

/// Create project output directories and list the target's headers
fn cmd_scaffold(config: &FuzzgateConfig, project: &str) -> Result<()> {
    let store = ArtifactStore::new(&config.root);
    let root = store
        .build_project_structure(project)
        .with_context(|| format!("Failed to create project tree for {project}"))?;
    println!("Project directory: {}", root.display());

    match store.resolve(&store.layout().include_dir(project)) {
        Ok(include) => {
            let headers = find_header_names(&include, true)?;
            println!("Headers ({}):", headers.len());
            for header in headers {
                println!("  {header}");
            }
        }
        Err(e) => println!("No include directory: {e}"),
    }
    Ok(())
}
