//! CLI entry point for the transformation job engine.

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use dotenv::dotenv;
use lex_transform::{
    DatasetAnalysis, DatasetRef, EngineConfig, JobStatus, JobTracker, LocalObjectStore,
    ManifestStore, ObjectStore, PipelineKind, PipelineRunner, PreprocessingSuggestions,
    RunOutcome, RunRequest, parse_steps,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

/// CLI-compatible pipeline kind
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliPipelineKind {
    /// Cleaning steps; output goes to the cleaned bucket
    Preprocessing,
    /// Feature steps; output goes to the feature-engineered bucket
    FeatureEngineering,
}

impl From<CliPipelineKind> for PipelineKind {
    fn from(cli: CliPipelineKind) -> Self {
        match cli {
            CliPipelineKind::Preprocessing => PipelineKind::Preprocessing,
            CliPipelineKind::FeatureEngineering => PipelineKind::FeatureEngineering,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    author = "Lex Machina Team",
    version,
    about = "Dataset transformation jobs with row-level diffs",
    long_about = "Applies an ordered list of transformation steps to a CSV or Parquet dataset \
                  and reports deleted rows and changed cells.\n\n\
                  ENVIRONMENT VARIABLES:\n  \
                  LEX_STORAGE_ROOT      Root directory of the local object store\n  \
                  LEX_WORKER_THREADS    Size of the run worker pool\n  \
                  LEX_PREVIEW_ROWS      Preview rows in results (0 = all)\n\n\
                  EXAMPLES:\n  \
                  # Clean a dataset\n  \
                  lex-transform run -i people.csv -s '[{\"type\":\"remove_duplicates\"}]'\n\n  \
                  # Steps from a file, JSON result\n  \
                  lex-transform run -i people.csv -s steps.json --json\n\n  \
                  # Preview the first two steps\n  \
                  lex-transform preview -i people.csv -s steps.json --upto 1\n\n  \
                  # Suggest cleaning steps\n  \
                  lex-transform suggest -i people.csv\n\n  \
                  # Track a pipeline run\n  \
                  lex-transform manifest create --source people.csv"
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Suppress progress output (only show errors and final result)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output JSON to stdout instead of a human-readable summary
    ///
    /// Disables all logs; only the final JSON payload is printed.
    #[arg(long, global = true)]
    json: bool,

    /// Local object store root (overrides LEX_STORAGE_ROOT)
    #[arg(long, global = true)]
    root: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a run, wait for it and print the result
    Run {
        /// Dataset file (.csv or .parquet)
        #[arg(short, long)]
        input: PathBuf,

        /// Steps as inline JSON or a path to a JSON file
        #[arg(short, long)]
        steps: String,

        #[arg(short, long, value_enum, default_value = "preprocessing")]
        kind: CliPipelineKind,

        /// Give up waiting after this many seconds
        #[arg(long, default_value = "600")]
        timeout_secs: u64,
    },
    /// Apply steps synchronously without saving anything
    Preview {
        /// Dataset file (.csv or .parquet)
        #[arg(short, long)]
        input: PathBuf,

        /// Steps as inline JSON or a path to a JSON file
        #[arg(short, long)]
        steps: String,

        /// Stop after this step index (0-based)
        #[arg(long)]
        upto: Option<usize>,
    },
    /// Profile a dataset and print suggested steps
    Suggest {
        /// Dataset file (.csv or .parquet)
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long, value_enum, default_value = "preprocessing")]
        kind: CliPipelineKind,
    },
    /// Create, read or patch pipeline run manifests
    Manifest {
        #[command(subcommand)]
        action: ManifestAction,
    },
}

#[derive(Subcommand, Debug)]
enum ManifestAction {
    /// Start a new run with every stage pending
    Create {
        #[arg(long)]
        title: Option<String>,

        /// Dataset the run starts from
        #[arg(long)]
        source: Option<String>,

        /// Metadata object as inline JSON or a path to a JSON file
        #[arg(long)]
        metadata: Option<String>,
    },
    /// Print a run's manifest
    Get { run_id: Uuid },
    /// Merge a JSON object into a run's manifest
    Patch {
        run_id: Uuid,

        /// Patch object as inline JSON or a path to a JSON file
        patch: String,
    },
}

/// Initialize the tracing subscriber for logging.
///
/// When `json_output` is true, logging is disabled so stdout only carries
/// the JSON payload.
fn init_logging(level: &str, quiet: bool, json_output: bool) {
    if json_output {
        return;
    }

    use tracing_subscriber::EnvFilter;

    let effective_level = if quiet { "warn" } else { level };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(effective_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level, args.quiet, args.json);

    // Load environment variables from .env file
    dotenv().ok();

    let mut config = EngineConfig::from_env()?;
    if let Some(ref root) = args.root {
        config.storage_root = root.clone();
    }
    config.validate()?;

    let store = Arc::new(LocalObjectStore::new(&config.storage_root));
    let tracker = Arc::new(JobTracker::new());

    match &args.command {
        Command::Run {
            input,
            steps,
            kind,
            timeout_secs,
        } => {
            let input_ref = upload_input(store.as_ref(), &config, input)?;
            let runner = PipelineRunner::new(config, store, tracker)?;
            let request = RunRequest {
                input: input_ref,
                steps: parse_steps(load_steps(steps)?)?,
                kind: (*kind).into(),
            };
            run_job(&runner, request, Duration::from_secs(*timeout_secs), &args)
        }
        Command::Preview {
            input,
            steps,
            upto,
        } => {
            let input_ref = upload_input(store.as_ref(), &config, input)?;
            let runner = PipelineRunner::new(config, store, tracker)?;
            let outcome = runner.preview(&input_ref, parse_steps(load_steps(steps)?)?, *upto)?;
            print_outcome(&outcome, &input_ref, &args)
        }
        Command::Suggest { input, kind } => {
            let input_ref = upload_input(store.as_ref(), &config, input)?;
            let runner = PipelineRunner::new(config, store, tracker)?;
            match PipelineKind::from(*kind) {
                PipelineKind::Preprocessing => {
                    let suggestions = runner.suggest(&input_ref)?;
                    print_suggestions(&suggestions, &args)
                }
                PipelineKind::FeatureEngineering => {
                    let analysis = runner.analyze(&input_ref)?;
                    print_analysis(&analysis, &args)
                }
            }
        }
        Command::Manifest { action } => {
            let manifests = ManifestStore::new(store, config.manifest_bucket.clone());
            let manifest = match action {
                ManifestAction::Create {
                    title,
                    source,
                    metadata,
                } => {
                    let metadata = match metadata {
                        Some(text) => match load_json(text, "--metadata")? {
                            serde_json::Value::Object(map) => Some(map),
                            _ => return Err(anyhow!("Metadata must be a JSON object")),
                        },
                        None => None,
                    };
                    manifests.create(title.clone(), source.clone(), metadata)?
                }
                ManifestAction::Get { run_id } => manifests.get(*run_id)?,
                ManifestAction::Patch { run_id, patch } => {
                    manifests.patch(*run_id, load_json(patch, "the patch")?)?
                }
            };
            println!("{}", serde_json::to_string_pretty(&manifest)?);
            Ok(())
        }
    }
}

/// Parse `--steps`: a path to a JSON file, or inline JSON.
fn load_steps(steps: &str) -> Result<serde_json::Value> {
    load_json(steps, "--steps")
}

/// Parse an argument that is either a path to a JSON file or inline JSON.
fn load_json(arg: &str, what: &str) -> Result<serde_json::Value> {
    let text = if Path::new(arg).is_file() {
        std::fs::read_to_string(arg).with_context(|| format!("Failed to read {}", arg))?
    } else {
        arg.to_string()
    };
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", what))
}

/// Copy the input file into the input bucket under its file name.
fn upload_input(store: &dyn ObjectStore, config: &EngineConfig, path: &Path) -> Result<DatasetRef> {
    if !path.exists() {
        return Err(anyhow!("Input file not found: {}", path.display()));
    }
    let key = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("Invalid input file name: {}", path.display()))?;

    let bytes = std::fs::read(path)?;
    store.put(&config.input_bucket, key, &bytes)?;
    info!("Uploaded {} ({} bytes)", path.display(), bytes.len());
    Ok(DatasetRef::new(config.input_bucket.clone(), key))
}

/// Submit and poll until the job is terminal.
fn run_job(runner: &PipelineRunner, request: RunRequest, timeout: Duration, args: &Args) -> Result<()> {
    let input = request.input.clone();
    let id = runner.submit(request);
    info!("{}", "=".repeat(80));
    info!("Job {} submitted", id);
    info!("{}", "=".repeat(80));

    let job = runner
        .wait_for(id, timeout)
        .ok_or_else(|| anyhow!("Job {} disappeared", id))?;

    match job.status {
        JobStatus::Completed => {
            let outcome = job
                .result
                .ok_or_else(|| anyhow!("Job {} completed without a result", id))?;
            print_outcome(&outcome, &input, args)
        }
        JobStatus::Failed => {
            let message = job.error.unwrap_or_else(|| "Unknown error".to_string());
            error!("Job {} failed: {}", id, message);
            Err(anyhow!("Job failed: {}", message))
        }
        status => Err(anyhow!(
            "Job {} still {:?} after {}s ({:.0}%: {})",
            id,
            status,
            timeout.as_secs(),
            job.progress,
            job.message
        )),
    }
}

fn print_outcome(outcome: &RunOutcome, input: &DatasetRef, args: &Args) -> Result<()> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }
    print_human_readable_summary(outcome, input);
    Ok(())
}

/// Print a human-readable summary of a run.
fn print_human_readable_summary(outcome: &RunOutcome, input: &DatasetRef) {
    let columns = &outcome.column_summary;

    println!();
    println!("{}", "=".repeat(80));
    if outcome.output.is_some() {
        println!("RUN COMPLETE");
    } else {
        println!("PREVIEW");
    }
    println!("{}", "=".repeat(80));
    println!();

    println!(
        "Input:  {} ({} rows x {} columns)",
        input,
        outcome.original_row_count,
        columns.original.len()
    );
    if let Some(ref output) = outcome.output {
        println!(
            "Output: {} ({} rows x {} columns)",
            output,
            outcome.transformed_row_count,
            columns.transformed.len()
        );
    }
    println!();

    println!("Steps:");
    for (i, meta) in outcome.change_metadata.iter().enumerate() {
        let facts = serde_json::to_string(&meta.facts).unwrap_or_default();
        println!("  {}. {} {}", i + 1, meta.operation, truncate_str(&facts, 100));
    }
    println!();

    println!("Changes:");
    println!("  Rows deleted: {}", outcome.diff.total_deleted);
    println!("  Rows updated: {}", outcome.diff.total_updated_rows);
    if !columns.added.is_empty() {
        println!("  Columns added: {}", columns.added.join(", "));
    }
    if !columns.removed.is_empty() {
        println!("  Columns removed: {}", columns.removed.join(", "));
    }
    if outcome.diff.truncated {
        println!("  (diff lists truncated)");
    }
    println!();
    println!("{}", "=".repeat(80));
}

fn print_suggestions(suggestions: &PreprocessingSuggestions, args: &Args) -> Result<()> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(suggestions)?);
        return Ok(());
    }
    let summary = &suggestions.quality_summary;

    println!();
    println!("{}", "=".repeat(80));
    println!("PREPROCESSING SUGGESTIONS");
    println!("{}", "=".repeat(80));
    println!();
    println!(
        "Rows: {}  Columns: {}  Duplicates: {}  Rows with missing values: {}",
        summary.total_rows, summary.total_columns, summary.duplicate_rows, summary.rows_with_missing
    );
    println!();
    for suggestion in &suggestions.suggestions {
        let mark = if suggestion.enabled { "[x]" } else { "[ ]" };
        println!("  {} {}: {}", mark, suggestion.step.name(), suggestion.reason);
        for (column, detail) in &suggestion.details {
            println!("        {}: {}", column, detail);
        }
    }
    println!();
    println!("Suggested steps:");
    println!("{}", serde_json::to_string_pretty(&suggestions.pipeline())?);
    println!("{}", "=".repeat(80));
    Ok(())
}

fn print_analysis(analysis: &DatasetAnalysis, args: &Args) -> Result<()> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(analysis)?);
        return Ok(());
    }

    println!();
    println!("{}", "=".repeat(80));
    println!("FEATURE ENGINEERING RECOMMENDATIONS");
    println!("{}", "=".repeat(80));
    println!();
    println!(
        "{}: {} rows x {} columns",
        analysis.filename, analysis.total_rows, analysis.total_columns
    );
    println!();
    for rec in &analysis.step_recommendations {
        println!(
            "  {} ({:.2}): {}",
            rec.step_name,
            rec.compatibility_score,
            truncate_str(&rec.reason, 100)
        );
    }
    println!();
    println!("Notes:");
    for note in &analysis.data_quality_notes {
        println!("  - {}", note);
    }
    println!();
    println!("Suggested steps:");
    println!("{}", serde_json::to_string_pretty(&analysis.suggested_pipeline)?);
    println!("{}", "=".repeat(80));
    Ok(())
}

/// Truncate a string to a maximum number of characters.
fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
