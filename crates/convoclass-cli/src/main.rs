//! convoclass
//!
//! Batch classification of conversation corpora through a remote language model.
//!
//! Reads line-delimited conversations, runs a configured classifier set over
//! each one, and writes one output record per conversation. Long runs are
//! checkpointed per chunk and resume where they stopped.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use convoclass_batch::{BatchRunner, CheckpointStore, ChunkReader, RunOptions};
use convoclass_classifiers::{
    ClassifierRegistry, ClassifierSet, Evaluator, ModelWrapper, OpenAiBackend,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::signal;
use tracing::{error, info, warn};

mod config;

use config::{Overrides, RunConfig};

#[derive(Parser, Debug)]
#[command(name = "convoclass")]
#[command(about = "Classify conversation corpora with a language model", long_about = None)]
struct Cli {
    /// Run configuration file path
    #[arg(short, long, global = true, default_value = "convoclass.yaml", env = "CONVOCLASS_CONFIG")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify a corpus with per-chunk checkpoints
    Run {
        /// Input file, one conversation record per line
        #[arg(short, long)]
        input: PathBuf,

        /// Output file, rewritten in full on every run
        #[arg(short, long)]
        output: PathBuf,

        /// Classifier set
        #[arg(short, long)]
        set: Option<String>,

        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,

        #[arg(long)]
        chunk_size: Option<usize>,

        #[arg(long)]
        batch_size: Option<usize>,

        /// Maximum simultaneous requests to the classification service
        #[arg(long)]
        max_concurrent: Option<usize>,
    },

    /// Classify the first records of a corpus and print them, without checkpoints
    Classify {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        set: Option<String>,

        /// Number of records to classify
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },

    /// Check the classifier configuration without contacting the service
    Validate {
        /// Only this set; every set when omitted
        #[arg(short, long)]
        set: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    init_tracing(cli.verbose);
    describe_metrics();

    let mut config = RunConfig::load(&cli.config)?;

    match cli.command {
        Command::Run {
            input,
            output,
            set,
            checkpoint_dir,
            chunk_size,
            batch_size,
            max_concurrent,
        } => {
            config.apply(Overrides {
                classifier_set: set,
                checkpoint_dir,
                chunk_size,
                batch_size,
                max_concurrent,
            })?;
            run(&config, &input, &output).await
        }

        Command::Classify { input, set, limit } => {
            config.apply(Overrides {
                classifier_set: set,
                ..Default::default()
            })?;
            classify(&config, &input, limit).await
        }

        Command::Validate { set } => validate(&config, set.as_deref()),
    }
}

/// Resolve the selected set and build the shared model wrapper
fn build_evaluator(config: &RunConfig) -> Result<(Evaluator, ClassifierSet)> {
    let set_name = config.require_set()?;

    let registry = ClassifierRegistry::from_file(&config.classifiers_config)?;
    let set = registry.load(set_name)?;

    let backend = OpenAiBackend::new(config.backend.resolve())?;
    let model = ModelWrapper::new(Arc::new(backend), config.max_concurrent)?
        .with_retry_policy(config.retry.policy());

    info!(
        set = set_name,
        model = %config.backend.model,
        base_url = %config.backend.base_url,
        max_concurrent = config.max_concurrent,
        "Classifier set loaded"
    );

    Ok((Evaluator::new(Arc::new(model)), set))
}

async fn run(config: &RunConfig, input: &Path, output: &Path) -> Result<()> {
    let (evaluator, set) = build_evaluator(config)?;
    let runner = BatchRunner::new(evaluator, set, config.run_options())?;
    let store = CheckpointStore::new(&config.checkpoint_dir);

    let input_file = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("Failed to open input {}", input.display()))?;
    let output_file = tokio::fs::File::create(output)
        .await
        .with_context(|| format!("Failed to create output {}", output.display()))?;

    let mut sink = BufWriter::new(output_file);

    let summary = tokio::select! {
        result = runner.run(BufReader::new(input_file), &mut sink, &store) => result?,
        _ = signal::ctrl_c() => {
            warn!(
                checkpoint_dir = %config.checkpoint_dir.display(),
                "Interrupted; completed chunks are checkpointed and will be reused"
            );
            anyhow::bail!("Run interrupted");
        }
    };

    info!(
        throughput_per_sec = summary.throughput(),
        error_labels = summary.error_labels,
        attempts = summary.model.attempts,
        retries = summary.model.retries,
        failure_rate = summary.failure_rate(),
        peak_in_flight = summary.model.peak_in_flight,
        output = %output.display(),
        "Run finished"
    );

    Ok(())
}

async fn classify(config: &RunConfig, input: &Path, limit: usize) -> Result<()> {
    let (evaluator, set) = build_evaluator(config)?;
    let options = RunOptions {
        chunk_size: limit.max(1),
        ..config.run_options()
    };
    let runner = BatchRunner::new(evaluator, set, options)?;

    let input_file = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("Failed to open input {}", input.display()))?;
    let mut reader = ChunkReader::new(BufReader::new(input_file), limit.max(1));

    let Some(chunk) = reader.next_chunk().await? else {
        warn!(input = %input.display(), "Input is empty");
        return Ok(());
    };

    let (conversations, malformed) = chunk.parse();
    let classified = runner.classify(conversations).await;

    let mut stdout = tokio::io::stdout();
    for record in &classified.records {
        stdout.write_all(record.to_line()?.as_bytes()).await?;
    }
    stdout.flush().await?;

    info!(
        classified = classified.records.len(),
        failed = classified.failed,
        malformed,
        "Classification finished"
    );

    Ok(())
}

fn validate(config: &RunConfig, only: Option<&str>) -> Result<()> {
    let registry = ClassifierRegistry::from_file(&config.classifiers_config)?;

    let names = match only {
        Some(name) => vec![name.to_string()],
        None => registry.set_names(),
    };
    if names.is_empty() {
        anyhow::bail!("{} defines no classifier sets", config.classifiers_config.display());
    }

    let mut failures = 0;
    for name in &names {
        match registry.load(name) {
            Ok(set) => info!(set = %name, kind = set.kind(), "Classifier set is valid"),
            Err(e) => {
                failures += 1;
                error!(set = %name, error = %e, "Classifier set is invalid");
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} classifier sets failed validation", failures, names.len());
    }

    info!(sets = names.len(), "Configuration is valid");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("convoclass=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("convoclass=info"))
    };

    // stdout carries output records for `classify`
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Register metric descriptions with whatever recorder the host installs
fn describe_metrics() {
    metrics::describe_counter!(
        "convoclass_requests_total",
        "Remote classification attempts, including retries"
    );
    metrics::describe_counter!(
        "convoclass_request_errors_total",
        "Classification calls that ended in an error, by kind"
    );
    metrics::describe_counter!(
        "convoclass_retries_total",
        "Retries scheduled after transient service failures"
    );
    metrics::describe_histogram!(
        "convoclass_request_latency_us",
        metrics::Unit::Microseconds,
        "Remote classification latency in microseconds"
    );
    metrics::describe_counter!(
        "convoclass_chunks_total",
        "Input chunks by outcome (processed or resumed)"
    );
}
