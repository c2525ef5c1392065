//! CLI command definitions for datapred-worker.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{self, RedisStore};
use crate::config::WorkerConfig;
use crate::conventions::TrainingConventions;
use crate::metrics::{init_metrics, write_metrics_file};
use crate::pipeline::AzureMlRuntime;
use crate::request::RequestContext;
use crate::scheduler::{ListenerConfig, RequestListener, RequestQueue};
use crate::storage;
use crate::worker::Worker;

/// How often `serve` refreshes the metrics file.
const METRICS_WRITE_INTERVAL: Duration = Duration::from_secs(15);

/// Pipeline worker for data-prediction requests.
#[derive(Parser)]
#[command(name = "datapred-worker")]
#[command(about = "Validate ML pipeline requests and run them on Azure Machine Learning")]
#[command(version)]
#[command(
    long_about = "datapred-worker validates inference/training requests, submits them to a published Azure ML pipeline endpoint and reports the outcome.\n\nExample usage:\n  datapred-worker --config worker.yaml serve\n  datapred-worker validate request.json"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// YAML configuration file. Environment variables override its values.
    #[arg(short, long, env = "WORKER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Listen on the request queue and process requests one at a time.
    Serve(ServeArgs),

    /// Validate a request without submitting it.
    Validate(PayloadArgs),

    /// Validate and execute a single request, waiting for the pipeline run.
    Exec(PayloadArgs),

    /// Push a request onto the request queue.
    Enqueue(PayloadArgs),

    /// Show the stored outcome of a queued request.
    Outcome(OutcomeArgs),

    /// Show request queue statistics.
    QueueStats,

    /// Print the effective configuration with secrets redacted.
    ShowConfig,
}

/// Arguments for `datapred-worker serve`.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Write Prometheus metrics to this file periodically (textfile collector).
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,
}

/// Arguments for commands that take a request payload.
#[derive(Parser, Debug)]
pub struct PayloadArgs {
    /// JSON request file, or "-" for stdin.
    pub input: String,
}

/// Arguments for `datapred-worker outcome`.
#[derive(Parser, Debug)]
pub struct OutcomeArgs {
    /// Delivery id printed by `enqueue`.
    pub id: Uuid,
}

/// Parse command-line arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse arguments and run the selected command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = WorkerConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve(args) => run_serve_command(&config, args).await,
        Commands::Validate(args) => run_validate_command(&config, args).await,
        Commands::Exec(args) => run_exec_command(&config, args).await,
        Commands::Enqueue(args) => run_enqueue_command(&config, args).await,
        Commands::Outcome(args) => run_outcome_command(&config, args).await,
        Commands::QueueStats => run_queue_stats_command(&config).await,
        Commands::ShowConfig => run_show_config_command(&config),
    }
}

async fn run_serve_command(config: &WorkerConfig, args: ServeArgs) -> anyhow::Result<()> {
    init_metrics()?;

    let worker = Arc::new(Worker::from_config(config).await?);
    let queue = RequestQueue::connect(&config.redis.queue_url, &config.redis.queue_name).await?;

    let mut listener = RequestListener::new(
        ListenerConfig::from_settings(&config.redis),
        worker,
        Arc::new(queue),
    );
    listener.start()?;

    info!(
        environment = %config.environment,
        queue = %config.redis.queue_name,
        "Worker is listening; press Ctrl+C to stop"
    );

    let mut metrics_tick = tokio::time::interval(METRICS_WRITE_INTERVAL);
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "Failed to listen for shutdown signal");
                }
                break;
            }
            _ = metrics_tick.tick() => {
                flush_metrics(args.metrics_file.as_deref());
            }
        }
    }

    listener.shutdown().await?;
    flush_metrics(args.metrics_file.as_deref());

    let stats = listener.stats();
    info!(
        succeeded = stats.requests_succeeded,
        unsuccessful = stats.requests_unsuccessful,
        average_ms = stats.average_duration.as_millis() as u64,
        "Worker stopped"
    );
    Ok(())
}

fn flush_metrics(path: Option<&Path>) {
    if let Some(path) = path {
        if let Err(e) = write_metrics_file(path) {
            warn!(path = %path.display(), error = %e, "Failed to write metrics file");
        }
    }
}

async fn run_validate_command(config: &WorkerConfig, args: PayloadArgs) -> anyhow::Result<()> {
    let payload = read_payload(&args.input)?;

    // Validation needs storage and metadata only; the runtime is never called.
    let mut worker = Worker::new(
        TrainingConventions::from_config(config),
        storage::from_settings(&config.storage),
        cache::connect(None).await?,
        Arc::new(AzureMlRuntime::from_settings(&config.azureml)),
        &config.azureml,
    );
    if let Some(url) = config.redis.metadata_url.as_deref() {
        match RedisStore::connect(url).await {
            Ok(store) => worker = worker.with_metadata_store(Arc::new(store)),
            Err(e) => warn!(error = %e, "Metadata store unavailable; skipping metadata lookup"),
        }
    }

    let context = RequestContext::new(format!("cli-{}", Uuid::new_v4()));
    let (accepted, message) = worker.validate_request(&payload, Some(&context)).await;

    let output = serde_json::json!({
        "accepted": accepted,
        "message": message,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    if !accepted {
        anyhow::bail!("request rejected");
    }
    Ok(())
}

async fn run_exec_command(config: &WorkerConfig, args: PayloadArgs) -> anyhow::Result<()> {
    let payload = read_payload(&args.input)?;
    let worker = Worker::from_config(config).await?;

    let context = RequestContext::new(format!("cli-{}", Uuid::new_v4()));
    let outcome = worker.handle(&payload, Some(&context)).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if !outcome.status {
        anyhow::bail!("request ended in state '{}': {}", outcome.state, outcome.message);
    }
    Ok(())
}

async fn run_enqueue_command(config: &WorkerConfig, args: PayloadArgs) -> anyhow::Result<()> {
    let payload = read_payload(&args.input)?;
    let queue = RequestQueue::connect(&config.redis.queue_url, &config.redis.queue_name).await?;

    let id = queue.enqueue(payload).await?;
    info!(delivery_id = %id, queue = %queue.queue_name(), "Request enqueued");
    println!("{}", id);
    Ok(())
}

async fn run_outcome_command(config: &WorkerConfig, args: OutcomeArgs) -> anyhow::Result<()> {
    let queue = RequestQueue::connect(&config.redis.queue_url, &config.redis.queue_name).await?;

    match queue.get_outcome(args.id).await? {
        Some(outcome) => {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        None => Err(anyhow::anyhow!(
            "No outcome stored for {} (pending, in progress or expired)",
            args.id
        )),
    }
}

async fn run_queue_stats_command(config: &WorkerConfig) -> anyhow::Result<()> {
    let queue = RequestQueue::connect(&config.redis.queue_url, &config.redis.queue_name).await?;
    let stats = queue.stats().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn run_show_config_command(config: &WorkerConfig) -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&config.redacted())?);
    Ok(())
}

/// Reads a JSON payload from a file, or from stdin when `input` is "-".
fn read_payload(input: &str) -> anyhow::Result<Value> {
    let content = if input == "-" {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        std::fs::read_to_string(input)
            .map_err(|e| anyhow::anyhow!("Failed to read request file '{}': {}", input, e))?
    };

    serde_json::from_str(&content).map_err(|e| anyhow::anyhow!("Invalid request JSON: {}", e))
}
