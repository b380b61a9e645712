//! Healthwatch CLI
//!
//! Runs one monitoring cycle per invocation; schedule it with cron or a
//! systemd timer.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use healthwatch::alerting::{
    AlertComposer, AlertStateStore, CycleJournal, CycleOutcome, CycleReport, FanoutJournal,
    FileStateStore, HttpNotifier, JsonlJournal, Monitor, ThresholdEvaluator, TracingJournal,
};
use healthwatch::collector::{HostSampler, MetricSource, SnapshotFile};
use healthwatch::config::LoggingConfig;
use healthwatch::models::{MetricSnapshot, ThresholdRule};
use healthwatch::{Config, Error};

/// Healthwatch - health monitoring and alerting for edge hosts
#[derive(Parser)]
#[command(name = "healthwatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "HEALTHWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one monitoring cycle
    Check {
        /// Evaluate this JSON snapshot instead of sampling the host
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Show what would trigger, without touching state or sending anything
    Evaluate {
        /// Evaluate this JSON snapshot instead of sampling the host
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Show the last delivered alert and the remaining cooldown
    Status,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let _log_guard = match init_logging(&config.logging, cli.verbose) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Check { snapshot } => run_check(&config, snapshot.as_deref(), cli.format).await,
        Commands::Evaluate { snapshot } => {
            run_evaluate(&config, snapshot.as_deref(), cli.format).await
        }
        Commands::Status => run_status(&config, cli.format),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Healthwatch failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(config: &LoggingConfig, verbose: bool) -> healthwatch::Result<Option<WorkerGuard>> {
    let level = if verbose { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (writer, guard) = match &config.file {
        Some(path) => {
            let file = open_log_file(path).map_err(|e| {
                Error::config(format!("cannot open logging.file {}: {e}", path.display()))
            })?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            (BoxMakeWriter::new(writer), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.file.is_none())
        .with_writer(writer);

    if config.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }

    Ok(guard)
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

async fn take_snapshot(config: &Config, snapshot: Option<&Path>) -> anyhow::Result<MetricSnapshot> {
    match snapshot {
        Some(path) => SnapshotFile::new(path)
            .load()
            .await
            .with_context(|| format!("invalid snapshot {}", path.display())),
        None => Ok(HostSampler::new(config.sampler.clone()).sample().await),
    }
}

fn build_journal(config: &LoggingConfig) -> Arc<dyn CycleJournal> {
    let journal = FanoutJournal::new().with(TracingJournal);
    match &config.journal {
        Some(path) => Arc::new(journal.with(JsonlJournal::new(path))),
        None => Arc::new(journal),
    }
}

async fn run_check(
    config: &Config,
    snapshot: Option<&Path>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    config.validate()?;

    let channel = config.notifier.require_channel()?.clone();
    let notifier = HttpNotifier::new(channel, config.notifier.timeout)
        .map_err(|e| Error::config(e.to_string()))?;
    let store = Arc::new(FileStateStore::new(&config.state.path));
    let monitor = Monitor::from_config(config, store, Arc::new(notifier), build_journal(&config.logging))?;

    let snapshot = take_snapshot(config, snapshot).await?;
    let report = monitor.run_cycle(&snapshot, Utc::now()).await;

    info!(cycle_id = %report.cycle_id, "Cycle complete");
    print_report(&report, format)
}

async fn run_evaluate(
    config: &Config,
    snapshot: Option<&Path>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    config.thresholds.validate()?;

    let snapshot = take_snapshot(config, snapshot).await?;
    let evaluator = ThresholdEvaluator::new(ThresholdRule::standard_set(
        &config.thresholds,
        &config.sampler.watched_service,
    ));
    let conditions = evaluator.evaluate(&snapshot);
    let message = AlertComposer::from_config(&config.alerting).compose(&conditions, Utc::now());

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "snapshot": snapshot,
                "conditions": conditions,
                "message": message,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => match message {
            Some(message) => println!("{message}"),
            None => println!("All metrics within bounds"),
        },
    }

    Ok(())
}

fn run_status(config: &Config, format: OutputFormat) -> anyhow::Result<()> {
    let store = FileStateStore::new(&config.state.path);
    let state = store
        .load()
        .with_context(|| format!("cannot read {}", store.path().display()))?;

    let cooldown = i64::try_from(config.alerting.cooldown.as_secs()).unwrap_or(i64::MAX);
    let now = Utc::now();
    let remaining = state.map(|s| cooldown.saturating_sub(s.elapsed_secs(now)).max(0));

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "last_alert_epoch_seconds": state.map(|s| s.last_alert_epoch_seconds),
                "cooldown_remaining_secs": remaining,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => match (state.and_then(|s| s.last_alert()), remaining) {
            (Some(last), Some(0)) => println!("Last alert: {last} (cooldown over)"),
            (Some(last), Some(secs)) => {
                let left = humantime::format_duration(Duration::from_secs(secs.unsigned_abs()));
                println!("Last alert: {last} (cooldown: {left} remaining)");
            }
            _ => println!("No alert delivered yet"),
        },
    }

    Ok(())
}

fn print_report(report: &CycleReport, format: OutputFormat) -> anyhow::Result<()> {
    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    match &report.outcome {
        CycleOutcome::Clean => println!("All metrics within bounds"),
        CycleOutcome::Suppressed { remaining_secs } => {
            println!(
                "{} condition(s) triggered; alert suppressed ({remaining_secs}s of cooldown left)",
                report.conditions.len()
            );
        }
        CycleOutcome::Delivered { message } => println!("Alert sent:\n{message}"),
        CycleOutcome::DeliveryFailed { error, .. } => {
            println!("Alert not delivered, will retry next cycle: {error}");
        }
        CycleOutcome::LockContended { waited_ms } => {
            println!("Skipped: another cycle held the alert state lock for {waited_ms}ms");
        }
    }

    if report.storage_degraded {
        println!("Warning: alert state unavailable this cycle; see logs");
    }

    Ok(())
}
