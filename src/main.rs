//! Command-line entry point.
//!
//! Components are constructed explicitly at process start and handed to the
//! pipeline; typed errors map to exit codes here and nowhere else. Exit 0 on
//! success, 1 on fatal initialization failure, 2 on partial success with
//! record-level errors.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use gpu_market_etl::domain::repositories::Store;
use gpu_market_etl::infrastructure::config::AppConfig;
use gpu_market_etl::infrastructure::logging::init_logging;
use gpu_market_etl::infrastructure::pg_store::PgStore;
use gpu_market_etl::pipeline::{EtlPipeline, RunOutcome};
use gpu_market_etl::scheduler::{next_fire, JobId, JobScheduler};

#[derive(Parser)]
#[command(
    name = "gpu-market-etl",
    about = "GPU market-intelligence ETL pipeline",
    version
)]
struct Cli {
    /// Path to a JSON configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a single pipeline variant and exit.
    Run {
        #[arg(value_enum)]
        task: RunTask,
    },
    /// Manage the scheduler daemon.
    Scheduler {
        #[arg(value_enum)]
        action: SchedulerAction,
    },
    /// Fire a scheduled job once, out-of-band.
    Trigger {
        #[arg(value_enum)]
        task: TriggerTask,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RunTask {
    Full,
    PriceCrawl,
    RedditCollection,
}

#[derive(Clone, Copy, ValueEnum)]
enum SchedulerAction {
    Start,
    Status,
    Jobs,
}

#[derive(Clone, Copy, ValueEnum)]
enum TriggerTask {
    PriceCrawl,
    RedditCollection,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match AppConfig::load(cli.config.as_deref()).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("logging setup failed: {e}");
        return ExitCode::from(1);
    }

    let code = match cli.command {
        Command::Run { task } => run_task(&config, task).await,
        Command::Scheduler { action } => scheduler_command(&config, action).await,
        Command::Trigger { task } => trigger_task(&config, task).await,
    };

    match code {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::from(1)
        }
    }
}

/// Connect the store and wire the pipeline. A store that stays unreachable
/// after retries is the fatal-initialization case.
async fn build_pipeline(
    config: &AppConfig,
    cancel: &CancellationToken,
) -> Result<Arc<EtlPipeline>> {
    let store = PgStore::connect(&config.store, &config.retry, cancel.clone())
        .await
        .context("store unavailable")?;
    let store: Arc<dyn Store> = Arc::new(store);
    let pipeline = EtlPipeline::new(store, config).context("pipeline wiring failed")?;
    Ok(Arc::new(pipeline))
}

fn exit_code_for(outcome: &RunOutcome) -> u8 {
    match outcome.stats() {
        Some(stats) if !stats.success => 1,
        Some(stats) if !stats.errors.is_empty() => 2,
        Some(_) => 0,
        // Another invocation of the same mode was already running.
        None => 1,
    }
}

async fn run_task(config: &AppConfig, task: RunTask) -> Result<u8> {
    let cancel = CancellationToken::new();
    spawn_sigint_handler(cancel.clone());
    let pipeline = build_pipeline(config, &cancel).await?;

    let outcome = match task {
        RunTask::Full => pipeline.run_full(&cancel).await,
        RunTask::PriceCrawl => pipeline.run_price_only(&cancel).await,
        RunTask::RedditCollection => pipeline.run_signals_only(&cancel).await,
    };
    Ok(exit_code_for(&outcome))
}

async fn trigger_task(config: &AppConfig, task: TriggerTask) -> Result<u8> {
    let cancel = CancellationToken::new();
    spawn_sigint_handler(cancel.clone());
    let pipeline = build_pipeline(config, &cancel).await?;
    let scheduler = Arc::new(JobScheduler::new(pipeline, config.schedule.clone()));

    let job = match task {
        TriggerTask::PriceCrawl => JobId::PriceCrawl,
        TriggerTask::RedditCollection => JobId::RedditCollection,
    };
    info!("Manually triggering job {job}");
    let fired = scheduler.trigger(job).await;

    let last = scheduler.recent_history(1);
    match last.first() {
        Some(outcome) if fired && outcome.success => Ok(0),
        _ => Ok(1),
    }
}

async fn scheduler_command(config: &AppConfig, action: SchedulerAction) -> Result<u8> {
    match action {
        SchedulerAction::Start => scheduler_daemon(config).await,
        SchedulerAction::Status => {
            print_schedule(config, "Scheduler configuration");
            Ok(0)
        }
        SchedulerAction::Jobs => {
            print_schedule(config, "Scheduled jobs");
            Ok(0)
        }
    }
}

/// Foreground daemon: SIGINT initiates a graceful stop.
async fn scheduler_daemon(config: &AppConfig) -> Result<u8> {
    let cancel = CancellationToken::new();
    let pipeline = build_pipeline(config, &cancel).await?;
    let scheduler = Arc::new(JobScheduler::new(pipeline, config.schedule.clone()));

    scheduler.clone().start();
    info!("Scheduler is running. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Received shutdown signal");

    scheduler.stop().await;
    // Cancelling the root token rolls back anything the grace period missed.
    cancel.cancel();
    Ok(0)
}

fn print_schedule(config: &AppConfig, heading: &str) {
    let now = chrono::Utc::now();
    let schedule = &config.schedule;
    println!("{heading}:");
    println!(
        "  1. {} — daily at {:02}:{:02} UTC (next: {})",
        JobId::PriceCrawl,
        schedule.price_crawl_hour,
        schedule.price_crawl_minute,
        next_fire(now, schedule.price_crawl_hour, schedule.price_crawl_minute)
    );
    println!(
        "  2. {} — daily at {:02}:{:02} UTC (next: {})",
        JobId::RedditCollection,
        schedule.reddit_crawl_hour,
        schedule.reddit_crawl_minute,
        next_fire(now, schedule.reddit_crawl_hour, schedule.reddit_crawl_minute)
    );
    println!("These jobs fire while `scheduler start` is running.");
}

fn spawn_sigint_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt, cancelling in-flight work");
            cancel.cancel();
        }
    });
}
