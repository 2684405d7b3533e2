use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use queue_core::{
    JobId, JobStatus, JobStore, NewJob, ResourceContext, StatusSource, SubmissionGate,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "queue-cli", version, about = "Operate the energy-aware job queue")]
struct Cli {
    /// Overrides DATABASE_URL for the postgres backend.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run workers and the stale sweeper in this process
    Worker(WorkerArgs),

    #[command(flatten)]
    Manage(ManageCommand),
}

#[derive(clap::Args)]
struct WorkerArgs {
    #[arg(long)]
    concurrency: Option<usize>,

    #[arg(long)]
    poll_interval_ms: Option<u64>,
}

#[derive(Subcommand)]
enum ManageCommand {
    /// Run a payload now if energy allows, otherwise queue it
    Submit {
        text: String,

        #[arg(long)]
        max_attempts: Option<i32>,
    },

    /// Queue a payload unconditionally
    Enqueue {
        text: String,

        #[arg(long)]
        max_attempts: Option<i32>,
    },

    /// Queue statistics and the current policy decision
    Status,

    /// Most recent jobs, newest first
    List {
        #[arg(long, default_value_t = 20)]
        limit: i64,

        /// pending, processing, completed or dead
        #[arg(long)]
        status: Option<String>,
    },

    /// Show one job
    Get { id: JobId },

    /// List dead-lettered jobs
    Dead {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// Return a dead job to pending with its attempts reset
    RetryDead { id: JobId },

    /// Delete completed jobs older than the given age
    Purge {
        #[arg(long, default_value_t = 24, value_parser = clap::value_parser!(u64).range(1..))]
        older_than_hours: u64,
    },

    /// Permanently remove a job
    Delete { id: JobId },

    /// Reclaim jobs stuck in processing
    RecoverStale {
        #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
        timeout_minutes: u64,
    },

    /// Check store connectivity
    Ping,
}

/// `count` units of `unit_secs` seconds each.
fn span(count: u64, unit_secs: u64, flag: &str) -> anyhow::Result<Duration> {
    count
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .with_context(|| format!("{flag} {count} is too large"))
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,queue_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut cfg = queue_worker::Config::from_env();
    if cli.database_url.is_some() {
        cfg.database_url = cli.database_url;
    }

    match cli.command {
        Commands::Worker(args) => run_workers(cfg, args).await,
        Commands::Manage(command) => manage(cfg, command).await,
    }
}

async fn run_workers(mut cfg: queue_worker::Config, args: WorkerArgs) -> anyhow::Result<()> {
    if let Some(concurrency) = args.concurrency {
        cfg.concurrency = concurrency;
    }
    if let Some(poll_interval_ms) = args.poll_interval_ms {
        cfg.poll_interval_ms = poll_interval_ms;
    }

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        }
    });
    queue_worker::run_worker(cfg, shutdown).await
}

async fn manage(cfg: queue_worker::Config, command: ManageCommand) -> anyhow::Result<()> {
    cfg.validate()?;
    let store = queue_worker::build_store(&cfg).await?;

    match command {
        ManageCommand::Submit { text, max_attempts } => {
            let gate = SubmissionGate::new(
                cfg.policy(),
                store,
                queue_worker::build_signal(&cfg)?,
                queue_worker::build_processor(&cfg),
            )
            .with_max_attempts(max_attempts.unwrap_or(cfg.max_attempts));
            print_json(&gate.submit(&text).await?)?;
        }

        ManageCommand::Enqueue { text, max_attempts } => {
            let signal = queue_worker::build_signal(&cfg)?;
            let decision = cfg.policy().decide(signal.current().await);
            let submitted = ResourceContext::capture(decision.status.as_ref(), decision.tier);
            let job = NewJob::new(text, submitted)
                .with_max_attempts(max_attempts.unwrap_or(cfg.max_attempts));
            println!("{}", store.enqueue(job).await?);
        }

        ManageCommand::Status => {
            let signal = queue_worker::build_signal(&cfg)?;
            let decision = cfg.policy().decide(signal.current().await);
            let stats = store.stats().await?;
            let mut by_status = serde_json::Map::new();
            for (status, s) in &stats.by_status {
                by_status.insert(status.to_string(), serde_json::to_value(s)?);
            }
            print_json(&json!({
                "total": stats.total,
                "by_status": by_status,
                "decision": decision,
            }))?;
        }

        ManageCommand::List { limit, status } => {
            let status = status
                .map(|s| s.parse::<JobStatus>())
                .transpose()
                .context("invalid --status")?;
            print_json(&store.list_recent(limit, status).await?)?;
        }

        ManageCommand::Get { id } => {
            let job = store.get(id).await?.context("job not found")?;
            print_json(&job)?;
        }

        ManageCommand::Dead { limit } => {
            print_json(&store.list_dead(limit).await?)?;
        }

        ManageCommand::RetryDead { id } => {
            store.retry_dead(id).await?;
            println!("{id}");
        }

        ManageCommand::Purge { older_than_hours } => {
            let purged = store
                .purge_completed(span(older_than_hours, 3600, "--older-than-hours")?)
                .await?;
            println!("{purged}");
        }

        ManageCommand::Delete { id } => {
            store.delete(id).await?;
            println!("{id}");
        }

        ManageCommand::RecoverStale { timeout_minutes } => {
            let recovered = store
                .recover_stale(span(timeout_minutes, 60, "--timeout-minutes")?)
                .await?;
            println!("{recovered}");
        }

        ManageCommand::Ping => {
            store.ping().await?;
            println!("ok");
        }
    }

    Ok(())
}
