//! Worker process for the job queue: independent polling loops that claim
//! and process deferred jobs when the energy policy allows, plus the stale
//! recovery sweeper.

mod backend;
mod config;
mod processor;
mod signal;
mod sweeper;
mod worker;

use std::sync::Arc;

use queue_core::{JobProcessor, JobStore, StatusSource};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub use backend::{build_processor, build_signal, build_store};
pub use config::{Backend, Config};
pub use processor::{HttpProcessor, LogProcessor};
pub use signal::HttpStatusSource;
pub use sweeper::StaleRecoverySweeper;
pub use worker::{QueueWorker, Tick};

/// Builds everything from `cfg` and runs until `shutdown` fires.
pub async fn run_worker(cfg: Config, shutdown: CancellationToken) -> anyhow::Result<()> {
    cfg.validate()?;
    let store = build_store(&cfg).await?;
    let signal = build_signal(&cfg)?;
    let processor = build_processor(&cfg);
    run_with(&cfg, store, signal, processor, shutdown).await
}

/// Spawns `cfg.concurrency` worker loops and one sweeper over `store`.
pub async fn run_with(
    cfg: &Config,
    store: Arc<dyn JobStore>,
    signal: Arc<dyn StatusSource>,
    processor: Arc<dyn JobProcessor>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    tracing::info!(
        worker_id=%cfg.worker_id,
        concurrency=cfg.concurrency,
        backend=?cfg.backend,
        poll_interval_ms=cfg.poll_interval_ms,
        stale_timeout_ms=cfg.stale_timeout_ms,
        price_threshold=cfg.price_threshold,
        "worker started"
    );

    let mut tasks = JoinSet::new();
    for n in 0..cfg.concurrency {
        let worker = QueueWorker::new(
            format!("{}-{n}", cfg.worker_id),
            store.clone(),
            signal.clone(),
            processor.clone(),
            cfg.policy(),
        )
        .with_intervals(cfg.poll_interval(), cfg.error_backoff());
        tasks.spawn(worker.run(shutdown.clone()));
    }

    let sweeper = StaleRecoverySweeper::new(store, cfg.sweep_interval(), cfg.stale_timeout());
    tasks.spawn(sweeper.run(shutdown.clone()));

    while let Some(res) = tasks.join_next().await {
        if let Err(e) = res {
            tracing::error!(error=%e, "worker task ended abnormally");
        }
    }
    tracing::info!("worker stopped");
    Ok(())
}
