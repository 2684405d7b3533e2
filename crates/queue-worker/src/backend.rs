use std::sync::Arc;

use anyhow::Context;
use queue_core::{FixedStatus, JobProcessor, JobStore, MemoryStore, StatusSource};

use crate::{Backend, Config, HttpProcessor, HttpStatusSource, LogProcessor};

/// Opens the configured [`JobStore`]. Both backends sit behind the same
/// trait so the worker loop never knows which one it is driving.
pub async fn build_store(cfg: &Config) -> anyhow::Result<Arc<dyn JobStore>> {
    match cfg.backend {
        Backend::Memory => {
            tracing::warn!("using in-memory job store; queued jobs will not survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        Backend::Postgres => {
            let url = cfg
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set (postgres://...)")?;
            let store = queue_postgres::connect(url, cfg.db_max_connections)
                .await
                .context("failed to connect to Postgres")?;
            Ok(Arc::new(store))
        }
    }
}

pub fn build_signal(cfg: &Config) -> anyhow::Result<Arc<dyn StatusSource>> {
    match &cfg.energy_status_url {
        Some(url) => Ok(Arc::new(HttpStatusSource::new(
            url.clone(),
            cfg.energy_status_timeout(),
        )?)),
        None => {
            tracing::info!(fail_open = cfg.fail_open, "ENERGY_STATUS_URL not set, signal unavailable");
            Ok(Arc::new(FixedStatus::unavailable()))
        }
    }
}

pub fn build_processor(cfg: &Config) -> Arc<dyn JobProcessor> {
    match &cfg.processor_url {
        Some(url) => Arc::new(HttpProcessor::new(url.clone())),
        None => Arc::new(LogProcessor),
    }
}
