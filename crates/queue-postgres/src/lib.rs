//! Postgres-backed [`JobStore`](queue_core::JobStore).
//!
//! Every state transition is a single statement; claiming relies on
//! `FOR UPDATE SKIP LOCKED` so concurrent workers on any host never receive
//! the same job and never wait on each other.

mod store;

use std::time::Duration;

use queue_core::QueueError;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;

pub use store::PostgresStore;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Opens a pool against `database_url` and brings the schema up to date.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PostgresStore, QueueError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
        .map_err(|e| QueueError::StorageUnavailable(e.to_string()))?;

    MIGRATOR
        .run(&pool)
        .await
        .map_err(|e| QueueError::StorageUnavailable(format!("migration failed: {e}")))?;

    tracing::info!(max_connections, "connected to postgres");
    Ok(PostgresStore::new(pool))
}
