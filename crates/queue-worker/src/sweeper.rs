use std::{sync::Arc, time::Duration};

use queue_core::{JobStore, QueueError};
use tokio_util::sync::CancellationToken;

/// Periodically returns jobs abandoned in `processing` to the queue. It does
/// not care why a job is stuck; exceeding the timeout counts as a failure.
pub struct StaleRecoverySweeper {
    store: Arc<dyn JobStore>,
    interval: Duration,
    timeout: Duration,
}

impl StaleRecoverySweeper {
    pub fn new(store: Arc<dyn JobStore>, interval: Duration, timeout: Duration) -> Self {
        Self {
            store,
            interval,
            timeout,
        }
    }

    pub async fn sweep(&self) -> Result<u64, QueueError> {
        let recovered = self.store.recover_stale(self.timeout).await?;
        if recovered > 0 {
            tracing::warn!(
                recovered,
                timeout_ms = self.timeout.as_millis() as u64,
                "recovered stale jobs"
            );
        }
        Ok(recovered)
    }

    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            timeout_ms = self.timeout.as_millis() as u64,
            "stale recovery sweeper started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
            if let Err(e) = self.sweep().await {
                tracing::error!(error=%e, "stale recovery sweep failed");
            }
        }

        tracing::info!("stale recovery sweeper stopped");
    }
}
