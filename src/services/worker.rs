use crate::services::transfer_store::TransferStore;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, sleep};

/// Periodically deletes terminal transfer records whose ttl has passed.
pub struct BackgroundWorker {
    store: Arc<dyn TransferStore>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl BackgroundWorker {
    pub fn new(
        store: Arc<dyn TransferStore>,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("🚀 Background worker started (purge every {:?})", self.interval);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Background worker shutting down");
                    break;
                }
                _ = sleep(self.interval) => {
                    self.purge_expired().await;
                }
            }
        }
    }

    pub async fn purge_expired(&self) -> u64 {
        tracing::debug!("🧹 Purging expired transfer records...");

        match self.store.purge_expired(Utc::now().timestamp()).await {
            Ok(0) => 0,
            Ok(purged) => {
                tracing::info!("🧹 Purged {} expired transfer records", purged);
                purged
            }
            Err(e) => {
                tracing::error!("Failed to purge expired transfers: {}", e);
                0
            }
        }
    }
}
