use crate::services::error_classifier::percentage;
use crate::services::transfer_store::TransferStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Receives the byte cursor after every chunk, synchronously on the engine task.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, bytes_transferred: u64, total_bytes: u64);
}

impl<F> ProgressObserver for F
where
    F: Fn(u64, u64) + Send + Sync,
{
    fn on_progress(&self, bytes_transferred: u64, total_bytes: u64) {
        self(bytes_transferred, total_bytes)
    }
}

pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_progress(&self, _bytes_transferred: u64, _total_bytes: u64) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub percentage: u8,
}

/// Forwards progress to the observer and throttles persistence to the state store.
///
/// Store writes happen on a background task fed through a `watch` channel, so the engine
/// never waits on them and only the most recent update is written when the store is slow.
pub struct ProgressReporter {
    observer: Arc<dyn ProgressObserver>,
    byte_threshold: u64,
    flush_timeout: Duration,
    last_percentage: u8,
    persisted_percentage: Option<u8>,
    persisted_bytes: u64,
    tx: watch::Sender<Option<ProgressUpdate>>,
    writer: JoinHandle<()>,
}

impl ProgressReporter {
    pub fn new(
        transfer_id: impl Into<String>,
        store: Arc<dyn TransferStore>,
        observer: Arc<dyn ProgressObserver>,
        byte_threshold: u64,
        flush_timeout: Duration,
    ) -> Self {
        let (tx, rx) = watch::channel(None);
        let writer = tokio::spawn(run_writer(transfer_id.into(), store, rx));

        Self {
            observer,
            byte_threshold: byte_threshold.max(1),
            flush_timeout,
            last_percentage: 0,
            persisted_percentage: None,
            persisted_bytes: 0,
            tx,
            writer,
        }
    }

    /// Latest percentage reported. Never decreases.
    pub fn percentage(&self) -> u8 {
        self.last_percentage
    }

    pub fn on_chunk(&mut self, bytes_transferred: u64, total_bytes: u64) {
        self.observer.on_progress(bytes_transferred, total_bytes);

        let pct = percentage(bytes_transferred, total_bytes).max(self.last_percentage);
        self.last_percentage = pct;

        let pct_advanced = match self.persisted_percentage {
            Some(persisted) => pct > persisted,
            None => true,
        };
        let bytes_advanced =
            bytes_transferred.saturating_sub(self.persisted_bytes) >= self.byte_threshold;

        if pct_advanced || bytes_advanced {
            self.persisted_percentage = Some(pct);
            self.persisted_bytes = bytes_transferred;
            self.tx.send_replace(Some(ProgressUpdate {
                bytes_transferred,
                total_bytes,
                percentage: pct,
            }));
        }
    }

    /// Closes the channel and waits, bounded by the flush timeout, for the last write.
    pub async fn flush(self) {
        let Self {
            tx,
            mut writer,
            flush_timeout,
            ..
        } = self;
        drop(tx);

        match tokio::time::timeout(flush_timeout, &mut writer).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("⚠️ Progress writer task failed: {}", e),
            Err(_) => {
                tracing::warn!(
                    "⚠️ Progress flush timed out after {:?}, dropping pending update",
                    flush_timeout
                );
                writer.abort();
            }
        }
    }
}

async fn run_writer(
    transfer_id: String,
    store: Arc<dyn TransferStore>,
    mut rx: watch::Receiver<Option<ProgressUpdate>>,
) {
    while rx.changed().await.is_ok() {
        let Some(update) = *rx.borrow_and_update() else {
            continue;
        };
        if let Err(e) = store
            .update_progress(&transfer_id, update.bytes_transferred, update.total_bytes)
            .await
        {
            tracing::warn!(
                "⚠️ Failed to persist progress for {} ({}%): {}",
                transfer_id,
                update.percentage,
                e
            );
        }
    }
}
