use crate::config::TransferConfig;
use crate::services::fault::{Fault, FaultCode, FaultOrigin, StorageOp};
use crate::services::part_builder::UploadPart;
use crate::services::storage::StorageService;
use crate::utils::retry::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};

#[derive(Debug, Clone, PartialEq, Eq)]
enum SinkState {
    Uninitiated,
    Initiated { upload_id: String },
    Completed,
    Aborted,
}

type PartOutcome = Result<(i32, String), Fault>;

/// Drives one multipart upload: initiate, bounded concurrent part uploads, then complete or abort.
pub struct UploadSink {
    storage: Arc<dyn StorageService>,
    bucket: String,
    key: String,
    state: SinkState,
    max_in_flight: usize,
    retry: RetryPolicy,
    abort_timeout: Duration,
    tasks: JoinSet<PartOutcome>,
    confirmed: Vec<(i32, String)>,
    submitted: i32,
}

impl UploadSink {
    pub fn new(
        storage: Arc<dyn StorageService>,
        bucket: impl Into<String>,
        key: impl Into<String>,
        config: &TransferConfig,
    ) -> Self {
        Self {
            storage,
            bucket: bucket.into(),
            key: key.into(),
            state: SinkState::Uninitiated,
            max_in_flight: config.part_concurrency.max(1),
            retry: RetryPolicy::new(config.part_max_attempts, config.part_retry_base_delay),
            abort_timeout: config.abort_timeout,
            tasks: JoinSet::new(),
            confirmed: Vec::new(),
            submitted: 0,
        }
    }

    pub fn is_initiated(&self) -> bool {
        matches!(self.state, SinkState::Initiated { .. })
    }

    pub async fn initiate(&mut self) -> Result<(), Fault> {
        if self.state != SinkState::Uninitiated {
            return Err(self.state_fault(StorageOp::Initiate));
        }

        let upload_id = self
            .storage
            .create_multipart_upload(&self.bucket, &self.key)
            .await?;
        tracing::info!(
            "🪣 Multipart upload started for s3://{}/{} (upload_id={})",
            self.bucket,
            self.key,
            upload_id
        );
        self.state = SinkState::Initiated { upload_id };
        Ok(())
    }

    /// Queues a part for upload, first waiting until a pool slot is free.
    ///
    /// Surfaces the failure of any earlier part that finished while waiting.
    pub async fn submit(&mut self, part: UploadPart) -> Result<(), Fault> {
        let upload_id = match &self.state {
            SinkState::Initiated { upload_id } => upload_id.clone(),
            _ => return Err(self.state_fault(StorageOp::UploadPart(part.part_number))),
        };

        self.wait_for_capacity(self.max_in_flight - 1).await?;

        tracing::debug!(
            part_number = part.part_number,
            bytes = part.len(),
            "Queueing part upload"
        );
        self.submitted += 1;
        self.tasks.spawn(upload_with_retry(
            self.storage.clone(),
            self.bucket.clone(),
            self.key.clone(),
            upload_id,
            part,
            self.retry.clone(),
        ));
        Ok(())
    }

    /// Waits for every queued part, then completes the upload with parts sorted by number.
    pub async fn complete(&mut self) -> Result<(), Fault> {
        let upload_id = match &self.state {
            SinkState::Initiated { upload_id } => upload_id.clone(),
            _ => return Err(self.state_fault(StorageOp::Complete)),
        };

        self.wait_for_capacity(0).await?;

        let mut parts = std::mem::take(&mut self.confirmed);
        parts.sort_unstable_by_key(|(part_number, _)| *part_number);
        assert_eq!(
            parts.len() as i32,
            self.submitted,
            "every submitted part must be confirmed before completion"
        );
        assert!(
            parts
                .iter()
                .enumerate()
                .all(|(i, (part_number, _))| *part_number == i as i32 + 1),
            "part numbers must be contiguous from 1 without duplicates"
        );

        let part_count = parts.len();
        self.storage
            .complete_multipart_upload(&self.bucket, &self.key, &upload_id, parts)
            .await?;

        tracing::info!(
            "✅ Multipart upload completed for s3://{}/{} ({} parts)",
            self.bucket,
            self.key,
            part_count
        );
        self.state = SinkState::Completed;
        Ok(())
    }

    /// Best-effort abort. Cancels queued parts and never fails; a no-op unless initiated.
    pub async fn abort(&mut self) {
        let upload_id = match &self.state {
            SinkState::Initiated { upload_id } => upload_id.clone(),
            _ => return,
        };
        self.state = SinkState::Aborted;

        self.tasks.shutdown().await;

        let abort = self
            .storage
            .abort_multipart_upload(&self.bucket, &self.key, &upload_id);
        match tokio::time::timeout(self.abort_timeout, abort).await {
            Ok(Ok(())) => tracing::info!(
                "🧹 Aborted multipart upload {} for s3://{}/{}",
                upload_id,
                self.bucket,
                self.key
            ),
            Ok(Err(fault)) => tracing::error!(
                "❌ Failed to abort multipart upload {}: {}",
                upload_id,
                fault
            ),
            Err(_) => tracing::error!(
                "❌ Abort of multipart upload {} timed out after {:?}",
                upload_id,
                self.abort_timeout
            ),
        }
    }

    async fn wait_for_capacity(&mut self, max_in_flight: usize) -> Result<(), Fault> {
        while self.tasks.len() > max_in_flight {
            match self.tasks.join_next().await {
                Some(joined) => self.record(joined)?,
                None => break,
            }
        }
        Ok(())
    }

    fn record(&mut self, joined: Result<PartOutcome, JoinError>) -> Result<(), Fault> {
        match joined {
            Ok(Ok((part_number, etag))) => {
                tracing::debug!(part_number, etag = %etag, "Part confirmed");
                self.confirmed.push((part_number, etag));
                Ok(())
            }
            Ok(Err(fault)) => Err(fault),
            Err(join_err) => Err(Fault::new(
                FaultOrigin::PartBuilder,
                FaultCode::Unknown,
                format!("part upload task failed: {}", join_err),
            )),
        }
    }

    fn state_fault(&self, op: StorageOp) -> Fault {
        Fault::new(
            FaultOrigin::Storage(op),
            FaultCode::Unknown,
            format!("cannot {} while upload is {:?}", op, self.state),
        )
    }
}

async fn upload_with_retry(
    storage: Arc<dyn StorageService>,
    bucket: String,
    key: String,
    upload_id: String,
    part: UploadPart,
    retry: RetryPolicy,
) -> PartOutcome {
    let mut attempt = 1;
    loop {
        match storage
            .upload_part(&bucket, &key, &upload_id, part.part_number, part.data.clone())
            .await
        {
            Ok(etag) => return Ok((part.part_number, etag)),
            Err(fault) if fault.is_transient() && retry.should_retry(attempt) => {
                let delay = retry.backoff(attempt);
                tracing::warn!(
                    "⚠️ Part {} upload failed (attempt {}/{}), retrying in {:?}: {}",
                    part.part_number,
                    attempt,
                    retry.max_attempts,
                    delay,
                    fault
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(fault) => {
                tracing::error!(
                    "❌ Part {} upload failed after {} attempt(s): {}",
                    part.part_number,
                    attempt,
                    fault
                );
                return Err(fault);
            }
        }
    }
}
