use crate::config::TransferConfig;
use crate::models::{TransferRecord, TransferRequest, TransferResult, TransferStatus};
use crate::services::error_classifier::{ProgressSnapshot, classify};
use crate::services::fault::{Fault, FaultCode, FaultOrigin};
use crate::services::part_builder::PartBuilder;
use crate::services::progress::{ProgressObserver, ProgressReporter};
use crate::services::source::{SourceReader, SourceStream};
use crate::services::storage::StorageService;
use crate::services::transfer_store::{StoreError, TransferStore};
use crate::services::upload_sink::UploadSink;
use crate::utils::validation::{
    ValidationError, derive_key, validate_bucket_name, validate_source_url,
};
use futures::StreamExt;
use std::sync::Arc;

/// Streams one source object into a multipart upload.
///
/// An engine runs exactly one transfer: [`TransferEngine::transfer`] consumes it.
pub struct TransferEngine {
    source: Arc<dyn SourceReader>,
    storage: Arc<dyn StorageService>,
    store: Arc<dyn TransferStore>,
    config: TransferConfig,
}

/// Mutable state of a single run, kept outside the fallible pipeline so cleanup can see it.
#[derive(Default)]
struct Attempt {
    bytes_transferred: u64,
    total_bytes: u64,
    record_open: bool,
    reporter: Option<ProgressReporter>,
    sink: Option<UploadSink>,
}

impl TransferEngine {
    pub fn new(
        source: Arc<dyn SourceReader>,
        storage: Arc<dyn StorageService>,
        store: Arc<dyn TransferStore>,
        config: TransferConfig,
    ) -> Self {
        Self {
            source,
            storage,
            store,
            config,
        }
    }

    /// Runs the transfer to a terminal state. Never returns an error: every fault is
    /// classified into the result and persisted on the record when one is open.
    #[tracing::instrument(skip_all, fields(transfer_id = %request.transfer_id))]
    pub async fn transfer(
        self,
        request: TransferRequest,
        observer: Arc<dyn ProgressObserver>,
    ) -> TransferResult {
        tracing::info!(
            "🚚 Transfer started: {} -> s3://{}/{}",
            request.source_url,
            request.bucket,
            request.key_prefix.as_deref().unwrap_or_default()
        );

        let mut attempt = Attempt::default();
        let outcome = self.run(&request, observer, &mut attempt).await;

        let transfer_id = request.transfer_id;
        match outcome {
            Ok(s3_location) => {
                if let Some(reporter) = attempt.reporter.take() {
                    reporter.flush().await;
                }

                // Length is known once the stream is exhausted.
                let total_bytes = match attempt.total_bytes {
                    0 => attempt.bytes_transferred,
                    total => total,
                };
                if let Err(e) = self
                    .store
                    .mark_complete(
                        &transfer_id,
                        &s3_location,
                        attempt.bytes_transferred,
                        total_bytes,
                    )
                    .await
                {
                    tracing::error!(
                        "❌ Upload finished but the completed state was not persisted: {}",
                        e
                    );
                }

                tracing::info!(
                    "🎉 Transfer finished: {} bytes to {}",
                    attempt.bytes_transferred,
                    s3_location
                );
                TransferResult::succeeded(transfer_id, s3_location, attempt.bytes_transferred)
            }
            Err(fault) => {
                let error = classify(
                    &fault,
                    ProgressSnapshot::new(attempt.bytes_transferred, attempt.total_bytes),
                );
                tracing::error!(
                    "❌ Transfer failed [{}] (retryable={}): {} | cause: {}",
                    error.kind,
                    error.retryable,
                    error.message,
                    fault
                );

                if let Some(sink) = attempt.sink.as_mut() {
                    sink.abort().await;
                }
                if let Some(reporter) = attempt.reporter.take() {
                    reporter.flush().await;
                }

                if attempt.record_open {
                    if let Err(e) = self
                        .store
                        .mark_failed(
                            &transfer_id,
                            &error,
                            attempt.bytes_transferred,
                            attempt.total_bytes,
                        )
                        .await
                    {
                        tracing::error!("❌ Failed to persist failed state: {}", e);
                    }
                }

                TransferResult::failed(transfer_id, error, attempt.bytes_transferred)
            }
        }
    }

    async fn run(
        &self,
        request: &TransferRequest,
        observer: Arc<dyn ProgressObserver>,
        attempt: &mut Attempt,
    ) -> Result<String, Fault> {
        let transfer_id = request.transfer_id.as_str();

        let record = self
            .store
            .get(transfer_id)
            .await
            .map_err(store_fault)?
            .ok_or_else(|| {
                Fault::new(FaultOrigin::Input, FaultCode::MissingRecord, transfer_id)
            })?;
        if record.status == TransferStatus::Completed {
            return Err(Fault::new(
                FaultOrigin::Input,
                FaultCode::AlreadyCompleted,
                transfer_id,
            ));
        }
        attempt.record_open = true;

        // The registered record owns the inputs; the request only names it.
        ensure_request_matches(request, &record)?;
        let url = validate_source_url(&record.source_url, self.config.require_https)
            .map_err(input_fault)?;
        validate_bucket_name(&record.bucket).map_err(input_fault)?;
        let key = derive_key(&url, record.key_prefix.as_deref()).map_err(input_fault)?;

        self.store
            .mark_in_progress(transfer_id, &key)
            .await
            .map_err(store_fault)?;
        attempt.reporter = Some(ProgressReporter::new(
            transfer_id,
            self.store.clone(),
            observer,
            self.config.progress_byte_threshold,
            self.config.progress_flush_timeout,
        ));

        let SourceStream {
            total_bytes,
            mut chunks,
        } = self.source.open(&url).await?;
        attempt.total_bytes = total_bytes.unwrap_or(0);

        let sink = attempt.sink.insert(UploadSink::new(
            self.storage.clone(),
            &record.bucket,
            &key,
            &self.config,
        ));
        sink.initiate().await?;

        let mut builder = PartBuilder::new(self.config.part_size);
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            let parts = builder.consume(&chunk);
            attempt.bytes_transferred = builder.bytes_consumed();
            let parts = parts?;

            if let Some(reporter) = attempt.reporter.as_mut() {
                reporter.on_chunk(attempt.bytes_transferred, attempt.total_bytes);
            }
            for part in parts {
                sink.submit(part).await?;
            }
        }

        if let Some(part) = builder.finish()? {
            sink.submit(part).await?;
        }
        sink.complete().await?;

        Ok(format!("s3://{}/{}", record.bucket, key))
    }
}

fn ensure_request_matches(
    request: &TransferRequest,
    record: &TransferRecord,
) -> Result<(), Fault> {
    let prefix = |p: Option<&str>| {
        p.map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
    };

    let mut mismatched = Vec::new();
    if request.source_url != record.source_url {
        mismatched.push("source_url");
    }
    if request.bucket != record.bucket {
        mismatched.push("bucket");
    }
    if prefix(request.key_prefix.as_deref()) != prefix(record.key_prefix.as_deref()) {
        mismatched.push("key_prefix");
    }

    if mismatched.is_empty() {
        return Ok(());
    }
    Err(Fault::invalid_input(format!(
        "request does not match registered transfer {} ({} differ)",
        record.transfer_id,
        mismatched.join(", ")
    )))
}

fn input_fault(err: ValidationError) -> Fault {
    Fault::invalid_input(err.to_string())
}

fn store_fault(err: StoreError) -> Fault {
    let code = match &err {
        StoreError::NotFound(_) => FaultCode::MissingRecord,
        e if e.is_timeout() => FaultCode::Timeout,
        StoreError::InvalidTransition { .. } => FaultCode::InvalidInput,
        _ => FaultCode::Unknown,
    };
    Fault::new(FaultOrigin::Input, code, err.to_string())
}
