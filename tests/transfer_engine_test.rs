mod common;

use archive_transfer::config::TransferConfig;
use archive_transfer::models::{NewTransfer, TransferRequest, TransferStatus};
use archive_transfer::services::error_classifier::ErrorKind;
use archive_transfer::services::fault::{Fault, FaultCode, FaultOrigin};
use archive_transfer::services::progress::NoopObserver;
use archive_transfer::services::transfer_engine::TransferEngine;
use archive_transfer::services::transfer_store::{SeaOrmTransferStore, TransferStore};
use common::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SOURCE_URL: &str = "https://downloads.example.com/exports/dataset.zip";
const BUCKET: &str = "archive-bucket";

fn request(transfer_id: &str) -> TransferRequest {
    TransferRequest {
        transfer_id: transfer_id.to_string(),
        source_url: SOURCE_URL.to_string(),
        bucket: BUCKET.to_string(),
        key_prefix: None,
    }
}

fn engine(
    source: &Arc<MockSource>,
    storage: &Arc<MockStorageService>,
    store: &Arc<SeaOrmTransferStore>,
) -> TransferEngine {
    TransferEngine::new(source.clone(), storage.clone(), store.clone(), test_config())
}

#[tokio::test]
async fn test_twelve_mb_in_three_parts() {
    let store = setup_store().await;
    register(store.as_ref(), "t-12mb", SOURCE_URL, BUCKET).await;

    let data = payload(12_000_000);
    let source = Arc::new(MockSource::new(vec![MockSource::body(&data, 64 * 1024)]));
    let storage = Arc::new(MockStorageService::default());

    let result = engine(&source, &storage, &store)
        .transfer(request("t-12mb"), Arc::new(NoopObserver))
        .await;

    assert!(result.success, "transfer failed: {:?}", result.error);
    assert_eq!(result.bytes_transferred, 12_000_000);
    assert_eq!(
        result.s3_location.as_deref(),
        Some("s3://archive-bucket/dataset.zip")
    );
    assert_eq!(*storage.completed_orders.lock().unwrap(), vec![vec![1, 2, 3]]);
    assert_eq!(storage.object(BUCKET, "dataset.zip"), Some(data));
    assert_eq!(storage.abort_count(), 0);

    let record = store.get("t-12mb").await.unwrap().unwrap();
    assert_eq!(record.status, TransferStatus::Completed);
    assert_eq!(record.bytes_transferred, 12_000_000);
    assert_eq!(record.total_bytes, 12_000_000);
    assert_eq!(record.percentage, 100);
    assert_eq!(record.s3_key.as_deref(), Some("dataset.zip"));
    assert!(record.end_time.is_some());
    assert!(record.ttl.is_some());
    assert!(record.error.is_none());
}

#[tokio::test]
async fn test_key_prefix_is_applied() {
    let store = setup_store().await;
    store
        .create(NewTransfer {
            transfer_id: "t-prefix".to_string(),
            source_url: SOURCE_URL.to_string(),
            bucket: BUCKET.to_string(),
            key_prefix: Some("imports/2024".to_string()),
        })
        .await
        .unwrap();

    let data = payload(1000);
    let source = Arc::new(MockSource::new(vec![MockSource::body(&data, 100)]));
    let storage = Arc::new(MockStorageService::default());

    let mut req = request("t-prefix");
    req.key_prefix = Some("imports/2024".to_string());
    let result = engine(&source, &storage, &store)
        .transfer(req, Arc::new(NoopObserver))
        .await;

    assert!(result.success);
    assert_eq!(
        result.s3_location.as_deref(),
        Some("s3://archive-bucket/imports/2024/dataset.zip")
    );
    assert!(storage.object(BUCKET, "imports/2024/dataset.zip").is_some());
}

#[tokio::test]
async fn test_complete_receives_sorted_parts() {
    let store = setup_store().await;
    register(store.as_ref(), "t-order", SOURCE_URL, BUCKET).await;

    let data = payload(16 * MIB);
    let source = Arc::new(MockSource::new(vec![MockSource::body(&data, MIB)]));
    let storage = Arc::new(MockStorageService {
        part_delays: HashMap::from([
            (1, Duration::from_millis(150)),
            (2, Duration::from_millis(75)),
        ]),
        ..Default::default()
    });

    let result = engine(&source, &storage, &store)
        .transfer(request("t-order"), Arc::new(NoopObserver))
        .await;

    assert!(result.success);
    assert_eq!(
        *storage.completed_orders.lock().unwrap(),
        vec![vec![1, 2, 3, 4]]
    );
    assert_eq!(storage.object(BUCKET, "dataset.zip"), Some(data));
}

#[tokio::test]
async fn test_source_404_is_url_fetch_error() {
    let store = setup_store().await;
    register(store.as_ref(), "t-404", SOURCE_URL, BUCKET).await;

    let source = Arc::new(MockSource::new(vec![SourceScript::OpenError(Fault::new(
        FaultOrigin::SourceOpen,
        FaultCode::HttpStatus(404),
        "GET returned 404 Not Found",
    ))]));
    let storage = Arc::new(MockStorageService::default());

    let result = engine(&source, &storage, &store)
        .transfer(request("t-404"), Arc::new(NoopObserver))
        .await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::UrlFetchError);
    assert!(error.message.contains("404"));
    assert!(!error.retryable);
    assert_eq!(storage.initiate_count(), 0);
    assert_eq!(storage.abort_count(), 0);

    let record = store.get("t-404").await.unwrap().unwrap();
    assert_eq!(record.status, TransferStatus::Failed);
    assert_eq!(record.error_code, Some(ErrorKind::UrlFetchError));
    assert_eq!(record.retryable, Some(false));
    assert!(record.s3_location.is_none());
}

#[tokio::test]
async fn test_access_denied_on_part_aborts_once() {
    let store = setup_store().await;
    register(store.as_ref(), "t-denied", SOURCE_URL, BUCKET).await;

    let data = payload(6 * MIB);
    let source = Arc::new(MockSource::new(vec![MockSource::body(&data, MIB)]));
    let storage = Arc::new(MockStorageService {
        deny_part: Some(1),
        ..Default::default()
    });

    let result = engine(&source, &storage, &store)
        .transfer(request("t-denied"), Arc::new(NoopObserver))
        .await;

    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::StorageError);
    assert!(error.message.contains("Access denied"));
    assert!(!error.retryable);
    assert_eq!(storage.abort_count(), 1);
    assert!(storage.completed_orders.lock().unwrap().is_empty());
    assert_eq!(storage.part_attempts.lock().unwrap()[&1], 1);
}

#[tokio::test]
async fn test_access_denied_on_initiate() {
    let store = setup_store().await;
    register(store.as_ref(), "t-denied-init", SOURCE_URL, BUCKET).await;

    let source = Arc::new(MockSource::new(vec![MockSource::body(&payload(100), 10)]));
    let storage = Arc::new(MockStorageService {
        deny_initiate: Some("AccessDenied".to_string()),
        ..Default::default()
    });

    let result = engine(&source, &storage, &store)
        .transfer(request("t-denied-init"), Arc::new(NoopObserver))
        .await;

    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::StorageError);
    assert!(error.message.contains("Access denied"));
    assert!(!error.retryable);
    // Nothing was initiated, so there is nothing to abort.
    assert_eq!(storage.abort_count(), 0);
}

#[tokio::test]
async fn test_missing_bucket_message() {
    let store = setup_store().await;
    register(store.as_ref(), "t-nobucket", SOURCE_URL, BUCKET).await;

    let source = Arc::new(MockSource::new(vec![MockSource::body(&payload(100), 10)]));
    let storage = Arc::new(MockStorageService {
        deny_initiate: Some("NoSuchBucket".to_string()),
        ..Default::default()
    });

    let result = engine(&source, &storage, &store)
        .transfer(request("t-nobucket"), Arc::new(NoopObserver))
        .await;

    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::StorageError);
    assert!(error.message.contains("does not exist"));
}

#[tokio::test]
async fn test_reset_at_forty_percent_is_streaming_error() {
    let store = setup_store().await;
    register(store.as_ref(), "t-reset", SOURCE_URL, BUCKET).await;

    let total = 10_000_000u64;
    let mut chunks = chunked(&payload(4_000_000), 100_000);
    chunks.push(Err(stream_fault(FaultCode::ConnectionReset)));
    let source = Arc::new(MockSource::new(vec![SourceScript::Body {
        total_bytes: Some(total),
        chunks,
    }]));
    let storage = Arc::new(MockStorageService::default());

    let result = engine(&source, &storage, &store)
        .transfer(request("t-reset"), Arc::new(NoopObserver))
        .await;

    assert_eq!(result.bytes_transferred, 4_000_000);
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::StreamingError);
    assert!(error.message.contains("4000000"), "{}", error.message);
    assert!(error.message.contains("40%"), "{}", error.message);
    assert!(error.retryable);
    assert_eq!(storage.abort_count(), 1);

    let record = store.get("t-reset").await.unwrap().unwrap();
    assert_eq!(record.status, TransferStatus::Failed);
    assert_eq!(record.bytes_transferred, 4_000_000);
    assert_eq!(record.percentage, 40);
    assert_eq!(record.retryable, Some(true));
}

#[tokio::test]
async fn test_premature_close_is_detected() {
    let store = setup_store().await;
    register(store.as_ref(), "t-short", SOURCE_URL, BUCKET).await;

    let source = Arc::new(MockSource::new(vec![SourceScript::Body {
        total_bytes: Some(1000),
        chunks: chunked(&payload(600), 100),
    }]));
    let storage = Arc::new(MockStorageService::default());

    let result = engine(&source, &storage, &store)
        .transfer(request("t-short"), Arc::new(NoopObserver))
        .await;

    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::StreamingError);
    assert!(error.message.contains("60%"));
    assert!(error.retryable);
    assert_eq!(storage.abort_count(), 1);
    assert!(storage.object(BUCKET, "dataset.zip").is_none());
}

#[tokio::test]
async fn test_retry_after_failure_overwrites_key() {
    let store = setup_store().await;
    register(store.as_ref(), "t-retry", SOURCE_URL, BUCKET).await;

    let data = payload(3 * MIB);
    let mut broken = chunked(&data[..MIB], 64 * 1024);
    broken.push(Err(stream_fault(FaultCode::ConnectionReset)));
    let source = Arc::new(MockSource::new(vec![
        SourceScript::Body {
            total_bytes: Some(data.len() as u64),
            chunks: broken,
        },
        MockSource::body(&data, 64 * 1024),
    ]));
    let storage = Arc::new(MockStorageService::default());
    storage
        .objects
        .lock()
        .unwrap()
        .insert(format!("{}/dataset.zip", BUCKET), b"stale".to_vec());

    let first = engine(&source, &storage, &store)
        .transfer(request("t-retry"), Arc::new(NoopObserver))
        .await;
    assert!(!first.success);
    assert!(first.is_retryable());

    let second = engine(&source, &storage, &store)
        .transfer(request("t-retry"), Arc::new(NoopObserver))
        .await;
    assert!(second.success, "retry failed: {:?}", second.error);
    assert_eq!(second.bytes_transferred, data.len() as u64);
    assert_eq!(storage.object(BUCKET, "dataset.zip"), Some(data));

    let record = store.get("t-retry").await.unwrap().unwrap();
    assert_eq!(record.status, TransferStatus::Completed);
    assert!(record.error.is_none());
    assert!(record.error_code.is_none());
    assert_eq!(source.open_count(), 2);
}

#[tokio::test]
async fn test_completed_transfer_is_refused() {
    let store = setup_store().await;
    register(store.as_ref(), "t-done", SOURCE_URL, BUCKET).await;

    let source = Arc::new(MockSource::new(vec![MockSource::body(&payload(10), 10)]));
    let storage = Arc::new(MockStorageService::default());
    let first = engine(&source, &storage, &store)
        .transfer(request("t-done"), Arc::new(NoopObserver))
        .await;
    assert!(first.success);

    let again = engine(&source, &storage, &store)
        .transfer(request("t-done"), Arc::new(NoopObserver))
        .await;
    let error = again.error.unwrap();
    assert_eq!(error.kind, ErrorKind::ValidationError);
    assert!(!error.retryable);
    assert_eq!(source.open_count(), 1);

    let record = store.get("t-done").await.unwrap().unwrap();
    assert_eq!(record.status, TransferStatus::Completed);
}

#[tokio::test]
async fn test_missing_record_is_validation_error() {
    let store = setup_store().await;
    let source = Arc::new(MockSource::default());
    let storage = Arc::new(MockStorageService::default());

    let result = engine(&source, &storage, &store)
        .transfer(request("does-not-exist"), Arc::new(NoopObserver))
        .await;

    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::ValidationError);
    assert!(error.message.contains("does-not-exist"));
    assert!(!error.retryable);
    assert_eq!(source.open_count(), 0);
    assert_eq!(storage.initiate_count(), 0);
}

#[tokio::test]
async fn test_invalid_bucket_fails_record() {
    let store = setup_store().await;
    register(store.as_ref(), "t-badbucket", SOURCE_URL, "Bad_Bucket").await;

    let source = Arc::new(MockSource::default());
    let storage = Arc::new(MockStorageService::default());

    let mut req = request("t-badbucket");
    req.bucket = "Bad_Bucket".to_string();
    let result = engine(&source, &storage, &store)
        .transfer(req, Arc::new(NoopObserver))
        .await;

    assert_eq!(result.error.unwrap().kind, ErrorKind::ValidationError);
    assert_eq!(source.open_count(), 0);

    let record = store.get("t-badbucket").await.unwrap().unwrap();
    assert_eq!(record.status, TransferStatus::Failed);
    assert_eq!(record.error_code, Some(ErrorKind::ValidationError));
}

#[tokio::test]
async fn test_progress_is_monotonic_and_reaches_total() {
    let store = setup_store().await;
    register(store.as_ref(), "t-progress", SOURCE_URL, BUCKET).await;

    let data = payload(7 * MIB + 123);
    let source = Arc::new(MockSource::new(vec![MockSource::body(&data, 300_000)]));
    let storage = Arc::new(MockStorageService::default());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let observer = Arc::new(move |bytes: u64, total: u64| {
        sink.lock().unwrap().push((bytes, total));
    });

    let result = engine(&source, &storage, &store)
        .transfer(request("t-progress"), observer)
        .await;
    assert!(result.success);

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    let percentages: Vec<u64> = seen.iter().map(|(b, t)| b * 100 / t).collect();
    assert!(percentages.windows(2).all(|w| w[0] <= w[1]));
    assert!(seen.iter().all(|(b, t)| b <= t));
    assert_eq!(seen.last().copied(), Some((data.len() as u64, data.len() as u64)));
}

#[tokio::test]
async fn test_unknown_length_reports_zero_percent() {
    let store = setup_store().await;
    register(store.as_ref(), "t-unknown", SOURCE_URL, BUCKET).await;

    let data = payload(200_000);
    let source = Arc::new(MockSource::new(vec![SourceScript::Body {
        total_bytes: None,
        chunks: chunked(&data, 10_000),
    }]));
    let storage = Arc::new(MockStorageService::default());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let observer = Arc::new(move |bytes: u64, total: u64| {
        sink.lock().unwrap().push((bytes, total));
    });

    let result = engine(&source, &storage, &store)
        .transfer(request("t-unknown"), observer)
        .await;
    assert!(result.success);
    assert!(seen.lock().unwrap().iter().all(|(_, total)| *total == 0));

    let record = store.get("t-unknown").await.unwrap().unwrap();
    assert_eq!(record.bytes_transferred, 200_000);
    assert_eq!(record.total_bytes, 200_000);
}

#[tokio::test]
async fn test_empty_payload_completes_with_single_part() {
    let store = setup_store().await;
    register(store.as_ref(), "t-empty", SOURCE_URL, BUCKET).await;

    let source = Arc::new(MockSource::new(vec![SourceScript::Body {
        total_bytes: Some(0),
        chunks: Vec::new(),
    }]));
    let storage = Arc::new(MockStorageService::default());

    let result = engine(&source, &storage, &store)
        .transfer(request("t-empty"), Arc::new(NoopObserver))
        .await;

    assert!(result.success);
    assert_eq!(result.bytes_transferred, 0);
    assert_eq!(*storage.completed_orders.lock().unwrap(), vec![vec![1]]);
    assert_eq!(storage.object(BUCKET, "dataset.zip"), Some(Vec::new()));

    let record = store.get("t-empty").await.unwrap().unwrap();
    assert_eq!(record.percentage, 0);
}

#[tokio::test]
async fn test_transient_part_failures_are_retried() {
    let store = setup_store().await;
    register(store.as_ref(), "t-flaky", SOURCE_URL, BUCKET).await;

    let data = payload(11 * MIB);
    let source = Arc::new(MockSource::new(vec![MockSource::body(&data, MIB)]));
    let storage = Arc::new(MockStorageService {
        flaky_parts: Mutex::new(HashMap::from([(2, 2)])),
        ..Default::default()
    });

    let result = engine(&source, &storage, &store)
        .transfer(request("t-flaky"), Arc::new(NoopObserver))
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(storage.part_attempts.lock().unwrap()[&2], 3);
    assert_eq!(storage.abort_count(), 0);
    assert_eq!(storage.object(BUCKET, "dataset.zip"), Some(data));
}

#[tokio::test]
async fn test_part_retry_exhaustion_is_streaming_error() {
    let store = setup_store().await;
    register(store.as_ref(), "t-exhausted", SOURCE_URL, BUCKET).await;

    let data = payload(6 * MIB);
    let source = Arc::new(MockSource::new(vec![MockSource::body(&data, MIB)]));
    let storage = Arc::new(MockStorageService {
        flaky_parts: Mutex::new(HashMap::from([(1, 10)])),
        ..Default::default()
    });

    let result = engine(&source, &storage, &store)
        .transfer(request("t-exhausted"), Arc::new(NoopObserver))
        .await;

    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::StreamingError);
    assert!(error.message.contains("part 1"));
    assert!(error.retryable);
    assert_eq!(storage.part_attempts.lock().unwrap()[&1], 3);
    assert_eq!(storage.abort_count(), 1);
}

#[tokio::test]
async fn test_registered_inputs_win_over_request() {
    let store = setup_store().await;
    register(store.as_ref(), "t-mismatch", SOURCE_URL, BUCKET).await;

    let source = Arc::new(MockSource::default());
    let storage = Arc::new(MockStorageService::default());

    let mut req = request("t-mismatch");
    req.source_url = "https://elsewhere.example.com/b/other.zip".to_string();
    req.bucket = "other-bucket".to_string();
    let result = engine(&source, &storage, &store)
        .transfer(req, Arc::new(NoopObserver))
        .await;

    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::ValidationError);
    assert!(error.message.contains("source_url, bucket"));
    assert!(!error.retryable);
    assert_eq!(source.open_count(), 0);
    assert_eq!(storage.initiate_count(), 0);

    let record = store.get("t-mismatch").await.unwrap().unwrap();
    assert_eq!(record.status, TransferStatus::Failed);
    assert_eq!(record.bucket, BUCKET);
    assert_eq!(record.source_url, SOURCE_URL);
    assert!(record.s3_location.is_none());
}

#[tokio::test]
async fn test_rejected_rerun_overwrites_previous_failure() {
    let store = setup_store().await;
    register(store.as_ref(), "t-rerun", SOURCE_URL, BUCKET).await;

    let source = Arc::new(MockSource::new(vec![SourceScript::OpenError(Fault::new(
        FaultOrigin::SourceOpen,
        FaultCode::HttpStatus(503),
        "GET returned 503 Service Unavailable",
    ))]));
    let storage = Arc::new(MockStorageService::default());

    let first = engine(&source, &storage, &store)
        .transfer(request("t-rerun"), Arc::new(NoopObserver))
        .await;
    assert_eq!(first.error.unwrap().kind, ErrorKind::UrlFetchError);

    let mut req = request("t-rerun");
    req.bucket = "other-bucket".to_string();
    let second = engine(&source, &storage, &store)
        .transfer(req, Arc::new(NoopObserver))
        .await;
    let error = second.error.unwrap();
    assert_eq!(error.kind, ErrorKind::ValidationError);

    let record = store.get("t-rerun").await.unwrap().unwrap();
    assert_eq!(record.status, TransferStatus::Failed);
    assert_eq!(record.error_code, Some(ErrorKind::ValidationError));
    assert_eq!(record.retryable, Some(false));
    assert_eq!(record.error, Some(error.message));
}

#[tokio::test]
async fn test_failed_submit_counts_the_consumed_chunk() {
    let store = setup_store().await;
    register(store.as_ref(), "t-cursor", SOURCE_URL, BUCKET).await;

    let data = payload(12 * MIB);
    let source = Arc::new(MockSource::new(vec![MockSource::body(&data, MIB)]));
    let storage = Arc::new(MockStorageService {
        deny_part: Some(1),
        ..Default::default()
    });
    let config = TransferConfig {
        part_concurrency: 1,
        ..test_config()
    };

    // Part 1 is rejected; the failure surfaces while submitting part 2 on the tenth chunk.
    let result = TransferEngine::new(source.clone(), storage.clone(), store.clone(), config)
        .transfer(request("t-cursor"), Arc::new(NoopObserver))
        .await;

    assert_eq!(result.error.unwrap().kind, ErrorKind::StorageError);
    assert_eq!(result.bytes_transferred, 10 * MIB as u64);
    assert_eq!(storage.abort_count(), 1);

    let record = store.get("t-cursor").await.unwrap().unwrap();
    assert_eq!(record.bytes_transferred, 10 * MIB as u64);
}
