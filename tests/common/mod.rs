#![allow(dead_code)]

use archive_transfer::config::TransferConfig;
use archive_transfer::infrastructure::database;
use archive_transfer::models::NewTransfer;
use archive_transfer::services::fault::{Fault, FaultCode, FaultOrigin, StorageOp};
use archive_transfer::services::source::{SourceReader, SourceStream, enforce_length};
use archive_transfer::services::storage::StorageService;
use archive_transfer::services::transfer_store::{SeaOrmTransferStore, TransferStore};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use sea_orm::{Database, DatabaseConnection};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

pub const MIB: usize = 1024 * 1024;

pub async fn setup_test_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    database::run_migrations(&db).await.unwrap();
    db
}

pub async fn setup_store() -> Arc<SeaOrmTransferStore> {
    Arc::new(SeaOrmTransferStore::new(setup_test_db().await, 24))
}

pub async fn register(
    store: &dyn TransferStore,
    transfer_id: &str,
    source_url: &str,
    bucket: &str,
) {
    store
        .create(NewTransfer {
            transfer_id: transfer_id.to_string(),
            source_url: source_url.to_string(),
            bucket: bucket.to_string(),
            key_prefix: None,
        })
        .await
        .unwrap();
}

pub fn test_config() -> TransferConfig {
    TransferConfig {
        part_size: 5 * MIB,
        part_retry_base_delay: Duration::from_millis(1),
        abort_timeout: Duration::from_secs(2),
        progress_flush_timeout: Duration::from_secs(2),
        ..TransferConfig::development()
    }
}

/// Deterministic payload so reassembled objects can be compared byte for byte.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn chunked(data: &[u8], chunk_size: usize) -> Vec<Result<Bytes, Fault>> {
    data.chunks(chunk_size)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect()
}

pub fn stream_fault(code: FaultCode) -> Fault {
    Fault::new(FaultOrigin::SourceStream, code, "injected stream fault")
}

/// One scripted response of [`MockSource`].
pub enum SourceScript {
    Body {
        total_bytes: Option<u64>,
        chunks: Vec<Result<Bytes, Fault>>,
    },
    OpenError(Fault),
}

/// Source reader replaying scripted responses, one per `open`.
#[derive(Default)]
pub struct MockSource {
    scripts: Mutex<VecDeque<SourceScript>>,
    pub opened: Mutex<Vec<String>>,
}

impl MockSource {
    pub fn new(scripts: Vec<SourceScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn body(data: &[u8], chunk_size: usize) -> SourceScript {
        SourceScript::Body {
            total_bytes: Some(data.len() as u64),
            chunks: chunked(data, chunk_size),
        }
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }
}

#[async_trait]
impl SourceReader for MockSource {
    async fn open(&self, url: &Url) -> Result<SourceStream, Fault> {
        self.opened.lock().unwrap().push(url.to_string());
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(SourceScript::Body {
                total_bytes,
                chunks,
            }) => Ok(SourceStream {
                total_bytes,
                chunks: enforce_length(stream::iter(chunks).boxed(), total_bytes),
            }),
            Some(SourceScript::OpenError(fault)) => Err(fault),
            None => panic!("MockSource opened more times than scripted"),
        }
    }
}

/// Parts received for an upload that has not been completed yet.
#[derive(Default)]
pub struct PendingUpload {
    pub bucket: String,
    pub key: String,
    pub parts: BTreeMap<i32, Bytes>,
}

/// In-memory multipart store that records every call.
#[derive(Default)]
pub struct MockStorageService {
    pub objects: Mutex<HashMap<String, Vec<u8>>>,
    pub uploads: Mutex<HashMap<String, PendingUpload>>,
    pub next_upload: Mutex<u32>,
    pub initiated: Mutex<u32>,
    pub aborted: Mutex<Vec<String>>,
    pub completed_orders: Mutex<Vec<Vec<i32>>>,
    pub part_attempts: Mutex<HashMap<i32, u32>>,
    /// Service code returned by `create_multipart_upload`.
    pub deny_initiate: Option<String>,
    /// Part number rejected with `AccessDenied`.
    pub deny_part: Option<i32>,
    /// Transient failures injected before a part succeeds.
    pub flaky_parts: Mutex<HashMap<i32, u32>>,
    /// Artificial latency per part number.
    pub part_delays: HashMap<i32, Duration>,
}

impl MockStorageService {
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&format!("{}/{}", bucket, key))
            .cloned()
    }

    pub fn abort_count(&self) -> usize {
        self.aborted.lock().unwrap().len()
    }

    pub fn initiate_count(&self) -> u32 {
        *self.initiated.lock().unwrap()
    }
}

#[async_trait]
impl StorageService for MockStorageService {
    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<String, Fault> {
        *self.initiated.lock().unwrap() += 1;
        if let Some(code) = &self.deny_initiate {
            return Err(Fault::new(
                FaultOrigin::Storage(StorageOp::Initiate),
                FaultCode::Service(code.clone()),
                format!("{} on {}", code, bucket),
            ));
        }

        let upload_id = {
            let mut next = self.next_upload.lock().unwrap();
            *next += 1;
            format!("upload-{}", next)
        };
        self.uploads.lock().unwrap().insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> Result<String, Fault> {
        *self
            .part_attempts
            .lock()
            .unwrap()
            .entry(part_number)
            .or_default() += 1;

        if let Some(delay) = self.part_delays.get(&part_number) {
            tokio::time::sleep(*delay).await;
        }

        let origin = FaultOrigin::Storage(StorageOp::UploadPart(part_number));
        if self.deny_part == Some(part_number) {
            return Err(Fault::new(
                origin,
                FaultCode::Service("AccessDenied".to_string()),
                "Access Denied",
            ));
        }
        {
            let mut flaky = self.flaky_parts.lock().unwrap();
            if let Some(remaining) = flaky.get_mut(&part_number).filter(|r| **r > 0) {
                *remaining -= 1;
                return Err(Fault::new(origin, FaultCode::ConnectionReset, "reset"));
            }
        }

        let mut uploads = self.uploads.lock().unwrap();
        let upload = uploads.get_mut(upload_id).ok_or_else(|| {
            Fault::new(origin, FaultCode::Service("NoSuchUpload".into()), upload_id)
        })?;
        upload.parts.insert(part_number, data);
        Ok(format!("\"etag-{}-{}\"", upload_id, part_number))
    }

    async fn complete_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        parts: Vec<(i32, String)>,
    ) -> Result<(), Fault> {
        self.completed_orders
            .lock()
            .unwrap()
            .push(parts.iter().map(|(n, _)| *n).collect());

        let upload = self.uploads.lock().unwrap().remove(upload_id).ok_or_else(|| {
            Fault::new(
                FaultOrigin::Storage(StorageOp::Complete),
                FaultCode::Service("NoSuchUpload".into()),
                upload_id,
            )
        })?;

        let mut object = Vec::new();
        for (part_number, _) in &parts {
            if let Some(data) = upload.parts.get(part_number) {
                object.extend_from_slice(data);
            }
        }
        self.objects
            .lock()
            .unwrap()
            .insert(format!("{}/{}", upload.bucket, upload.key), object);
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> Result<(), Fault> {
        self.uploads.lock().unwrap().remove(upload_id);
        self.aborted.lock().unwrap().push(upload_id.to_string());
        Ok(())
    }
}
