use crate::services::fault::{Fault, FaultCode, FaultOrigin, StorageOp, code_from_message};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::Bytes;

/// Multipart-upload operations of the destination object store.
#[async_trait]
pub trait StorageService: Send + Sync {
    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<String, Fault>;
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> Result<String, Fault>;
    /// `parts` must already be sorted by part number.
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<(i32, String)>,
    ) -> Result<(), Fault>;
    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), Fault>;
}

pub struct S3StorageService {
    client: Client,
}

impl S3StorageService {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StorageService for S3StorageService {
    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<String, Fault> {
        let res = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| fault_from_sdk(StorageOp::Initiate, e))?;

        res.upload_id().map(str::to_string).ok_or_else(|| {
            Fault::new(
                FaultOrigin::Storage(StorageOp::Initiate),
                FaultCode::Unknown,
                "No upload ID",
            )
        })
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> Result<String, Fault> {
        let res = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| fault_from_sdk(StorageOp::UploadPart(part_number), e))?;

        Ok(res.e_tag().unwrap_or_default().to_string())
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<(i32, String)>,
    ) -> Result<(), Fault> {
        let completed_parts = parts
            .into_iter()
            .map(|(part_number, etag)| {
                CompletedPart::builder()
                    .e_tag(etag)
                    .part_number(part_number)
                    .build()
            })
            .collect::<Vec<_>>();

        let completed_multipart_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_multipart_upload)
            .send()
            .await
            .map_err(|e| fault_from_sdk(StorageOp::Complete, e))?;
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), Fault> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| fault_from_sdk(StorageOp::Abort, e))?;
        Ok(())
    }
}

/// Extracts a structured code from an SDK error: the service error code when the store
/// returned one, the raw HTTP status when it did not, and the dispatch failure kind for
/// transport errors.
pub fn fault_from_sdk<E>(op: StorageOp, err: SdkError<E, HttpResponse>) -> Fault
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let detail = DisplayErrorContext(&err).to_string();

    let code = match &err {
        SdkError::TimeoutError(_) => FaultCode::Timeout,
        SdkError::DispatchFailure(failure) if failure.is_timeout() => FaultCode::Timeout,
        SdkError::DispatchFailure(_) => match code_from_message(&detail) {
            FaultCode::Unknown => FaultCode::ConnectionReset,
            code => code,
        },
        SdkError::ServiceError(_) | SdkError::ResponseError(_) => match err.code() {
            Some(code) => FaultCode::Service(code.to_string()),
            None => code_from_status(err.raw_response().map(|r| r.status().as_u16())),
        },
        _ => code_from_message(&detail),
    };

    Fault::new(FaultOrigin::Storage(op), code, detail)
}

/// Some responses (HEAD, or bodies the SDK cannot parse) carry no error code.
fn code_from_status(status: Option<u16>) -> FaultCode {
    match status {
        Some(403) => FaultCode::Service("AccessDenied".to_string()),
        Some(404) => FaultCode::Service("NoSuchBucket".to_string()),
        Some(429) | Some(503) => FaultCode::Service("SlowDown".to_string()),
        Some(500) => FaultCode::Service("InternalError".to_string()),
        Some(other) => FaultCode::HttpStatus(other),
        None => FaultCode::Unknown,
    }
}
