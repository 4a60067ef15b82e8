use crate::entities::transfers;
use crate::services::error_classifier::{ErrorKind, TransferError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::InProgress => "in_progress",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
        }
    }

    /// Forward-only transitions. A failed or stale attempt may be reopened by a new run, and a
    /// run rejected before it opens an attempt fails the record directly, replacing any
    /// earlier failure.
    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Failed)
                | (Failed, InProgress)
                | (Failed, Failed)
                | (InProgress, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
        )
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransferStatus::Pending),
            "in_progress" => Ok(TransferStatus::InProgress),
            "completed" => Ok(TransferStatus::Completed),
            "failed" => Ok(TransferStatus::Failed),
            other => Err(format!("unknown transfer status '{}'", other)),
        }
    }
}

/// Read-only projection of a persisted transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TransferRecord {
    pub transfer_id: String,
    pub status: TransferStatus,
    pub source_url: String,
    pub bucket: String,
    pub key_prefix: Option<String>,
    pub s3_key: Option<String>,
    pub s3_location: Option<String>,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub percentage: u8,
    pub error: Option<String>,
    pub error_code: Option<ErrorKind>,
    pub retryable: Option<bool>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_update_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
}

impl TryFrom<transfers::Model> for TransferRecord {
    type Error = String;

    fn try_from(model: transfers::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            status: model.status.parse()?,
            error_code: model.error_code.as_deref().and_then(ErrorKind::from_code),
            transfer_id: model.transfer_id,
            source_url: model.source_url,
            bucket: model.bucket,
            key_prefix: model.key_prefix,
            s3_key: model.s3_key,
            s3_location: model.s3_location,
            bytes_transferred: model.bytes_transferred.max(0) as u64,
            total_bytes: model.total_bytes.max(0) as u64,
            percentage: model.percentage.clamp(0, 100) as u8,
            error: model.error,
            retryable: model.retryable,
            start_time: model.start_time,
            end_time: model.end_time,
            last_update_time: model.last_update_time,
            created_at: model.created_at,
            ttl: model.ttl,
        })
    }
}

/// Fields needed to register a transfer before any engine run.
#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub transfer_id: String,
    pub source_url: String,
    pub bucket: String,
    pub key_prefix: Option<String>,
}

/// Engine input for one run.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub transfer_id: String,
    pub source_url: String,
    pub bucket: String,
    pub key_prefix: Option<String>,
}

impl From<&TransferRecord> for TransferRequest {
    fn from(record: &TransferRecord) -> Self {
        Self {
            transfer_id: record.transfer_id.clone(),
            source_url: record.source_url.clone(),
            bucket: record.bucket.clone(),
            key_prefix: record.key_prefix.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TransferResult {
    pub transfer_id: String,
    pub success: bool,
    pub s3_location: Option<String>,
    pub error: Option<TransferError>,
    pub bytes_transferred: u64,
}

impl TransferResult {
    pub fn succeeded(transfer_id: String, s3_location: String, bytes_transferred: u64) -> Self {
        Self {
            transfer_id,
            success: true,
            s3_location: Some(s3_location),
            error: None,
            bytes_transferred,
        }
    }

    pub fn failed(transfer_id: String, error: TransferError, bytes_transferred: u64) -> Self {
        Self {
            transfer_id,
            success: false,
            s3_location: None,
            error: Some(error),
            bytes_transferred,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.error.as_ref().is_some_and(|e| e.retryable)
    }
}
