use crate::services::fault::{Fault, FaultCode, FaultOrigin, StorageOp, is_transient_code};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// The four failure kinds surfaced to callers and orchestrators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    UrlFetchError,
    #[serde(rename = "S3_ERROR")]
    StorageError,
    StreamingError,
    ValidationError,
}

impl ErrorKind {
    /// Stable taxonomy code persisted with failed records.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::UrlFetchError => "URL_FETCH_ERROR",
            ErrorKind::StorageError => "S3_ERROR",
            ErrorKind::StreamingError => "STREAMING_ERROR",
            ErrorKind::ValidationError => "VALIDATION_ERROR",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "URL_FETCH_ERROR" => Some(ErrorKind::UrlFetchError),
            "S3_ERROR" => Some(ErrorKind::StorageError),
            "STREAMING_ERROR" => Some(ErrorKind::StreamingError),
            "VALIDATION_ERROR" => Some(ErrorKind::ValidationError),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TransferError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Byte cursor at the moment a fault was observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub bytes_transferred: u64,
    pub total_bytes: u64,
}

impl ProgressSnapshot {
    pub fn new(bytes_transferred: u64, total_bytes: u64) -> Self {
        Self {
            bytes_transferred,
            total_bytes,
        }
    }

    pub fn percentage(&self) -> u8 {
        percentage(self.bytes_transferred, self.total_bytes)
    }
}

/// `floor(bytes / total * 100)`, 0 when the total is unknown, capped at 100.
pub fn percentage(bytes_transferred: u64, total_bytes: u64) -> u8 {
    if total_bytes == 0 {
        return 0;
    }
    let pct = (bytes_transferred as u128 * 100) / total_bytes as u128;
    pct.min(100) as u8
}

/// Maps a fault to exactly one classified error.
pub fn classify(fault: &Fault, progress: ProgressSnapshot) -> TransferError {
    let (kind, message) = match fault.origin {
        FaultOrigin::Input => (ErrorKind::ValidationError, validation_message(fault)),
        FaultOrigin::SourceOpen => (ErrorKind::UrlFetchError, source_message(&fault.code)),
        FaultOrigin::SourceStream | FaultOrigin::PartBuilder => (
            ErrorKind::StreamingError,
            streaming_message(&stream_cause(&fault.code), progress),
        ),
        FaultOrigin::Storage(op) => match &fault.code {
            FaultCode::Service(name) => (ErrorKind::StorageError, service_message(name, op)),
            code => match op {
                StorageOp::UploadPart(part) => (
                    ErrorKind::StreamingError,
                    streaming_message(
                        &format!("part {} upload failed ({})", part, stream_cause(code)),
                        progress,
                    ),
                ),
                _ => (
                    ErrorKind::StorageError,
                    format!(
                        "Could not {}: destination storage unreachable ({})",
                        op,
                        stream_cause(code)
                    ),
                ),
            },
        },
    };

    // Precondition failures are only worth retrying when the state store timed out.
    let retryable = match kind {
        ErrorKind::ValidationError => fault.code == FaultCode::Timeout,
        _ => is_transient_code(&fault.code),
    };

    TransferError {
        kind,
        message,
        retryable,
    }
}

fn validation_message(fault: &Fault) -> String {
    match fault.code {
        FaultCode::MissingRecord => format!("Transfer record not found: {}", fault.detail),
        FaultCode::AlreadyCompleted => format!("Transfer already completed: {}", fault.detail),
        _ => format!("Invalid transfer request: {}", fault.detail),
    }
}

fn source_message(code: &FaultCode) -> String {
    match code {
        FaultCode::HttpStatus(401) => {
            "Source URL requires authentication (HTTP 401 Unauthorized)".to_string()
        }
        FaultCode::HttpStatus(403) => "Access to source URL is forbidden (HTTP 403)".to_string(),
        FaultCode::HttpStatus(404) => "Source file not found (HTTP 404)".to_string(),
        FaultCode::HttpStatus(500) => "Source server error (HTTP 500)".to_string(),
        FaultCode::HttpStatus(503) => "Source server unavailable (HTTP 503)".to_string(),
        FaultCode::HttpStatus(s) if (400..500).contains(s) => {
            format!("Source rejected the request (HTTP {})", s)
        }
        FaultCode::HttpStatus(s) if (500..600).contains(s) => {
            format!("Source server returned an error (HTTP {})", s)
        }
        FaultCode::HttpStatus(s) => format!("Unexpected response from source (HTTP {})", s),
        FaultCode::Dns => "Could not resolve source host (DNS lookup failed)".to_string(),
        FaultCode::ConnectionRefused => "Connection to source refused".to_string(),
        FaultCode::ConnectionReset => "Connection to source was reset".to_string(),
        FaultCode::ConnectionAborted => "Connection to source was aborted".to_string(),
        FaultCode::NetworkUnreachable => "Source host is unreachable".to_string(),
        FaultCode::Tls => "Secure connection to source failed (TLS handshake)".to_string(),
        FaultCode::Timeout => "Timed out connecting to source".to_string(),
        _ => "Failed to fetch source URL".to_string(),
    }
}

fn stream_cause(code: &FaultCode) -> String {
    match code {
        FaultCode::ConnectionReset => "connection reset".to_string(),
        FaultCode::ConnectionAborted => "connection aborted".to_string(),
        FaultCode::BrokenPipe => "broken pipe".to_string(),
        FaultCode::PrematureClose => "source closed the connection early".to_string(),
        FaultCode::Timeout => "timed out".to_string(),
        FaultCode::OutOfMemory => "out of memory".to_string(),
        FaultCode::NetworkUnreachable => "network unreachable".to_string(),
        FaultCode::PartLimitExceeded => "maximum part count exceeded".to_string(),
        FaultCode::HttpStatus(s) => format!("HTTP {}", s),
        FaultCode::Dns => "DNS lookup failed".to_string(),
        FaultCode::Tls => "TLS failure".to_string(),
        FaultCode::ConnectionRefused => "connection refused".to_string(),
        _ => "stream error".to_string(),
    }
}

fn streaming_message(cause: &str, progress: ProgressSnapshot) -> String {
    if progress.total_bytes > 0 {
        format!(
            "Transfer interrupted after {} of {} bytes ({}%): {}",
            progress.bytes_transferred,
            progress.total_bytes,
            progress.percentage(),
            cause
        )
    } else {
        format!(
            "Transfer interrupted after {} bytes (0%, total size unknown): {}",
            progress.bytes_transferred, cause
        )
    }
}

fn service_message(name: &str, op: StorageOp) -> String {
    match name {
        "NoSuchBucket" => "Destination bucket does not exist".to_string(),
        "AccessDenied" | "AllAccessDisabled" | "InvalidAccessKeyId" | "SignatureDoesNotMatch" => {
            format!("Access denied to destination bucket ({})", name)
        }
        "SlowDown" | "Throttling" | "ThrottlingException" | "TooManyRequests" => {
            "Destination storage is throttling requests".to_string()
        }
        "ServiceUnavailable" | "InternalError" => {
            "Destination storage is temporarily unavailable".to_string()
        }
        "NoSuchUpload" => "Multipart upload no longer exists at destination".to_string(),
        "EntityTooSmall" | "InvalidPart" | "InvalidPartOrder" => {
            format!("Destination rejected the uploaded parts ({})", name)
        }
        other => format!("Storage error during {}: {}", op, other),
    }
}
