use std::error::Error as StdError;
use std::fmt;
use std::io;
use thiserror::Error;

/// Where in the pipeline a fault was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOrigin {
    /// Engine inputs or preconditions (record lookup, key derivation).
    Input,
    /// Opening the source: connect, TLS, response status.
    SourceOpen,
    /// Reading the source body after the response was accepted.
    SourceStream,
    /// A call against the destination object store.
    Storage(StorageOp),
    /// Part bookkeeping inside the engine.
    PartBuilder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    Initiate,
    UploadPart(i32),
    Complete,
    Abort,
}

impl fmt::Display for StorageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageOp::Initiate => write!(f, "initiate multipart upload"),
            StorageOp::UploadPart(n) => write!(f, "upload part {}", n),
            StorageOp::Complete => write!(f, "complete multipart upload"),
            StorageOp::Abort => write!(f, "abort multipart upload"),
        }
    }
}

/// Structured cause of a fault, extracted from the transport layer wherever it exposes one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultCode {
    Dns,
    ConnectionRefused,
    ConnectionReset,
    ConnectionAborted,
    NetworkUnreachable,
    BrokenPipe,
    Tls,
    Timeout,
    PrematureClose,
    OutOfMemory,
    /// Non-2xx response from the source.
    HttpStatus(u16),
    /// Error code returned by the object store (`NoSuchBucket`, `AccessDenied`, `SlowDown`, ...).
    Service(String),
    MissingRecord,
    AlreadyCompleted,
    InvalidInput,
    PartLimitExceeded,
    Unknown,
}

#[derive(Debug, Clone, Error)]
#[error("{origin:?} fault ({code:?}): {detail}")]
pub struct Fault {
    pub origin: FaultOrigin,
    pub code: FaultCode,
    pub detail: String,
}

impl Fault {
    pub fn new(origin: FaultOrigin, code: FaultCode, detail: impl Into<String>) -> Self {
        Self {
            origin,
            code,
            detail: detail.into(),
        }
    }

    pub fn invalid_input(detail: impl Into<String>) -> Self {
        Self::new(FaultOrigin::Input, FaultCode::InvalidInput, detail)
    }

    /// Builds a fault from a `reqwest` error, preferring its structured flags and the
    /// `io::ErrorKind` buried in the source chain over message text.
    pub fn from_reqwest(origin: FaultOrigin, err: &reqwest::Error) -> Self {
        let detail = error_chain_text(err);
        let code = if err.is_timeout() {
            FaultCode::Timeout
        } else if let Some(status) = err.status() {
            FaultCode::HttpStatus(status.as_u16())
        } else if let Some(code) = find_io_error(err).and_then(|e| code_from_io_kind(e.kind())) {
            code
        } else {
            code_from_message(&detail)
        };

        Self::new(origin, code, detail)
    }

    /// True when the fault is one of the known-transient conditions.
    pub fn is_transient(&self) -> bool {
        is_transient_code(&self.code)
    }
}

const RETRYABLE_SERVICE_CODES: &[&str] = &[
    "SlowDown",
    "Throttling",
    "ThrottlingException",
    "TooManyRequests",
    "RequestTimeout",
    "RequestTimeoutException",
    "ServiceUnavailable",
    "InternalError",
];

const RETRYABLE_HTTP_STATUSES: &[u16] = &[408, 429, 502, 503, 504];

pub fn is_transient_code(code: &FaultCode) -> bool {
    match code {
        FaultCode::Timeout
        | FaultCode::ConnectionReset
        | FaultCode::ConnectionAborted
        | FaultCode::BrokenPipe
        | FaultCode::PrematureClose => true,
        FaultCode::HttpStatus(status) => RETRYABLE_HTTP_STATUSES.contains(status),
        FaultCode::Service(name) => RETRYABLE_SERVICE_CODES.contains(&name.as_str()),
        _ => false,
    }
}

pub fn code_from_io_kind(kind: io::ErrorKind) -> Option<FaultCode> {
    use io::ErrorKind::*;
    match kind {
        ConnectionRefused => Some(FaultCode::ConnectionRefused),
        ConnectionReset => Some(FaultCode::ConnectionReset),
        ConnectionAborted => Some(FaultCode::ConnectionAborted),
        NetworkUnreachable | HostUnreachable => Some(FaultCode::NetworkUnreachable),
        BrokenPipe => Some(FaultCode::BrokenPipe),
        TimedOut => Some(FaultCode::Timeout),
        UnexpectedEof => Some(FaultCode::PrematureClose),
        OutOfMemory => Some(FaultCode::OutOfMemory),
        _ => None,
    }
}

/// Last-resort classification from error text.
///
/// Neither hyper nor the AWS connector expose DNS or TLS failures as typed errors, so those
/// arrive here. This is a known fragility: wording changes upstream silently degrade a code to
/// `Unknown`, and a generic message that happens to mention "aborted" or "timeout" may be
/// misread. Only reached when no structured code was found.
pub fn code_from_message(message: &str) -> FaultCode {
    let msg = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| msg.contains(n));

    if has(&[
        "dns error",
        "failed to lookup address",
        "name or service not known",
        "nodename nor servname",
        "no such host",
    ]) {
        FaultCode::Dns
    } else if has(&["connection refused"]) {
        FaultCode::ConnectionRefused
    } else if has(&["connection reset", "reset by peer"]) {
        FaultCode::ConnectionReset
    } else if has(&["broken pipe"]) {
        FaultCode::BrokenPipe
    } else if has(&["network is unreachable", "network unreachable", "host is unreachable"]) {
        FaultCode::NetworkUnreachable
    } else if has(&["certificate", "tls", "ssl", "handshake"]) {
        FaultCode::Tls
    } else if has(&["timed out", "timeout"]) {
        FaultCode::Timeout
    } else if has(&[
        "connection closed before message completed",
        "unexpected eof",
        "end of file before message length reached",
        "premature",
    ]) {
        FaultCode::PrematureClose
    } else if has(&["out of memory", "memory allocation"]) {
        FaultCode::OutOfMemory
    } else if has(&["aborted"]) {
        FaultCode::ConnectionAborted
    } else {
        FaultCode::Unknown
    }
}

pub fn find_io_error<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a io::Error> {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return Some(io_err);
        }
        current = e.source();
    }
    None
}

/// Joins an error and its sources into one line.
pub fn error_chain_text(err: &(dyn StdError + 'static)) -> String {
    let mut text = err.to_string();
    let mut current = err.source();
    while let Some(e) = current {
        let part = e.to_string();
        if !text.contains(&part) {
            text.push_str(": ");
            text.push_str(&part);
        }
        current = e.source();
    }
    text
}
