use crate::config::TransferConfig;
use crate::services::fault::{Fault, FaultCode, FaultOrigin};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::header::CONTENT_TYPE;
use url::Url;

const EXPECTED_CONTENT_TYPES: &[&str] = &[
    "application/zip",
    "application/x-zip",
    "application/x-zip-compressed",
    "application/octet-stream",
    "binary/octet-stream",
];

/// An opened source body: a lazy chunk stream plus the declared length, if any.
pub struct SourceStream {
    pub total_bytes: Option<u64>,
    pub chunks: BoxStream<'static, Result<Bytes, Fault>>,
}

impl std::fmt::Debug for SourceStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceStream")
            .field("total_bytes", &self.total_bytes)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait SourceReader: Send + Sync {
    async fn open(&self, url: &Url) -> Result<SourceStream, Fault>;
}

pub struct HttpSourceReader {
    client: reqwest::Client,
}

impl HttpSourceReader {
    pub fn new(config: &TransferConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .https_only(config.require_https)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SourceReader for HttpSourceReader {
    async fn open(&self, url: &Url) -> Result<SourceStream, Fault> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Fault::from_reqwest(FaultOrigin::SourceOpen, &e))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!("🌐 Source responded with HTTP {} for {}", status.as_u16(), url);
            return Err(Fault::new(
                FaultOrigin::SourceOpen,
                FaultCode::HttpStatus(status.as_u16()),
                format!("GET {} returned {}", url, status),
            ));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        if let Some(content_type) = content_type.filter(|ct| !is_expected_content_type(ct)) {
            tracing::warn!(
                "⚠️ Unexpected content-type '{}' for {}, continuing anyway",
                content_type,
                url
            );
        }

        let total_bytes = response.content_length();
        match total_bytes {
            Some(len) => tracing::info!("🌐 Source opened: {} ({} bytes)", url, len),
            None => tracing::info!("🌐 Source opened: {} (unknown length)", url),
        }

        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| Fault::from_reqwest(FaultOrigin::SourceStream, &e)))
            .boxed();

        Ok(SourceStream {
            total_bytes,
            chunks: enforce_length(chunks, total_bytes),
        })
    }
}

fn is_expected_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    EXPECTED_CONTENT_TYPES.contains(&essence.as_str())
}

/// Appends a premature-close fault when a declared-length stream ends short.
pub fn enforce_length(
    chunks: BoxStream<'static, Result<Bytes, Fault>>,
    declared: Option<u64>,
) -> BoxStream<'static, Result<Bytes, Fault>> {
    let Some(expected) = declared else {
        return chunks;
    };

    stream::unfold(
        (chunks, 0u64, false),
        move |(mut chunks, received, done)| async move {
            if done {
                return None;
            }
            match chunks.next().await {
                Some(Ok(chunk)) => {
                    let received = received + chunk.len() as u64;
                    Some((Ok(chunk), (chunks, received, false)))
                }
                Some(Err(fault)) => Some((Err(fault), (chunks, received, true))),
                None if received < expected => Some((
                    Err(Fault::new(
                        FaultOrigin::SourceStream,
                        FaultCode::PrematureClose,
                        format!(
                            "source closed after {} of {} declared bytes",
                            received, expected
                        ),
                    )),
                    (chunks, received, true),
                )),
                None => None,
            }
        },
    )
    .boxed()
}
