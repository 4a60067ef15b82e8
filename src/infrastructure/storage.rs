use crate::services::storage::S3StorageService;
use aws_sdk_s3::config::Region;
use std::env;
use std::sync::Arc;
use tracing::info;

/// Builds the S3 client from the standard AWS environment.
///
/// `S3_ENDPOINT` switches to a custom endpoint with path-style addressing (MinIO, LocalStack).
pub async fn setup_storage() -> Arc<S3StorageService> {
    let region = env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string());
    let endpoint_url = env::var("S3_ENDPOINT").ok().filter(|e| !e.is_empty());

    let mut loader = aws_config::from_env().region(Region::new(region.clone()));
    if let Some(endpoint) = &endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }
    let aws_config = loader.load().await;

    let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
        .force_path_style(endpoint_url.is_some())
        .build();

    match &endpoint_url {
        Some(endpoint) => info!("☁️  S3 Storage: {} (region {}, path-style)", endpoint, region),
        None => info!("☁️  S3 Storage: AWS (region {})", region),
    }

    let s3_client = aws_sdk_s3::Client::from_conf(s3_config);
    Arc::new(S3StorageService::new(s3_client))
}
