use crate::AppState;
use crate::api::error::AppError;
use crate::models::{NewTransfer, TransferRecord, TransferRequest, TransferStatus};
use crate::services::progress::NoopObserver;
use crate::services::transfer_engine::TransferEngine;
use crate::utils::validation::{normalize_key_prefix, validate_bucket_name, validate_source_url};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Deserialize, ToSchema, Validate)]
pub struct CreateTransferRequest {
    #[validate(url(message = "source_url must be a valid URL"))]
    pub source_url: String,
    #[validate(length(
        min = 3,
        max = 63,
        message = "Bucket name must be between 3 and 63 characters"
    ))]
    pub bucket: String,
    #[validate(length(max = 512, message = "Key prefix is too long"))]
    pub key_prefix: Option<String>,
    /// Caller-supplied id; a UUID is generated when absent.
    #[validate(length(
        min = 1,
        max = 128,
        message = "transfer_id must be between 1 and 128 characters"
    ))]
    pub transfer_id: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct CreateTransferResponse {
    pub transfer_id: String,
    pub status: TransferStatus,
}

#[utoipa::path(
    post,
    path = "/transfers",
    request_body = CreateTransferRequest,
    responses(
        (status = 202, description = "Transfer accepted", body = CreateTransferResponse),
        (status = 400, description = "Invalid request"),
        (status = 409, description = "Transfer id already exists")
    ),
    tag = "transfers"
)]
pub async fn create_transfer(
    State(state): State<AppState>,
    Json(req): Json<CreateTransferRequest>,
) -> Result<(StatusCode, Json<CreateTransferResponse>), AppError> {
    req.validate().map_err(|e| AppError::BadRequest(e.to_string()))?;
    validate_source_url(&req.source_url, state.config.require_https)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    validate_bucket_name(&req.bucket).map_err(|e| AppError::BadRequest(e.to_string()))?;
    normalize_key_prefix(req.key_prefix.as_deref())
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let transfer_id = req
        .transfer_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    if state.store.get(&transfer_id).await?.is_some() {
        return Err(AppError::Conflict(format!(
            "Transfer {} already exists",
            transfer_id
        )));
    }

    let record = state
        .store
        .create(NewTransfer {
            transfer_id: transfer_id.clone(),
            source_url: req.source_url,
            bucket: req.bucket,
            key_prefix: req.key_prefix,
        })
        .await?;

    let engine = TransferEngine::new(
        state.source.clone(),
        state.storage.clone(),
        state.store.clone(),
        state.config.clone(),
    );
    let request = TransferRequest::from(&record);
    tokio::spawn(async move {
        engine.transfer(request, Arc::new(NoopObserver)).await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateTransferResponse {
            transfer_id,
            status: record.status,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/transfers/{id}",
    params(
        ("id" = String, Path, description = "Transfer id")
    ),
    responses(
        (status = 200, description = "Current transfer state", body = TransferRecord),
        (status = 404, description = "Transfer not found")
    ),
    tag = "transfers"
)]
pub async fn get_transfer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TransferRecord>, AppError> {
    let record = state
        .store
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Transfer {} not found", id)))?;

    Ok(Json(record))
}
