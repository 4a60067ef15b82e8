pub mod api;
pub mod config;
pub mod entities;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::TransferConfig;
use crate::services::source::SourceReader;
use crate::services::storage::StorageService;
use crate::services::transfer_store::TransferStore;
use axum::{
    Router,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::transfers::create_transfer,
        api::handlers::transfers::get_transfer,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::transfers::CreateTransferRequest,
            api::handlers::transfers::CreateTransferResponse,
            api::handlers::health::HealthResponse,
            models::TransferRecord,
            models::TransferStatus,
            models::TransferResult,
            services::error_classifier::ErrorKind,
            services::error_classifier::TransferError,
        )
    ),
    tags(
        (name = "transfers", description = "Transfer submission and status"),
        (name = "system", description = "Service health")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub store: Arc<dyn TransferStore>,
    pub source: Arc<dyn SourceReader>,
    pub storage: Arc<dyn StorageService>,
    pub config: TransferConfig,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route("/transfers", post(api::handlers::transfers::create_transfer))
        .route("/transfers/:id", get(api::handlers::transfers::get_transfer))
        .with_state(state)
}
