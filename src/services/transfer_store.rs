use crate::entities::{prelude::*, transfers};
use crate::models::{NewTransfer, TransferRecord, TransferStatus};
use crate::services::error_classifier::{TransferError, percentage};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnAcquireErr, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, Set, SqlErr,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Transfer not found: {0}")]
    NotFound(String),

    #[error("Transfer already exists: {0}")]
    AlreadyExists(String),

    #[error("Transfer {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: TransferStatus,
        to: TransferStatus,
    },

    #[error("Corrupt transfer record {0}: {1}")]
    Corrupt(String, String),
}

impl StoreError {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            StoreError::Database(DbErr::ConnectionAcquire(ConnAcquireErr::Timeout))
        )
    }
}

/// Persistence of transfer records. Only the engine running a transfer mutates its record.
#[async_trait]
pub trait TransferStore: Send + Sync {
    async fn create(&self, new: NewTransfer) -> Result<TransferRecord, StoreError>;
    async fn get(&self, transfer_id: &str) -> Result<Option<TransferRecord>, StoreError>;
    /// Opens a new attempt: resets progress and clears any previous outcome.
    async fn mark_in_progress(&self, transfer_id: &str, s3_key: &str) -> Result<(), StoreError>;
    async fn update_progress(
        &self,
        transfer_id: &str,
        bytes_transferred: u64,
        total_bytes: u64,
    ) -> Result<(), StoreError>;
    async fn mark_complete(
        &self,
        transfer_id: &str,
        s3_location: &str,
        bytes_transferred: u64,
        total_bytes: u64,
    ) -> Result<(), StoreError>;
    async fn mark_failed(
        &self,
        transfer_id: &str,
        error: &TransferError,
        bytes_transferred: u64,
        total_bytes: u64,
    ) -> Result<(), StoreError>;
    /// Deletes terminal records whose ttl is at or before `now` (unix seconds).
    async fn purge_expired(&self, now: i64) -> Result<u64, StoreError>;
}

#[derive(Clone)]
pub struct SeaOrmTransferStore {
    db: DatabaseConnection,
    ttl_hours: i64,
}

impl SeaOrmTransferStore {
    pub fn new(db: DatabaseConnection, ttl_hours: i64) -> Self {
        Self { db, ttl_hours }
    }

    async fn load(&self, transfer_id: &str) -> Result<transfers::Model, StoreError> {
        Transfers::find_by_id(transfer_id.to_string())
            .one(&self.db)
            .await?
            .ok_or_else(|| StoreError::NotFound(transfer_id.to_string()))
    }

    async fn load_for_transition(
        &self,
        transfer_id: &str,
        to: TransferStatus,
    ) -> Result<transfers::ActiveModel, StoreError> {
        let model = self.load(transfer_id).await?;
        let from: TransferStatus = model
            .status
            .parse()
            .map_err(|e| StoreError::Corrupt(transfer_id.to_string(), e))?;

        if !from.can_transition_to(to) {
            return Err(StoreError::InvalidTransition {
                id: transfer_id.to_string(),
                from,
                to,
            });
        }
        Ok(model.into())
    }

    fn expiry(&self) -> i64 {
        (Utc::now() + chrono::Duration::hours(self.ttl_hours)).timestamp()
    }
}

#[async_trait]
impl TransferStore for SeaOrmTransferStore {
    async fn create(&self, new: NewTransfer) -> Result<TransferRecord, StoreError> {
        let now = Utc::now();
        let model = transfers::ActiveModel {
            transfer_id: Set(new.transfer_id.clone()),
            status: Set(TransferStatus::Pending.as_str().to_string()),
            source_url: Set(new.source_url),
            bucket: Set(new.bucket),
            key_prefix: Set(new.key_prefix),
            s3_key: Set(None),
            s3_location: Set(None),
            bytes_transferred: Set(0),
            total_bytes: Set(0),
            percentage: Set(0),
            error: Set(None),
            error_code: Set(None),
            retryable: Set(None),
            start_time: Set(None),
            end_time: Set(None),
            last_update_time: Set(now),
            created_at: Set(now),
            ttl: Set(None),
        }
        .insert(&self.db)
        .await
        .map_err(|e| match e.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => {
                StoreError::AlreadyExists(new.transfer_id.clone())
            }
            _ => StoreError::Database(e),
        })?;

        tracing::info!("📝 Transfer {} registered", new.transfer_id);
        TransferRecord::try_from(model).map_err(|e| StoreError::Corrupt(new.transfer_id, e))
    }

    async fn get(&self, transfer_id: &str) -> Result<Option<TransferRecord>, StoreError> {
        let model = Transfers::find_by_id(transfer_id.to_string())
            .one(&self.db)
            .await?;

        model
            .map(TransferRecord::try_from)
            .transpose()
            .map_err(|e| StoreError::Corrupt(transfer_id.to_string(), e))
    }

    async fn mark_in_progress(&self, transfer_id: &str, s3_key: &str) -> Result<(), StoreError> {
        let mut active = self
            .load_for_transition(transfer_id, TransferStatus::InProgress)
            .await?;
        let now = Utc::now();

        active.status = Set(TransferStatus::InProgress.as_str().to_string());
        active.s3_key = Set(Some(s3_key.to_string()));
        active.s3_location = Set(None);
        active.bytes_transferred = Set(0);
        active.total_bytes = Set(0);
        active.percentage = Set(0);
        active.error = Set(None);
        active.error_code = Set(None);
        active.retryable = Set(None);
        active.start_time = Set(Some(now));
        active.end_time = Set(None);
        active.last_update_time = Set(now);
        active.ttl = Set(None);
        active.update(&self.db).await?;
        Ok(())
    }

    async fn update_progress(
        &self,
        transfer_id: &str,
        bytes_transferred: u64,
        total_bytes: u64,
    ) -> Result<(), StoreError> {
        // Only the running attempt may move the cursor; terminal records stay untouched.
        let result = Transfers::update_many()
            .col_expr(
                transfers::Column::BytesTransferred,
                Expr::value(bytes_transferred as i64),
            )
            .col_expr(transfers::Column::TotalBytes, Expr::value(total_bytes as i64))
            .col_expr(
                transfers::Column::Percentage,
                Expr::value(percentage(bytes_transferred, total_bytes) as i32),
            )
            .col_expr(transfers::Column::LastUpdateTime, Expr::value(Utc::now()))
            .filter(transfers::Column::TransferId.eq(transfer_id))
            .filter(transfers::Column::Status.eq(TransferStatus::InProgress.as_str()))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(StoreError::NotFound(transfer_id.to_string()));
        }
        Ok(())
    }

    async fn mark_complete(
        &self,
        transfer_id: &str,
        s3_location: &str,
        bytes_transferred: u64,
        total_bytes: u64,
    ) -> Result<(), StoreError> {
        let mut active = self
            .load_for_transition(transfer_id, TransferStatus::Completed)
            .await?;
        let now = Utc::now();

        active.status = Set(TransferStatus::Completed.as_str().to_string());
        active.s3_location = Set(Some(s3_location.to_string()));
        active.bytes_transferred = Set(bytes_transferred as i64);
        active.total_bytes = Set(total_bytes as i64);
        active.percentage = Set(percentage(bytes_transferred, total_bytes) as i32);
        active.end_time = Set(Some(now));
        active.last_update_time = Set(now);
        active.ttl = Set(Some(self.expiry()));
        active.update(&self.db).await?;

        tracing::info!("✅ Transfer {} completed: {}", transfer_id, s3_location);
        Ok(())
    }

    async fn mark_failed(
        &self,
        transfer_id: &str,
        error: &TransferError,
        bytes_transferred: u64,
        total_bytes: u64,
    ) -> Result<(), StoreError> {
        let mut active = self
            .load_for_transition(transfer_id, TransferStatus::Failed)
            .await?;
        let now = Utc::now();

        active.status = Set(TransferStatus::Failed.as_str().to_string());
        active.error = Set(Some(error.message.clone()));
        active.error_code = Set(Some(error.kind.code().to_string()));
        active.retryable = Set(Some(error.retryable));
        active.bytes_transferred = Set(bytes_transferred as i64);
        active.total_bytes = Set(total_bytes as i64);
        active.percentage = Set(percentage(bytes_transferred, total_bytes) as i32);
        active.end_time = Set(Some(now));
        active.last_update_time = Set(now);
        active.ttl = Set(Some(self.expiry()));
        active.update(&self.db).await?;

        tracing::info!(
            "❌ Transfer {} failed [{}]: {}",
            transfer_id,
            error.kind,
            error.message
        );
        Ok(())
    }

    async fn purge_expired(&self, now: i64) -> Result<u64, StoreError> {
        let result = Transfers::delete_many()
            .filter(transfers::Column::Ttl.is_not_null())
            .filter(transfers::Column::Ttl.lte(now))
            .filter(transfers::Column::Status.is_in([
                TransferStatus::Completed.as_str(),
                TransferStatus::Failed.as_str(),
            ]))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
