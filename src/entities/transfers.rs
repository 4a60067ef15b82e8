use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "transfers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub transfer_id: String,
    pub status: String, // "pending", "in_progress", "completed", "failed"
    pub source_url: String,
    pub bucket: String,
    pub key_prefix: Option<String>,
    pub s3_key: Option<String>,
    pub s3_location: Option<String>,
    pub bytes_transferred: i64,
    pub total_bytes: i64,
    pub percentage: i32,
    #[sea_orm(column_type = "Text", nullable)]
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub retryable: Option<bool>,
    pub start_time: Option<DateTimeUtc>,
    pub end_time: Option<DateTimeUtc>,
    pub last_update_time: DateTimeUtc,
    pub created_at: DateTimeUtc,
    /// Unix seconds after which the purge worker may delete a terminal record.
    pub ttl: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
