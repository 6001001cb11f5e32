use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "proxy_requests")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub instance_id: String,
    pub request_id: String,
    pub session_id: Option<String>,
    pub client_type: String,
    pub request_model: Option<String>,
    pub response_model: Option<String>,
    pub start_time: OffsetDateTime,
    pub end_time: Option<OffsetDateTime>,
    pub duration_ms: Option<i64>,
    /// success | failed | canceled
    pub status: String,
    pub request_info: Option<Json>,
    pub response_info: Option<Json>,
    pub error: Option<String>,
    pub attempt_count: i32,
    pub final_attempt_id: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_read_tokens: i64,
    pub cache_write_tokens: i64,
    pub route_id: i64,
    pub provider_id: i64,
    pub is_stream: bool,
}

impl ActiveModelBehavior for ActiveModel {}
