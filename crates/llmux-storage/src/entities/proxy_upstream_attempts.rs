use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "proxy_upstream_attempts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    /// success | failed
    pub status: String,
    pub proxy_request_id: i64,
    pub request_info: Option<Json>,
    pub response_info: Option<Json>,
    pub route_id: i64,
    pub provider_id: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_read_tokens: i64,
    pub cache_write_tokens: i64,
    pub is_stream: bool,
}

impl ActiveModelBehavior for ActiveModel {}
