use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "retry_configs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub name: String,
    /// Exactly one row carries this flag.
    pub is_default: bool,
    pub max_retries: i32,
    pub initial_interval_ms: i64,
    pub backoff_rate: f64,
    pub max_interval_ms: i64,
}

impl ActiveModelBehavior for ActiveModel {}
