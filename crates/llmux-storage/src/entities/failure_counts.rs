use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "failure_counts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    #[sea_orm(unique_key = "provider_client_reason")]
    pub provider_id: i64,
    #[sea_orm(unique_key = "provider_client_reason")]
    pub client_type: String,
    #[sea_orm(unique_key = "provider_client_reason")]
    pub reason: String,
    /// Consecutive failures; cleared by a successful use.
    pub count: i32,
    pub last_failure_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
