use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "antigravity_quotas")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    #[sea_orm(unique_key = "email")]
    pub email: String,
    pub subscription_tier: String,
    pub is_forbidden: bool,
    /// Per-model quota percentages and reset times, as reported upstream.
    pub models: Option<Json>,
    pub last_updated: i64,
    pub name: String,
    pub picture: String,
    pub project_id: String,
}

impl ActiveModelBehavior for ActiveModel {}
