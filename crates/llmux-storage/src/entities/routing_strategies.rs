use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "routing_strategies")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    /// 0 means the strategy applies globally.
    pub project_id: i64,
    #[sea_orm(column_name = "type")]
    pub kind: String,
    pub config: Option<Json>,
}

impl ActiveModelBehavior for ActiveModel {}
