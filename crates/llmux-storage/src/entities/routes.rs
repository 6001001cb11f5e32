use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "routes")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub enabled: bool,
    /// 0 means the route is global.
    pub project_id: i64,
    pub client_type: String,
    pub provider_id: i64,
    /// Priority; lower sorts first.
    pub position: i32,
    /// 0 selects the system default retry config.
    pub retry_config_id: i64,
    /// JSON object: request model -> upstream model.
    pub model_mapping: Option<Json>,
}

impl ActiveModelBehavior for ActiveModel {}
