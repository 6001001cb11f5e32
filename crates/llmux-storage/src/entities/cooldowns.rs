use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "cooldowns")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    #[sea_orm(unique_key = "provider_client")]
    pub provider_id: i64,
    /// Empty string covers all client types of the provider.
    #[sea_orm(unique_key = "provider_client")]
    pub client_type: String,
    pub until_time: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
