use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sessions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    #[sea_orm(unique_key = "session")]
    pub session_id: String,
    pub client_type: String,
    /// 0 binds the session to the global project.
    pub project_id: i64,
}

impl ActiveModelBehavior for ActiveModel {}
