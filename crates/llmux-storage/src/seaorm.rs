//! SQLite implementation of [`Storage`] and the cooldown store.

use std::collections::HashMap;

use async_trait::async_trait;
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Schema,
};
use time::OffsetDateTime;

use llmux_cooldown::{CooldownStore, StoreError};
use llmux_protocol::ClientType;

use crate::entities;
use crate::records::{AttemptRecord, RequestRecord};
use crate::snapshot::{
    ConfigSnapshot, ProviderRow, RetryConfigRow, RouteRow, StrategyKind, StrategyRow,
};
use crate::storage::{Storage, StorageError, StorageResult};

#[derive(Clone)]
pub struct SqliteStorage {
    db: DatabaseConnection,
}

impl SqliteStorage {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    async fn create_entity<E: EntityTrait>(&self, entity: E) -> StorageResult<()> {
        let backend = self.db.get_database_backend();
        let schema = Schema::new(backend);
        let mut table = schema.create_table_from_entity(entity);
        table.if_not_exists();
        self.db.execute(&table).await?;
        for mut index in schema.create_index_from_entity(entity) {
            index.if_not_exists();
            self.db.execute(&index).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn sync(&self) -> StorageResult<()> {
        self.create_entity(entities::providers::Entity).await?;
        self.create_entity(entities::projects::Entity).await?;
        self.create_entity(entities::sessions::Entity).await?;
        self.create_entity(entities::routes::Entity).await?;
        self.create_entity(entities::retry_configs::Entity).await?;
        self.create_entity(entities::routing_strategies::Entity)
            .await?;
        self.create_entity(entities::proxy_requests::Entity).await?;
        self.create_entity(entities::proxy_upstream_attempts::Entity)
            .await?;
        self.create_entity(entities::system_settings::Entity).await?;
        self.create_entity(entities::cooldowns::Entity).await?;
        self.create_entity(entities::failure_counts::Entity).await?;
        self.create_entity(entities::antigravity_quotas::Entity)
            .await?;
        Ok(())
    }

    async fn load_snapshot(&self) -> StorageResult<ConfigSnapshot> {
        let providers = entities::providers::Entity::find()
            .filter(entities::providers::Column::DeletedAt.is_null())
            .all(&self.db)
            .await?
            .into_iter()
            .filter_map(|row| match serde_json::from_value(row.config_json.clone()) {
                Ok(config) => Some(ProviderRow {
                    id: row.id,
                    name: row.name,
                    config,
                    enabled: row.enabled,
                }),
                Err(err) => {
                    tracing::warn!(provider_id = row.id, %err, "skipping provider with bad config");
                    None
                }
            })
            .collect();

        let routes = entities::routes::Entity::find()
            .all(&self.db)
            .await?
            .into_iter()
            .filter_map(|row| {
                let client_type = ClientType::parse(&row.client_type)?;
                let model_mapping: HashMap<String, String> = row
                    .model_mapping
                    .and_then(|value| serde_json::from_value(value).ok())
                    .unwrap_or_default();
                Some(RouteRow {
                    id: row.id,
                    enabled: row.enabled,
                    client_type,
                    project_id: row.project_id,
                    provider_id: row.provider_id,
                    position: row.position,
                    retry_config_id: row.retry_config_id,
                    model_mapping,
                })
            })
            .collect();

        let retry_configs = entities::retry_configs::Entity::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|row| RetryConfigRow {
                id: row.id,
                name: row.name,
                is_default: row.is_default,
                max_retries: row.max_retries.max(0) as u32,
                initial_interval_ms: row.initial_interval_ms.max(0) as u64,
                backoff_rate: row.backoff_rate,
                max_interval_ms: row.max_interval_ms.max(0) as u64,
            })
            .collect();

        let strategies = entities::routing_strategies::Entity::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|row| StrategyRow {
                id: row.id,
                project_id: row.project_id,
                kind: StrategyKind::parse(&row.kind),
            })
            .collect();

        let sessions = entities::sessions::Entity::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|row| (row.session_id, row.project_id))
            .collect();

        Ok(ConfigSnapshot {
            providers,
            routes,
            retry_configs,
            strategies,
            sessions,
        })
    }

    async fn resolve_session(
        &self,
        session_id: &str,
        client_type: ClientType,
    ) -> StorageResult<i64> {
        let existing = entities::sessions::Entity::find()
            .filter(entities::sessions::Column::SessionId.eq(session_id))
            .one(&self.db)
            .await?;
        if let Some(row) = existing {
            return Ok(row.project_id);
        }

        let now = OffsetDateTime::now_utc();
        let row = entities::sessions::ActiveModel {
            created_at: Set(now),
            updated_at: Set(now),
            session_id: Set(session_id.to_string()),
            client_type: Set(client_type.as_str().to_string()),
            project_id: Set(0),
            ..Default::default()
        };
        row.insert(&self.db).await?;
        Ok(0)
    }

    async fn insert_request(&self, record: &RequestRecord) -> StorageResult<i64> {
        let now = OffsetDateTime::now_utc();
        let row = entities::proxy_requests::ActiveModel {
            created_at: Set(now),
            updated_at: Set(now),
            instance_id: Set(record.instance_id.clone()),
            request_id: Set(record.request_id.clone()),
            session_id: Set(record.session_id.clone()),
            client_type: Set(record.client_type.as_str().to_string()),
            request_model: Set(record.request_model.clone()),
            response_model: Set(record.response_model.clone()),
            start_time: Set(record.start_time),
            end_time: Set(record.end_time),
            duration_ms: Set(record.duration_ms),
            status: Set(record.status.as_str().to_string()),
            request_info: Set(match &record.request_info {
                Some(info) => Some(serde_json::to_value(info)?),
                None => None,
            }),
            response_info: Set(match &record.response_info {
                Some(info) => Some(serde_json::to_value(info)?),
                None => None,
            }),
            error: Set(record.error.clone()),
            attempt_count: Set(record.attempt_count as i32),
            final_attempt_id: Set(record.final_attempt_id),
            input_tokens: Set(record.usage.input_tokens as i64),
            output_tokens: Set(record.usage.output_tokens as i64),
            cache_read_tokens: Set(record.usage.cache_read_tokens as i64),
            cache_write_tokens: Set(record.usage.cache_write_tokens as i64),
            route_id: Set(record.route_id),
            provider_id: Set(record.provider_id),
            is_stream: Set(record.is_stream),
            ..Default::default()
        };
        let inserted = row.insert(&self.db).await?;
        Ok(inserted.id)
    }

    async fn update_request(&self, record: &RequestRecord) -> StorageResult<()> {
        let row = entities::proxy_requests::ActiveModel {
            id: Set(record.id),
            updated_at: Set(OffsetDateTime::now_utc()),
            response_model: Set(record.response_model.clone()),
            end_time: Set(record.end_time),
            duration_ms: Set(record.duration_ms),
            status: Set(record.status.as_str().to_string()),
            request_info: Set(match &record.request_info {
                Some(info) => Some(serde_json::to_value(info)?),
                None => None,
            }),
            response_info: Set(match &record.response_info {
                Some(info) => Some(serde_json::to_value(info)?),
                None => None,
            }),
            error: Set(record.error.clone()),
            attempt_count: Set(record.attempt_count as i32),
            final_attempt_id: Set(record.final_attempt_id),
            input_tokens: Set(record.usage.input_tokens as i64),
            output_tokens: Set(record.usage.output_tokens as i64),
            cache_read_tokens: Set(record.usage.cache_read_tokens as i64),
            cache_write_tokens: Set(record.usage.cache_write_tokens as i64),
            route_id: Set(record.route_id),
            provider_id: Set(record.provider_id),
            is_stream: Set(record.is_stream),
            ..Default::default()
        };
        row.update(&self.db).await?;
        Ok(())
    }

    async fn insert_attempt(&self, record: &AttemptRecord) -> StorageResult<i64> {
        let now = OffsetDateTime::now_utc();
        let row = entities::proxy_upstream_attempts::ActiveModel {
            created_at: Set(now),
            updated_at: Set(now),
            status: Set(record.status.as_str().to_string()),
            proxy_request_id: Set(record.proxy_request_id),
            request_info: Set(match &record.request_info {
                Some(info) => Some(serde_json::to_value(info)?),
                None => None,
            }),
            response_info: Set(match &record.response_info {
                Some(info) => Some(serde_json::to_value(info)?),
                None => None,
            }),
            route_id: Set(record.route_id),
            provider_id: Set(record.provider_id),
            input_tokens: Set(record.usage.input_tokens as i64),
            output_tokens: Set(record.usage.output_tokens as i64),
            cache_read_tokens: Set(record.usage.cache_read_tokens as i64),
            cache_write_tokens: Set(record.usage.cache_write_tokens as i64),
            is_stream: Set(record.is_stream),
            ..Default::default()
        };
        let inserted = row.insert(&self.db).await?;
        Ok(inserted.id)
    }

    async fn update_attempt(&self, record: &AttemptRecord) -> StorageResult<()> {
        let row = entities::proxy_upstream_attempts::ActiveModel {
            id: Set(record.id),
            updated_at: Set(OffsetDateTime::now_utc()),
            status: Set(record.status.as_str().to_string()),
            request_info: Set(match &record.request_info {
                Some(info) => Some(serde_json::to_value(info)?),
                None => None,
            }),
            response_info: Set(match &record.response_info {
                Some(info) => Some(serde_json::to_value(info)?),
                None => None,
            }),
            input_tokens: Set(record.usage.input_tokens as i64),
            output_tokens: Set(record.usage.output_tokens as i64),
            cache_read_tokens: Set(record.usage.cache_read_tokens as i64),
            cache_write_tokens: Set(record.usage.cache_write_tokens as i64),
            ..Default::default()
        };
        row.update(&self.db).await?;
        Ok(())
    }
}

fn store_err(err: impl std::fmt::Display) -> StoreError {
    StoreError(err.to_string())
}

#[async_trait]
impl CooldownStore for SqliteStorage {
    async fn load_cooldowns(&self) -> Result<Vec<(i64, String, OffsetDateTime)>, StoreError> {
        let rows = entities::cooldowns::Entity::find()
            .all(&self.db)
            .await
            .map_err(store_err)?;
        Ok(rows
            .into_iter()
            .map(|row| (row.provider_id, row.client_type, row.until_time))
            .collect())
    }

    async fn load_failure_counts(
        &self,
    ) -> Result<Vec<(i64, String, String, u32, OffsetDateTime)>, StoreError> {
        let rows = entities::failure_counts::Entity::find()
            .all(&self.db)
            .await
            .map_err(store_err)?;
        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    row.provider_id,
                    row.client_type,
                    row.reason,
                    row.count.max(0) as u32,
                    row.last_failure_at,
                )
            })
            .collect())
    }

    async fn upsert_cooldown(
        &self,
        provider_id: i64,
        client_type: &str,
        until: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let now = OffsetDateTime::now_utc();
        let existing = entities::cooldowns::Entity::find()
            .filter(entities::cooldowns::Column::ProviderId.eq(provider_id))
            .filter(entities::cooldowns::Column::ClientType.eq(client_type))
            .one(&self.db)
            .await
            .map_err(store_err)?;

        match existing {
            Some(row) => {
                let update = entities::cooldowns::ActiveModel {
                    id: Set(row.id),
                    updated_at: Set(now),
                    until_time: Set(until),
                    ..Default::default()
                };
                update.update(&self.db).await.map_err(store_err)?;
            }
            None => {
                let insert = entities::cooldowns::ActiveModel {
                    created_at: Set(now),
                    updated_at: Set(now),
                    provider_id: Set(provider_id),
                    client_type: Set(client_type.to_string()),
                    until_time: Set(until),
                    ..Default::default()
                };
                insert.insert(&self.db).await.map_err(store_err)?;
            }
        }
        Ok(())
    }

    async fn delete_cooldowns(
        &self,
        provider_id: i64,
        client_type: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut delete = entities::cooldowns::Entity::delete_many()
            .filter(entities::cooldowns::Column::ProviderId.eq(provider_id));
        if let Some(client_type) = client_type {
            delete = delete.filter(entities::cooldowns::Column::ClientType.eq(client_type));
        }
        delete.exec(&self.db).await.map_err(store_err)?;
        Ok(())
    }

    async fn upsert_failure_count(
        &self,
        provider_id: i64,
        client_type: &str,
        reason: &str,
        count: u32,
        last_failure_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let now = OffsetDateTime::now_utc();
        let existing = entities::failure_counts::Entity::find()
            .filter(entities::failure_counts::Column::ProviderId.eq(provider_id))
            .filter(entities::failure_counts::Column::ClientType.eq(client_type))
            .filter(entities::failure_counts::Column::Reason.eq(reason))
            .one(&self.db)
            .await
            .map_err(store_err)?;

        match existing {
            Some(row) => {
                let update = entities::failure_counts::ActiveModel {
                    id: Set(row.id),
                    updated_at: Set(now),
                    count: Set(count as i32),
                    last_failure_at: Set(last_failure_at),
                    ..Default::default()
                };
                update.update(&self.db).await.map_err(store_err)?;
            }
            None => {
                let insert = entities::failure_counts::ActiveModel {
                    created_at: Set(now),
                    updated_at: Set(now),
                    provider_id: Set(provider_id),
                    client_type: Set(client_type.to_string()),
                    reason: Set(reason.to_string()),
                    count: Set(count as i32),
                    last_failure_at: Set(last_failure_at),
                    ..Default::default()
                };
                insert.insert(&self.db).await.map_err(store_err)?;
            }
        }
        Ok(())
    }

    async fn delete_failure_counts(
        &self,
        provider_id: i64,
        client_type: &str,
    ) -> Result<(), StoreError> {
        entities::failure_counts::Entity::delete_many()
            .filter(entities::failure_counts::Column::ProviderId.eq(provider_id))
            .filter(entities::failure_counts::Column::ClientType.eq(client_type))
            .exec(&self.db)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn delete_expired_cooldowns(&self, now: OffsetDateTime) -> Result<(), StoreError> {
        entities::cooldowns::Entity::delete_many()
            .filter(entities::cooldowns::Column::UntilTime.lte(now))
            .exec(&self.db)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}
