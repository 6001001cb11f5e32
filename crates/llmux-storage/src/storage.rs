use async_trait::async_trait;

use llmux_protocol::ClientType;

use crate::records::{AttemptRecord, RequestRecord};
use crate::snapshot::ConfigSnapshot;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Storage is used for:
/// - bootstrap (`sync`, `load_snapshot`, cooldown hydration)
/// - request/attempt record writes while requests run
/// - cooldown write-through (via the `CooldownStore` impl)
///
/// Runtime route matching never hits the database; it reads snapshots.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Entity-first schema sync. Runs at bootstrap.
    async fn sync(&self) -> StorageResult<()>;

    async fn load_snapshot(&self) -> StorageResult<ConfigSnapshot>;

    /// Ensure the session row exists and return its project id (0 when the
    /// session is unknown or unbound).
    async fn resolve_session(
        &self,
        session_id: &str,
        client_type: ClientType,
    ) -> StorageResult<i64>;

    async fn insert_request(&self, record: &RequestRecord) -> StorageResult<i64>;
    async fn update_request(&self, record: &RequestRecord) -> StorageResult<()>;
    async fn insert_attempt(&self, record: &AttemptRecord) -> StorageResult<i64>;
    async fn update_attempt(&self, record: &AttemptRecord) -> StorageResult<()>;
}
