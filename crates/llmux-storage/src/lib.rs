//! Persistence for llmux: SeaORM entities over a single SQLite database,
//! the `Storage` trait the rest of the system talks to, and the row types
//! served to the in-memory config snapshot.
//!
//! Runtime request handling never reads the database; it reads snapshots.
//! The database sees snapshot loads at bootstrap, record writes while
//! requests run, and cooldown write-through.

pub mod db;
pub mod entities;
pub mod records;
pub mod seaorm;
pub mod snapshot;
mod storage;

pub use records::{
    AttemptRecord, AttemptStatus, RequestInfo, RequestRecord, RequestStatus, ResponseInfo,
    TokenUsage,
};
pub use seaorm::SqliteStorage;
pub use snapshot::{
    ConfigSnapshot, ProviderConfig, ProviderRow, RetryConfigRow, RouteRow, StrategyKind,
    StrategyRow,
};
pub use storage::{Storage, StorageError, StorageResult};
