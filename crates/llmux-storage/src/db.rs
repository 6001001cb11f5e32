use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr};

/// Open (creating if needed) the SQLite database at `path` with the journal
/// and lock settings every connection must share.
pub async fn connect_sqlite(path: &str) -> Result<DatabaseConnection, DbErr> {
    let dsn = format!("sqlite://{path}?mode=rwc");
    let connection = Database::connect(&dsn).await?;
    connection
        .execute_unprepared("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
        .await?;
    Ok(connection)
}

/// In-memory database for tests.
pub async fn connect_memory() -> Result<DatabaseConnection, DbErr> {
    Database::connect("sqlite::memory:").await
}
