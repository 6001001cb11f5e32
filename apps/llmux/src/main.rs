use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use llmux_cooldown::{CooldownEngine, CooldownStore};
use llmux_core::AppState;
use llmux_provider::{UpstreamClientConfig, WreqUpstreamClient};
use llmux_storage::{SqliteStorage, Storage, db};

const COOLDOWN_SWEEP_PERIOD: Duration = Duration::from_secs(3600);

#[derive(Debug, Parser)]
#[command(name = "llmux", about = "Multiplexing reverse proxy for AI chat-completion APIs")]
struct Args {
    #[arg(long, env = "LLMUX_HOST", default_value = "0.0.0.0")]
    host: String,
    #[arg(long, env = "LLMUX_PORT", default_value_t = 19380)]
    port: u16,
    /// Path to the SQLite database file.
    #[arg(long, env = "LLMUX_DB", default_value = "llmux.db")]
    db: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let connection = db::connect_sqlite(&args.db).await?;
    let storage = Arc::new(SqliteStorage::new(connection));
    storage.sync().await?;

    let cooldown = Arc::new(CooldownEngine::new(
        Arc::clone(&storage) as Arc<dyn CooldownStore>
    ));
    cooldown.hydrate().await?;
    Arc::clone(&cooldown).spawn_sweep_task(COOLDOWN_SWEEP_PERIOD);

    let upstream = Arc::new(WreqUpstreamClient::new(UpstreamClientConfig::default())?);
    let instance_id = uuid::Uuid::now_v7().to_string();

    let state = AppState::new(
        Arc::clone(&storage) as Arc<dyn Storage>,
        cooldown,
        upstream,
        instance_id,
    );
    state.refresh_snapshot().await?;

    let app = llmux_router::proxy_router(Arc::clone(&state));

    let bind = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(%bind, "llmux listening");
    axum::serve(listener, app).await?;
    Ok(())
}
