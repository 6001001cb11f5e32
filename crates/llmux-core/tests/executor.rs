//! Failover behavior of the executor against scripted adapters.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use llmux_cooldown::{CooldownEngine, NullStore};
use llmux_core::{AppState, RequestContext, execute};
use llmux_protocol::ClientType;
use llmux_provider::adapter::{AttemptContext, ClientResponse};
use llmux_provider::{
    ErrorKind, ProviderAdapter, ProxyError, UpstreamClient, UpstreamRequest, UpstreamResponse,
};
use llmux_storage::{
    AttemptRecord, ConfigSnapshot, ProviderConfig, ProviderRow, RequestRecord, RetryConfigRow,
    RouteRow, Storage, StorageResult,
};

struct NoClient;

#[async_trait]
impl UpstreamClient for NoClient {
    async fn send(&self, _: UpstreamRequest) -> Result<UpstreamResponse, ProxyError> {
        Err(ProxyError::internal("no network in tests"))
    }
}

#[derive(Default)]
struct MemoryStorage {
    attempts: Mutex<Vec<AttemptRecord>>,
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn sync(&self) -> StorageResult<()> {
        Ok(())
    }
    async fn load_snapshot(&self) -> StorageResult<ConfigSnapshot> {
        Ok(ConfigSnapshot::default())
    }
    async fn resolve_session(&self, _: &str, _: ClientType) -> StorageResult<i64> {
        Ok(0)
    }
    async fn insert_request(&self, _: &RequestRecord) -> StorageResult<i64> {
        Ok(1)
    }
    async fn update_request(&self, _: &RequestRecord) -> StorageResult<()> {
        Ok(())
    }
    async fn insert_attempt(&self, record: &AttemptRecord) -> StorageResult<i64> {
        let mut attempts = self.attempts.lock().unwrap();
        attempts.push(record.clone());
        Ok(attempts.len() as i64)
    }
    async fn update_attempt(&self, record: &AttemptRecord) -> StorageResult<()> {
        let mut attempts = self.attempts.lock().unwrap();
        if let Some(slot) = attempts.get_mut((record.id - 1) as usize) {
            *slot = record.clone();
        }
        Ok(())
    }
}

/// Pops one scripted outcome per execute call; `Err(status)` becomes an
/// upstream status error.
struct ScriptedAdapter {
    script: Mutex<VecDeque<Result<(), u16>>>,
}

impl ScriptedAdapter {
    fn new(script: Vec<Result<(), u16>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
        })
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn supported_client_types(&self) -> &'static [ClientType] {
        &[ClientType::Claude, ClientType::OpenAI, ClientType::Gemini]
    }

    async fn execute(&self, _: &AttemptContext) -> Result<ClientResponse, ProxyError> {
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .expect("script exhausted");
        match outcome {
            Ok(()) => Ok(ClientResponse::Buffered {
                status: 200,
                headers: vec![("content-type".to_string(), "application/json".to_string())],
                body: Bytes::from_static(b"{\"ok\":true}"),
            }),
            Err(status) => Err(ProxyError::upstream_status(status, "scripted", None)),
        }
    }
}

fn provider(id: i64) -> ProviderRow {
    ProviderRow {
        id,
        name: format!("p{id}"),
        config: ProviderConfig::Custom {
            api_key: "k".to_string(),
            base_url: "https://example.test".to_string(),
            client_type: ClientType::Claude,
        },
        enabled: true,
    }
}

fn route(id: i64, provider_id: i64, position: i32) -> RouteRow {
    RouteRow {
        id,
        enabled: true,
        client_type: ClientType::Claude,
        project_id: 0,
        provider_id,
        position,
        retry_config_id: 0,
        model_mapping: HashMap::new(),
    }
}

/// No per-route retries: failures fail over immediately.
fn no_retry_config() -> RetryConfigRow {
    RetryConfigRow {
        id: 1,
        name: "none".to_string(),
        is_default: true,
        max_retries: 0,
        initial_interval_ms: 1,
        backoff_rate: 1.0,
        max_interval_ms: 1,
    }
}

fn build_state(
    providers: Vec<ProviderRow>,
    routes: Vec<RouteRow>,
    adapters: HashMap<i64, Arc<dyn ProviderAdapter>>,
) -> Arc<AppState> {
    let state = AppState::new(
        Arc::new(MemoryStorage::default()),
        Arc::new(CooldownEngine::new(Arc::new(NullStore))),
        Arc::new(NoClient),
        "test-instance".to_string(),
    );
    state.install_snapshot(
        ConfigSnapshot {
            providers,
            routes,
            retry_configs: vec![no_retry_config()],
            ..ConfigSnapshot::default()
        },
        adapters,
    );
    state
}

fn request_ctx() -> RequestContext {
    RequestContext {
        client_type: ClientType::Claude,
        project_id: 0,
        session_id: None,
        request_model: "claude-sonnet".to_string(),
        body: Bytes::from_static(b"{\"model\":\"claude-sonnet\",\"messages\":[]}"),
        is_stream: false,
    }
}

#[tokio::test]
async fn failover_after_server_error_cools_down_the_loser() {
    let adapters: HashMap<i64, Arc<dyn ProviderAdapter>> = HashMap::from([
        (1i64, ScriptedAdapter::new(vec![Err(503)]) as Arc<dyn ProviderAdapter>),
        (2i64, ScriptedAdapter::new(vec![Ok(())]) as Arc<dyn ProviderAdapter>),
    ]);
    let state = build_state(
        vec![provider(1), provider(2)],
        vec![route(1, 1, 0), route(2, 2, 1)],
        adapters,
    );

    let ctx = request_ctx();
    let mut record = RequestRecord::begin("test-instance", "req-1", ClientType::Claude);
    record.id = 1;

    let response = execute(&state, &ctx, &mut record).await.unwrap();
    assert!(matches!(response, ClientResponse::Buffered { status: 200, .. }));

    assert_eq!(record.attempt_count, 2);
    assert_eq!(record.provider_id, 2);
    assert_eq!(record.route_id, 2);
    assert_eq!(record.final_attempt_id, 2);

    // The 503 provider entered cooldown; the winner stayed clean.
    assert!(state.cooldown.is_in_cooldown(1, "claude").await.is_some());
    assert!(state.cooldown.is_in_cooldown(2, "claude").await.is_none());
    let entries = state.cooldown.snapshot().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].provider_id, 1);
}

#[tokio::test]
async fn rate_limited_provider_is_skipped_within_the_window() {
    let adapters: HashMap<i64, Arc<dyn ProviderAdapter>> = HashMap::from([(
        1i64,
        ScriptedAdapter::new(vec![Err(429)]) as Arc<dyn ProviderAdapter>,
    )]);
    let state = build_state(vec![provider(1)], vec![route(1, 1, 0)], adapters);
    let ctx = request_ctx();

    let mut record = RequestRecord::begin("test-instance", "req-1", ClientType::Claude);
    record.id = 1;
    let err = execute(&state, &ctx, &mut record).await.unwrap_err();
    assert_eq!(err.status, Some(429));

    // Fallback rate-limit cooldown is one minute; the provider must still be
    // unavailable right away.
    let until = state.cooldown.is_in_cooldown(1, "claude").await.unwrap();
    assert!(until > time::OffsetDateTime::now_utc());

    // A second request inside the window never reaches the adapter (its
    // script is exhausted, so reaching it would panic).
    let mut record = RequestRecord::begin("test-instance", "req-2", ClientType::Claude);
    record.id = 2;
    let err = execute(&state, &ctx, &mut record).await.unwrap_err();
    assert_eq!(record.attempt_count, 0);
    assert_eq!(err.status, Some(503));
}

#[tokio::test]
async fn per_route_retries_run_before_failover() {
    // 503 then 200 on the same provider, with one retry allowed.
    let adapters: HashMap<i64, Arc<dyn ProviderAdapter>> = HashMap::from([(
        1i64,
        ScriptedAdapter::new(vec![Err(503), Ok(())]) as Arc<dyn ProviderAdapter>,
    )]);
    let state = AppState::new(
        Arc::new(MemoryStorage::default()),
        Arc::new(CooldownEngine::new(Arc::new(NullStore))),
        Arc::new(NoClient),
        "test-instance".to_string(),
    );
    state.install_snapshot(
        ConfigSnapshot {
            providers: vec![provider(1)],
            routes: vec![route(1, 1, 0)],
            retry_configs: vec![RetryConfigRow {
                max_retries: 1,
                ..no_retry_config()
            }],
            ..ConfigSnapshot::default()
        },
        adapters,
    );

    let ctx = request_ctx();
    let mut record = RequestRecord::begin("test-instance", "req-1", ClientType::Claude);
    record.id = 1;
    let response = execute(&state, &ctx, &mut record).await.unwrap();
    assert!(matches!(response, ClientResponse::Buffered { status: 200, .. }));
    assert_eq!(record.attempt_count, 2);
    // Success cleared any cooldown state accumulated along the way.
    assert!(state.cooldown.is_in_cooldown(1, "claude").await.is_none());
}

#[tokio::test]
async fn non_retryable_errors_fail_over_without_cooldown() {
    let adapters: HashMap<i64, Arc<dyn ProviderAdapter>> = HashMap::from([
        (1i64, ScriptedAdapter::new(vec![Err(400)]) as Arc<dyn ProviderAdapter>),
        (2i64, ScriptedAdapter::new(vec![Ok(())]) as Arc<dyn ProviderAdapter>),
    ]);
    let state = build_state(
        vec![provider(1), provider(2)],
        vec![route(1, 1, 0), route(2, 2, 1)],
        adapters,
    );

    let ctx = request_ctx();
    let mut record = RequestRecord::begin("test-instance", "req-1", ClientType::Claude);
    record.id = 1;
    let response = execute(&state, &ctx, &mut record).await.unwrap();
    assert!(matches!(response, ClientResponse::Buffered { .. }));
    // A client-side 400 is not the provider's fault.
    assert!(state.cooldown.is_in_cooldown(1, "claude").await.is_none());
}

#[tokio::test]
async fn client_disconnect_suppresses_failover() {
    struct DisconnectAdapter;
    #[async_trait]
    impl ProviderAdapter for DisconnectAdapter {
        fn supported_client_types(&self) -> &'static [ClientType] {
            &[ClientType::Claude]
        }
        async fn execute(&self, _: &AttemptContext) -> Result<ClientResponse, ProxyError> {
            Err(ProxyError::client_disconnected())
        }
    }

    let adapters: HashMap<i64, Arc<dyn ProviderAdapter>> = HashMap::from([
        (1i64, Arc::new(DisconnectAdapter) as Arc<dyn ProviderAdapter>),
        // Reaching this adapter would panic on the exhausted script.
        (2i64, ScriptedAdapter::new(vec![]) as Arc<dyn ProviderAdapter>),
    ]);
    let state = build_state(
        vec![provider(1), provider(2)],
        vec![route(1, 1, 0), route(2, 2, 1)],
        adapters,
    );

    let ctx = request_ctx();
    let mut record = RequestRecord::begin("test-instance", "req-1", ClientType::Claude);
    record.id = 1;
    let err = execute(&state, &ctx, &mut record).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ClientDisconnected);
    assert_eq!(record.attempt_count, 1);
}
