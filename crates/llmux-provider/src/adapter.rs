//! The adapter contract: one implementation per provider wire dialect.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use llmux_protocol::ClientType;
use llmux_storage::{AttemptRecord, TokenUsage};

use crate::error::ProxyError;

/// Canonical per-attempt context handed from the executor to an adapter.
#[derive(Clone)]
pub struct AttemptContext {
    pub client_type: ClientType,
    /// Model as the client named it.
    pub request_model: String,
    /// Model after the route's mapping was applied.
    pub mapped_model: String,
    /// Cached request body as received from the client.
    pub body: Bytes,
    pub is_stream: bool,
    pub session_id: Option<String>,
    /// The in-flight attempt record; adapters fill request/response info.
    pub attempt: Arc<Mutex<AttemptRecord>>,
}

impl AttemptContext {
    pub fn with_request_info(&self, info: llmux_storage::RequestInfo) {
        if let Ok(mut attempt) = self.attempt.lock() {
            attempt.request_info = Some(info);
        }
    }

    pub fn with_response_info(&self, info: llmux_storage::ResponseInfo) {
        if let Ok(mut attempt) = self.attempt.lock() {
            attempt.response_info = Some(info);
        }
    }
}

/// What the stream pump reports when a streamed reply ends.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamOutcome {
    pub client_disconnected: bool,
    pub usage: TokenUsage,
}

/// The reply an adapter hands back on success. Nothing has been written to
/// the client socket yet when this value is returned; failover is still
/// possible until the caller starts consuming a `Stream` body.
pub enum ClientResponse {
    Buffered {
        status: u16,
        headers: Vec<(String, String)>,
        body: Bytes,
    },
    Stream {
        status: u16,
        headers: Vec<(String, String)>,
        body: mpsc::Receiver<Bytes>,
        /// Resolves when the pump finishes; carries final usage counters.
        done: oneshot::Receiver<StreamOutcome>,
    },
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn supported_client_types(&self) -> &'static [ClientType];

    /// Run one upstream call for the staged request. Errors carry a
    /// retryability flag the executor acts on.
    async fn execute(&self, ctx: &AttemptContext) -> Result<ClientResponse, ProxyError>;
}

/// Response headers that must not be forwarded hop-by-hop.
pub fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "content-length" | "transfer-encoding" | "connection" | "keep-alive" | "content-encoding"
    )
}

/// The forced header set for an SSE reply to the client.
pub fn sse_headers() -> Vec<(String, String)> {
    vec![
        ("content-type".to_string(), "text/event-stream".to_string()),
        ("cache-control".to_string(), "no-cache".to_string()),
        ("connection".to_string(), "keep-alive".to_string()),
        ("x-accel-buffering".to_string(), "no".to_string()),
    ]
}
