//! Canonical request context staged by the ingress layer for the executor.

use bytes::Bytes;

use llmux_protocol::ClientType;

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub client_type: ClientType,
    /// 0 = global project.
    pub project_id: i64,
    pub session_id: Option<String>,
    /// Model exactly as the client named it.
    pub request_model: String,
    /// Cached request body; replayed verbatim on every attempt.
    pub body: Bytes,
    pub is_stream: bool,
}
