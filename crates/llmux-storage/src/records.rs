//! Observability records: one `RequestRecord` per client-facing request,
//! owning append-only `AttemptRecord`s, one per upstream call.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use llmux_protocol::ClientType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Success,
    Failed,
    Canceled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Failed => "failed",
            RequestStatus::Canceled => "canceled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    Success,
    Failed,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Success => "success",
            AttemptStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestInfo {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseInfo {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
}

impl TokenUsage {
    pub fn merge(&mut self, other: TokenUsage) {
        // Streams report cumulative counters on the final chunk; take the
        // maximum rather than summing duplicates.
        self.input_tokens = self.input_tokens.max(other.input_tokens);
        self.output_tokens = self.output_tokens.max(other.output_tokens);
        self.cache_read_tokens = self.cache_read_tokens.max(other.cache_read_tokens);
        self.cache_write_tokens = self.cache_write_tokens.max(other.cache_write_tokens);
    }
}

#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub id: i64,
    pub instance_id: String,
    pub request_id: String,
    pub session_id: Option<String>,
    pub client_type: ClientType,
    pub request_model: Option<String>,
    pub response_model: Option<String>,
    pub start_time: OffsetDateTime,
    pub end_time: Option<OffsetDateTime>,
    pub duration_ms: Option<i64>,
    pub status: RequestStatus,
    pub request_info: Option<RequestInfo>,
    pub response_info: Option<ResponseInfo>,
    pub error: Option<String>,
    pub attempt_count: u32,
    pub final_attempt_id: i64,
    pub usage: TokenUsage,
    pub route_id: i64,
    pub provider_id: i64,
    pub is_stream: bool,
}

impl RequestRecord {
    pub fn begin(instance_id: &str, request_id: &str, client_type: ClientType) -> Self {
        Self {
            id: 0,
            instance_id: instance_id.to_string(),
            request_id: request_id.to_string(),
            session_id: None,
            client_type,
            request_model: None,
            response_model: None,
            start_time: OffsetDateTime::now_utc(),
            end_time: None,
            duration_ms: None,
            status: RequestStatus::Failed,
            request_info: None,
            response_info: None,
            error: None,
            attempt_count: 0,
            final_attempt_id: 0,
            usage: TokenUsage::default(),
            route_id: 0,
            provider_id: 0,
            is_stream: false,
        }
    }

    pub fn finish(&mut self, status: RequestStatus) {
        let now = OffsetDateTime::now_utc();
        self.status = status;
        self.end_time = Some(now);
        self.duration_ms = Some(((now - self.start_time).whole_milliseconds()) as i64);
    }
}

#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub id: i64,
    pub proxy_request_id: i64,
    pub status: AttemptStatus,
    pub request_info: Option<RequestInfo>,
    pub response_info: Option<ResponseInfo>,
    pub route_id: i64,
    pub provider_id: i64,
    pub usage: TokenUsage,
    pub is_stream: bool,
}

impl AttemptRecord {
    pub fn begin(proxy_request_id: i64, route_id: i64, provider_id: i64, is_stream: bool) -> Self {
        Self {
            id: 0,
            proxy_request_id,
            status: AttemptStatus::Failed,
            request_info: None,
            response_info: None,
            route_id,
            provider_id,
            usage: TokenUsage::default(),
            is_stream,
        }
    }
}
