//! Antigravity adapter behavior against a scripted upstream.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use llmux_protocol::ClientType;
use llmux_provider::adapter::{AttemptContext, ClientResponse, ProviderAdapter};
use llmux_provider::antigravity::AntigravityAdapter;
use llmux_provider::{ProxyError, UpstreamBody, UpstreamClient, UpstreamRequest, UpstreamResponse};
use llmux_storage::AttemptRecord;
use llmux_transform::Converter;

struct ScriptedClient {
    script: Mutex<VecDeque<(u16, &'static str)>>,
    log: Mutex<Vec<UpstreamRequest>>,
}

impl ScriptedClient {
    fn new(script: Vec<(u16, &'static str)>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            log: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<UpstreamRequest> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl UpstreamClient for ScriptedClient {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, ProxyError> {
        self.log.lock().unwrap().push(request);
        let (status, body) = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .expect("script exhausted");
        Ok(UpstreamResponse {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: UpstreamBody::Bytes(Bytes::from_static(body.as_bytes())),
        })
    }
}

fn attempt_ctx(client_type: ClientType, body: &'static str) -> AttemptContext {
    AttemptContext {
        client_type,
        request_model: "claude-sonnet".to_string(),
        mapped_model: "gemini-3-pro-preview".to_string(),
        body: Bytes::from_static(body.as_bytes()),
        is_stream: false,
        session_id: None,
        attempt: Arc::new(Mutex::new(AttemptRecord::begin(1, 1, 1, false))),
    }
}

fn adapter_with(client: Arc<ScriptedClient>) -> AntigravityAdapter {
    AntigravityAdapter::new(
        "refresh-token".to_string(),
        Some("test-project".to_string()),
        None,
        Arc::new(Converter::new()),
        client as Arc<dyn UpstreamClient>,
    )
}

const CLAUDE_BODY: &str = "{\"model\":\"claude-sonnet\",\"messages\":[{\"role\":\"user\",\"content\":\"hi\"}]}";

const TOKEN_1: &str = "{\"access_token\":\"tok1\",\"expires_in\":3600}";
const TOKEN_2: &str = "{\"access_token\":\"tok2\",\"expires_in\":3600}";
const GENERATE_OK: &str = "{\"response\":{\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"hello\"}]}}],\"usageMetadata\":{\"promptTokenCount\":1,\"candidatesTokenCount\":1}}}";

#[tokio::test]
async fn claude_request_round_trips_through_the_envelope() {
    let client = ScriptedClient::new(vec![(200, TOKEN_1), (200, GENERATE_OK)]);
    let adapter = adapter_with(Arc::clone(&client));

    let ctx = attempt_ctx(ClientType::Claude, CLAUDE_BODY);
    let response = adapter.execute(&ctx).await.unwrap();
    let ClientResponse::Buffered { status, body, .. } = response else {
        panic!("expected buffered response");
    };
    assert_eq!(status, 200);

    let reply: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(reply["type"], "message");
    assert_eq!(reply["role"], "assistant");
    assert_eq!(reply["content"], serde_json::json!([{ "type": "text", "text": "hello" }]));
    assert_eq!(reply["usage"]["input_tokens"], 1);
    assert_eq!(reply["usage"]["output_tokens"], 1);

    // Second request on the log is the generate call, carrying the envelope.
    let requests = client.requests();
    assert_eq!(requests.len(), 2);
    let generate = &requests[1];
    assert!(generate.url.ends_with("/v1internal:generateContent"));

    let envelope: Value = serde_json::from_slice(generate.body.as_ref().unwrap()).unwrap();
    assert_eq!(envelope["project"], "test-project");
    assert_eq!(envelope["model"], "gemini-3-pro-preview");
    assert_eq!(envelope["userAgent"], "antigravity");
    assert_eq!(envelope["requestType"], "agent");
    assert!(envelope["requestId"].as_str().unwrap().starts_with("agent-"));
    let contents = envelope["request"]["contents"].as_array().unwrap();
    assert_eq!(contents[0]["parts"][0]["text"], "hi");
    // The identity prompt is injected with its end marker.
    let system_parts = envelope["request"]["systemInstruction"]["parts"]
        .as_array()
        .unwrap();
    assert!(
        system_parts[0]["text"]
            .as_str()
            .unwrap()
            .contains("Antigravity")
    );
    assert!(
        system_parts
            .last()
            .unwrap()["text"]
            .as_str()
            .unwrap()
            .contains("[SYSTEM_PROMPT_END]")
    );

    // Exactly the contract headers, nothing client-supplied.
    let names: Vec<&str> = generate
        .headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect();
    assert_eq!(
        names,
        ["content-type", "authorization", "user-agent", "accept-encoding"]
    );
}

#[tokio::test]
async fn unauthorized_answer_refreshes_the_token_once() {
    let client = ScriptedClient::new(vec![
        (200, TOKEN_1),
        (401, "{\"error\":\"unauthorized\"}"),
        (200, TOKEN_2),
        (200, GENERATE_OK),
        // A follow-up request reuses the cached token: no oauth call.
        (200, GENERATE_OK),
    ]);
    let adapter = adapter_with(Arc::clone(&client));

    let ctx = attempt_ctx(ClientType::Claude, CLAUDE_BODY);
    adapter.execute(&ctx).await.unwrap();

    let requests = client.requests();
    assert_eq!(requests.len(), 4);
    assert!(requests[0].url.contains("oauth2.googleapis.com"));
    assert!(auth_header(&requests[1]).ends_with("tok1"));
    assert!(requests[2].url.contains("oauth2.googleapis.com"));
    assert!(auth_header(&requests[3]).ends_with("tok2"));

    let ctx = attempt_ctx(ClientType::Claude, CLAUDE_BODY);
    adapter.execute(&ctx).await.unwrap();
    let requests = client.requests();
    assert_eq!(requests.len(), 5);
    assert!(auth_header(&requests[4]).ends_with("tok2"));
}

#[tokio::test]
async fn second_unauthorized_surfaces_as_a_fatal_attempt() {
    let client = ScriptedClient::new(vec![
        (200, TOKEN_1),
        (401, "{}"),
        (200, TOKEN_2),
        (401, "{}"),
    ]);
    let adapter = adapter_with(Arc::clone(&client));

    let ctx = attempt_ctx(ClientType::Claude, CLAUDE_BODY);
    let err = adapter.execute(&ctx).await.unwrap_err();
    assert_eq!(err.status, Some(401));
    assert!(!err.retryable);
}

#[tokio::test]
async fn retry_after_header_becomes_an_explicit_duration() {
    struct RateLimited;
    #[async_trait]
    impl UpstreamClient for RateLimited {
        async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, ProxyError> {
            if request.url.contains("oauth2") {
                return Ok(UpstreamResponse {
                    status: 200,
                    headers: Vec::new(),
                    body: UpstreamBody::Bytes(Bytes::from_static(TOKEN_1.as_bytes())),
                });
            }
            Ok(UpstreamResponse {
                status: 429,
                headers: vec![("retry-after".to_string(), "90".to_string())],
                body: UpstreamBody::Bytes(Bytes::from_static(b"rate limited")),
            })
        }
    }

    let adapter = AntigravityAdapter::new(
        "refresh-token".to_string(),
        Some("test-project".to_string()),
        None,
        Arc::new(Converter::new()),
        Arc::new(RateLimited),
    );
    let ctx = attempt_ctx(ClientType::Claude, CLAUDE_BODY);
    let err = adapter.execute(&ctx).await.unwrap_err();
    assert_eq!(err.status, Some(429));
    assert!(err.retryable);
    assert_eq!(err.retry_after, Some(std::time::Duration::from_secs(90)));
}

fn auth_header(request: &UpstreamRequest) -> String {
    request
        .headers
        .iter()
        .find(|(name, _)| name == "authorization")
        .map(|(_, value)| value.clone())
        .unwrap_or_default()
}
