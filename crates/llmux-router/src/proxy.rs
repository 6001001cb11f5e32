//! Entry point for each proxied HTTP path.
//!
//! Detects the client type from the path, the streaming intent from path or
//! body, stages the canonical request context, owns the ProxyRequest record
//! from creation to finalization, and hands the candidate walk to the
//! executor.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use serde_json::{Value, json};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use llmux_core::{AppState, Event, RequestContext, RequestFinishedEvent, execute};
use llmux_protocol::ClientType;
use llmux_provider::adapter::ClientResponse;
use llmux_provider::{ErrorKind, ProxyError};
use llmux_storage::{RequestInfo, RequestRecord, RequestStatus, ResponseInfo};

pub fn proxy_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/messages", post(claude_messages))
        .route("/v1/chat/completions", post(openai_chat_completions))
        .route("/responses", post(openai_responses))
        .route("/v1beta/models/{*action}", post(gemini_generate))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> Response {
    json_response(StatusCode::OK, json!({ "status": "ok" }))
}

async fn claude_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_proxy(state, ClientType::Claude, headers, None, body).await
}

async fn openai_chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_proxy(state, ClientType::OpenAI, headers, None, body).await
}

async fn openai_responses(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let document: Value = match serde_json::from_slice(&body) {
        Ok(document) => document,
        Err(_) => {
            return error_response(ClientType::OpenAI, &ProxyError::format_conversion("invalid JSON body"));
        }
    };
    let normalized = crate::responses::normalize_responses_body(&document);
    let body = Bytes::from(normalized.to_string());
    handle_proxy(state, ClientType::OpenAI, headers, None, body).await
}

async fn gemini_generate(
    State(state): State<Arc<AppState>>,
    Path(action): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some((model, verb)) = action.rsplit_once(':') else {
        return error_response(
            ClientType::Gemini,
            &ProxyError::internal("missing model action"),
        );
    };
    let stream = match verb {
        "generateContent" => false,
        "streamGenerateContent" => true,
        _ => {
            return json_response(
                StatusCode::NOT_FOUND,
                json!({ "error": { "code": 404, "message": format!("unsupported action: {verb}") } }),
            );
        }
    };
    let gemini = Some((model.to_string(), stream));
    handle_proxy(state, ClientType::Gemini, headers, gemini, body).await
}

async fn handle_proxy(
    state: Arc<AppState>,
    client_type: ClientType,
    headers: HeaderMap,
    gemini: Option<(String, bool)>,
    body: Bytes,
) -> Response {
    let parsed: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let (request_model, is_stream) = match gemini {
        Some((model, stream)) => (model, stream),
        None => (
            parsed
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            parsed
                .get("stream")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        ),
    };

    let session_id = extract_session_id(&parsed, &headers);
    let project_id = resolve_project(&state, session_id.as_deref(), client_type).await;

    let request_id = uuid::Uuid::now_v7().to_string();
    let mut record = RequestRecord::begin(&state.instance_id, &request_id, client_type);
    record.session_id = session_id.clone();
    record.request_model = (!request_model.is_empty()).then(|| request_model.clone());
    record.is_stream = is_stream;
    record.request_info = Some(RequestInfo {
        method: "POST".to_string(),
        url: String::new(),
        headers: Default::default(),
        body: String::from_utf8_lossy(&body).into_owned(),
    });
    match state.storage.insert_request(&record).await {
        Ok(id) => record.id = id,
        Err(err) => tracing::warn!(%err, "request insert failed"),
    }

    let ctx = RequestContext {
        client_type,
        project_id,
        session_id,
        request_model,
        body,
        is_stream,
    };

    // If the client goes away while we are still talking upstream, this
    // handler future is dropped; the guard then records the cancellation.
    let mut guard = AbortGuard::arm(Arc::clone(&state), record);
    let result = execute(&state, &ctx, guard.record_mut()).await;
    let mut record = guard.disarm();

    match result {
        Ok(ClientResponse::Buffered {
            status,
            headers,
            body,
        }) => {
            record.response_info = Some(ResponseInfo {
                status,
                headers: headers.iter().cloned().collect(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
            record.finish(RequestStatus::Success);
            finalize_record(&state, &record).await;
            build_response(status, &headers, Body::from(body))
        }
        Ok(ClientResponse::Stream {
            status,
            headers,
            body,
            done,
        }) => {
            record.response_info = Some(ResponseInfo {
                status,
                headers: headers.iter().cloned().collect(),
                body: "[streaming]".to_string(),
            });
            // The pump finishes after this handler returns; a background
            // task closes out the record with the final usage counters.
            let finalizer_state = Arc::clone(&state);
            tokio::spawn(async move {
                let status = match done.await {
                    Ok(outcome) => {
                        record.usage.merge(outcome.usage);
                        if outcome.client_disconnected {
                            RequestStatus::Canceled
                        } else {
                            RequestStatus::Success
                        }
                    }
                    Err(_) => RequestStatus::Canceled,
                };
                record.finish(status);
                finalize_record(&finalizer_state, &record).await;
            });
            let stream = ReceiverStream::new(body).map(Ok::<_, Infallible>);
            build_response(status, &headers, Body::from_stream(stream))
        }
        Err(err) => {
            let status = if err.kind == ErrorKind::ClientDisconnected {
                RequestStatus::Canceled
            } else {
                RequestStatus::Failed
            };
            record.error = Some(err.to_string());
            record.finish(status);
            finalize_record(&state, &record).await;
            error_response(client_type, &err)
        }
    }
}

fn extract_session_id(parsed: &Value, headers: &HeaderMap) -> Option<String> {
    if let Some(user_id) = parsed
        .pointer("/metadata/user_id")
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
    {
        return Some(user_id.to_string());
    }
    if let Some(user) = parsed
        .get("user")
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
    {
        return Some(user.to_string());
    }
    headers
        .get("x-session-id")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Known sessions resolve from the snapshot; unknown ones are upserted
/// lazily and land in the global project.
async fn resolve_project(
    state: &AppState,
    session_id: Option<&str>,
    client_type: ClientType,
) -> i64 {
    let Some(session_id) = session_id else {
        return 0;
    };
    if let Some(project_id) = state.snapshot.load().sessions.get(session_id) {
        return *project_id;
    }
    match state.storage.resolve_session(session_id, client_type).await {
        Ok(project_id) => project_id,
        Err(err) => {
            tracing::warn!(%err, session_id, "session resolve failed");
            0
        }
    }
}

async fn finalize_record(state: &AppState, record: &RequestRecord) {
    if record.id != 0
        && let Err(err) = state.storage.update_request(record).await
    {
        tracing::warn!(%err, "request update failed");
    }
    state.events.emit(Event::RequestFinished(RequestFinishedEvent {
        request_id: record.request_id.clone(),
        status: record.status.as_str(),
        provider_id: record.provider_id,
        duration_ms: record.duration_ms.unwrap_or(0),
    }));
}

struct AbortGuard {
    inner: Option<(Arc<AppState>, RequestRecord)>,
}

impl AbortGuard {
    fn arm(state: Arc<AppState>, record: RequestRecord) -> Self {
        Self {
            inner: Some((state, record)),
        }
    }

    fn record_mut(&mut self) -> &mut RequestRecord {
        &mut self.inner.as_mut().expect("guard disarmed").1
    }

    fn disarm(mut self) -> RequestRecord {
        self.inner.take().expect("guard disarmed").1
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        let Some((state, mut record)) = self.inner.take() else {
            return;
        };
        tokio::spawn(async move {
            record.finish(RequestStatus::Canceled);
            record.error = Some("client disconnected".to_string());
            finalize_record(&state, &record).await;
        });
    }
}

fn build_response(status: u16, headers: &[(String, String)], body: Body) -> Response {
    let mut builder = axum::http::Response::builder().status(status);
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    builder
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn json_response(status: StatusCode, body: Value) -> Response {
    let mut builder = axum::http::Response::builder().status(status);
    builder = builder.header("content-type", "application/json");
    builder
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// JSON error body in the client's own dialect, only ever sent when nothing
/// has been streamed yet.
fn error_response(client_type: ClientType, err: &ProxyError) -> Response {
    let status = err.status.unwrap_or(match err.kind {
        ErrorKind::NoRoutes => 503,
        ErrorKind::Internal => 500,
        // Nginx convention for a caller that is already gone.
        ErrorKind::ClientDisconnected => 499,
        _ => 502,
    });
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    let kind = error_kind_label(err.kind);

    let body = match client_type {
        ClientType::Claude => json!({
            "type": "error",
            "error": { "type": kind, "message": err.message }
        }),
        ClientType::OpenAI => json!({
            "error": { "type": kind, "message": err.message, "code": status.as_u16() }
        }),
        ClientType::Gemini => json!({
            "error": { "code": status.as_u16(), "message": err.message, "status": kind }
        }),
    };
    json_response(status, body)
}

fn error_kind_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::FormatConversion => "format_conversion_error",
        ErrorKind::Network | ErrorKind::UpstreamStatus => "upstream_error",
        ErrorKind::Auth => "authentication_error",
        ErrorKind::ClientDisconnected => "client_disconnected",
        ErrorKind::NoRoutes => "no_routes",
        ErrorKind::Internal => "internal_error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_prefers_claude_metadata() {
        let parsed = json!({ "metadata": { "user_id": "sess-1" }, "user": "sess-2" });
        let headers = HeaderMap::new();
        assert_eq!(
            extract_session_id(&parsed, &headers).as_deref(),
            Some("sess-1")
        );
    }

    #[test]
    fn session_id_falls_back_to_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-session-id", "sess-h".parse().unwrap());
        assert_eq!(
            extract_session_id(&Value::Null, &headers).as_deref(),
            Some("sess-h")
        );
    }

    #[test]
    fn error_bodies_match_the_client_dialect() {
        let err = ProxyError::no_routes();
        let response = error_response(ClientType::Claude, &err);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
