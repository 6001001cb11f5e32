//! The v1internal envelope used by the antigravity upstream.
//!
//! Requests are wrapped as `{project, requestId, request, model, userAgent,
//! requestType}`; replies come back under a `response` key, both for buffered
//! bodies and for each SSE `data:` line.

use serde_json::{Value, json};
use time::OffsetDateTime;

const USER_AGENT_TAG: &str = "antigravity";
const REQUEST_TYPE: &str = "agent";

/// Wrap a Gemini request body. Any `model` field inside the body moves to the
/// envelope level.
pub fn wrap_request(project: &str, model: &str, mut request: Value) -> Value {
    if let Value::Object(map) = &mut request {
        map.remove("model");
    }
    json!({
        "project": project,
        "requestId": request_id(),
        "request": request,
        "model": model,
        "userAgent": USER_AGENT_TAG,
        "requestType": REQUEST_TYPE,
    })
}

fn request_id() -> String {
    format!(
        "agent-{}",
        OffsetDateTime::now_utc().unix_timestamp_nanos()
    )
}

/// Extract the inner reply. A body without the wrapper passes through.
pub fn unwrap_response(value: Value) -> Value {
    match value {
        Value::Object(mut map) => match map.remove("response") {
            Some(inner) => inner,
            None => Value::Object(map),
        },
        other => other,
    }
}

/// Rewrite one upstream SSE line. `data:` lines carrying `{"response": ...}`
/// are replaced with the inner document; other non-empty lines pass through.
/// Every emitted chunk ends with an explicit `\n\n` terminator, and the
/// upstream's own blank separator lines are discarded.
pub fn rewrite_stream_line(line: &str) -> Option<String> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    if trimmed.trim().is_empty() {
        return None;
    }

    let Some(payload) = trimmed.strip_prefix("data:") else {
        return Some(format!("{trimmed}\n\n"));
    };
    let payload = payload.trim_start();
    match serde_json::from_str::<Value>(payload) {
        Ok(value) => {
            let inner = unwrap_response(value);
            Some(format!("data: {inner}\n\n"))
        }
        // Not JSON (e.g. "[DONE]"): forward untouched.
        Err(_) => Some(format!("{trimmed}\n\n")),
    }
}
