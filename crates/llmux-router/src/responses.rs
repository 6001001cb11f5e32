//! Normalization of OpenAI Responses-API bodies into the Chat Completions
//! dialect the converter understands.

use serde_json::{Map, Value, json};

/// Rewrite a `/responses` body into a chat-completions body. Bodies that
/// already carry `messages` pass through; otherwise `instructions` becomes a
/// system message and `input` (string or item list) becomes the turn list.
pub fn normalize_responses_body(document: &Value) -> Value {
    let Some(root) = document.as_object() else {
        return document.clone();
    };
    if root.contains_key("messages") {
        return document.clone();
    }

    let mut messages = Vec::new();
    if let Some(instructions) = root.get("instructions").and_then(Value::as_str)
        && !instructions.is_empty()
    {
        messages.push(json!({ "role": "system", "content": instructions }));
    }

    match root.get("input") {
        Some(Value::String(text)) => {
            messages.push(json!({ "role": "user", "content": text }));
        }
        Some(Value::Array(items)) => {
            for item in items {
                let role = item
                    .get("role")
                    .and_then(Value::as_str)
                    .unwrap_or("user");
                let content = item_text(item);
                messages.push(json!({ "role": role, "content": content }));
            }
        }
        _ => {}
    }

    let mut out = Map::new();
    if let Some(model) = root.get("model") {
        out.insert("model".to_string(), model.clone());
    }
    out.insert("messages".to_string(), Value::Array(messages));
    if let Some(stream) = root.get("stream") {
        out.insert("stream".to_string(), stream.clone());
    }
    if let Some(max) = root.get("max_output_tokens") {
        out.insert("max_tokens".to_string(), max.clone());
    }
    for key in ["temperature", "top_p", "tools", "tool_choice"] {
        if let Some(value) = root.get(key) {
            out.insert(key.to_string(), value.clone());
        }
    }
    Value::Object(out)
}

fn item_text(item: &Value) -> String {
    match item.get("content") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}
