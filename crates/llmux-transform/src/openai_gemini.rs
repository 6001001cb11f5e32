//! OpenAI Chat Completions <-> Gemini generateContent document transforms.

use std::collections::HashMap;

use serde_json::{Value, json};
use time::OffsetDateTime;

use llmux_protocol::gemini::{
    Content, FunctionCall, FunctionDeclaration, FunctionResponse, GenerateContentRequest,
    GenerateContentResponse, GenerationConfig, Part, Tool,
};
use llmux_protocol::openai::{
    ChatCompletionRequest, ChatCompletionResponse, ChatContent, ChatMessage, ChatUsage, Choice,
    ToolCall, ToolCallFunction,
};

// ---- Request: OpenAI -> Gemini ----

pub(crate) fn request_to_gemini(request: ChatCompletionRequest) -> GenerateContentRequest {
    let mut contents: Vec<Content> = Vec::new();
    let mut system_parts: Vec<Part> = Vec::new();
    let mut tool_names: HashMap<String, String> = HashMap::new();

    for message in &request.messages {
        match message.role.as_str() {
            // role=system is emitted as systemInstruction, not as a turn.
            "system" | "developer" => {
                if let Some(content) = &message.content {
                    let text = content.joined_text();
                    if !text.is_empty() {
                        system_parts.push(Part::text(text));
                    }
                }
            }
            "tool" => {
                let id = message.tool_call_id.clone().unwrap_or_default();
                let name = tool_names.get(&id).cloned().unwrap_or_else(|| id.clone());
                let result = message
                    .content
                    .as_ref()
                    .map(ChatContent::joined_text)
                    .unwrap_or_default();
                contents.push(Content::new(
                    "user",
                    vec![Part {
                        function_response: Some(FunctionResponse {
                            id: (!id.is_empty()).then_some(id),
                            name,
                            response: json!({ "result": result }),
                        }),
                        ..Part::default()
                    }],
                ));
            }
            role => {
                let gemini_role = if role == "assistant" { "model" } else { "user" };
                let mut parts = content_parts(message);
                if let Some(calls) = &message.tool_calls {
                    for call in calls {
                        tool_names.insert(call.id.clone(), call.function.name.clone());
                        let args: Value = serde_json::from_str(&call.function.arguments)
                            .unwrap_or(Value::Object(serde_json::Map::new()));
                        parts.push(Part {
                            function_call: Some(FunctionCall {
                                id: Some(call.id.clone()),
                                name: call.function.name.clone(),
                                args: Some(args),
                            }),
                            ..Part::default()
                        });
                    }
                }
                if !parts.is_empty() {
                    contents.push(Content::new(gemini_role, parts));
                }
            }
        }
    }

    GenerateContentRequest {
        contents: merge_adjacent_roles(contents),
        system_instruction: (!system_parts.is_empty()).then(|| Content::new("user", system_parts)),
        tools: build_tools(request.tools.as_deref()),
        tool_config: None,
        generation_config: build_generation_config(&request),
    }
}

fn content_parts(message: &ChatMessage) -> Vec<Part> {
    match &message.content {
        None => Vec::new(),
        Some(ChatContent::Text(text)) if text.is_empty() => Vec::new(),
        Some(ChatContent::Text(text)) => vec![Part::text(text.clone())],
        Some(ChatContent::Parts(parts)) => parts
            .iter()
            .filter_map(|part| match part.kind.as_str() {
                "text" => part.text.as_ref().map(Part::text),
                "image_url" => part
                    .image_url
                    .as_ref()
                    .and_then(|image| inline_data_from_url(&image.url)),
                _ => None,
            })
            .collect(),
    }
}

/// `data:<mime>;base64,<payload>` URLs become inlineData; remote URLs are
/// referenced as text since Gemini v1internal takes no fetchable URIs.
fn inline_data_from_url(url: &str) -> Option<Part> {
    let rest = url.strip_prefix("data:")?;
    let (mime_type, payload) = rest.split_once(";base64,")?;
    Some(Part {
        inline_data: Some(llmux_protocol::gemini::Blob {
            mime_type: mime_type.to_string(),
            data: payload.to_string(),
        }),
        ..Part::default()
    })
}

fn merge_adjacent_roles(contents: Vec<Content>) -> Vec<Content> {
    let mut merged: Vec<Content> = Vec::with_capacity(contents.len());
    for content in contents {
        match merged.last_mut() {
            Some(last) if last.role == content.role => last.parts.extend(content.parts),
            _ => merged.push(content),
        }
    }
    merged
}

fn build_tools(tools: Option<&[llmux_protocol::openai::ChatTool]>) -> Option<Vec<Tool>> {
    let tools = tools?;
    let declarations: Vec<FunctionDeclaration> = tools
        .iter()
        .filter(|tool| tool.kind == "function")
        .map(|tool| FunctionDeclaration {
            name: tool.function.name.clone(),
            description: tool.function.description.clone().unwrap_or_default(),
            parameters: Some(crate::schema::clean_tool_schema(
                tool.function.parameters.clone(),
            )),
        })
        .collect();
    (!declarations.is_empty()).then(|| {
        vec![Tool {
            function_declarations: Some(declarations),
            google_search: None,
        }]
    })
}

fn build_generation_config(request: &ChatCompletionRequest) -> Option<GenerationConfig> {
    let stop_sequences = request.stop.as_ref().and_then(|stop| match stop {
        Value::String(single) => Some(vec![single.clone()]),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        ),
        _ => None,
    });

    let config = GenerationConfig {
        max_output_tokens: request.max_completion_tokens.or(request.max_tokens),
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: None,
        stop_sequences,
        thinking_config: None,
    };
    let empty = config.max_output_tokens.is_none()
        && config.temperature.is_none()
        && config.top_p.is_none()
        && config.stop_sequences.is_none();
    (!empty).then_some(config)
}

// ---- Response: Gemini -> OpenAI ----

pub(crate) fn response_to_chat(response: GenerateContentResponse) -> ChatCompletionResponse {
    let model = response
        .model_version
        .as_deref()
        .map(|model| model.strip_prefix("models/").unwrap_or(model).to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    let mut finish_reason = None;

    if let Some(candidate) = response.candidates.into_iter().next() {
        finish_reason = candidate.finish_reason;
        let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
        for (index, part) in parts.into_iter().enumerate() {
            if let Some(call) = part.function_call {
                tool_calls.push(ToolCall {
                    id: call.id.unwrap_or_else(|| format!("call_{index:04}")),
                    kind: "function".to_string(),
                    function: ToolCallFunction {
                        name: call.name,
                        arguments: call
                            .args
                            .map(|args| args.to_string())
                            .unwrap_or_else(|| "{}".to_string()),
                    },
                });
                continue;
            }
            // Reasoning output has no chat-completions slot; drop thoughts.
            if part.thought.unwrap_or(false) {
                continue;
            }
            if let Some(chunk) = part.text {
                text.push_str(&chunk);
            }
        }
    }

    let finish = if !tool_calls.is_empty() {
        "tool_calls"
    } else {
        match finish_reason.as_deref() {
            Some("MAX_TOKENS") => "length",
            Some("SAFETY") | Some("RECITATION") | Some("PROHIBITED_CONTENT") => "content_filter",
            _ => "stop",
        }
    };

    ChatCompletionResponse {
        id: response
            .response_id
            .map(|id| format!("chatcmpl-{id}"))
            .unwrap_or_else(|| "chatcmpl-proxy".to_string()),
        object: "chat.completion".to_string(),
        created: OffsetDateTime::now_utc().unix_timestamp(),
        model,
        choices: vec![Choice {
            index: 0,
            message: ChatMessage {
                role: "assistant".to_string(),
                content: (!text.is_empty()).then(|| ChatContent::Text(text)),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
                name: None,
            },
            finish_reason: Some(finish.to_string()),
        }],
        usage: response.usage_metadata.map(|metadata| ChatUsage {
            prompt_tokens: metadata.prompt_token_count.unwrap_or(0),
            completion_tokens: metadata.candidates_token_count.unwrap_or(0),
            total_tokens: metadata.total_token_count.unwrap_or_else(|| {
                metadata.prompt_token_count.unwrap_or(0)
                    + metadata.candidates_token_count.unwrap_or(0)
            }),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_json(value: Value) -> ChatCompletionRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn system_messages_become_system_instruction() {
        let request = request_json(json!({
            "model": "gpt-x",
            "messages": [
                { "role": "system", "content": "be terse" },
                { "role": "user", "content": "hi" },
                { "role": "assistant", "content": "hello" }
            ]
        }));
        let gemini = request_to_gemini(request);
        let system = gemini.system_instruction.unwrap();
        assert_eq!(system.parts[0].text.as_deref(), Some("be terse"));
        assert_eq!(gemini.contents.len(), 2);
        assert_eq!(gemini.contents[0].role.as_deref(), Some("user"));
        assert_eq!(gemini.contents[1].role.as_deref(), Some("model"));
    }

    #[test]
    fn tool_round_trip_uses_recorded_names() {
        let request = request_json(json!({
            "model": "gpt-x",
            "messages": [
                { "role": "user", "content": "look it up" },
                { "role": "assistant", "tool_calls": [{
                    "id": "call_1", "type": "function",
                    "function": { "name": "lookup", "arguments": "{\"q\":\"rust\"}" }
                }] },
                { "role": "tool", "tool_call_id": "call_1", "content": "found it" }
            ]
        }));
        let gemini = request_to_gemini(request);
        let call = gemini.contents[1].parts[0].function_call.as_ref().unwrap();
        assert_eq!(call.name, "lookup");
        assert_eq!(call.args.as_ref().unwrap()["q"], "rust");
        let reply = gemini.contents[2].parts[0]
            .function_response
            .as_ref()
            .unwrap();
        assert_eq!(reply.name, "lookup");
        assert_eq!(reply.response["result"], "found it");
    }

    #[test]
    fn function_calls_surface_as_tool_calls() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": { "role": "model", "parts": [
                    { "functionCall": { "id": "call_9", "name": "lookup", "args": { "q": 1 } } }
                ] },
                "finishReason": "STOP"
            }]
        }))
        .unwrap();
        let chat = response_to_chat(response);
        let choice = &chat.choices[0];
        assert_eq!(choice.finish_reason.as_deref(), Some("tool_calls"));
        let calls = choice.message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "call_9");
        assert_eq!(calls[0].function.arguments, "{\"q\":1}");
    }

    #[test]
    fn usage_totals_are_derived_when_absent() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{ "content": { "parts": [{ "text": "ok" }] } }],
            "usageMetadata": { "promptTokenCount": 3, "candidatesTokenCount": 4 }
        }))
        .unwrap();
        let chat = response_to_chat(response);
        let usage = chat.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 3);
        assert_eq!(usage.completion_tokens, 4);
        assert_eq!(usage.total_tokens, 7);
    }
}
