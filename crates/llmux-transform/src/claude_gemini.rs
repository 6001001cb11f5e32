//! Claude Messages <-> Gemini generateContent document transforms.

use std::collections::HashMap;

use serde_json::{Value, json};

use llmux_protocol::claude::{
    ContentBlock, CreateMessageRequest, MessageContent, MessageResponse, Role, SystemPrompt, Usage,
};
use llmux_protocol::gemini::{
    Content, FunctionCall, FunctionDeclaration, FunctionResponse, GenerateContentRequest,
    GenerateContentResponse, GenerationConfig, Part, ThinkingConfig, Tool, UsageMetadata,
};

use crate::schema::clean_tool_schema;
use crate::signature::SignatureCache;

const MIN_SIGNATURE_LENGTH: usize = 50;
const SYSTEM_PROMPT_END_MARKER: &str = "\n--- [SYSTEM_PROMPT_END] ---";

fn has_valid_signature(signature: &str) -> bool {
    signature.len() >= MIN_SIGNATURE_LENGTH
}

pub(crate) fn empty_tool_result_text(is_error: bool) -> &'static str {
    if is_error {
        "Tool execution failed with no output."
    } else {
        "Command executed successfully."
    }
}

// ---- Request: Claude -> Gemini ----

pub(crate) fn request_to_gemini(
    cache: &SignatureCache,
    request: CreateMessageRequest,
    mapped_model: &str,
) -> GenerateContentRequest {
    let contents = build_contents(cache, &request, mapped_model);
    let system_instruction = system_to_instruction(request.system.as_ref());
    let tools = build_tools(request.tools.as_deref());
    let tool_config = tool_choice_to_config(request.tool_choice.as_ref());
    let generation_config = build_generation_config(&request);

    GenerateContentRequest {
        contents,
        system_instruction,
        tools,
        tool_config,
        generation_config,
    }
}

fn build_contents(
    cache: &SignatureCache,
    request: &CreateMessageRequest,
    mapped_model: &str,
) -> Vec<Content> {
    let mut contents = Vec::new();
    // tool_use lives in assistant turns, its result in the following user
    // turn, so the id -> name map spans the whole conversation.
    let mut tool_names: HashMap<String, String> = HashMap::new();

    for message in &request.messages {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "model",
        };
        let mut parts = Vec::new();
        let mut last_thought_signature: Option<String> = None;

        let blocks: Vec<ContentBlock> = match &message.content {
            MessageContent::Text(text) => vec![ContentBlock::Text { text: text.clone() }],
            MessageContent::Blocks(blocks) => blocks.clone(),
        };

        for block in blocks {
            match block {
                ContentBlock::Text { text } => parts.push(Part::text(text)),
                ContentBlock::Thinking {
                    thinking,
                    signature,
                } => {
                    let part = thinking_part(
                        cache,
                        mapped_model,
                        &thinking,
                        signature.as_deref(),
                        last_thought_signature.as_deref(),
                        parts.is_empty(),
                    );
                    if let Some(signature) = part.thought_signature.clone() {
                        last_thought_signature = Some(signature);
                    }
                    parts.push(part);
                }
                ContentBlock::RedactedThinking { data } => parts.push(Part::thought(data)),
                ContentBlock::ToolUse {
                    id,
                    name,
                    input,
                    signature,
                } => {
                    tool_names.insert(id.clone(), name.clone());
                    // Recovery order: client-provided, then the signature
                    // seen earlier in this turn, then the cached one.
                    let recovered = signature
                        .filter(|sig| has_valid_signature(sig))
                        .or_else(|| last_thought_signature.clone())
                        .or_else(|| cache.tool_signature(&id));
                    if let Some(sig) = recovered.as_deref() {
                        cache.remember_tool_signature(&id, sig);
                    }
                    parts.push(Part {
                        function_call: Some(FunctionCall {
                            id: Some(id),
                            name,
                            args: Some(input),
                        }),
                        thought_signature: recovered,
                        ..Part::default()
                    });
                }
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => {
                    let mut merged = tool_result_text(content.as_ref());
                    if merged.trim().is_empty() {
                        merged = empty_tool_result_text(is_error.unwrap_or(false)).to_string();
                    }
                    let name = tool_names
                        .get(&tool_use_id)
                        .cloned()
                        .unwrap_or_else(|| tool_use_id.clone());
                    parts.push(Part {
                        function_response: Some(FunctionResponse {
                            id: Some(tool_use_id),
                            name,
                            response: json!({ "result": merged }),
                        }),
                        thought_signature: last_thought_signature.clone(),
                        ..Part::default()
                    });
                }
                ContentBlock::Image { source } => {
                    let part = match (source.media_type, source.data) {
                        (Some(media_type), Some(data)) => Part {
                            inline_data: Some(llmux_protocol::gemini::Blob {
                                mime_type: media_type,
                                data,
                            }),
                            ..Part::default()
                        },
                        _ => Part::text("[Image]"),
                    };
                    parts.push(part);
                }
            }
        }

        if !parts.is_empty() {
            contents.push(Content::new(role, parts));
        }
    }

    merge_adjacent_roles(contents)
}

fn thinking_part(
    cache: &SignatureCache,
    mapped_model: &str,
    thinking: &str,
    signature: Option<&str>,
    last_signature: Option<&str>,
    is_first_part: bool,
) -> Part {
    // Thinking is only valid as the first part of the turn.
    if !is_first_part {
        return Part::text(thinking);
    }
    if thinking.is_empty() {
        return Part::text("...");
    }

    let signature = signature.filter(|sig| !sig.is_empty()).or(last_signature);
    if let Some(sig) = signature {
        // A signature minted by another model family must not be replayed;
        // the whole block degrades to plain text instead.
        if !cache.compatible_with(sig, mapped_model) {
            return Part::text(thinking);
        }
        if has_valid_signature(sig) {
            return Part {
                thought_signature: Some(sig.to_string()),
                ..Part::thought(thinking)
            };
        }
    }
    Part::thought(thinking)
}

pub(crate) fn tool_result_text(content: Option<&Value>) -> String {
    match content {
        None => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
    }
}

/// Gemini strictly alternates user/model; adjacent same-role turns collapse
/// into one by concatenating their parts.
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

fn system_to_instruction(system: Option<&SystemPrompt>) -> Option<Content> {
    let parts: Vec<Part> = match system? {
        SystemPrompt::Text(text) if !text.is_empty() => vec![Part::text(text.clone())],
        SystemPrompt::Text(_) => Vec::new(),
        SystemPrompt::Blocks(blocks) => blocks
            .iter()
            .filter(|block| !block.text.is_empty())
            .map(|block| Part::text(block.text.clone()))
            .collect(),
    };
    if parts.is_empty() {
        None
    } else {
        Some(Content::new("user", parts))
    }
}

/// Prepend the provider identity to the system instruction unless the caller
/// already carries it, and terminate the injected prompt with an explicit
/// end marker. Operates on the serialized document so Gemini-native bodies
/// keep their unknown fields.
pub fn apply_identity_prompt(request: &mut Value, identity: &str) {
    let Some(root) = request.as_object_mut() else {
        return;
    };

    let existing_parts: Vec<Value> = root
        .get("systemInstruction")
        .and_then(|instruction| instruction.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let already_present = existing_parts.iter().any(|part| {
        part.get("text")
            .and_then(Value::as_str)
            .is_some_and(|text| text.to_ascii_lowercase().contains("antigravity"))
    });
    if already_present {
        return;
    }

    let mut parts = vec![json!({ "text": identity })];
    parts.extend(existing_parts);
    parts.push(json!({ "text": SYSTEM_PROMPT_END_MARKER }));
    root.insert(
        "systemInstruction".to_string(),
        json!({ "role": "user", "parts": parts }),
    );
}

fn build_tools(tools: Option<&[llmux_protocol::claude::Tool]>) -> Option<Vec<Tool>> {
    let tools = tools?;
    let mut declarations = Vec::new();
    let mut has_web_search = false;

    for tool in tools {
        if is_web_search_tool(tool) {
            has_web_search = true;
            continue;
        }
        declarations.push(FunctionDeclaration {
            name: tool.name.clone(),
            description: tool.description.clone().unwrap_or_default(),
            parameters: Some(clean_tool_schema(tool.input_schema.clone())),
        });
    }

    if declarations.is_empty() && !has_web_search {
        return None;
    }
    Some(vec![Tool {
        function_declarations: (!declarations.is_empty()).then_some(declarations),
        google_search: has_web_search.then(|| json!({})),
    }])
}

/// Server-side web-search tools become Gemini `googleSearch` instead of a
/// function declaration.
fn is_web_search_tool(tool: &llmux_protocol::claude::Tool) -> bool {
    if let Some(kind) = tool.kind.as_deref()
        && kind.starts_with("web_search")
    {
        return true;
    }
    let name = tool.name.to_ascii_lowercase();
    matches!(
        name.as_str(),
        "web_search" | "websearch" | "google_search" | "googlesearch" | "search"
            | "internet_search"
    )
}

fn tool_choice_to_config(choice: Option<&Value>) -> Option<Value> {
    let choice = choice?;
    let mode = choice.get("type").and_then(Value::as_str)?;
    let config = match mode {
        "auto" => json!({ "mode": "AUTO" }),
        "any" => json!({ "mode": "ANY" }),
        "none" => json!({ "mode": "NONE" }),
        "tool" => {
            let name = choice.get("name").and_then(Value::as_str)?;
            json!({ "mode": "ANY", "allowedFunctionNames": [name] })
        }
        _ => return None,
    };
    Some(json!({ "functionCallingConfig": config }))
}

fn build_generation_config(request: &CreateMessageRequest) -> Option<GenerationConfig> {
    let thinking_config = request.thinking.as_ref().map(|thinking| ThinkingConfig {
        include_thoughts: thinking.kind == "enabled",
        thinking_budget: thinking.budget_tokens,
    });

    let config = GenerationConfig {
        max_output_tokens: (request.max_tokens > 0).then_some(request.max_tokens),
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: request.top_k,
        stop_sequences: request.stop_sequences.clone(),
        thinking_config,
    };

    let empty = config.max_output_tokens.is_none()
        && config.temperature.is_none()
        && config.top_p.is_none()
        && config.top_k.is_none()
        && config.stop_sequences.is_none()
        && config.thinking_config.is_none();
    (!empty).then_some(config)
}

// ---- Response: Gemini -> Claude ----

pub(crate) fn response_to_claude(
    cache: &SignatureCache,
    response: GenerateContentResponse,
) -> MessageResponse {
    let model = response
        .model_version
        .as_deref()
        .map(|model| model.strip_prefix("models/").unwrap_or(model).to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let mut content = Vec::new();
    let mut has_tool_use = false;
    let mut finish_reason = None;

    if let Some(candidate) = response.candidates.into_iter().next() {
        finish_reason = candidate.finish_reason;
        let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
        for (index, part) in parts.into_iter().enumerate() {
            if let Some(call) = part.function_call {
                has_tool_use = true;
                let id = call
                    .id
                    .unwrap_or_else(|| format!("toolu_{index:04}"));
                if let Some(signature) = part.thought_signature.as_deref() {
                    cache.remember_tool_signature(&id, signature);
                    cache.remember_family(signature, &model);
                }
                content.push(ContentBlock::ToolUse {
                    id,
                    name: call.name,
                    input: call.args.unwrap_or_else(|| json!({})),
                    signature: part.thought_signature,
                });
                continue;
            }
            let Some(text) = part.text else { continue };
            if part.thought.unwrap_or(false) {
                if let Some(signature) = part.thought_signature.as_deref() {
                    cache.remember_family(signature, &model);
                }
                content.push(ContentBlock::Thinking {
                    thinking: text,
                    signature: part.thought_signature,
                });
            } else {
                content.push(ContentBlock::Text { text });
            }
        }
    }

    MessageResponse {
        id: response
            .response_id
            .unwrap_or_else(|| "msg_proxy".to_string()),
        kind: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model,
        stop_reason: Some(map_finish_reason(finish_reason.as_deref(), has_tool_use)),
        stop_sequence: None,
        usage: usage_from_metadata(response.usage_metadata.as_ref()),
    }
}

pub(crate) fn map_finish_reason(reason: Option<&str>, has_tool_use: bool) -> String {
    if has_tool_use {
        return "tool_use".to_string();
    }
    match reason {
        Some("MAX_TOKENS") => "max_tokens",
        Some("SAFETY") | Some("RECITATION") | Some("PROHIBITED_CONTENT") => "refusal",
        _ => "end_turn",
    }
    .to_string()
}

pub(crate) fn usage_from_metadata(metadata: Option<&UsageMetadata>) -> Usage {
    let metadata = match metadata {
        Some(metadata) => metadata,
        None => return Usage::default(),
    };
    Usage {
        input_tokens: metadata.prompt_token_count.unwrap_or(0),
        output_tokens: metadata.candidates_token_count.unwrap_or(0),
        cache_read_input_tokens: metadata.cached_content_token_count.filter(|count| *count > 0),
        cache_creation_input_tokens: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmux_protocol::claude::Message;

    const SIG: &str = "0123456789012345678901234567890123456789012345678901234567890123";

    fn text_request(text: &str) -> CreateMessageRequest {
        CreateMessageRequest {
            model: "claude-sonnet".to_string(),
            messages: vec![Message {
                role: Role::User,
                content: MessageContent::Text(text.to_string()),
            }],
            system: None,
            max_tokens: 0,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            stream: None,
            metadata: None,
            tools: None,
            tool_choice: None,
            thinking: None,
        }
    }

    #[test]
    fn text_round_trips_through_gemini() {
        let cache = SignatureCache::new();
        let gemini = request_to_gemini(&cache, text_request("hi"), "gemini-3-pro-preview");
        assert_eq!(gemini.contents.len(), 1);
        assert_eq!(gemini.contents[0].role.as_deref(), Some("user"));
        assert_eq!(gemini.contents[0].parts[0].text.as_deref(), Some("hi"));

        // An echoing server sends the text back; the Claude view must carry
        // the identical bytes.
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{ "content": { "role": "model", "parts": [{ "text": "hi" }] } }]
        }))
        .unwrap();
        let claude = response_to_claude(&cache, response);
        assert!(matches!(
            &claude.content[0],
            ContentBlock::Text { text } if text == "hi"
        ));
    }

    #[test]
    fn adjacent_same_role_turns_merge() {
        let mut request = text_request("a");
        request.messages.push(Message {
            role: Role::User,
            content: MessageContent::Text("b".to_string()),
        });
        let gemini = request_to_gemini(&SignatureCache::new(), request, "gemini-3-pro-preview");
        assert_eq!(gemini.contents.len(), 1);
        assert_eq!(gemini.contents[0].parts.len(), 2);
    }

    #[test]
    fn empty_tool_results_get_injected_text() {
        let mut request = text_request("run it");
        request.messages.push(Message {
            role: Role::User,
            content: MessageContent::Blocks(vec![
                ContentBlock::ToolResult {
                    tool_use_id: "toolu_1".to_string(),
                    content: Some(json!("")),
                    is_error: Some(true),
                },
                ContentBlock::ToolResult {
                    tool_use_id: "toolu_2".to_string(),
                    content: None,
                    is_error: None,
                },
            ]),
        });
        let gemini = request_to_gemini(&SignatureCache::new(), request, "gemini-3-pro-preview");
        let parts = &gemini.contents[0].parts;
        let first = parts[1].function_response.as_ref().unwrap();
        let second = parts[2].function_response.as_ref().unwrap();
        assert_eq!(
            first.response["result"],
            "Tool execution failed with no output."
        );
        assert_eq!(second.response["result"], "Command executed successfully.");
    }

    #[test]
    fn thinking_must_lead_the_turn() {
        let mut request = text_request("x");
        request.messages = vec![Message {
            role: Role::Assistant,
            content: MessageContent::Blocks(vec![
                ContentBlock::Text {
                    text: "prefix".to_string(),
                },
                ContentBlock::Thinking {
                    thinking: "plan".to_string(),
                    signature: None,
                },
            ]),
        }];
        let gemini = request_to_gemini(&SignatureCache::new(), request, "gemini-3-pro-preview");
        let parts = &gemini.contents[0].parts;
        // Downgraded: no thought flag on the second part.
        assert_eq!(parts[1].text.as_deref(), Some("plan"));
        assert!(parts[1].thought.is_none());
    }

    #[test]
    fn empty_thinking_becomes_ellipsis() {
        let mut request = text_request("x");
        request.messages = vec![Message {
            role: Role::Assistant,
            content: MessageContent::Blocks(vec![ContentBlock::Thinking {
                thinking: String::new(),
                signature: None,
            }]),
        }];
        let gemini = request_to_gemini(&SignatureCache::new(), request, "gemini-3-pro-preview");
        assert_eq!(gemini.contents[0].parts[0].text.as_deref(), Some("..."));
    }

    #[test]
    fn incompatible_signature_family_downgrades_to_text() {
        let cache = SignatureCache::new();
        cache.remember_family(SIG, "gemini-2.5-pro");

        let mut request = text_request("x");
        request.messages = vec![Message {
            role: Role::Assistant,
            content: MessageContent::Blocks(vec![ContentBlock::Thinking {
                thinking: "plan".to_string(),
                signature: Some(SIG.to_string()),
            }]),
        }];
        let gemini = request_to_gemini(&cache, request, "gemini-3-pro-preview");
        let part = &gemini.contents[0].parts[0];
        assert!(part.thought.is_none());
        assert!(part.thought_signature.is_none());
    }

    #[test]
    fn tool_signature_recovered_from_cache() {
        let cache = SignatureCache::new();
        cache.remember_tool_signature("toolu_7", SIG);

        let mut request = text_request("x");
        request.messages = vec![Message {
            role: Role::Assistant,
            content: MessageContent::Blocks(vec![ContentBlock::ToolUse {
                id: "toolu_7".to_string(),
                name: "lookup".to_string(),
                input: json!({ "q": 1 }),
                signature: None,
            }]),
        }];
        let gemini = request_to_gemini(&cache, request, "gemini-3-pro-preview");
        assert_eq!(
            gemini.contents[0].parts[0].thought_signature.as_deref(),
            Some(SIG)
        );
    }

    #[test]
    fn identity_prompt_wraps_user_system_text() {
        let mut request = json!({
            "contents": [],
            "systemInstruction": { "role": "user", "parts": [{ "text": "be brief" }] }
        });
        apply_identity_prompt(&mut request, "You are Antigravity.");
        let parts = request["systemInstruction"]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["text"], "You are Antigravity.");
        assert_eq!(parts[1]["text"], "be brief");
        assert_eq!(parts[2]["text"], SYSTEM_PROMPT_END_MARKER);

        // Idempotent: the identity is already present now.
        let before = request.clone();
        apply_identity_prompt(&mut request, "You are Antigravity.");
        assert_eq!(before, request);
    }

    #[test]
    fn web_search_tools_map_to_google_search() {
        let mut request = text_request("x");
        request.tools = Some(vec![
            llmux_protocol::claude::Tool {
                kind: Some("web_search_20250305".to_string()),
                name: "web_search".to_string(),
                description: None,
                input_schema: None,
            },
            llmux_protocol::claude::Tool {
                kind: None,
                name: "read_file".to_string(),
                description: Some("Read a file".to_string()),
                input_schema: Some(json!({ "type": "object", "properties": {} })),
            },
        ]);
        let gemini = request_to_gemini(&SignatureCache::new(), request, "gemini-3-pro-preview");
        let tools = gemini.tools.unwrap();
        assert_eq!(tools.len(), 1);
        assert!(tools[0].google_search.is_some());
        assert_eq!(
            tools[0].function_declarations.as_ref().unwrap()[0].name,
            "read_file"
        );
    }

    #[test]
    fn usage_and_stop_reason_map_into_claude_response() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": "hello" }] },
                "finishReason": "STOP"
            }],
            "usageMetadata": { "promptTokenCount": 1, "candidatesTokenCount": 1 }
        }))
        .unwrap();
        let claude = response_to_claude(&SignatureCache::new(), response);
        assert_eq!(claude.kind, "message");
        assert_eq!(claude.role, "assistant");
        assert_eq!(claude.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(claude.usage.input_tokens, 1);
        assert_eq!(claude.usage.output_tokens, 1);
    }
}
