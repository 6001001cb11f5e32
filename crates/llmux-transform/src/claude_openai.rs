//! Claude Messages <-> OpenAI Chat Completions document transforms.

use serde_json::{Value, json};
use time::OffsetDateTime;

use llmux_protocol::claude::{
    ContentBlock, CreateMessageRequest, ImageSource, Message, MessageContent, MessageResponse,
    Metadata, Role, SystemPrompt, Usage,
};
use llmux_protocol::openai::{
    ChatCompletionRequest, ChatCompletionResponse, ChatContent, ChatContentPart, ChatFunction,
    ChatMessage, ChatTool, ChatUsage, Choice, ImageUrl, ToolCall, ToolCallFunction,
};

use crate::claude_gemini::{empty_tool_result_text, tool_result_text};

// ---- Request: Claude -> OpenAI ----

pub(crate) fn request_to_chat(
    request: CreateMessageRequest,
    mapped_model: &str,
    stream: bool,
) -> ChatCompletionRequest {
    let mut messages = Vec::new();
    if let Some(text) = system_text(request.system.as_ref()) {
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: Some(ChatContent::Text(text)),
            ..ChatMessage::default()
        });
    }
    for message in &request.messages {
        match message.role {
            Role::User => messages.extend(user_to_chat(&message.content)),
            Role::Assistant => {
                if let Some(assistant) = assistant_to_chat(&message.content) {
                    messages.push(assistant);
                }
            }
        }
    }

    let model = if mapped_model.is_empty() {
        request.model.clone()
    } else {
        mapped_model.to_string()
    };
    ChatCompletionRequest {
        model,
        messages,
        stream: stream.then_some(true),
        temperature: request.temperature,
        top_p: request.top_p,
        max_tokens: (request.max_tokens > 0).then_some(request.max_tokens),
        max_completion_tokens: None,
        stop: stop_from_sequences(request.stop_sequences),
        tools: tools_to_chat(request.tools),
        tool_choice: tool_choice_to_chat(request.tool_choice.as_ref()),
        user: request.metadata.and_then(|metadata| metadata.user_id),
    }
}

fn system_text(system: Option<&SystemPrompt>) -> Option<String> {
    let text = match system? {
        SystemPrompt::Text(text) => text.clone(),
        SystemPrompt::Blocks(blocks) => blocks
            .iter()
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
    };
    (!text.is_empty()).then_some(text)
}

/// A Claude user turn may interleave tool results with text; each tool
/// result becomes its own `role=tool` message, the rest folds into user
/// messages in the order encountered.
fn user_to_chat(content: &MessageContent) -> Vec<ChatMessage> {
    let mut out = Vec::new();
    let mut parts: Vec<ChatContentPart> = Vec::new();

    let blocks: Vec<ContentBlock> = match content {
        MessageContent::Text(text) => vec![ContentBlock::Text { text: text.clone() }],
        MessageContent::Blocks(blocks) => blocks.clone(),
    };
    for block in blocks {
        match block {
            ContentBlock::Text { text } => {
                if !text.is_empty() {
                    parts.push(ChatContentPart {
                        kind: "text".to_string(),
                        text: Some(text),
                        image_url: None,
                    });
                }
            }
            ContentBlock::Image { source } => {
                if let Some(url) = image_url_from_source(&source) {
                    parts.push(ChatContentPart {
                        kind: "image_url".to_string(),
                        text: None,
                        image_url: Some(ImageUrl { url }),
                    });
                }
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                flush_user_parts(&mut out, &mut parts);
                let mut text = tool_result_text(content.as_ref());
                if text.trim().is_empty() {
                    text = empty_tool_result_text(is_error.unwrap_or(false)).to_string();
                }
                out.push(ChatMessage {
                    role: "tool".to_string(),
                    content: Some(ChatContent::Text(text)),
                    tool_call_id: Some(tool_use_id),
                    ..ChatMessage::default()
                });
            }
            // Not valid in user turns.
            ContentBlock::ToolUse { .. }
            | ContentBlock::Thinking { .. }
            | ContentBlock::RedactedThinking { .. } => {}
        }
    }
    flush_user_parts(&mut out, &mut parts);
    out
}

fn flush_user_parts(out: &mut Vec<ChatMessage>, parts: &mut Vec<ChatContentPart>) {
    if parts.is_empty() {
        return;
    }
    let drained = std::mem::take(parts);
    let content = if drained.len() == 1 && drained[0].kind == "text" {
        ChatContent::Text(drained[0].text.clone().unwrap_or_default())
    } else {
        ChatContent::Parts(drained)
    };
    out.push(ChatMessage {
        role: "user".to_string(),
        content: Some(content),
        ..ChatMessage::default()
    });
}

fn image_url_from_source(source: &ImageSource) -> Option<String> {
    if let Some(url) = &source.url {
        return Some(url.clone());
    }
    match (&source.media_type, &source.data) {
        (Some(media_type), Some(data)) => Some(format!("data:{media_type};base64,{data}")),
        _ => None,
    }
}

fn assistant_to_chat(content: &MessageContent) -> Option<ChatMessage> {
    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();

    let blocks: Vec<ContentBlock> = match content {
        MessageContent::Text(text) => vec![ContentBlock::Text { text: text.clone() }],
        MessageContent::Blocks(blocks) => blocks.clone(),
    };
    for block in blocks {
        match block {
            ContentBlock::Text { text } => {
                if !text.is_empty() {
                    texts.push(text);
                }
            }
            ContentBlock::ToolUse {
                id, name, input, ..
            } => tool_calls.push(ToolCall {
                id,
                kind: "function".to_string(),
                function: ToolCallFunction {
                    name,
                    arguments: input.to_string(),
                },
            }),
            // Reasoning has no chat-completions slot.
            ContentBlock::Thinking { .. } | ContentBlock::RedactedThinking { .. } => {}
            ContentBlock::Image { .. } | ContentBlock::ToolResult { .. } => {}
        }
    }

    if texts.is_empty() && tool_calls.is_empty() {
        return None;
    }
    Some(ChatMessage {
        role: "assistant".to_string(),
        content: (!texts.is_empty()).then(|| ChatContent::Text(texts.join("\n"))),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        ..ChatMessage::default()
    })
}

fn stop_from_sequences(sequences: Option<Vec<String>>) -> Option<Value> {
    let sequences = sequences?;
    match sequences.len() {
        0 => None,
        1 => Some(Value::String(sequences.into_iter().next().unwrap_or_default())),
        _ => Some(Value::Array(
            sequences.into_iter().map(Value::String).collect(),
        )),
    }
}

fn tools_to_chat(tools: Option<Vec<llmux_protocol::claude::Tool>>) -> Option<Vec<ChatTool>> {
    let tools = tools?;
    let mapped: Vec<ChatTool> = tools
        .into_iter()
        // Server-side tools (web search etc.) have no chat equivalent.
        .filter(|tool| tool.kind.is_none() || tool.kind.as_deref() == Some("custom"))
        .map(|tool| ChatTool {
            kind: "function".to_string(),
            function: ChatFunction {
                name: tool.name,
                description: tool.description,
                parameters: tool.input_schema,
            },
        })
        .collect();
    (!mapped.is_empty()).then_some(mapped)
}

fn tool_choice_to_chat(choice: Option<&Value>) -> Option<Value> {
    let choice = choice?;
    match choice.get("type").and_then(Value::as_str)? {
        "auto" => Some(json!("auto")),
        "any" => Some(json!("required")),
        "none" => Some(json!("none")),
        "tool" => {
            let name = choice.get("name").and_then(Value::as_str)?;
            Some(json!({ "type": "function", "function": { "name": name } }))
        }
        _ => None,
    }
}

// ---- Request: OpenAI -> Claude ----

pub(crate) fn request_to_claude(
    request: ChatCompletionRequest,
    mapped_model: &str,
) -> CreateMessageRequest {
    let mut system_texts = Vec::new();
    let mut messages: Vec<Message> = Vec::new();

    for message in &request.messages {
        match message.role.as_str() {
            "system" | "developer" => {
                if let Some(content) = &message.content {
                    let text = content.joined_text();
                    if !text.is_empty() {
                        system_texts.push(text);
                    }
                }
            }
            "tool" => {
                let block = ContentBlock::ToolResult {
                    tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                    content: message
                        .content
                        .as_ref()
                        .map(|content| Value::String(content.joined_text())),
                    is_error: None,
                };
                push_claude_blocks(&mut messages, Role::User, vec![block]);
            }
            "assistant" => {
                let mut blocks = Vec::new();
                if let Some(content) = &message.content {
                    let text = content.joined_text();
                    if !text.is_empty() {
                        blocks.push(ContentBlock::Text { text });
                    }
                }
                if let Some(calls) = &message.tool_calls {
                    for call in calls {
                        blocks.push(ContentBlock::ToolUse {
                            id: call.id.clone(),
                            name: call.function.name.clone(),
                            input: serde_json::from_str(&call.function.arguments)
                                .unwrap_or_else(|_| json!({})),
                            signature: None,
                        });
                    }
                }
                if !blocks.is_empty() {
                    push_claude_blocks(&mut messages, Role::Assistant, blocks);
                }
            }
            _ => {
                let blocks = user_blocks(message);
                if !blocks.is_empty() {
                    push_claude_blocks(&mut messages, Role::User, blocks);
                }
            }
        }
    }

    let model = if mapped_model.is_empty() {
        request.model.clone()
    } else {
        mapped_model.to_string()
    };
    CreateMessageRequest {
        model,
        messages,
        system: (!system_texts.is_empty()).then(|| SystemPrompt::Text(system_texts.join("\n"))),
        max_tokens: request
            .max_completion_tokens
            .or(request.max_tokens)
            .unwrap_or(0),
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: None,
        stop_sequences: sequences_from_stop(request.stop.as_ref()),
        stream: request.stream,
        metadata: request.user.map(|user_id| Metadata {
            user_id: Some(user_id),
        }),
        tools: tools_to_claude(request.tools),
        tool_choice: tool_choice_to_claude(request.tool_choice.as_ref()),
        thinking: None,
    }
}

/// Claude strictly alternates user/assistant; adjacent same-role turns merge
/// by concatenating their blocks.
fn push_claude_blocks(messages: &mut Vec<Message>, role: Role, blocks: Vec<ContentBlock>) {
    if let Some(last) = messages.last_mut()
        && last.role == role
    {
        let mut existing = match std::mem::replace(
            &mut last.content,
            MessageContent::Blocks(Vec::new()),
        ) {
            MessageContent::Text(text) => vec![ContentBlock::Text { text }],
            MessageContent::Blocks(blocks) => blocks,
        };
        existing.extend(blocks);
        last.content = MessageContent::Blocks(existing);
        return;
    }
    messages.push(Message {
        role,
        content: MessageContent::Blocks(blocks),
    });
}

fn user_blocks(message: &ChatMessage) -> Vec<ContentBlock> {
    match &message.content {
        None => Vec::new(),
        Some(ChatContent::Text(text)) if text.is_empty() => Vec::new(),
        Some(ChatContent::Text(text)) => vec![ContentBlock::Text { text: text.clone() }],
        Some(ChatContent::Parts(parts)) => parts
            .iter()
            .filter_map(|part| match part.kind.as_str() {
                "text" => part
                    .text
                    .clone()
                    .filter(|text| !text.is_empty())
                    .map(|text| ContentBlock::Text { text }),
                "image_url" => part
                    .image_url
                    .as_ref()
                    .map(|image| image_block_from_url(&image.url)),
                _ => None,
            })
            .collect(),
    }
}

fn image_block_from_url(url: &str) -> ContentBlock {
    if let Some(rest) = url.strip_prefix("data:")
        && let Some((media_type, data)) = rest.split_once(";base64,")
    {
        return ContentBlock::Image {
            source: ImageSource {
                kind: "base64".to_string(),
                media_type: Some(media_type.to_string()),
                data: Some(data.to_string()),
                url: None,
            },
        };
    }
    ContentBlock::Image {
        source: ImageSource {
            kind: "url".to_string(),
            media_type: None,
            data: None,
            url: Some(url.to_string()),
        },
    }
}

fn sequences_from_stop(stop: Option<&Value>) -> Option<Vec<String>> {
    match stop? {
        Value::String(single) => Some(vec![single.clone()]),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        ),
        _ => None,
    }
}

fn tools_to_claude(tools: Option<Vec<ChatTool>>) -> Option<Vec<llmux_protocol::claude::Tool>> {
    let tools = tools?;
    let mapped: Vec<llmux_protocol::claude::Tool> = tools
        .into_iter()
        .filter(|tool| tool.kind == "function")
        .map(|tool| llmux_protocol::claude::Tool {
            kind: None,
            name: tool.function.name,
            description: tool.function.description,
            input_schema: tool.function.parameters,
        })
        .collect();
    (!mapped.is_empty()).then_some(mapped)
}

fn tool_choice_to_claude(choice: Option<&Value>) -> Option<Value> {
    match choice? {
        Value::String(mode) => match mode.as_str() {
            "auto" => Some(json!({ "type": "auto" })),
            "required" => Some(json!({ "type": "any" })),
            "none" => Some(json!({ "type": "none" })),
            _ => None,
        },
        named => {
            let name = named.pointer("/function/name").and_then(Value::as_str)?;
            Some(json!({ "type": "tool", "name": name }))
        }
    }
}

// ---- Response: Claude -> OpenAI ----

pub(crate) fn response_to_chat(response: MessageResponse) -> ChatCompletionResponse {
    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();
    for block in response.content {
        match block {
            ContentBlock::Text { text } => texts.push(text),
            ContentBlock::ToolUse {
                id, name, input, ..
            } => tool_calls.push(ToolCall {
                id,
                kind: "function".to_string(),
                function: ToolCallFunction {
                    name,
                    arguments: input.to_string(),
                },
            }),
            _ => {}
        }
    }

    let finish = finish_from_stop_reason(response.stop_reason.as_deref(), !tool_calls.is_empty());
    ChatCompletionResponse {
        id: format!("chatcmpl-{}", response.id),
        object: "chat.completion".to_string(),
        created: OffsetDateTime::now_utc().unix_timestamp(),
        model: response.model,
        choices: vec![Choice {
            index: 0,
            message: ChatMessage {
                role: "assistant".to_string(),
                content: (!texts.is_empty()).then(|| ChatContent::Text(texts.join("\n"))),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                ..ChatMessage::default()
            },
            finish_reason: Some(finish.to_string()),
        }],
        usage: Some(chat_usage(&response.usage)),
    }
}

pub(crate) fn finish_from_stop_reason(stop_reason: Option<&str>, has_tool_calls: bool) -> &'static str {
    if has_tool_calls {
        return "tool_calls";
    }
    match stop_reason {
        Some("max_tokens") => "length",
        Some("tool_use") => "tool_calls",
        Some("refusal") => "content_filter",
        _ => "stop",
    }
}

pub(crate) fn chat_usage(usage: &Usage) -> ChatUsage {
    ChatUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage.input_tokens + usage.output_tokens,
    }
}

// ---- Response: OpenAI -> Claude ----

pub(crate) fn response_to_claude(response: ChatCompletionResponse) -> MessageResponse {
    let mut content = Vec::new();
    let mut finish_reason = None;

    if let Some(choice) = response.choices.into_iter().next() {
        finish_reason = choice.finish_reason;
        if let Some(text) = choice.message.content.map(|c| c.joined_text())
            && !text.is_empty()
        {
            content.push(ContentBlock::Text { text });
        }
        for call in choice.message.tool_calls.unwrap_or_default() {
            content.push(ContentBlock::ToolUse {
                id: call.id,
                name: call.function.name,
                input: serde_json::from_str(&call.function.arguments)
                    .unwrap_or_else(|_| json!({})),
                signature: None,
            });
        }
    }

    let has_tool_use = content
        .iter()
        .any(|block| matches!(block, ContentBlock::ToolUse { .. }));
    MessageResponse {
        id: response.id,
        kind: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: response.model,
        stop_reason: Some(
            stop_reason_from_finish(finish_reason.as_deref(), has_tool_use).to_string(),
        ),
        stop_sequence: None,
        usage: response
            .usage
            .map(|usage| Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                cache_read_input_tokens: None,
                cache_creation_input_tokens: None,
            })
            .unwrap_or_default(),
    }
}

pub(crate) fn stop_reason_from_finish(finish: Option<&str>, has_tool_use: bool) -> &'static str {
    if has_tool_use {
        return "tool_use";
    }
    match finish {
        Some("length") => "max_tokens",
        Some("tool_calls") | Some("function_call") => "tool_use",
        Some("content_filter") => "refusal",
        _ => "end_turn",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claude_request(value: Value) -> CreateMessageRequest {
        serde_json::from_value(value).unwrap()
    }

    fn chat_request(value: Value) -> ChatCompletionRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn claude_turns_become_chat_messages() {
        let request = claude_request(json!({
            "model": "claude-sonnet",
            "max_tokens": 512,
            "system": "be terse",
            "messages": [
                { "role": "user", "content": "hi" },
                { "role": "assistant", "content": [
                    { "type": "text", "text": "checking" },
                    { "type": "tool_use", "id": "toolu_1", "name": "lookup", "input": { "q": 1 } }
                ] },
                { "role": "user", "content": [
                    { "type": "tool_result", "tool_use_id": "toolu_1", "content": "found" },
                    { "type": "text", "text": "thanks" }
                ] }
            ]
        }));
        let chat = request_to_chat(request, "gpt-x", true);
        assert_eq!(chat.model, "gpt-x");
        assert_eq!(chat.stream, Some(true));
        assert_eq!(chat.max_tokens, Some(512));

        let roles: Vec<&str> = chat.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["system", "user", "assistant", "tool", "user"]);
        let assistant = &chat.messages[2];
        let calls = assistant.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "toolu_1");
        assert_eq!(calls[0].function.arguments, "{\"q\":1}");
        let tool = &chat.messages[3];
        assert_eq!(tool.tool_call_id.as_deref(), Some("toolu_1"));
    }

    #[test]
    fn empty_claude_tool_results_get_injected_text() {
        let request = claude_request(json!({
            "model": "claude-sonnet",
            "max_tokens": 1,
            "messages": [
                { "role": "user", "content": [
                    { "type": "tool_result", "tool_use_id": "toolu_1", "is_error": true }
                ] }
            ]
        }));
        let chat = request_to_chat(request, "", false);
        let tool = &chat.messages[0];
        assert_eq!(
            tool.content.as_ref().unwrap().joined_text(),
            "Tool execution failed with no output."
        );
    }

    #[test]
    fn chat_messages_become_alternating_claude_turns() {
        let request = chat_request(json!({
            "model": "gpt-x",
            "max_completion_tokens": 256,
            "messages": [
                { "role": "system", "content": "be terse" },
                { "role": "user", "content": "look it up" },
                { "role": "assistant", "tool_calls": [{
                    "id": "call_1", "type": "function",
                    "function": { "name": "lookup", "arguments": "{\"q\":\"rust\"}" }
                }] },
                { "role": "tool", "tool_call_id": "call_1", "content": "found" },
                { "role": "user", "content": "thanks" }
            ]
        }));
        let claude = request_to_claude(request, "claude-sonnet");
        assert_eq!(claude.model, "claude-sonnet");
        assert_eq!(claude.max_tokens, 256);
        assert!(matches!(
            claude.system,
            Some(SystemPrompt::Text(ref text)) if text == "be terse"
        ));

        // tool result and the following user text merged into one user turn.
        let roles: Vec<Role> = claude.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::User, Role::Assistant, Role::User]);
        let MessageContent::Blocks(blocks) = &claude.messages[2].content else {
            panic!("expected blocks");
        };
        assert!(matches!(
            &blocks[0],
            ContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == "call_1"
        ));
        assert!(matches!(
            &blocks[1],
            ContentBlock::Text { text } if text == "thanks"
        ));
    }

    #[test]
    fn tool_choice_maps_in_both_directions() {
        assert_eq!(
            tool_choice_to_chat(Some(&json!({ "type": "any" }))),
            Some(json!("required"))
        );
        assert_eq!(
            tool_choice_to_chat(Some(&json!({ "type": "tool", "name": "lookup" }))),
            Some(json!({ "type": "function", "function": { "name": "lookup" } }))
        );
        assert_eq!(
            tool_choice_to_claude(Some(&json!("required"))),
            Some(json!({ "type": "any" }))
        );
        assert_eq!(
            tool_choice_to_claude(Some(
                &json!({ "type": "function", "function": { "name": "lookup" } })
            )),
            Some(json!({ "type": "tool", "name": "lookup" }))
        );
    }

    #[test]
    fn claude_response_surfaces_as_chat_completion() {
        let response: MessageResponse = serde_json::from_value(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "claude-sonnet",
            "content": [
                { "type": "text", "text": "hello" },
                { "type": "tool_use", "id": "toolu_1", "name": "lookup", "input": { "q": 1 } }
            ],
            "stop_reason": "tool_use",
            "usage": { "input_tokens": 3, "output_tokens": 4 }
        }))
        .unwrap();
        let chat = response_to_chat(response);
        assert_eq!(chat.id, "chatcmpl-msg_1");
        let choice = &chat.choices[0];
        assert_eq!(choice.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(
            choice.message.content.as_ref().unwrap().joined_text(),
            "hello"
        );
        assert_eq!(choice.message.tool_calls.as_ref().unwrap()[0].id, "toolu_1");
        assert_eq!(chat.usage.as_ref().unwrap().total_tokens, 7);
    }

    #[test]
    fn chat_response_surfaces_as_claude_message() {
        let response: ChatCompletionResponse = serde_json::from_value(json!({
            "id": "chatcmpl-9",
            "object": "chat.completion",
            "created": 1,
            "model": "gpt-x",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "hello",
                    "tool_calls": [{
                        "id": "call_9", "type": "function",
                        "function": { "name": "lookup", "arguments": "{\"q\":2}" }
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": { "prompt_tokens": 5, "completion_tokens": 6, "total_tokens": 11 }
        }))
        .unwrap();
        let claude = response_to_claude(response);
        assert_eq!(claude.kind, "message");
        assert_eq!(claude.stop_reason.as_deref(), Some("tool_use"));
        assert!(matches!(
            &claude.content[0],
            ContentBlock::Text { text } if text == "hello"
        ));
        assert!(matches!(
            &claude.content[1],
            ContentBlock::ToolUse { id, .. } if id == "call_9"
        ));
        assert_eq!(claude.usage.input_tokens, 5);
        assert_eq!(claude.usage.output_tokens, 6);
    }

    #[test]
    fn data_url_images_round_trip() {
        let request = chat_request(json!({
            "model": "gpt-x",
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": "see" },
                    { "type": "image_url", "image_url": { "url": "data:image/png;base64,QUJD" } }
                ]
            }]
        }));
        let claude = request_to_claude(request, "");
        let MessageContent::Blocks(blocks) = &claude.messages[0].content else {
            panic!("expected blocks");
        };
        let ContentBlock::Image { source } = &blocks[1] else {
            panic!("expected image");
        };
        assert_eq!(source.media_type.as_deref(), Some("image/png"));
        assert_eq!(source.data.as_deref(), Some("QUJD"));

        let back = request_to_chat(claude, "", false);
        let ChatContent::Parts(parts) = back.messages[0].content.as_ref().unwrap() else {
            panic!("expected parts");
        };
        assert_eq!(
            parts[1].image_url.as_ref().unwrap().url,
            "data:image/png;base64,QUJD"
        );
    }
}
