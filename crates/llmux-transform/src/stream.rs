//! Per-response stream reassembly.
//!
//! Upstream SSE lines arrive one at a time; each [`StreamState`] owns the
//! state machine that re-frames them in the client dialect. One state per
//! response, never shared.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use time::OffsetDateTime;

use llmux_protocol::ClientType;
use llmux_protocol::claude::{
    ContentBlock, Delta, MessageDelta, MessageResponse, StreamEvent, Usage,
};
use llmux_protocol::gemini::GenerateContentResponse;
use llmux_protocol::openai::{
    ChatCompletionChunk, ChatUsage, ChunkChoice, ChunkDelta, ChunkToolCall, ChunkToolCallFunction,
};

use crate::TransformError;
use crate::claude_gemini::{map_finish_reason, usage_from_metadata};
use crate::claude_openai::{chat_usage, finish_from_stop_reason, stop_reason_from_finish};
use crate::signature::SignatureCache;

/// Token counters extracted from a single stream chunk, dialect-agnostic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
}

/// Best-effort usage scan over one SSE `data:` payload. Understands Gemini
/// `usageMetadata`, Claude `usage` and OpenAI `usage` shapes.
pub fn scan_usage(data: &str) -> Option<StreamUsage> {
    let value: Value = serde_json::from_str(data).ok()?;
    if let Some(metadata) = value.get("usageMetadata") {
        return Some(StreamUsage {
            input_tokens: metadata
                .get("promptTokenCount")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            output_tokens: metadata
                .get("candidatesTokenCount")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            cache_read_tokens: metadata
                .get("cachedContentTokenCount")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        });
    }
    if let Some(usage) = value.get("usage") {
        let claude_shape = usage.get("input_tokens").is_some();
        if claude_shape {
            return Some(StreamUsage {
                input_tokens: usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
                output_tokens: usage
                    .get("output_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
                cache_read_tokens: usage
                    .get("cache_read_input_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
            });
        }
        return Some(StreamUsage {
            input_tokens: usage
                .get("prompt_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            output_tokens: usage
                .get("completion_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            cache_read_tokens: 0,
        });
    }
    None
}

pub struct StreamState {
    inner: Inner,
}

enum Inner {
    /// Client and upstream speak the same dialect; lines pass through.
    Passthrough,
    GeminiToClaude(GeminiClaudeStream),
    GeminiToChat(GeminiChatStream),
    ClaudeToChat(ClaudeToChatStream),
    ChatToClaude(ChatToClaudeStream),
    /// A Gemini-speaking client behind a Claude/OpenAI-native upstream; the
    /// router never matches such routes.
    Unsupported,
}

impl StreamState {
    pub(crate) fn new(from: ClientType, to: ClientType, signatures: Arc<SignatureCache>) -> Self {
        let inner = if from == to {
            Inner::Passthrough
        } else {
            match (from, to) {
                (ClientType::Gemini, ClientType::Claude) => {
                    Inner::GeminiToClaude(GeminiClaudeStream::new(signatures))
                }
                (ClientType::Gemini, ClientType::OpenAI) => {
                    Inner::GeminiToChat(GeminiChatStream::new())
                }
                (ClientType::Claude, ClientType::OpenAI) => {
                    Inner::ClaudeToChat(ClaudeToChatStream::new())
                }
                (ClientType::OpenAI, ClientType::Claude) => {
                    Inner::ChatToClaude(ChatToClaudeStream::new())
                }
                _ => Inner::Unsupported,
            }
        };
        Self { inner }
    }

    pub(crate) fn transform_line(
        &mut self,
        from: ClientType,
        to: ClientType,
        line: &str,
    ) -> Result<Vec<u8>, TransformError> {
        match &mut self.inner {
            Inner::Passthrough => Ok(line.as_bytes().to_vec()),
            Inner::Unsupported => Err(TransformError::Unsupported { from, to }),
            Inner::GeminiToClaude(state) => Ok(state.transform_line(line)),
            Inner::GeminiToChat(state) => Ok(state.transform_line(line)),
            Inner::ClaudeToChat(state) => Ok(state.transform_line(line)),
            Inner::ChatToClaude(state) => Ok(state.transform_line(line)),
        }
    }
}

/// Extract the JSON payload of a `data:` line; `None` for blanks, comments,
/// named-event lines and the `[DONE]` sentinel. Malformed JSON is skipped by
/// the caller, never fatal.
fn data_payload(line: &str) -> Option<&str> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    let payload = trimmed.strip_prefix("data:")?.trim_start();
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }
    Some(payload)
}

// ---- Gemini upstream -> Claude client ----

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    Thinking,
}

struct GeminiClaudeStream {
    signatures: Arc<SignatureCache>,
    message_started: bool,
    finished: bool,
    next_index: u32,
    open: Option<(u32, BlockKind)>,
    response_id: String,
    model: String,
    saw_tool_use: bool,
    usage: Option<Usage>,
}

impl GeminiClaudeStream {
    fn new(signatures: Arc<SignatureCache>) -> Self {
        Self {
            signatures,
            message_started: false,
            finished: false,
            next_index: 0,
            open: None,
            response_id: "msg_stream".to_string(),
            model: "unknown".to_string(),
            saw_tool_use: false,
            usage: None,
        }
    }

    fn transform_line(&mut self, line: &str) -> Vec<u8> {
        let Some(payload) = data_payload(line) else {
            return Vec::new();
        };
        let Ok(response) = serde_json::from_str::<GenerateContentResponse>(payload) else {
            return Vec::new();
        };
        let events = self.on_response(response);
        encode_claude_events(&events)
    }

    fn on_response(&mut self, response: GenerateContentResponse) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        if let Some(id) = &response.response_id {
            self.response_id = id.clone();
        }
        if let Some(model) = &response.model_version {
            self.model = model.strip_prefix("models/").unwrap_or(model).to_string();
        }
        if let Some(metadata) = response.usage_metadata.as_ref() {
            self.usage = Some(usage_from_metadata(Some(metadata)));
        }

        let mut events = self.ensure_message_start();

        let Some(candidate) = response.candidates.into_iter().next() else {
            return events;
        };
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(call) = part.function_call {
                events.extend(self.emit_tool_use(
                    call.id,
                    call.name,
                    call.args,
                    part.thought_signature.as_deref(),
                ));
                continue;
            }
            let signature = part.thought_signature.clone();
            if let Some(text) = part.text {
                if part.thought.unwrap_or(false) {
                    events.extend(self.emit_delta(
                        BlockKind::Thinking,
                        Delta::ThinkingDelta { thinking: text },
                    ));
                    if let Some(signature) = signature {
                        self.signatures.remember_family(&signature, &self.model);
                        events.extend(
                            self.emit_delta(BlockKind::Thinking, Delta::SignatureDelta {
                                signature,
                            }),
                        );
                    }
                } else if !text.is_empty() {
                    events.extend(self.emit_delta(BlockKind::Text, Delta::TextDelta { text }));
                }
            }
        }

        if let Some(reason) = candidate.finish_reason {
            self.finished = true;
            events.extend(self.close_open_block());
            events.push(StreamEvent::MessageDelta {
                delta: MessageDelta {
                    stop_reason: Some(map_finish_reason(Some(&reason), self.saw_tool_use)),
                    stop_sequence: None,
                },
                usage: self.usage.clone(),
            });
            events.push(StreamEvent::MessageStop);
        }

        events
    }

    fn ensure_message_start(&mut self) -> Vec<StreamEvent> {
        if self.message_started {
            return Vec::new();
        }
        self.message_started = true;
        vec![StreamEvent::MessageStart {
            message: MessageResponse {
                id: self.response_id.clone(),
                kind: "message".to_string(),
                role: "assistant".to_string(),
                content: Vec::new(),
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: Usage::default(),
            },
        }]
    }

    fn emit_delta(&mut self, kind: BlockKind, delta: Delta) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        match self.open {
            Some((index, open_kind)) if open_kind == kind => {
                events.push(StreamEvent::ContentBlockDelta { index, delta });
            }
            _ => {
                events.extend(self.close_open_block());
                let index = self.next_index;
                self.next_index += 1;
                self.open = Some((index, kind));
                let content_block = match kind {
                    BlockKind::Text => ContentBlock::Text {
                        text: String::new(),
                    },
                    BlockKind::Thinking => ContentBlock::Thinking {
                        thinking: String::new(),
                        signature: None,
                    },
                };
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block,
                });
                events.push(StreamEvent::ContentBlockDelta { index, delta });
            }
        }
        events
    }

    /// Gemini delivers a complete functionCall per part; it becomes a
    /// self-contained tool_use block with its arguments replayed as one
    /// input_json_delta.
    fn emit_tool_use(
        &mut self,
        id: Option<String>,
        name: String,
        args: Option<Value>,
        signature: Option<&str>,
    ) -> Vec<StreamEvent> {
        self.saw_tool_use = true;
        let mut events = self.close_open_block();
        let index = self.next_index;
        self.next_index += 1;

        let id = id.unwrap_or_else(|| format!("toolu_{index:04}"));
        if let Some(signature) = signature {
            self.signatures.remember_tool_signature(&id, signature);
            self.signatures.remember_family(signature, &self.model);
        }
        let partial_json = args
            .map(|args| args.to_string())
            .unwrap_or_else(|| "{}".to_string());

        events.push(StreamEvent::ContentBlockStart {
            index,
            content_block: ContentBlock::ToolUse {
                id,
                name,
                input: Value::Object(serde_json::Map::new()),
                signature: signature.map(str::to_string),
            },
        });
        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: Delta::InputJsonDelta { partial_json },
        });
        events.push(StreamEvent::ContentBlockStop { index });
        events
    }

    fn close_open_block(&mut self) -> Vec<StreamEvent> {
        match self.open.take() {
            Some((index, _)) => vec![StreamEvent::ContentBlockStop { index }],
            None => Vec::new(),
        }
    }
}

fn encode_claude_events(events: &[StreamEvent]) -> Vec<u8> {
    let mut out = Vec::new();
    for event in events {
        let Ok(data) = serde_json::to_string(event) else {
            continue;
        };
        out.extend_from_slice(b"event: ");
        out.extend_from_slice(event.event_name().as_bytes());
        out.extend_from_slice(b"\ndata: ");
        out.extend_from_slice(data.as_bytes());
        out.extend_from_slice(b"\n\n");
    }
    out
}

// ---- Gemini upstream -> OpenAI client ----

struct GeminiChatStream {
    id: String,
    created: i64,
    model: String,
    role_sent: bool,
    finished: bool,
    saw_tool_call: bool,
    next_tool_index: u32,
}

impl GeminiChatStream {
    fn new() -> Self {
        Self {
            id: "chatcmpl-proxy".to_string(),
            created: OffsetDateTime::now_utc().unix_timestamp(),
            model: "unknown".to_string(),
            role_sent: false,
            finished: false,
            saw_tool_call: false,
            next_tool_index: 0,
        }
    }

    fn transform_line(&mut self, line: &str) -> Vec<u8> {
        let Some(payload) = data_payload(line) else {
            return Vec::new();
        };
        let Ok(response) = serde_json::from_str::<GenerateContentResponse>(payload) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        let done = self.on_response(response, &mut out);
        if done {
            out.extend_from_slice(b"data: [DONE]\n\n");
        }
        out
    }

    fn on_response(&mut self, response: GenerateContentResponse, out: &mut Vec<u8>) -> bool {
        if self.finished {
            return false;
        }
        if let Some(id) = &response.response_id {
            self.id = format!("chatcmpl-{id}");
        }
        if let Some(model) = &response.model_version {
            self.model = model.strip_prefix("models/").unwrap_or(model).to_string();
        }

        let usage = response.usage_metadata.as_ref().map(|metadata| ChatUsage {
            prompt_tokens: metadata.prompt_token_count.unwrap_or(0),
            completion_tokens: metadata.candidates_token_count.unwrap_or(0),
            total_tokens: metadata.total_token_count.unwrap_or_else(|| {
                metadata.prompt_token_count.unwrap_or(0)
                    + metadata.candidates_token_count.unwrap_or(0)
            }),
        });

        let Some(candidate) = response.candidates.into_iter().next() else {
            return false;
        };
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(call) = part.function_call {
                self.saw_tool_call = true;
                let index = self.next_tool_index;
                self.next_tool_index += 1;
                let delta = ChunkDelta {
                    role: self.role_delta(),
                    content: None,
                    tool_calls: Some(vec![ChunkToolCall {
                        index,
                        id: call.id.or_else(|| Some(format!("call_{index:04}"))),
                        kind: Some("function".to_string()),
                        function: Some(ChunkToolCallFunction {
                            name: Some(call.name),
                            arguments: Some(
                                call.args
                                    .map(|args| args.to_string())
                                    .unwrap_or_else(|| "{}".to_string()),
                            ),
                        }),
                    }]),
                };
                self.push_chunk(out, delta, None, None);
                continue;
            }
            if part.thought.unwrap_or(false) {
                continue;
            }
            if let Some(text) = part.text
                && !text.is_empty()
            {
                let delta = ChunkDelta {
                    role: self.role_delta(),
                    content: Some(text),
                    tool_calls: None,
                };
                self.push_chunk(out, delta, None, None);
            }
        }

        if let Some(reason) = candidate.finish_reason {
            self.finished = true;
            let finish = if self.saw_tool_call {
                "tool_calls"
            } else {
                match reason.as_str() {
                    "MAX_TOKENS" => "length",
                    "SAFETY" | "RECITATION" | "PROHIBITED_CONTENT" => "content_filter",
                    _ => "stop",
                }
            };
            self.push_chunk(out, ChunkDelta::default(), Some(finish.to_string()), usage);
            return true;
        }
        false
    }

    fn role_delta(&mut self) -> Option<String> {
        if self.role_sent {
            None
        } else {
            self.role_sent = true;
            Some("assistant".to_string())
        }
    }

    fn push_chunk(
        &self,
        out: &mut Vec<u8>,
        delta: ChunkDelta,
        finish_reason: Option<String>,
        usage: Option<ChatUsage>,
    ) {
        push_chat_chunk(out, &self.id, &self.model, self.created, delta, finish_reason, usage);
    }
}

fn push_chat_chunk(
    out: &mut Vec<u8>,
    id: &str,
    model: &str,
    created: i64,
    delta: ChunkDelta,
    finish_reason: Option<String>,
    usage: Option<ChatUsage>,
) {
    let chunk = ChatCompletionChunk {
        id: id.to_string(),
        object: "chat.completion.chunk".to_string(),
        created,
        model: model.to_string(),
        choices: vec![ChunkChoice {
            index: 0,
            delta,
            finish_reason,
        }],
        usage,
    };
    if let Ok(data) = serde_json::to_string(&chunk) {
        out.extend_from_slice(b"data: ");
        out.extend_from_slice(data.as_bytes());
        out.extend_from_slice(b"\n\n");
    }
}

// ---- Claude upstream -> OpenAI client ----

struct ClaudeToChatStream {
    id: String,
    created: i64,
    model: String,
    finished: bool,
    saw_tool_call: bool,
    /// Claude content-block index -> chat tool-call index.
    tool_indexes: BTreeMap<u32, u32>,
    next_tool_index: u32,
    usage: Option<ChatUsage>,
}

impl ClaudeToChatStream {
    fn new() -> Self {
        Self {
            id: "chatcmpl-stream".to_string(),
            created: OffsetDateTime::now_utc().unix_timestamp(),
            model: "unknown".to_string(),
            finished: false,
            saw_tool_call: false,
            tool_indexes: BTreeMap::new(),
            next_tool_index: 0,
            usage: None,
        }
    }

    fn transform_line(&mut self, line: &str) -> Vec<u8> {
        // Claude's `event:` lines are redundant; the data payload carries
        // the event type.
        let Some(payload) = data_payload(line) else {
            return Vec::new();
        };
        let Ok(event) = serde_json::from_str::<StreamEvent>(payload) else {
            return Vec::new();
        };
        self.on_event(event)
    }

    fn on_event(&mut self, event: StreamEvent) -> Vec<u8> {
        if self.finished {
            return Vec::new();
        }
        let mut out = Vec::new();
        match event {
            StreamEvent::MessageStart { message } => {
                self.id = format!("chatcmpl-{}", message.id);
                self.model = message.model;
                self.push(&mut out, ChunkDelta {
                    role: Some("assistant".to_string()),
                    content: None,
                    tool_calls: None,
                }, None, None);
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block: ContentBlock::ToolUse { id, name, .. },
            } => {
                self.saw_tool_call = true;
                let tool_index = self.next_tool_index;
                self.next_tool_index += 1;
                self.tool_indexes.insert(index, tool_index);
                self.push(&mut out, ChunkDelta {
                    role: None,
                    content: None,
                    tool_calls: Some(vec![ChunkToolCall {
                        index: tool_index,
                        id: Some(id),
                        kind: Some("function".to_string()),
                        function: Some(ChunkToolCallFunction {
                            name: Some(name),
                            arguments: Some(String::new()),
                        }),
                    }]),
                }, None, None);
            }
            StreamEvent::ContentBlockStart { .. } => {}
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                Delta::TextDelta { text } => {
                    self.push(&mut out, ChunkDelta {
                        role: None,
                        content: Some(text),
                        tool_calls: None,
                    }, None, None);
                }
                Delta::InputJsonDelta { partial_json } => {
                    if let Some(tool_index) = self.tool_indexes.get(&index).copied() {
                        self.push(&mut out, ChunkDelta {
                            role: None,
                            content: None,
                            tool_calls: Some(vec![ChunkToolCall {
                                index: tool_index,
                                id: None,
                                kind: None,
                                function: Some(ChunkToolCallFunction {
                                    name: None,
                                    arguments: Some(partial_json),
                                }),
                            }]),
                        }, None, None);
                    }
                }
                // Reasoning output has no chat-completions slot.
                Delta::ThinkingDelta { .. } | Delta::SignatureDelta { .. } => {}
            },
            StreamEvent::ContentBlockStop { .. } | StreamEvent::Ping => {}
            StreamEvent::MessageDelta { delta, usage } => {
                if let Some(usage) = usage.as_ref() {
                    self.usage = Some(chat_usage(usage));
                }
                if let Some(stop) = delta.stop_reason {
                    let finish =
                        finish_from_stop_reason(Some(&stop), self.saw_tool_call).to_string();
                    let usage = self.usage.take();
                    self.push(&mut out, ChunkDelta::default(), Some(finish), usage);
                }
            }
            StreamEvent::MessageStop => {
                self.finished = true;
                out.extend_from_slice(b"data: [DONE]\n\n");
            }
        }
        out
    }

    fn push(
        &self,
        out: &mut Vec<u8>,
        delta: ChunkDelta,
        finish_reason: Option<String>,
        usage: Option<ChatUsage>,
    ) {
        push_chat_chunk(out, &self.id, &self.model, self.created, delta, finish_reason, usage);
    }
}

// ---- OpenAI upstream -> Claude client ----

struct ChatToClaudeStream {
    message_started: bool,
    finished: bool,
    /// Held until usage lands: OpenAI often ships usage in a trailing chunk
    /// after the finish_reason one.
    pending_stop: Option<String>,
    next_index: u32,
    text_block: Option<u32>,
    /// Chat tool-call index -> Claude content-block index.
    tool_blocks: BTreeMap<u32, u32>,
    usage: Option<Usage>,
}

impl ChatToClaudeStream {
    fn new() -> Self {
        Self {
            message_started: false,
            finished: false,
            pending_stop: None,
            next_index: 0,
            text_block: None,
            tool_blocks: BTreeMap::new(),
            usage: None,
        }
    }

    fn transform_line(&mut self, line: &str) -> Vec<u8> {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        let Some(payload) = trimmed.strip_prefix("data:").map(str::trim_start) else {
            return Vec::new();
        };
        if payload.is_empty() {
            return Vec::new();
        }
        if payload == "[DONE]" {
            let events = self.flush_stop();
            return encode_claude_events(&events);
        }
        let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(payload) else {
            return Vec::new();
        };
        let events = self.on_chunk(chunk);
        encode_claude_events(&events)
    }

    fn on_chunk(&mut self, chunk: ChatCompletionChunk) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        let mut events = Vec::new();

        if !self.message_started {
            self.message_started = true;
            events.push(StreamEvent::MessageStart {
                message: MessageResponse {
                    id: chunk.id.clone(),
                    kind: "message".to_string(),
                    role: "assistant".to_string(),
                    content: Vec::new(),
                    model: chunk.model.clone(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: Usage::default(),
                },
            });
        }
        if let Some(usage) = chunk.usage.as_ref() {
            self.usage = Some(Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                cache_read_input_tokens: None,
                cache_creation_input_tokens: None,
            });
        }

        if let Some(choice) = chunk.choices.first() {
            if let Some(text) = &choice.delta.content
                && !text.is_empty()
            {
                events.extend(self.emit_text(text.clone()));
            }
            if let Some(calls) = &choice.delta.tool_calls {
                for call in calls {
                    events.extend(self.emit_tool_call(call));
                }
            }
            if let Some(finish) = &choice.finish_reason {
                let had_tool_use = !self.tool_blocks.is_empty();
                events.extend(self.close_open_blocks());
                self.pending_stop =
                    Some(stop_reason_from_finish(Some(finish), had_tool_use).to_string());
            }
        }

        if self.pending_stop.is_some() && self.usage.is_some() {
            events.extend(self.flush_stop());
        }
        events
    }

    fn emit_text(&mut self, text: String) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let index = match self.text_block {
            Some(index) => index,
            None => {
                let index = self.next_index;
                self.next_index += 1;
                self.text_block = Some(index);
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ContentBlock::Text {
                        text: String::new(),
                    },
                });
                index
            }
        };
        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: Delta::TextDelta { text },
        });
        events
    }

    fn emit_tool_call(&mut self, call: &ChunkToolCall) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let block_index = match self.tool_blocks.get(&call.index).copied() {
            Some(block_index) => block_index,
            None => {
                if let Some(index) = self.text_block.take() {
                    events.push(StreamEvent::ContentBlockStop { index });
                }
                let block_index = self.next_index;
                self.next_index += 1;
                self.tool_blocks.insert(call.index, block_index);
                events.push(StreamEvent::ContentBlockStart {
                    index: block_index,
                    content_block: ContentBlock::ToolUse {
                        id: call
                            .id
                            .clone()
                            .unwrap_or_else(|| format!("toolu_{block_index:04}")),
                        name: call
                            .function
                            .as_ref()
                            .and_then(|function| function.name.clone())
                            .unwrap_or_default(),
                        input: Value::Object(serde_json::Map::new()),
                        signature: None,
                    },
                });
                block_index
            }
        };
        if let Some(arguments) = call
            .function
            .as_ref()
            .and_then(|function| function.arguments.clone())
            && !arguments.is_empty()
        {
            events.push(StreamEvent::ContentBlockDelta {
                index: block_index,
                delta: Delta::InputJsonDelta {
                    partial_json: arguments,
                },
            });
        }
        events
    }

    fn close_open_blocks(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if let Some(index) = self.text_block.take() {
            events.push(StreamEvent::ContentBlockStop { index });
        }
        for (_, index) in std::mem::take(&mut self.tool_blocks) {
            events.push(StreamEvent::ContentBlockStop { index });
        }
        events
    }

    fn flush_stop(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        let Some(stop_reason) = self.pending_stop.take() else {
            return Vec::new();
        };
        self.finished = true;
        vec![
            StreamEvent::MessageDelta {
                delta: MessageDelta {
                    stop_reason: Some(stop_reason),
                    stop_sequence: None,
                },
                usage: self.usage.clone(),
            },
            StreamEvent::MessageStop,
        ]
    }
}
