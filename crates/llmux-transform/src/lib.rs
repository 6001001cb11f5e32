//! Stateful bidirectional transforms between the Claude, OpenAI and Gemini
//! wire formats, including incremental SSE stream conversion, JSON-Schema
//! sanitization for Gemini tool declarations, and the v1internal envelope.

pub mod envelope;
pub mod schema;
pub mod signature;
pub mod stream;

mod claude_gemini;
mod claude_openai;
mod openai_gemini;

use std::sync::Arc;

use llmux_protocol::ClientType;
use llmux_protocol::claude::{CreateMessageRequest, MessageResponse};
use llmux_protocol::gemini::GenerateContentResponse;
use llmux_protocol::openai::{ChatCompletionRequest, ChatCompletionResponse};

pub use claude_gemini::apply_identity_prompt;
pub use signature::SignatureCache;
pub use stream::{StreamState, StreamUsage, scan_usage};

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("unsupported conversion: {from} -> {to}")]
    Unsupported { from: ClientType, to: ClientType },
    #[error("malformed {format} payload: {source}")]
    Malformed {
        format: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("serialize failed: {0}")]
    Serialize(#[source] serde_json::Error),
}

fn malformed(format: &'static str) -> impl FnOnce(serde_json::Error) -> TransformError {
    move |source| TransformError::Malformed { format, source }
}

/// The converter registry. One instance per process, threaded into the
/// adapters; it owns the signature cache shared by request and response
/// transforms.
pub struct Converter {
    signatures: Arc<SignatureCache>,
}

impl Converter {
    pub fn new() -> Self {
        Self {
            signatures: Arc::new(SignatureCache::new()),
        }
    }

    pub fn signatures(&self) -> &Arc<SignatureCache> {
        &self.signatures
    }

    /// Non-streaming rewrite of a request document from the client dialect to
    /// the upstream dialect. `from == to` passes bytes through untouched.
    /// A Gemini-speaking client converts to no other dialect; such routes are
    /// excluded at match time via the adapters' supported client types.
    pub fn transform_request(
        &self,
        from: ClientType,
        to: ClientType,
        body: &[u8],
        mapped_model: &str,
        stream: bool,
    ) -> Result<Vec<u8>, TransformError> {
        if from == to {
            return Ok(body.to_vec());
        }
        match (from, to) {
            (ClientType::Claude, ClientType::Gemini) => {
                let request: CreateMessageRequest =
                    serde_json::from_slice(body).map_err(malformed("claude request"))?;
                let out = claude_gemini::request_to_gemini(&self.signatures, request, mapped_model);
                serde_json::to_vec(&out).map_err(TransformError::Serialize)
            }
            (ClientType::OpenAI, ClientType::Gemini) => {
                let request: ChatCompletionRequest =
                    serde_json::from_slice(body).map_err(malformed("openai request"))?;
                let out = openai_gemini::request_to_gemini(request);
                serde_json::to_vec(&out).map_err(TransformError::Serialize)
            }
            (ClientType::Claude, ClientType::OpenAI) => {
                let request: CreateMessageRequest =
                    serde_json::from_slice(body).map_err(malformed("claude request"))?;
                let out = claude_openai::request_to_chat(request, mapped_model, stream);
                serde_json::to_vec(&out).map_err(TransformError::Serialize)
            }
            (ClientType::OpenAI, ClientType::Claude) => {
                let request: ChatCompletionRequest =
                    serde_json::from_slice(body).map_err(malformed("openai request"))?;
                let out = claude_openai::request_to_claude(request, mapped_model);
                serde_json::to_vec(&out).map_err(TransformError::Serialize)
            }
            _ => Err(TransformError::Unsupported { from, to }),
        }
    }

    /// Non-streaming rewrite of a response document from the upstream dialect
    /// back to the client dialect.
    pub fn transform_response(
        &self,
        from: ClientType,
        to: ClientType,
        body: &[u8],
    ) -> Result<Vec<u8>, TransformError> {
        if from == to {
            return Ok(body.to_vec());
        }
        match (from, to) {
            (ClientType::Gemini, ClientType::Claude) => {
                let response: GenerateContentResponse =
                    serde_json::from_slice(body).map_err(malformed("gemini response"))?;
                let out = claude_gemini::response_to_claude(&self.signatures, response);
                serde_json::to_vec(&out).map_err(TransformError::Serialize)
            }
            (ClientType::Gemini, ClientType::OpenAI) => {
                let response: GenerateContentResponse =
                    serde_json::from_slice(body).map_err(malformed("gemini response"))?;
                let out = openai_gemini::response_to_chat(response);
                serde_json::to_vec(&out).map_err(TransformError::Serialize)
            }
            (ClientType::Claude, ClientType::OpenAI) => {
                let response: MessageResponse =
                    serde_json::from_slice(body).map_err(malformed("claude response"))?;
                let out = claude_openai::response_to_chat(response);
                serde_json::to_vec(&out).map_err(TransformError::Serialize)
            }
            (ClientType::OpenAI, ClientType::Claude) => {
                let response: ChatCompletionResponse =
                    serde_json::from_slice(body).map_err(malformed("openai response"))?;
                let out = claude_openai::response_to_claude(response);
                serde_json::to_vec(&out).map_err(TransformError::Serialize)
            }
            _ => Err(TransformError::Unsupported { from, to }),
        }
    }

    /// Allocates the per-response reassembly state for a streamed reply.
    pub fn new_stream_state(&self, from: ClientType, to: ClientType) -> StreamState {
        StreamState::new(from, to, Arc::clone(&self.signatures))
    }

    /// Feed one upstream SSE line (trailing newline included) and get zero or
    /// more complete SSE events in the client dialect. Malformed lines are
    /// skipped, never fatal.
    pub fn transform_stream_chunk(
        &self,
        from: ClientType,
        to: ClientType,
        line: &str,
        state: &mut StreamState,
    ) -> Result<Vec<u8>, TransformError> {
        state.transform_line(from, to, line)
    }
}

impl Default for Converter {
    fn default() -> Self {
        Self::new()
    }
}
