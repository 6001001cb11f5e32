//! Wire-format models for the dialects llmux proxies.
//!
//! Each module mirrors one upstream API surface closely enough to round-trip
//! the fields the converter cares about; tool arguments and JSON schemas stay
//! `serde_json::Value` so payloads we do not interpret pass through intact.

pub mod claude;
pub mod gemini;
pub mod openai;
pub mod sse;

use serde::{Deserialize, Serialize};

/// The wire dialect an inbound client speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    Claude,
    OpenAI,
    Gemini,
}

impl ClientType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientType::Claude => "claude",
            ClientType::OpenAI => "openai",
            ClientType::Gemini => "gemini",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "claude" => Some(ClientType::Claude),
            "openai" => Some(ClientType::OpenAI),
            "gemini" => Some(ClientType::Gemini),
            _ => None,
        }
    }
}

impl std::fmt::Display for ClientType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
