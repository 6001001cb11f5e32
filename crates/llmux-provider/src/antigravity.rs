//! The antigravity adapter: Google OAuth refresh-token credential speaking
//! Gemini v1internal behind the envelope.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;

use llmux_protocol::ClientType;
use llmux_storage::{RequestInfo, ResponseInfo};
use llmux_transform::{Converter, apply_identity_prompt, envelope};

use crate::adapter::{
    AttemptContext, ClientResponse, ProviderAdapter, is_hop_by_hop, sse_headers,
};
use crate::client::{UpstreamBody, UpstreamClient, UpstreamRequest};
use crate::error::{ProxyError, parse_retry_after};
use crate::pump::spawn_stream_pump;

pub const PROVIDER_KIND: &str = "antigravity";

const DEFAULT_ENDPOINT: &str = "https://cloudcode-pa.googleapis.com";
const UPSTREAM_USER_AGENT: &str = "antigravity/1.15.8 (Windows; AMD64)";

const OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const OAUTH_CLIENT_ID: &str = "77185425430.apps.googleusercontent.com";
const OAUTH_CLIENT_SECRET: &str = "OTJgUOQcT7lO7GsGZq2G4IlT";
/// Refresh this much before the token actually expires.
const TOKEN_EXPIRY_SLACK: Duration = Duration::from_secs(60);

const SUPPORTED: &[ClientType] = &[ClientType::Claude, ClientType::OpenAI, ClientType::Gemini];

/// Identity prepended to every system instruction unless the caller already
/// carries it.
const IDENTITY_PROMPT: &str = "You are Antigravity, a powerful agentic AI coding assistant designed to help developers with software engineering tasks through a command-line interface. You have access to a comprehensive set of tools that allow you to read, write, and execute code, search the web, and interact with the file system.

# Core Capabilities

You excel at:
- Writing, editing, and refactoring code across multiple programming languages
- Debugging and fixing issues in existing codebases
- Understanding and explaining complex code structures
- Suggesting architectural improvements and best practices
- Executing shell commands and managing file systems
- Searching the web for up-to-date information when needed
- Working with various development tools and frameworks

# Key Principles

1. **Precision**: Always provide accurate, working code
2. **Context Awareness**: Consider the full context of the project before making changes
3. **Best Practices**: Follow industry-standard conventions and patterns
4. **Clarity**: Explain your reasoning when making significant changes
5. **Safety**: Avoid destructive operations without explicit confirmation
6. **Efficiency**: Optimize for both code quality and developer productivity

# Tool Usage

You have access to powerful tools including:
- File operations (read, write, edit, glob, grep)
- Code execution (bash, language-specific interpreters)
- Web search capabilities
- And more specialized development tools

Use these tools proactively to understand the codebase, verify your assumptions, and implement solutions effectively.

# Interaction Style

- Be direct and professional
- Focus on solving the task at hand
- Ask clarifying questions when requirements are ambiguous
- Provide working solutions, not just explanations
- Think step-by-step through complex problems
- Use tools to verify your assumptions before making changes

Remember: You're here to be a productive, reliable coding partner. Let's build something great together.";

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

pub struct AntigravityAdapter {
    refresh_token: String,
    project_id: String,
    endpoint: String,
    converter: Arc<Converter>,
    client: Arc<dyn UpstreamClient>,
    token: RwLock<Option<CachedToken>>,
}

impl AntigravityAdapter {
    pub fn new(
        refresh_token: String,
        project_id: Option<String>,
        endpoint: Option<String>,
        converter: Arc<Converter>,
        client: Arc<dyn UpstreamClient>,
    ) -> Self {
        let endpoint = endpoint
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
            .trim_end_matches('/')
            .to_string();
        Self {
            refresh_token,
            project_id: project_id.unwrap_or_default(),
            endpoint,
            converter,
            client,
            token: RwLock::new(None),
        }
    }

    /// Cached token if still fresh, else a refresh under the write lock.
    /// Contention here intentionally serializes concurrent refreshes.
    async fn access_token(&self) -> Result<String, ProxyError> {
        {
            let guard = self.token.read().await;
            if let Some(cached) = guard.as_ref()
                && Instant::now() < cached.expires_at
            {
                return Ok(cached.access_token.clone());
            }
        }

        let mut guard = self.token.write().await;
        if let Some(cached) = guard.as_ref()
            && Instant::now() < cached.expires_at
        {
            return Ok(cached.access_token.clone());
        }

        let (access_token, expires_in) = self.exchange_refresh_token().await?;
        *guard = Some(CachedToken {
            access_token: access_token.clone(),
            expires_at: Instant::now() + expires_in.saturating_sub(TOKEN_EXPIRY_SLACK),
        });
        Ok(access_token)
    }

    async fn invalidate_token(&self) {
        *self.token.write().await = None;
    }

    async fn exchange_refresh_token(&self) -> Result<(String, Duration), ProxyError> {
        let body = form_encode(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", &self.refresh_token),
            ("client_id", OAUTH_CLIENT_ID),
            ("client_secret", OAUTH_CLIENT_SECRET),
        ]);
        let response = self
            .client
            .send(UpstreamRequest {
                method: http::Method::POST,
                url: OAUTH_TOKEN_URL.to_string(),
                headers: vec![(
                    "content-type".to_string(),
                    "application/x-www-form-urlencoded".to_string(),
                )],
                body: Some(Bytes::from(body)),
                is_stream: false,
            })
            .await?;

        let body = match response.body {
            UpstreamBody::Bytes(bytes) => bytes,
            UpstreamBody::Stream(_) => Bytes::new(),
        };
        if response.status != 200 {
            tracing::warn!(status = response.status, "token refresh rejected");
            // The next attempt may hit a healthy auth backend; keep retryable.
            let mut err = ProxyError::auth("failed to refresh access token");
            err.retryable = true;
            return Err(err);
        }

        #[derive(Deserialize)]
        struct TokenReply {
            access_token: String,
            expires_in: u64,
        }
        let reply: TokenReply = serde_json::from_slice(&body)
            .map_err(|err| ProxyError::auth(format!("bad token reply: {err}")))?;
        Ok((reply.access_token, Duration::from_secs(reply.expires_in)))
    }

    fn build_url(&self, stream: bool) -> String {
        if stream {
            format!("{}/v1internal:streamGenerateContent?alt=sse", self.endpoint)
        } else {
            format!("{}/v1internal:generateContent", self.endpoint)
        }
    }

    /// Exactly these headers go upstream; nothing from the client is
    /// forwarded.
    fn build_headers(&self, access_token: &str) -> Vec<(String, String)> {
        vec![
            ("content-type".to_string(), "application/json".to_string()),
            (
                "authorization".to_string(),
                format!("Bearer {access_token}"),
            ),
            ("user-agent".to_string(), UPSTREAM_USER_AGENT.to_string()),
            ("accept-encoding".to_string(), "identity".to_string()),
        ]
    }

    fn native_request_body(&self, ctx: &AttemptContext) -> Result<Vec<u8>, ProxyError> {
        let native = if ctx.client_type == ClientType::Gemini {
            ctx.body.to_vec()
        } else {
            self.converter
                .transform_request(
                    ctx.client_type,
                    ClientType::Gemini,
                    &ctx.body,
                    &ctx.mapped_model,
                    ctx.is_stream,
                )
                .map_err(|err| ProxyError::format_conversion(err.to_string()))?
        };

        let mut document: Value = serde_json::from_slice(&native)
            .map_err(|err| ProxyError::format_conversion(err.to_string()))?;
        apply_identity_prompt(&mut document, IDENTITY_PROMPT);
        let wrapped = envelope::wrap_request(&self.project_id, &ctx.mapped_model, document);
        serde_json::to_vec(&wrapped).map_err(|err| ProxyError::internal(err.to_string()))
    }
}

#[async_trait]
impl ProviderAdapter for AntigravityAdapter {
    fn supported_client_types(&self) -> &'static [ClientType] {
        SUPPORTED
    }

    async fn execute(&self, ctx: &AttemptContext) -> Result<ClientResponse, ProxyError> {
        let mut access_token = self.access_token().await?;
        let body = Bytes::from(self.native_request_body(ctx)?);
        let url = self.build_url(ctx.is_stream);

        ctx.with_request_info(RequestInfo {
            method: "POST".to_string(),
            url: url.clone(),
            headers: record_headers(&self.build_headers("<redacted>")),
            body: String::from_utf8_lossy(&body).into_owned(),
        });

        let mut response = self
            .client
            .send(UpstreamRequest {
                method: http::Method::POST,
                url: url.clone(),
                headers: self.build_headers(&access_token),
                body: Some(body.clone()),
                is_stream: ctx.is_stream,
            })
            .await?;

        // An expired access token answers 401; refresh once and retry the
        // request with the new token. A second 401 surfaces below.
        if response.status == 401 {
            self.invalidate_token().await;
            access_token = self.access_token().await?;
            response = self
                .client
                .send(UpstreamRequest {
                    method: http::Method::POST,
                    url,
                    headers: self.build_headers(&access_token),
                    body: Some(body),
                    is_stream: ctx.is_stream,
                })
                .await?;
        }

        if response.status >= 400 {
            let detail = buffered_body(response.body);
            ctx.with_response_info(ResponseInfo {
                status: response.status,
                headers: headers_map(&response.headers),
                body: detail.clone(),
            });
            let retry_after = header_value(&response.headers, "retry-after")
                .and_then(|value| parse_retry_after(&value));
            return Err(ProxyError::upstream_status(
                response.status,
                detail,
                retry_after,
            ));
        }

        if !ctx.is_stream {
            let raw = match response.body {
                UpstreamBody::Bytes(bytes) => bytes,
                UpstreamBody::Stream(_) => {
                    return Err(ProxyError::internal("expected buffered upstream body"));
                }
            };
            ctx.with_response_info(ResponseInfo {
                status: response.status,
                headers: headers_map(&response.headers),
                body: String::from_utf8_lossy(&raw).into_owned(),
            });

            let document: Value = serde_json::from_slice(&raw)
                .map_err(|err| ProxyError::format_conversion(err.to_string()))?;
            let unwrapped = serde_json::to_vec(&envelope::unwrap_response(document))
                .map_err(|err| ProxyError::internal(err.to_string()))?;
            let reply = if ctx.client_type == ClientType::Gemini {
                unwrapped
            } else {
                self.converter
                    .transform_response(ClientType::Gemini, ctx.client_type, &unwrapped)
                    .map_err(|err| ProxyError::format_conversion(err.to_string()))?
            };

            let mut headers: Vec<(String, String)> = response
                .headers
                .iter()
                .filter(|(name, _)| !is_hop_by_hop(name))
                .cloned()
                .collect();
            set_header(&mut headers, "content-type", "application/json");
            return Ok(ClientResponse::Buffered {
                status: response.status,
                headers,
                body: Bytes::from(reply),
            });
        }

        let upstream = match response.body {
            UpstreamBody::Stream(receiver) => receiver,
            UpstreamBody::Bytes(_) => {
                return Err(ProxyError::internal("expected streaming upstream body"));
            }
        };
        ctx.with_response_info(ResponseInfo {
            status: response.status,
            headers: headers_map(&response.headers),
            body: "[streaming]".to_string(),
        });

        let to = ctx.client_type;
        let converter = Arc::clone(&self.converter);
        let mut state = converter.new_stream_state(ClientType::Gemini, to);
        let transform = move |line: &str| -> Vec<u8> {
            let Some(rewritten) = envelope::rewrite_stream_line(line) else {
                return Vec::new();
            };
            if to == ClientType::Gemini {
                return rewritten.into_bytes();
            }
            converter
                .transform_stream_chunk(ClientType::Gemini, to, &rewritten, &mut state)
                .unwrap_or_default()
        };
        let (client_body, done) = spawn_stream_pump(upstream, transform);

        Ok(ClientResponse::Stream {
            status: response.status,
            headers: sse_headers(),
            body: client_body,
            done,
        })
    }
}

// ---- helpers shared with the custom adapter ----

pub(crate) fn buffered_body(body: UpstreamBody) -> String {
    match body {
        UpstreamBody::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        UpstreamBody::Stream(_) => String::new(),
    }
}

pub(crate) fn headers_map(headers: &[(String, String)]) -> BTreeMap<String, String> {
    headers.iter().cloned().collect()
}

pub(crate) fn record_headers(headers: &[(String, String)]) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            if name.eq_ignore_ascii_case("authorization") || name.eq_ignore_ascii_case("x-api-key")
            {
                (name.clone(), "<redacted>".to_string())
            } else {
                (name.clone(), value.clone())
            }
        })
        .collect()
}

pub(crate) fn header_value(headers: &[(String, String)], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.clone())
}

pub(crate) fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    headers.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
    headers.push((name.to_string(), value.to_string()));
}

fn form_encode(pairs: &[(&str, &str)]) -> String {
    let mut out = String::new();
    for (index, (key, value)) in pairs.iter().enumerate() {
        if index > 0 {
            out.push('&');
        }
        out.push_str(key);
        out.push('=');
        percent_encode_into(&mut out, value);
    }
    out
}

fn percent_encode_into(out: &mut String, value: &str) {
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_deterministic_by_stream_flag() {
        let adapter = test_adapter(None);
        assert_eq!(
            adapter.build_url(false),
            "https://cloudcode-pa.googleapis.com/v1internal:generateContent"
        );
        assert_eq!(
            adapter.build_url(true),
            "https://cloudcode-pa.googleapis.com/v1internal:streamGenerateContent?alt=sse"
        );

        let custom = test_adapter(Some("https://example.test/base/".to_string()));
        assert_eq!(
            custom.build_url(false),
            "https://example.test/base/v1internal:generateContent"
        );
    }

    #[test]
    fn header_set_is_exactly_the_contract() {
        let adapter = test_adapter(None);
        let headers = adapter.build_headers("tok");
        let names: Vec<&str> = headers.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(
            names,
            ["content-type", "authorization", "user-agent", "accept-encoding"]
        );
        assert_eq!(header_value(&headers, "authorization").unwrap(), "Bearer tok");
        assert_eq!(header_value(&headers, "accept-encoding").unwrap(), "identity");
    }

    #[test]
    fn form_encoding_escapes_reserved_bytes() {
        assert_eq!(
            form_encode(&[("grant_type", "refresh_token"), ("refresh_token", "a/b+c")]),
            "grant_type=refresh_token&refresh_token=a%2Fb%2Bc"
        );
    }

    fn test_adapter(endpoint: Option<String>) -> AntigravityAdapter {
        struct NoClient;
        #[async_trait]
        impl UpstreamClient for NoClient {
            async fn send(&self, _: UpstreamRequest) -> Result<crate::client::UpstreamResponse, ProxyError> {
                Err(ProxyError::internal("no network in tests"))
            }
        }
        AntigravityAdapter::new(
            "refresh".to_string(),
            Some("project".to_string()),
            endpoint,
            Arc::new(Converter::new()),
            Arc::new(NoClient),
        )
    }
}
