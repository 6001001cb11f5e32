//! The custom adapter: static API key against an arbitrary base URL, one
//! native dialect, translation only when the client speaks another one.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use llmux_protocol::ClientType;
use llmux_storage::{RequestInfo, ResponseInfo};
use llmux_transform::Converter;

use crate::adapter::{
    AttemptContext, ClientResponse, ProviderAdapter, is_hop_by_hop, sse_headers,
};
use crate::antigravity::{buffered_body, header_value, headers_map, record_headers, set_header};
use crate::client::{UpstreamBody, UpstreamClient, UpstreamRequest};
use crate::error::{ProxyError, parse_retry_after};
use crate::pump::spawn_stream_pump;

pub const PROVIDER_KIND: &str = "custom";

const ALL_CLIENTS: &[ClientType] = &[ClientType::Claude, ClientType::OpenAI, ClientType::Gemini];
/// The converter reframes Claude and OpenAI traffic in either direction, but
/// a Gemini-speaking client converts to no other dialect.
const TEXT_CLIENTS: &[ClientType] = &[ClientType::Claude, ClientType::OpenAI];
const PROXY_USER_AGENT: &str = concat!("llmux/", env!("CARGO_PKG_VERSION"));

pub struct CustomAdapter {
    api_key: String,
    base_url: String,
    native_type: ClientType,
    converter: Arc<Converter>,
    client: Arc<dyn UpstreamClient>,
}

impl CustomAdapter {
    pub fn new(
        api_key: String,
        base_url: String,
        native_type: ClientType,
        converter: Arc<Converter>,
        client: Arc<dyn UpstreamClient>,
    ) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            native_type,
            converter,
            client,
        }
    }

    fn build_url(&self, model: &str, stream: bool) -> String {
        match self.native_type {
            ClientType::Claude => format!("{}/v1/messages", self.base_url),
            ClientType::OpenAI => format!("{}/v1/chat/completions", self.base_url),
            ClientType::Gemini => {
                let action = if stream {
                    "streamGenerateContent?alt=sse"
                } else {
                    "generateContent"
                };
                format!("{}/v1beta/models/{model}:{action}", self.base_url)
            }
        }
    }

    fn build_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("content-type".to_string(), "application/json".to_string()),
            ("user-agent".to_string(), PROXY_USER_AGENT.to_string()),
            ("accept-encoding".to_string(), "identity".to_string()),
        ];
        // Claude upstreams authenticate with x-api-key, the rest with Bearer.
        match self.native_type {
            ClientType::Claude => {
                headers.push(("x-api-key".to_string(), self.api_key.clone()));
                headers.push(("anthropic-version".to_string(), "2023-06-01".to_string()));
            }
            _ => headers.push((
                "authorization".to_string(),
                format!("Bearer {}", self.api_key),
            )),
        }
        headers
    }

    /// Convert to the native dialect and pin the mapped model into the body
    /// (Gemini carries the model in the URL instead).
    fn native_request_body(&self, ctx: &AttemptContext) -> Result<Vec<u8>, ProxyError> {
        let native = if ctx.client_type == self.native_type {
            ctx.body.to_vec()
        } else {
            self.converter
                .transform_request(
                    ctx.client_type,
                    self.native_type,
                    &ctx.body,
                    &ctx.mapped_model,
                    ctx.is_stream,
                )
                .map_err(|err| ProxyError::format_conversion(err.to_string()))?
        };

        if self.native_type == ClientType::Gemini {
            return Ok(native);
        }
        let mut document: Value = serde_json::from_slice(&native)
            .map_err(|err| ProxyError::format_conversion(err.to_string()))?;
        if let Some(map) = document.as_object_mut() {
            map.insert(
                "model".to_string(),
                Value::String(ctx.mapped_model.clone()),
            );
        }
        serde_json::to_vec(&document).map_err(|err| ProxyError::internal(err.to_string()))
    }
}

#[async_trait]
impl ProviderAdapter for CustomAdapter {
    fn supported_client_types(&self) -> &'static [ClientType] {
        match self.native_type {
            ClientType::Gemini => ALL_CLIENTS,
            ClientType::Claude | ClientType::OpenAI => TEXT_CLIENTS,
        }
    }

    async fn execute(&self, ctx: &AttemptContext) -> Result<ClientResponse, ProxyError> {
        let body = Bytes::from(self.native_request_body(ctx)?);
        let url = self.build_url(&ctx.mapped_model, ctx.is_stream);
        let headers = self.build_headers();

        ctx.with_request_info(RequestInfo {
            method: "POST".to_string(),
            url: url.clone(),
            headers: record_headers(&headers),
            body: String::from_utf8_lossy(&body).into_owned(),
        });

        let response = self
            .client
            .send(UpstreamRequest {
                method: http::Method::POST,
                url,
                headers,
                body: Some(body),
                is_stream: ctx.is_stream,
            })
            .await?;

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

            let reply = if ctx.client_type == self.native_type {
                raw.to_vec()
            } else {
                self.converter
                    .transform_response(self.native_type, ctx.client_type, &raw)
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

        let from = self.native_type;
        let to = ctx.client_type;
        let converter = Arc::clone(&self.converter);
        let mut state = converter.new_stream_state(from, to);
        let transform = move |line: &str| -> Vec<u8> {
            converter
                .transform_stream_chunk(from, to, line, &mut state)
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
