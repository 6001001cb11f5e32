//! Provider adapters: per-provider wire dialect, credential handling and the
//! streaming pump that feeds converted SSE back to the client.

pub mod adapter;
pub mod antigravity;
pub mod client;
pub mod custom;
pub mod error;
pub mod factory;
pub mod pump;

pub use adapter::{AttemptContext, ClientResponse, ProviderAdapter, StreamOutcome};
pub use client::{
    UpstreamBody, UpstreamClient, UpstreamClientConfig, UpstreamRequest, UpstreamResponse,
    WreqUpstreamClient,
};
pub use error::{ErrorKind, ProxyError};
pub use factory::build_adapter;
