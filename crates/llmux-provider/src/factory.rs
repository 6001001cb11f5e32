//! Adapter construction from provider rows. The router rebuilds an adapter
//! whenever its provider row mutates; adapters never observe config changes
//! mid-life.

use std::sync::Arc;

use llmux_storage::{ProviderConfig, ProviderRow};
use llmux_transform::Converter;

use crate::adapter::ProviderAdapter;
use crate::antigravity::AntigravityAdapter;
use crate::client::UpstreamClient;
use crate::custom::CustomAdapter;

pub fn build_adapter(
    provider: &ProviderRow,
    converter: Arc<Converter>,
    client: Arc<dyn UpstreamClient>,
) -> Arc<dyn ProviderAdapter> {
    match &provider.config {
        ProviderConfig::Antigravity {
            refresh_token,
            project_id,
            endpoint,
        } => Arc::new(AntigravityAdapter::new(
            refresh_token.clone(),
            project_id.clone(),
            endpoint.clone(),
            converter,
            client,
        )),
        ProviderConfig::Custom {
            api_key,
            base_url,
            client_type,
        } => Arc::new(CustomAdapter::new(
            api_key.clone(),
            base_url.clone(),
            *client_type,
            converter,
            client,
        )),
    }
}
