//! Route matching: filter by (client type, project), order by strategy,
//! bind provider + adapter + retry config.
//!
//! Matching never consults the cooldown engine. Cooldown skips happen in the
//! executor so the candidate set stays visible to diagnostics.

use std::sync::Arc;

use rand::seq::SliceRandom;

use llmux_protocol::ClientType;
use llmux_provider::{ProviderAdapter, ProxyError};
use llmux_storage::{ProviderRow, RetryConfigRow, RouteRow, StrategyKind};

use crate::state::AppState;

#[derive(Clone)]
pub struct MatchedRoute {
    pub route: RouteRow,
    pub provider: ProviderRow,
    pub adapter: Arc<dyn ProviderAdapter>,
    pub retry: RetryConfigRow,
}

impl AppState {
    /// Ordered candidate list for (client type, project).
    pub fn match_routes(
        &self,
        client_type: ClientType,
        project_id: i64,
    ) -> Result<Vec<MatchedRoute>, ProxyError> {
        let snapshot = self.snapshot.load();

        let typed: Vec<&RouteRow> = snapshot
            .routes
            .iter()
            .filter(|route| route.enabled && route.client_type == client_type)
            .collect();

        // Project-specific routes eclipse global ones entirely; the sets
        // never mix.
        let mut filtered: Vec<RouteRow> = typed
            .iter()
            .filter(|route| project_id != 0 && route.project_id == project_id)
            .map(|route| (*route).clone())
            .collect();
        if filtered.is_empty() {
            filtered = typed
                .iter()
                .filter(|route| route.project_id == 0)
                .map(|route| (*route).clone())
                .collect();
        }
        if filtered.is_empty() {
            return Err(ProxyError::no_routes());
        }

        match snapshot.strategy_for(project_id) {
            StrategyKind::Priority => filtered.sort_by_key(|route| route.position),
            // Uniform shuffle; routes carry no weight field.
            StrategyKind::WeightedRandom => filtered.shuffle(&mut rand::rng()),
        }

        let default_retry = snapshot.default_retry_config();
        let mut matched = Vec::with_capacity(filtered.len());
        for route in filtered {
            let Some(provider) = snapshot
                .provider(route.provider_id)
                .filter(|provider| provider.enabled)
            else {
                tracing::warn!(route_id = route.id, provider_id = route.provider_id, "route skipped: provider missing");
                continue;
            };
            let Some(adapter) = self.adapter(provider.id) else {
                tracing::warn!(route_id = route.id, provider_id = provider.id, "route skipped: adapter missing");
                continue;
            };
            // A route whose adapter cannot serve this dialect is a
            // misconfiguration; dropping it here keeps the failure out of
            // the per-request path.
            if !adapter.supported_client_types().contains(&client_type) {
                tracing::warn!(
                    route_id = route.id,
                    provider_id = provider.id,
                    client_type = %client_type,
                    "route skipped: client type unsupported by adapter"
                );
                continue;
            }
            let retry = match route.retry_config_id {
                0 => default_retry.clone(),
                id => snapshot
                    .retry_config(id)
                    .cloned()
                    .unwrap_or_else(|| default_retry.clone()),
            };
            matched.push(MatchedRoute {
                route,
                provider: provider.clone(),
                adapter,
                retry,
            });
        }

        if matched.is_empty() {
            return Err(ProxyError::no_routes());
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use llmux_cooldown::{CooldownEngine, NullStore};
    use llmux_provider::adapter::{AttemptContext, ClientResponse};
    use llmux_provider::{UpstreamClient, UpstreamRequest, UpstreamResponse};
    use llmux_storage::{ConfigSnapshot, ProviderConfig, StrategyRow};

    use super::*;

    struct NoopAdapter;

    #[async_trait]
    impl ProviderAdapter for NoopAdapter {
        fn supported_client_types(&self) -> &'static [ClientType] {
            &[ClientType::Claude]
        }
        async fn execute(&self, _: &AttemptContext) -> Result<ClientResponse, ProxyError> {
            Err(ProxyError::internal("not used"))
        }
    }

    struct NoClient;

    #[async_trait]
    impl UpstreamClient for NoClient {
        async fn send(&self, _: UpstreamRequest) -> Result<UpstreamResponse, ProxyError> {
            Err(ProxyError::internal("not used"))
        }
    }

    struct NoStorage;

    #[async_trait]
    impl llmux_storage::Storage for NoStorage {
        async fn sync(&self) -> llmux_storage::StorageResult<()> {
            Ok(())
        }
        async fn load_snapshot(&self) -> llmux_storage::StorageResult<ConfigSnapshot> {
            Ok(ConfigSnapshot::default())
        }
        async fn resolve_session(
            &self,
            _: &str,
            _: ClientType,
        ) -> llmux_storage::StorageResult<i64> {
            Ok(0)
        }
        async fn insert_request(
            &self,
            _: &llmux_storage::RequestRecord,
        ) -> llmux_storage::StorageResult<i64> {
            Ok(1)
        }
        async fn update_request(
            &self,
            _: &llmux_storage::RequestRecord,
        ) -> llmux_storage::StorageResult<()> {
            Ok(())
        }
        async fn insert_attempt(
            &self,
            _: &llmux_storage::AttemptRecord,
        ) -> llmux_storage::StorageResult<i64> {
            Ok(1)
        }
        async fn update_attempt(
            &self,
            _: &llmux_storage::AttemptRecord,
        ) -> llmux_storage::StorageResult<()> {
            Ok(())
        }
    }

    fn provider(id: i64) -> ProviderRow {
        ProviderRow {
            id,
            name: format!("p{id}"),
            config: ProviderConfig::Custom {
                api_key: "k".to_string(),
                base_url: "https://example.test".to_string(),
                client_type: ClientType::Claude,
            },
            enabled: true,
        }
    }

    fn route(id: i64, project_id: i64, provider_id: i64, position: i32) -> RouteRow {
        RouteRow {
            id,
            enabled: true,
            client_type: ClientType::Claude,
            project_id,
            provider_id,
            position,
            retry_config_id: 0,
            model_mapping: HashMap::new(),
        }
    }

    fn state_with(snapshot: ConfigSnapshot) -> Arc<AppState> {
        let state = AppState::new(
            Arc::new(NoStorage),
            Arc::new(CooldownEngine::new(Arc::new(NullStore))),
            Arc::new(NoClient),
            "test".to_string(),
        );
        let adapters: HashMap<i64, Arc<dyn ProviderAdapter>> = snapshot
            .providers
            .iter()
            .map(|p| (p.id, Arc::new(NoopAdapter) as Arc<dyn ProviderAdapter>))
            .collect();
        state.install_snapshot(snapshot, adapters);
        state
    }

    #[test]
    fn project_routes_eclipse_global_routes() {
        let snapshot = ConfigSnapshot {
            providers: vec![provider(1), provider(2)],
            routes: vec![route(1, 0, 1, 0), route(2, 7, 2, 5)],
            ..ConfigSnapshot::default()
        };
        let state = state_with(snapshot);

        let matched = state.match_routes(ClientType::Claude, 7).unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].route.id, 2);

        // A project with no routes of its own falls back to global ones.
        let matched = state.match_routes(ClientType::Claude, 9).unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].route.id, 1);
    }

    #[test]
    fn priority_orders_by_position_ascending() {
        let snapshot = ConfigSnapshot {
            providers: vec![provider(1), provider(2), provider(3)],
            routes: vec![route(1, 0, 1, 20), route(2, 0, 2, 5), route(3, 0, 3, 10)],
            ..ConfigSnapshot::default()
        };
        let state = state_with(snapshot);
        let matched = state.match_routes(ClientType::Claude, 0).unwrap();
        let order: Vec<i64> = matched.iter().map(|m| m.route.id).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn weighted_random_keeps_the_full_set() {
        let snapshot = ConfigSnapshot {
            providers: vec![provider(1), provider(2), provider(3)],
            routes: vec![route(1, 0, 1, 0), route(2, 0, 2, 1), route(3, 0, 3, 2)],
            strategies: vec![StrategyRow {
                id: 1,
                project_id: 0,
                kind: StrategyKind::WeightedRandom,
            }],
            ..ConfigSnapshot::default()
        };
        let state = state_with(snapshot);
        let matched = state.match_routes(ClientType::Claude, 0).unwrap();
        let mut ids: Vec<i64> = matched.iter().map(|m| m.route.id).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn disabled_and_unbound_routes_vanish() {
        let mut disabled = route(1, 0, 1, 0);
        disabled.enabled = false;
        let snapshot = ConfigSnapshot {
            providers: vec![provider(1)],
            // Route 2 points at a provider that does not exist.
            routes: vec![disabled, route(2, 0, 99, 1)],
            ..ConfigSnapshot::default()
        };
        let state = state_with(snapshot);
        let err = state.match_routes(ClientType::Claude, 0).unwrap_err();
        assert_eq!(err.kind, llmux_provider::ErrorKind::NoRoutes);
    }

    #[test]
    fn adapter_support_gates_the_route() {
        struct TextOnlyAdapter;
        #[async_trait]
        impl ProviderAdapter for TextOnlyAdapter {
            fn supported_client_types(&self) -> &'static [ClientType] {
                &[ClientType::Claude, ClientType::OpenAI]
            }
            async fn execute(&self, _: &AttemptContext) -> Result<ClientResponse, ProxyError> {
                Err(ProxyError::internal("not used"))
            }
        }

        let mut gemini_route = route(1, 0, 1, 0);
        gemini_route.client_type = ClientType::Gemini;
        let snapshot = ConfigSnapshot {
            providers: vec![provider(1)],
            routes: vec![gemini_route],
            ..ConfigSnapshot::default()
        };
        let state = AppState::new(
            Arc::new(NoStorage),
            Arc::new(CooldownEngine::new(Arc::new(NullStore))),
            Arc::new(NoClient),
            "test".to_string(),
        );
        let adapters: HashMap<i64, Arc<dyn ProviderAdapter>> =
            HashMap::from([(1i64, Arc::new(TextOnlyAdapter) as Arc<dyn ProviderAdapter>)]);
        state.install_snapshot(snapshot, adapters);

        // A Gemini-speaking client cannot ride a Claude/OpenAI-native
        // upstream; the route vanishes at match time.
        let err = state.match_routes(ClientType::Gemini, 0).unwrap_err();
        assert_eq!(err.kind, llmux_provider::ErrorKind::NoRoutes);
    }

    #[test]
    fn client_type_filter_applies() {
        let snapshot = ConfigSnapshot {
            providers: vec![provider(1)],
            routes: vec![route(1, 0, 1, 0)],
            ..ConfigSnapshot::default()
        };
        let state = state_with(snapshot);
        assert!(state.match_routes(ClientType::Gemini, 0).is_err());
        assert!(state.match_routes(ClientType::Claude, 0).is_ok());
    }
}
