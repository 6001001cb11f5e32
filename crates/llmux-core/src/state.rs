//! Process-wide state: the config snapshot behind an atomic pointer swap and
//! the adapter registry keyed by provider id.
//!
//! Adapters re-read nothing at call time; a provider mutation rebuilds its
//! adapter and swaps a fresh snapshot, so in-flight requests keep the view
//! they started with.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use arc_swap::ArcSwap;

use llmux_cooldown::CooldownEngine;
use llmux_provider::{ProviderAdapter, UpstreamClient, build_adapter};
use llmux_storage::{ConfigSnapshot, ProviderRow, Storage, StorageResult};
use llmux_transform::Converter;

use crate::events::EventHub;

pub struct AppState {
    pub snapshot: ArcSwap<ConfigSnapshot>,
    pub cooldown: Arc<CooldownEngine>,
    pub storage: Arc<dyn Storage>,
    pub converter: Arc<Converter>,
    pub upstream: Arc<dyn UpstreamClient>,
    pub events: EventHub,
    /// Identifies this process in persisted request records.
    pub instance_id: String,
    adapters: RwLock<HashMap<i64, Arc<dyn ProviderAdapter>>>,
}

impl AppState {
    pub fn new(
        storage: Arc<dyn Storage>,
        cooldown: Arc<CooldownEngine>,
        upstream: Arc<dyn UpstreamClient>,
        instance_id: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            snapshot: ArcSwap::new(Arc::new(ConfigSnapshot::default())),
            cooldown,
            storage,
            converter: Arc::new(Converter::new()),
            upstream,
            events: EventHub::default(),
            instance_id,
            adapters: RwLock::new(HashMap::new()),
        })
    }

    /// Reload configuration from storage and swap it in atomically, then
    /// rebuild the adapter set to match.
    pub async fn refresh_snapshot(&self) -> StorageResult<()> {
        let snapshot = Arc::new(self.storage.load_snapshot().await?);
        self.snapshot.store(Arc::clone(&snapshot));
        self.init_adapters(&snapshot);
        Ok(())
    }

    /// Build adapters for every enabled provider in the snapshot.
    pub fn init_adapters(&self, snapshot: &ConfigSnapshot) {
        let mut built: HashMap<i64, Arc<dyn ProviderAdapter>> = HashMap::new();
        for provider in snapshot.providers.iter().filter(|row| row.enabled) {
            built.insert(
                provider.id,
                build_adapter(
                    provider,
                    Arc::clone(&self.converter),
                    Arc::clone(&self.upstream),
                ),
            );
        }
        tracing::info!(adapters = built.len(), "adapter registry rebuilt");
        let mut guard = self.adapters.write().expect("adapter registry poisoned");
        *guard = built;
    }

    /// Rebuild a single adapter after its provider row mutated.
    pub fn refresh_adapter(&self, provider: &ProviderRow) {
        let adapter = build_adapter(
            provider,
            Arc::clone(&self.converter),
            Arc::clone(&self.upstream),
        );
        let mut guard = self.adapters.write().expect("adapter registry poisoned");
        guard.insert(provider.id, adapter);
    }

    pub fn remove_adapter(&self, provider_id: i64) {
        let mut guard = self.adapters.write().expect("adapter registry poisoned");
        guard.remove(&provider_id);
    }

    pub fn adapter(&self, provider_id: i64) -> Option<Arc<dyn ProviderAdapter>> {
        let guard = self.adapters.read().expect("adapter registry poisoned");
        guard.get(&provider_id).cloned()
    }

    /// Test hook: install a snapshot and adapter set directly.
    pub fn install_snapshot(
        &self,
        snapshot: ConfigSnapshot,
        adapters: HashMap<i64, Arc<dyn ProviderAdapter>>,
    ) {
        self.snapshot.store(Arc::new(snapshot));
        let mut guard = self.adapters.write().expect("adapter registry poisoned");
        *guard = adapters;
    }
}
