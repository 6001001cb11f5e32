//! Read-mostly configuration rows served to the in-memory snapshot.
//!
//! The admin surface mutates the tables; the proxy pipeline only ever sees
//! a coherent [`ConfigSnapshot`] loaded atomically after writes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use llmux_protocol::ClientType;

/// Type-tagged provider credential set, stored as `providers.config_json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Google OAuth refresh-token credential speaking v1internal Gemini.
    Antigravity {
        refresh_token: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        project_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },
    /// Static API key against an arbitrary base URL speaking one native
    /// dialect without translation.
    Custom {
        api_key: String,
        base_url: String,
        client_type: ClientType,
    },
}

#[derive(Debug, Clone)]
pub struct ProviderRow {
    pub id: i64,
    pub name: String,
    pub config: ProviderConfig,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct RouteRow {
    pub id: i64,
    pub enabled: bool,
    pub client_type: ClientType,
    /// 0 = global route.
    pub project_id: i64,
    pub provider_id: i64,
    pub position: i32,
    /// 0 = system default retry config.
    pub retry_config_id: i64,
    pub model_mapping: HashMap<String, String>,
}

impl RouteRow {
    /// Upstream model for a request model; unmapped models pass through.
    pub fn map_model<'a>(&'a self, model: &'a str) -> &'a str {
        self.model_mapping
            .get(model)
            .map(String::as_str)
            .unwrap_or(model)
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfigRow {
    pub id: i64,
    pub name: String,
    pub is_default: bool,
    pub max_retries: u32,
    pub initial_interval_ms: u64,
    pub backoff_rate: f64,
    pub max_interval_ms: u64,
}

impl RetryConfigRow {
    /// Built-in fallback when the table carries no default row.
    pub fn fallback() -> Self {
        Self {
            id: 0,
            name: "default".to_string(),
            is_default: true,
            max_retries: 3,
            initial_interval_ms: 1000,
            backoff_rate: 2.0,
            max_interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Priority,
    WeightedRandom,
}

impl StrategyKind {
    pub fn parse(value: &str) -> Self {
        match value {
            "weighted_random" => StrategyKind::WeightedRandom,
            _ => StrategyKind::Priority,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StrategyRow {
    pub id: i64,
    /// 0 = global strategy.
    pub project_id: i64,
    pub kind: StrategyKind,
}

/// One coherent view of the routing configuration. Different requests may
/// see different snapshots; a single request never sees a mix.
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    pub providers: Vec<ProviderRow>,
    pub routes: Vec<RouteRow>,
    pub retry_configs: Vec<RetryConfigRow>,
    pub strategies: Vec<StrategyRow>,
    /// session id -> project id.
    pub sessions: HashMap<String, i64>,
}

impl ConfigSnapshot {
    pub fn provider(&self, id: i64) -> Option<&ProviderRow> {
        self.providers.iter().find(|row| row.id == id)
    }

    pub fn retry_config(&self, id: i64) -> Option<&RetryConfigRow> {
        self.retry_configs.iter().find(|row| row.id == id)
    }

    pub fn default_retry_config(&self) -> RetryConfigRow {
        self.retry_configs
            .iter()
            .find(|row| row.is_default)
            .cloned()
            .unwrap_or_else(RetryConfigRow::fallback)
    }

    pub fn strategy_for(&self, project_id: i64) -> StrategyKind {
        let by_project = |target: i64| {
            self.strategies
                .iter()
                .find(|row| row.project_id == target)
                .map(|row| row.kind)
        };
        if project_id != 0
            && let Some(kind) = by_project(project_id)
        {
            return kind;
        }
        by_project(0).unwrap_or(StrategyKind::Priority)
    }
}
