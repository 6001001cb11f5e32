use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::{RwLock, broadcast};

use crate::policy::{CooldownReason, Policy, default_policies};

/// An empty client type means the cooldown covers every client type of the
/// provider; lookups always consult the specific key first, then the global
/// one.
pub const ALL_CLIENT_TYPES: &str = "";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CooldownKey {
    provider_id: i64,
    client_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FailureKey {
    provider_id: i64,
    client_type: String,
    reason: CooldownReason,
}

#[derive(Debug, Clone, Copy)]
pub struct FailureEntry {
    pub count: u32,
    pub last_failure_at: OffsetDateTime,
}

/// Active-cooldown snapshot row for reporting surfaces.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CooldownInfo {
    pub provider_id: i64,
    pub client_type: String,
    #[serde(with = "time::serde::rfc3339")]
    pub until: OffsetDateTime,
}

/// Broadcast to observers on every mutation; delivery is best-effort.
#[derive(Debug, Clone)]
pub enum CooldownChange {
    Set {
        provider_id: i64,
        client_type: String,
        reason: CooldownReason,
        until: OffsetDateTime,
    },
    Cleared {
        provider_id: i64,
        client_type: Option<String>,
    },
}

#[derive(Debug, thiserror::Error)]
#[error("cooldown store: {0}")]
pub struct StoreError(pub String);

/// Persistence behind the engine. The in-memory table stays authoritative;
/// the store only has to survive restarts.
#[async_trait]
pub trait CooldownStore: Send + Sync {
    async fn load_cooldowns(&self) -> Result<Vec<(i64, String, OffsetDateTime)>, StoreError>;
    async fn load_failure_counts(
        &self,
    ) -> Result<Vec<(i64, String, String, u32, OffsetDateTime)>, StoreError>;
    async fn upsert_cooldown(
        &self,
        provider_id: i64,
        client_type: &str,
        until: OffsetDateTime,
    ) -> Result<(), StoreError>;
    /// `client_type: None` removes every row of the provider.
    async fn delete_cooldowns(
        &self,
        provider_id: i64,
        client_type: Option<&str>,
    ) -> Result<(), StoreError>;
    async fn upsert_failure_count(
        &self,
        provider_id: i64,
        client_type: &str,
        reason: &str,
        count: u32,
        last_failure_at: OffsetDateTime,
    ) -> Result<(), StoreError>;
    async fn delete_failure_counts(
        &self,
        provider_id: i64,
        client_type: &str,
    ) -> Result<(), StoreError>;
    async fn delete_expired_cooldowns(&self, now: OffsetDateTime) -> Result<(), StoreError>;
}

/// A store that keeps nothing. Used by tests and by setups that can afford to
/// lose cooldown state across restarts.
pub struct NullStore;

#[async_trait]
impl CooldownStore for NullStore {
    async fn load_cooldowns(&self) -> Result<Vec<(i64, String, OffsetDateTime)>, StoreError> {
        Ok(Vec::new())
    }
    async fn load_failure_counts(
        &self,
    ) -> Result<Vec<(i64, String, String, u32, OffsetDateTime)>, StoreError> {
        Ok(Vec::new())
    }
    async fn upsert_cooldown(&self, _: i64, _: &str, _: OffsetDateTime) -> Result<(), StoreError> {
        Ok(())
    }
    async fn delete_cooldowns(&self, _: i64, _: Option<&str>) -> Result<(), StoreError> {
        Ok(())
    }
    async fn upsert_failure_count(
        &self,
        _: i64,
        _: &str,
        _: &str,
        _: u32,
        _: OffsetDateTime,
    ) -> Result<(), StoreError> {
        Ok(())
    }
    async fn delete_failure_counts(&self, _: i64, _: &str) -> Result<(), StoreError> {
        Ok(())
    }
    async fn delete_expired_cooldowns(&self, _: OffsetDateTime) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Default)]
struct State {
    cooldowns: HashMap<CooldownKey, OffsetDateTime>,
    failures: HashMap<FailureKey, FailureEntry>,
}

pub struct CooldownEngine {
    state: RwLock<State>,
    policies: HashMap<CooldownReason, Policy>,
    store: Arc<dyn CooldownStore>,
    changes: broadcast::Sender<CooldownChange>,
}

impl CooldownEngine {
    pub fn new(store: Arc<dyn CooldownStore>) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            state: RwLock::new(State::default()),
            policies: default_policies(),
            store,
            changes,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CooldownChange> {
        self.changes.subscribe()
    }

    /// Rebuild in-memory state from the store. Expired cooldown rows are
    /// skipped; failure counters are kept whole so backoff survives restarts.
    pub async fn hydrate(&self) -> Result<(), StoreError> {
        let now = OffsetDateTime::now_utc();
        let cooldowns = self.store.load_cooldowns().await?;
        let failures = self.store.load_failure_counts().await?;

        let mut state = self.state.write().await;
        for (provider_id, client_type, until) in cooldowns {
            if until > now {
                state.cooldowns.insert(
                    CooldownKey {
                        provider_id,
                        client_type,
                    },
                    until,
                );
            }
        }
        for (provider_id, client_type, reason, count, last_failure_at) in failures {
            state.failures.insert(
                FailureKey {
                    provider_id,
                    client_type,
                    reason: CooldownReason::parse(&reason),
                },
                FailureEntry {
                    count,
                    last_failure_at,
                },
            );
        }
        Ok(())
    }

    /// Active release time for (provider, client-type), if any. Checks the
    /// specific key and the provider-global key and returns the later.
    pub async fn is_in_cooldown(
        &self,
        provider_id: i64,
        client_type: &str,
    ) -> Option<OffsetDateTime> {
        let now = OffsetDateTime::now_utc();
        let state = self.state.read().await;
        let specific = state
            .cooldowns
            .get(&CooldownKey {
                provider_id,
                client_type: client_type.to_string(),
            })
            .copied()
            .filter(|until| *until > now);
        let global = state
            .cooldowns
            .get(&CooldownKey {
                provider_id,
                client_type: ALL_CLIENT_TYPES.to_string(),
            })
            .copied()
            .filter(|until| *until > now);
        match (specific, global) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    /// Place (provider, client-type) in cooldown and return the release time.
    ///
    /// With an explicit duration (parsed from `Retry-After` or a quota reset)
    /// that duration is used verbatim and the failure counter is untouched;
    /// otherwise the counter for (provider, client-type, reason) is bumped
    /// and the reason's policy computes the duration.
    pub async fn set_cooldown(
        &self,
        provider_id: i64,
        client_type: &str,
        reason: CooldownReason,
        explicit: Option<Duration>,
    ) -> OffsetDateTime {
        let now = OffsetDateTime::now_utc();
        let (until, failure) = {
            let mut state = self.state.write().await;
            let duration = match explicit {
                Some(duration) => duration,
                None => {
                    let entry = state
                        .failures
                        .entry(FailureKey {
                            provider_id,
                            client_type: client_type.to_string(),
                            reason,
                        })
                        .and_modify(|entry| {
                            entry.count += 1;
                            entry.last_failure_at = now;
                        })
                        .or_insert(FailureEntry {
                            count: 1,
                            last_failure_at: now,
                        });
                    let policy = self
                        .policies
                        .get(&reason)
                        .copied()
                        .unwrap_or(Policy::Fixed(Duration::from_secs(60)));
                    policy.duration_for(entry.count)
                }
            };
            let until = now + duration;
            state.cooldowns.insert(
                CooldownKey {
                    provider_id,
                    client_type: client_type.to_string(),
                },
                until,
            );
            let failure = state
                .failures
                .get(&FailureKey {
                    provider_id,
                    client_type: client_type.to_string(),
                    reason,
                })
                .copied();
            (until, failure)
        };

        if let Err(err) = self
            .store
            .upsert_cooldown(provider_id, client_type, until)
            .await
        {
            tracing::warn!(provider_id, client_type, %err, "cooldown write-through failed");
        }
        if explicit.is_none()
            && let Some(entry) = failure
            && let Err(err) = self
                .store
                .upsert_failure_count(
                    provider_id,
                    client_type,
                    reason.as_str(),
                    entry.count,
                    entry.last_failure_at,
                )
                .await
        {
            tracing::warn!(provider_id, client_type, %err, "failure-count write-through failed");
        }

        tracing::info!(
            provider_id,
            client_type,
            reason = reason.as_str(),
            %until,
            "provider placed in cooldown"
        );
        let _ = self.changes.send(CooldownChange::Set {
            provider_id,
            client_type: client_type.to_string(),
            reason,
            until,
        });
        until
    }

    /// A successful use clears every failure counter for the pair and drops
    /// both the specific and the provider-global cooldown row, so the pair is
    /// usable immediately.
    pub async fn record_success(&self, provider_id: i64, client_type: &str) {
        let touched = {
            let mut state = self.state.write().await;
            let before = state.cooldowns.len() + state.failures.len();
            state.failures.retain(|key, _| {
                !(key.provider_id == provider_id && key.client_type == client_type)
            });
            state.cooldowns.remove(&CooldownKey {
                provider_id,
                client_type: client_type.to_string(),
            });
            state.cooldowns.remove(&CooldownKey {
                provider_id,
                client_type: ALL_CLIENT_TYPES.to_string(),
            });
            before != state.cooldowns.len() + state.failures.len()
        };
        if !touched {
            return;
        }

        for ct in [client_type, ALL_CLIENT_TYPES] {
            if let Err(err) = self.store.delete_cooldowns(provider_id, Some(ct)).await {
                tracing::warn!(provider_id, client_type = ct, %err, "cooldown delete failed");
            }
        }
        if let Err(err) = self
            .store
            .delete_failure_counts(provider_id, client_type)
            .await
        {
            tracing::warn!(provider_id, client_type, %err, "failure-count delete failed");
        }
        let _ = self.changes.send(CooldownChange::Cleared {
            provider_id,
            client_type: Some(client_type.to_string()),
        });
    }

    /// Administrative removal. `client_type: None` clears every row of the
    /// provider.
    pub async fn clear(&self, provider_id: i64, client_type: Option<&str>) {
        {
            let mut state = self.state.write().await;
            match client_type {
                Some(ct) => {
                    state.cooldowns.remove(&CooldownKey {
                        provider_id,
                        client_type: ct.to_string(),
                    });
                }
                None => {
                    state.cooldowns.retain(|key, _| key.provider_id != provider_id);
                    state.failures.retain(|key, _| key.provider_id != provider_id);
                }
            }
        }
        if let Err(err) = self.store.delete_cooldowns(provider_id, client_type).await {
            tracing::warn!(provider_id, %err, "cooldown clear write-through failed");
        }
        let _ = self.changes.send(CooldownChange::Cleared {
            provider_id,
            client_type: client_type.map(|ct| ct.to_string()),
        });
    }

    /// Snapshot of active entries for reporting.
    pub async fn snapshot(&self) -> Vec<CooldownInfo> {
        let now = OffsetDateTime::now_utc();
        let state = self.state.read().await;
        let mut out: Vec<CooldownInfo> = state
            .cooldowns
            .iter()
            .filter(|(_, until)| **until > now)
            .map(|(key, until)| CooldownInfo {
                provider_id: key.provider_id,
                client_type: key.client_type.clone(),
                until: *until,
            })
            .collect();
        out.sort_by_key(|info| (info.provider_id, info.client_type.clone()));
        out
    }

    /// Drop rows whose release time has passed, in memory and in the store.
    /// An entry with `until <= now` is already semantically absent; this just
    /// reclaims the space.
    pub async fn cleanup_expired(&self) {
        let now = OffsetDateTime::now_utc();
        {
            let mut state = self.state.write().await;
            state.cooldowns.retain(|_, until| *until > now);
        }
        if let Err(err) = self.store.delete_expired_cooldowns(now).await {
            tracing::warn!(%err, "expired-cooldown sweep failed");
        }
    }

    /// Hourly background sweep.
    pub fn spawn_sweep_task(self: Arc<Self>, period: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.cleanup_expired().await;
            }
        });
    }
}
