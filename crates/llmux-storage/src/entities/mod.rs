pub mod antigravity_quotas;
pub mod cooldowns;
pub mod failure_counts;
pub mod projects;
pub mod providers;
pub mod proxy_requests;
pub mod proxy_upstream_attempts;
pub mod retry_configs;
pub mod routes;
pub mod routing_strategies;
pub mod sessions;
pub mod system_settings;
