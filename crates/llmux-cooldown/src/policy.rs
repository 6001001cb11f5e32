use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Why a provider was placed in cooldown. Persisted as a string key, so the
/// set is append-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownReason {
    ServerError,
    NetworkError,
    QuotaExhausted,
    RateLimit,
    ConcurrentLimit,
    Unknown,
}

impl CooldownReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CooldownReason::ServerError => "server_error",
            CooldownReason::NetworkError => "network_error",
            CooldownReason::QuotaExhausted => "quota_exhausted",
            CooldownReason::RateLimit => "rate_limit",
            CooldownReason::ConcurrentLimit => "concurrent_limit",
            CooldownReason::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "server_error" => CooldownReason::ServerError,
            "network_error" => CooldownReason::NetworkError,
            "quota_exhausted" => CooldownReason::QuotaExhausted,
            "rate_limit" => CooldownReason::RateLimit,
            "concurrent_limit" => CooldownReason::ConcurrentLimit,
            _ => CooldownReason::Unknown,
        }
    }
}

impl std::fmt::Display for CooldownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a cooldown duration grows with consecutive failures.
#[derive(Debug, Clone, Copy)]
pub enum Policy {
    /// Same duration regardless of failure count. Used as a fallback when the
    /// API supplies no explicit reset time.
    Fixed(Duration),
    /// `base * n`, capped.
    Linear { base: Duration, max: Duration },
    /// `base * 2^(n-1)`, capped.
    Exponential { base: Duration, max: Duration },
}

impl Policy {
    pub fn duration_for(&self, failure_count: u32) -> Duration {
        if failure_count == 0 {
            return Duration::ZERO;
        }
        match *self {
            Policy::Fixed(duration) => duration,
            Policy::Linear { base, max } => (base * failure_count).min(max),
            Policy::Exponential { base, max } => {
                let shift = failure_count.saturating_sub(1).min(16);
                base.saturating_mul(1u32 << shift).min(max)
            }
        }
    }
}

const MINUTE: Duration = Duration::from_secs(60);

/// The stock policy table. Quota/rate-limit reasons are fallbacks only:
/// explicit reset times from the API take precedence over them.
pub fn default_policies() -> HashMap<CooldownReason, Policy> {
    HashMap::from([
        (
            CooldownReason::ServerError,
            Policy::Linear {
                base: MINUTE,
                max: 10 * MINUTE,
            },
        ),
        (
            CooldownReason::NetworkError,
            Policy::Exponential {
                base: MINUTE,
                max: 30 * MINUTE,
            },
        ),
        (
            CooldownReason::QuotaExhausted,
            Policy::Fixed(Duration::from_secs(3600)),
        ),
        (CooldownReason::RateLimit, Policy::Fixed(MINUTE)),
        (
            CooldownReason::ConcurrentLimit,
            Policy::Fixed(Duration::from_secs(10)),
        ),
        (
            CooldownReason::Unknown,
            Policy::Linear {
                base: MINUTE,
                max: 5 * MINUTE,
            },
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_caps_at_max() {
        let policy = Policy::Linear {
            base: MINUTE,
            max: 10 * MINUTE,
        };
        assert_eq!(policy.duration_for(1), MINUTE);
        assert_eq!(policy.duration_for(3), 3 * MINUTE);
        assert_eq!(policy.duration_for(25), 10 * MINUTE);
    }

    #[test]
    fn exponential_doubles_then_caps() {
        let policy = Policy::Exponential {
            base: MINUTE,
            max: 30 * MINUTE,
        };
        assert_eq!(policy.duration_for(1), MINUTE);
        assert_eq!(policy.duration_for(2), 2 * MINUTE);
        assert_eq!(policy.duration_for(4), 8 * MINUTE);
        assert_eq!(policy.duration_for(10), 30 * MINUTE);
        // Far past the cap the shift must not overflow.
        assert_eq!(policy.duration_for(40), 30 * MINUTE);
    }

    #[test]
    fn zero_failures_mean_no_cooldown() {
        for policy in default_policies().values() {
            assert_eq!(policy.duration_for(0), Duration::ZERO);
        }
    }
}
