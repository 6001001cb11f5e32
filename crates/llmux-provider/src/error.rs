//! The error surface of the proxy pipeline.
//!
//! Every adapter failure carries a retryability flag and a user-safe message;
//! the executor inspects the flag for per-route and cross-route continuation
//! and maps terminal errors onto cooldown reasons.

use std::time::Duration;

use llmux_cooldown::CooldownReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Conversion between wire formats failed. Retryable while nothing has
    /// been written to the client.
    FormatConversion,
    /// Transport-level failure: dial, DNS, TLS, timeout, reset.
    Network,
    /// Upstream answered with status >= 400.
    UpstreamStatus,
    /// Credential problem that survived the in-adapter refresh retry.
    Auth,
    /// The client went away; suppresses all further failover.
    ClientDisconnected,
    /// No route matched the request.
    NoRoutes,
    Internal,
}

#[derive(Debug, Clone)]
pub struct ProxyError {
    pub kind: ErrorKind,
    pub retryable: bool,
    /// Safe to surface to the client.
    pub message: String,
    pub status: Option<u16>,
    /// Explicit cooldown duration parsed from `Retry-After` or a quota reset.
    pub retry_after: Option<Duration>,
    /// Upstream body snippet, for attempt records only.
    pub detail: Option<String>,
}

impl std::fmt::Display for ProxyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (status {status})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ProxyError {}

impl ProxyError {
    fn new(kind: ErrorKind, retryable: bool, message: impl Into<String>) -> Self {
        Self {
            kind,
            retryable,
            message: message.into(),
            status: None,
            retry_after: None,
            detail: None,
        }
    }

    pub fn format_conversion(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FormatConversion, true, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, true, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, false, message)
    }

    pub fn client_disconnected() -> Self {
        Self::new(ErrorKind::ClientDisconnected, false, "client disconnected")
    }

    pub fn no_routes() -> Self {
        Self::new(ErrorKind::NoRoutes, false, "no routes matched the request")
    }

    /// Every matched candidate is currently cooling down.
    pub fn cooling_down() -> Self {
        let mut err = Self::new(
            ErrorKind::UpstreamStatus,
            false,
            "all matched providers are in cooldown",
        );
        err.status = Some(503);
        err
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, false, message)
    }

    pub fn upstream_status(
        status: u16,
        detail: impl Into<String>,
        retry_after: Option<Duration>,
    ) -> Self {
        Self {
            kind: ErrorKind::UpstreamStatus,
            retryable: retryable_status(status),
            message: format!("upstream returned status {status}"),
            status: Some(status),
            retry_after,
            detail: Some(detail.into()),
        }
    }

    /// Cooldown classification for a terminal error on a route.
    pub fn cooldown_reason(&self) -> CooldownReason {
        match self.kind {
            ErrorKind::Network => CooldownReason::NetworkError,
            ErrorKind::UpstreamStatus => {
                let status = self.status.unwrap_or(0);
                let body = self.detail.as_deref().unwrap_or("");
                if status == 429 {
                    if body.contains("RESOURCE_EXHAUSTED") || body.to_ascii_lowercase().contains("quota") {
                        CooldownReason::QuotaExhausted
                    } else if body.to_ascii_lowercase().contains("concurrent") {
                        CooldownReason::ConcurrentLimit
                    } else {
                        CooldownReason::RateLimit
                    }
                } else if (500..600).contains(&status) {
                    CooldownReason::ServerError
                } else {
                    CooldownReason::Unknown
                }
            }
            _ => CooldownReason::Unknown,
        }
    }
}

pub fn retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Parse a `Retry-After: <seconds>` header value.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_retryability_matches_the_table() {
        for status in [429, 500, 502, 503, 504] {
            assert!(ProxyError::upstream_status(status, "", None).retryable);
        }
        for status in [400, 401, 403, 404, 422] {
            assert!(!ProxyError::upstream_status(status, "", None).retryable);
        }
    }

    #[test]
    fn cooldown_reasons_follow_status_and_body() {
        let server = ProxyError::upstream_status(503, "overloaded", None);
        assert_eq!(server.cooldown_reason(), CooldownReason::ServerError);

        let quota = ProxyError::upstream_status(429, "RESOURCE_EXHAUSTED: quota", None);
        assert_eq!(quota.cooldown_reason(), CooldownReason::QuotaExhausted);

        let concurrent = ProxyError::upstream_status(429, "too many concurrent requests", None);
        assert_eq!(concurrent.cooldown_reason(), CooldownReason::ConcurrentLimit);

        let rate = ProxyError::upstream_status(429, "slow down", None);
        assert_eq!(rate.cooldown_reason(), CooldownReason::RateLimit);

        let network = ProxyError::network("connection reset");
        assert_eq!(network.cooldown_reason(), CooldownReason::NetworkError);
    }

    #[test]
    fn retry_after_parses_whole_seconds() {
        assert_eq!(parse_retry_after("60"), Some(Duration::from_secs(60)));
        assert_eq!(parse_retry_after(" 5 "), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after("Wed, 21 Oct"), None);
    }
}
