use std::time::Duration;

use serde::Serialize;

use super::{
    client::StoreClient,
    error::CacheResult,
    keys::CacheKeys,
    traits::KeyTtl,
};

/// Outcome of a fixed-window rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests counted in the current window, including this one.
    pub current: i64,
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the window resets.
    pub reset_time: u64,
    /// Seconds to wait before retrying; zero when allowed.
    pub retry_after: u64,
}

impl RateLimitDecision {
    /// Permissive answer used whenever the counter cannot be consulted.
    pub fn fail_open(limit: u32, window: Duration) -> Self {
        Self {
            allowed: true,
            current: 0,
            limit,
            remaining: limit,
            reset_time: window.as_secs(),
            retry_after: 0,
        }
    }
}

impl StoreClient {
    /// Count a request against `identifier` and decide whether it is allowed.
    ///
    /// The window starts at the first request for the identifier and lasts
    /// `window`; later requests in the same window don't move it. Fails open:
    /// if the store can't be reached or the counter can't be updated, the
    /// request is allowed.
    pub async fn rate_limit_check(
        &self,
        identifier: &str,
        limit: u32,
        window: Duration,
    ) -> RateLimitDecision {
        match self.count_request(identifier, limit, window).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::error!(identifier, error = %e, "Rate limit check failed, allowing request");
                RateLimitDecision::fail_open(limit, window)
            }
        }
    }

    async fn count_request(
        &self,
        identifier: &str,
        limit: u32,
        window: Duration,
    ) -> CacheResult<RateLimitDecision> {
        let key = CacheKeys::rate_limit(identifier);
        let current = self.incr(&key, 1).await?;

        let mut ttl = self.ttl(&key).await?;
        // First hit opens the window. A counter left without expiry (for example
        // when a previous expire call failed) would otherwise never reset.
        if current == 1 || ttl == KeyTtl::Persistent {
            self.expire(&key, window).await?;
            ttl = KeyTtl::Expires(window);
        }

        let reset_time = match ttl {
            KeyTtl::Expires(_) => ttl.as_secs().max(0) as u64,
            _ => window.as_secs(),
        };
        let allowed = current <= i64::from(limit);
        let remaining = (i64::from(limit) - current).clamp(0, i64::from(limit)) as u32;

        Ok(RateLimitDecision {
            allowed,
            current,
            limit,
            remaining,
            reset_time,
            retry_after: if allowed { 0 } else { reset_time.max(1) },
        })
    }
}
