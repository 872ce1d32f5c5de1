use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::http::HeaderMap;

use crate::config::TierConfig;

/// Bucket key used when a request carries no client address headers.
/// Every such client shares one bucket.
pub const UNKNOWN_CLIENT: &str = "unknown";

const DEFAULT_MAX_BUCKETS: usize = 10_000;

/// Outcome of one limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub allowed: bool,
    /// Tokens left after this request.
    pub remaining: u32,
    /// Milliseconds until the bucket's current window ends.
    pub reset_ms: u64,
}

impl RateLimitStatus {
    /// Reset expressed in whole seconds, rounded up (the `X-RateLimit-Reset` value).
    pub fn reset_secs(&self) -> u64 {
        self.reset_ms.div_ceil(1000)
    }
}

/// Per-identity token bucket limiter.
///
/// Each identity gets `max_tokens` per `window`, refilled continuously in
/// whole tokens. When a bucket is empty, requests are rejected until enough
/// time has passed to earn a token back.
///
/// The whole read-refill-consume sequence for a bucket happens under one
/// lock acquisition with no await point, so concurrent requests for the same
/// identity can never spend the same token twice.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<RateLimiterInner>,
}

struct RateLimiterInner {
    buckets: Mutex<HashMap<String, Bucket>>,
    max_tokens: u32,
    window: Duration,
    max_buckets: usize,
}

struct Bucket {
    tokens: u32,
    last_refill: Instant,
    last_seen: Instant,
}

impl RateLimiter {
    /// Create a limiter allowing `max_tokens` per `window` per identity.
    pub fn new(max_tokens: u32, window: Duration) -> Self {
        Self::with_max_buckets(max_tokens, window, DEFAULT_MAX_BUCKETS)
    }

    pub fn with_max_buckets(max_tokens: u32, window: Duration, max_buckets: usize) -> Self {
        Self {
            inner: Arc::new(RateLimiterInner {
                buckets: Mutex::new(HashMap::new()),
                max_tokens,
                window,
                max_buckets,
            }),
        }
    }

    pub fn from_tier(tier: &TierConfig, max_buckets: usize) -> Self {
        Self::with_max_buckets(tier.max_tokens, tier.window(), max_buckets)
    }

    pub fn max_tokens(&self) -> u32 {
        self.inner.max_tokens
    }

    pub fn window(&self) -> Duration {
        self.inner.window
    }

    /// Spend one token for `key` if available.
    pub fn check(&self, key: &str) -> RateLimitStatus {
        self.check_at(key, Instant::now())
    }

    pub(crate) fn check_at(&self, key: &str, now: Instant) -> RateLimitStatus {
        let inner = &*self.inner;
        let window_ms = inner.window.as_millis().max(1);
        let mut buckets = inner.buckets.lock().unwrap_or_else(|e| e.into_inner());

        if !buckets.contains_key(key) {
            // Refuse to grow past the cap rather than evicting live buckets.
            if buckets.len() >= inner.max_buckets {
                log::warn!("Rate limiter full ({} buckets), rejecting new key", buckets.len());
                return RateLimitStatus {
                    allowed: false,
                    remaining: 0,
                    reset_ms: window_ms as u64,
                };
            }
            buckets.insert(
                key.to_string(),
                Bucket {
                    tokens: inner.max_tokens,
                    last_refill: now,
                    last_seen: now,
                },
            );
        }
        let Some(bucket) = buckets.get_mut(key) else {
            return RateLimitStatus { allowed: false, remaining: 0, reset_ms: window_ms as u64 };
        };
        bucket.last_seen = now;

        let elapsed_ms = now.saturating_duration_since(bucket.last_refill).as_millis();
        let earned = elapsed_ms * u128::from(inner.max_tokens) / window_ms;
        if earned > 0 {
            let refilled = (u128::from(bucket.tokens) + earned).min(u128::from(inner.max_tokens));
            bucket.tokens = refilled as u32;
            // Only move the refill mark when a whole token was earned, so
            // frequent calls don't discard fractional progress.
            bucket.last_refill = now;
        }

        let since_refill = now.saturating_duration_since(bucket.last_refill).as_millis();
        let reset_ms = window_ms.saturating_sub(since_refill) as u64;

        if bucket.tokens == 0 {
            return RateLimitStatus {
                allowed: false,
                remaining: 0,
                reset_ms,
            };
        }
        bucket.tokens -= 1;
        RateLimitStatus {
            allowed: true,
            remaining: bucket.tokens,
            reset_ms,
        }
    }

    /// Drop buckets that have not been touched for `idle`. Returns how many
    /// were removed.
    pub fn evict_idle(&self, idle: Duration) -> usize {
        self.evict_idle_at(idle, Instant::now())
    }

    pub(crate) fn evict_idle_at(&self, idle: Duration, now: Instant) -> usize {
        let mut buckets = self.inner.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let before = buckets.len();
        buckets.retain(|_, b| now.saturating_duration_since(b.last_seen) < idle);
        before - buckets.len()
    }

    pub fn len(&self) -> usize {
        self.inner.buckets.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Client address used as the pre-authentication bucket identity.
///
/// First entry of `X-Forwarded-For`, else `X-Real-IP`, else [`UNKNOWN_CLIENT`].
pub fn client_address(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    forwarded
        .or_else(real_ip)
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}
