//! Request gate for the versioned REST API.
//!
//! Every gated request goes through, in order: the pre-auth limiter (per
//! client address), API key authentication, the route's permission check,
//! and the per-key limiter. See [`middleware::api_gate_middleware`].

pub mod auth;
pub mod middleware;
pub mod permissions;
pub mod rate_limit;
pub mod response;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api_keys::CredentialStore;
use crate::config::GatewayConfig;
use crate::usage::UsageWriter;

pub use auth::{AuthenticatedKey, KeyAuthenticator};
pub use middleware::{api_gate_middleware, RouteGuard};
pub use permissions::{has_all_permissions, Permission};
pub use rate_limit::{client_address, RateLimitStatus, RateLimiter};
pub use response::{ApiError, ApiErrorKind};

/// Process-wide gate state: the three limiter tiers and the authenticator.
pub struct ApiGate {
    pub pre_auth: RateLimiter,
    pub per_key: RateLimiter,
    /// Wallet challenge/register/login endpoints.
    pub auth_endpoints: RateLimiter,
    pub authenticator: KeyAuthenticator,
    idle_windows: u32,
    maintenance_started: AtomicBool,
}

impl ApiGate {
    pub fn new(
        config: &GatewayConfig,
        store: Arc<dyn CredentialStore>,
        usage: UsageWriter,
    ) -> Self {
        let limits = &config.rate_limits;
        Self {
            pre_auth: RateLimiter::from_tier(&limits.pre_auth, limits.max_buckets),
            per_key: RateLimiter::from_tier(&limits.per_key, limits.max_buckets),
            auth_endpoints: RateLimiter::from_tier(&limits.auth_endpoints, limits.max_buckets),
            authenticator: KeyAuthenticator::new(store, usage, config.last_used_throttle()),
            idle_windows: limits.idle_windows,
            maintenance_started: AtomicBool::new(false),
        }
    }

    /// One sweep: evict idle buckets from every tier and drop stale
    /// last-used throttle marks.
    pub fn run_maintenance(&self) -> usize {
        let mut evicted = 0;
        for limiter in [&self.pre_auth, &self.per_key, &self.auth_endpoints] {
            evicted += limiter.evict_idle(limiter.window() * self.idle_windows);
        }
        let pruned = self.authenticator.prune_touches();
        if evicted > 0 || pruned > 0 {
            log::debug!("Gate maintenance: evicted {} buckets, pruned {} throttle marks", evicted, pruned);
        }
        evicted
    }

    /// Spawn the periodic maintenance task. Only the first call installs a
    /// task; later calls return `None`. The task exits when `shutdown` fires.
    pub fn start_maintenance(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        if self.maintenance_started.swap(true, Ordering::SeqCst) {
            log::debug!("Gate maintenance already running");
            return None;
        }
        let gate = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            // Consume the first immediate tick
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        gate.run_maintenance();
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
            log::info!("Gate maintenance stopped");
        }))
    }
}
