//! Gateway configuration.
//!
//! Loaded from `gateway.json` in the data directory (every field optional),
//! then overridden by `KM_*` environment variables. The binary applies CLI
//! flags on top of the result.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GateError, GateResult};

pub const CONFIG_FILE: &str = "gateway.json";
const DATABASE_FILE: &str = "knowmint.db";
const APP_DIR: &str = "knowmint-gate";

/// Token bucket sizing for one limiter tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    pub max_tokens: u32,
    pub window_secs: u64,
}

impl TierConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Per client address, before authentication.
    pub pre_auth: TierConfig,
    /// Per API key, after authentication.
    pub per_key: TierConfig,
    /// Per client address, for the wallet challenge/register/login endpoints.
    pub auth_endpoints: TierConfig,
    /// Upper bound on live buckets per limiter.
    pub max_buckets: usize,
    /// How often idle buckets are swept.
    pub cleanup_interval_secs: u64,
    /// A bucket is evicted after `idle_windows` full windows without a request.
    pub idle_windows: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            pre_auth: TierConfig { max_tokens: 120, window_secs: 60 },
            per_key: TierConfig { max_tokens: 60, window_secs: 60 },
            auth_endpoints: TierConfig { max_tokens: 20, window_secs: 60 },
            max_buckets: 10_000,
            cleanup_interval_secs: 600,
            idle_windows: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    /// Defaults to `<data_dir>/knowmint.db` when unset.
    pub database_path: Option<PathBuf>,
    pub rate_limits: RateLimitSettings,
    /// Minimum spacing between `last_used_at` writes for one key.
    pub last_used_throttle_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8787".to_string(),
            data_dir: default_data_dir(),
            database_path: None,
            rate_limits: RateLimitSettings::default(),
            last_used_throttle_secs: 5 * 60,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

impl GatewayConfig {
    /// Load configuration. An explicit `path` must exist; otherwise
    /// `gateway.json` in the (possibly env-overridden) data directory is read
    /// if present.
    pub fn load(path: Option<&Path>) -> GateResult<Self> {
        let mut config = match path {
            Some(p) => Self::read_file(p)?,
            None => {
                let data_dir = std::env::var("KM_DATA_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| default_data_dir());
                let candidate = data_dir.join(CONFIG_FILE);
                if candidate.exists() {
                    Self::read_file(&candidate)?
                } else {
                    Self {
                        data_dir,
                        ..Self::default()
                    }
                }
            }
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> GateResult<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: GatewayConfig = serde_json::from_str(&data)?;
        log::info!("Loaded gateway config from {}", path.display());
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("KM_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Ok(dir) = std::env::var("KM_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(db) = std::env::var("KM_DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(db));
        }
    }

    pub fn validate(&self) -> GateResult<()> {
        let limits = &self.rate_limits;
        for (name, tier) in [
            ("pre_auth", &limits.pre_auth),
            ("per_key", &limits.per_key),
            ("auth_endpoints", &limits.auth_endpoints),
        ] {
            if tier.max_tokens == 0 || tier.window_secs == 0 {
                return Err(GateError::Config(format!(
                    "rate_limits.{name} needs a non-zero max_tokens and window_secs"
                )));
            }
        }
        if limits.max_buckets == 0 {
            return Err(GateError::Config("rate_limits.max_buckets must be > 0".into()));
        }
        if limits.cleanup_interval_secs == 0 {
            return Err(GateError::Config(
                "rate_limits.cleanup_interval_secs must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(DATABASE_FILE))
    }

    pub fn last_used_throttle(&self) -> Duration {
        Duration::from_secs(self.last_used_throttle_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.rate_limits.cleanup_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_published_quotas() {
        let config = GatewayConfig::default();
        assert_eq!(config.rate_limits.pre_auth.max_tokens, 120);
        assert_eq!(config.rate_limits.per_key.max_tokens, 60);
        assert_eq!(config.rate_limits.auth_endpoints.max_tokens, 20);
        assert_eq!(config.rate_limits.per_key.window(), Duration::from_secs(60));
        assert_eq!(config.last_used_throttle(), Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            r#"{ "data_dir": "/srv/km", "rate_limits": { "per_key": { "max_tokens": 5, "window_secs": 10 } } }"#,
        )
        .unwrap();

        let config = GatewayConfig::read_file(&path).unwrap();
        assert_eq!(config.rate_limits.per_key.max_tokens, 5);
        assert_eq!(config.rate_limits.pre_auth.max_tokens, 120);
        assert_eq!(config.database_path(), PathBuf::from("/srv/km/knowmint.db"));
    }

    #[test]
    fn zero_window_is_rejected() {
        let mut config = GatewayConfig::default();
        config.rate_limits.pre_auth.window_secs = 0;
        assert!(matches!(config.validate(), Err(GateError::Config(_))));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let result = GatewayConfig::load(Some(&tmp.path().join("nope.json")));
        assert!(matches!(result, Err(GateError::Io(_))));
    }
}
