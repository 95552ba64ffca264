//! Process-level configuration, loaded once at start.

use std::time::Duration;

use crate::{CacheKeyDeriver, DefaultableError, DefaultableResult};

pub const DEFAULT_CACHE_KEY: &str = "default_last";
pub const DEFAULT_TTL_SECS: u64 = 60 * 60;
/// Longest accepted TTL (100 years). Anything longer is a misconfiguration.
pub const MAX_TTL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

pub const ENV_CACHE_KEY: &str = "DEFAULTABLE_CACHE_KEY";
pub const ENV_CACHE_TTL: &str = "DEFAULTABLE_CACHE_TTL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Namespace prefix for cache keys; made unique per principal.
    pub cache_key: String,
    /// How long each remembered value lives.
    pub ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self { cache_key: DEFAULT_CACHE_KEY.to_string(), ttl: Duration::from_secs(DEFAULT_TTL_SECS) }
    }
}

impl Config {
    pub fn from_env() -> DefaultableResult<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from any key lookup; unset or blank keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> DefaultableResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(key) = lookup(ENV_CACHE_KEY).map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) {
            cfg.cache_key = key;
        }
        if let Some(raw) = lookup(ENV_CACHE_TTL).map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) {
            let secs = raw
                .parse::<u64>()
                .map_err(|_| DefaultableError::Config(format!("{} must be whole seconds, got {:?}", ENV_CACHE_TTL, raw)))?;
            if secs > MAX_TTL_SECS {
                return Err(DefaultableError::Config(format!(
                    "{} must be at most {} seconds, got {}",
                    ENV_CACHE_TTL, MAX_TTL_SECS, secs
                )));
            }
            cfg.ttl = Duration::from_secs(secs);
        }
        Ok(cfg)
    }

    pub fn key_deriver(&self) -> CacheKeyDeriver { CacheKeyDeriver::new(self.cache_key.clone()) }
}
