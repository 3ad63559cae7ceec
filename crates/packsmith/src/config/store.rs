//! Key-value configuration stores and the caching client in front of them.

use crate::cache::{Clock, SystemClock, TtlCache};
use crate::error::ConfigError;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Boxed future returned by [`ConfigStore::get`].
pub type ConfigFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Option<String>, ConfigError>> + Send + 'a>>;

/// A remote (or local) key-value configuration source.
///
/// `Ok(None)` means the key is not set. `Err` means the store could not be
/// asked at all; callers fall back to their defaults.
pub trait ConfigStore: Send + Sync {
    fn get(&self, key: &str) -> ConfigFuture<'_>;
}

/// In-memory store, mutable at runtime.
#[derive(Debug, Default)]
pub struct StaticConfig {
    values: RwLock<HashMap<String, String>>,
}

impl StaticConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.remove(key);
    }
}

impl ConfigStore for StaticConfig {
    fn get(&self, key: &str) -> ConfigFuture<'_> {
        let value = self
            .values
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned();
        Box::pin(async move { Ok(value) })
    }
}

/// Store backed by process environment variables.
///
/// Dots in keys are not valid in most shells, so `PROMPT_PACK_LATEST.PSG` is
/// read from `PROMPT_PACK_LATEST__PSG` (with the optional prefix in front).
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    prefix: String,
}

impl EnvConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every key as `<prefix><KEY>`.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Environment variable name for `key`.
    pub fn var_name(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.replace('.', "__"))
    }
}

impl ConfigStore for EnvConfig {
    fn get(&self, key: &str) -> ConfigFuture<'_> {
        let value = std::env::var(self.var_name(key)).ok();
        Box::pin(async move { Ok(value) })
    }
}

/// Caching, time-bounded front for a [`ConfigStore`].
///
/// Every read is cached for the configured TTL, including reads that failed:
/// a failing store is asked at most once per key per TTL window and callers
/// see the key as unset in between. Concurrent reads of one key share a
/// single store call.
pub struct ConfigClient {
    store: Arc<dyn ConfigStore>,
    cache: TtlCache<String, Option<String>>,
    timeout: Duration,
}

impl ConfigClient {
    pub fn new(store: Arc<dyn ConfigStore>, ttl: Duration, timeout: Duration) -> Self {
        Self::with_clock(store, ttl, timeout, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn ConfigStore>,
        ttl: Duration,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            cache: TtlCache::with_clock(ttl, clock),
            timeout,
        }
    }

    /// Read `key`, consulting the cache first.
    ///
    /// Returns `Err` only on the read that actually failed; the failure is
    /// cached as "unset" for the rest of the TTL window.
    pub async fn lookup(&self, key: &str) -> Result<Option<String>, ConfigError> {
        self.cache
            .get_or_try_insert_with(key.to_string(), move || self.read(key))
            .await
    }

    async fn read(&self, key: &str) -> Result<Option<String>, ConfigError> {
        let result = match tokio::time::timeout(self.timeout, self.store.get(key)).await {
            Ok(result) => result,
            Err(_) => Err(ConfigError::Timeout(self.timeout)),
        };

        match result {
            Ok(value) => {
                let value = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
                debug!("[config] key={key} set={}", value.is_some());
                Ok(value)
            }
            Err(e) => {
                warn!("[config] lookup failed key={key}: {e}");
                self.cache.insert(key.to_string(), None);
                Err(e)
            }
        }
    }

    /// Read `key`, falling back to `default` when it is unset or the store
    /// is unavailable.
    pub async fn get_or(&self, key: &str, default: &str) -> String {
        match self.lookup(key).await {
            Ok(Some(value)) => value,
            Ok(None) | Err(_) => default.to_string(),
        }
    }

    /// Read `key` as a flag. `1`, `true`, `yes` and `on` (any case) are true.
    pub async fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.lookup(key).await {
            Ok(Some(value)) => matches!(
                value.to_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            ),
            Ok(None) | Err(_) => default,
        }
    }
}

impl fmt::Debug for ConfigClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigClient")
            .field("cache", &self.cache)
            .field("timeout", &self.timeout)
            .finish()
    }
}
