//! Pack references and their resolution to a concrete `(pack, version)`.
//!
//! A reference is written `"<pack>"` (latest approved) or
//! `"<pack>@<version>"`. Pack ids are canonicalised to uppercase because that
//! is how the template index stores them. A `latest-approved` reference is
//! pinned through the config key `PROMPT_PACK_LATEST.<PACK>`; when no pin is
//! set the sentinel is left in place and the
//! [`TemplateRepository`](crate::repository::TemplateRepository) picks any
//! approved version at query time.

use crate::cache::{Clock, SystemClock, TtlCache};
use crate::config::{ConfigClient, DEFAULT_PACK_KEY, latest_pin_key};
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Sentinel version meaning "the newest approved version".
pub const LATEST_APPROVED: &str = "latest-approved";

/// Requested version of a pack.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PackVersion {
    /// Whatever version is currently approved (optionally pinned via config).
    LatestApproved,
    /// Exactly this version; never substituted.
    Exact(String),
}

impl PackVersion {
    /// Parse a version string. Blank input and the sentinel both mean
    /// [`PackVersion::LatestApproved`].
    pub fn parse(version: &str) -> Self {
        let version = version.trim();
        if version.is_empty() || version == LATEST_APPROVED {
            PackVersion::LatestApproved
        } else {
            PackVersion::Exact(version.to_string())
        }
    }

    pub fn is_latest(&self) -> bool {
        matches!(self, PackVersion::LatestApproved)
    }

    pub fn as_str(&self) -> &str {
        match self {
            PackVersion::LatestApproved => LATEST_APPROVED,
            PackVersion::Exact(v) => v,
        }
    }
}

impl fmt::Display for PackVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pack id (uppercase) and the version requested or resolved for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackRef {
    pub pack: String,
    pub version: PackVersion,
}

impl PackRef {
    pub fn new(pack: &str, version: PackVersion) -> Self {
        Self {
            pack: pack.trim().to_uppercase(),
            version,
        }
    }

    /// Parse `"psg"`, `"psg@1.0.3"` or `"psg@latest-approved"`.
    ///
    /// Returns `None` when the pack part is blank.
    ///
    /// ```
    /// use packsmith::pack::{PackRef, PackVersion};
    ///
    /// let r = PackRef::parse("psg@1.0.3").unwrap();
    /// assert_eq!(r.pack, "PSG");
    /// assert_eq!(r.version, PackVersion::Exact("1.0.3".into()));
    ///
    /// assert!(PackRef::parse("edg").unwrap().version.is_latest());
    /// assert!(PackRef::parse("@1.0.0").is_none());
    /// ```
    pub fn parse(reference: &str) -> Option<Self> {
        let (pack, version) = match reference.split_once('@') {
            Some((pack, version)) => (pack, PackVersion::parse(version)),
            None => (reference, PackVersion::LatestApproved),
        };
        if pack.trim().is_empty() {
            return None;
        }
        Some(Self::new(pack, version))
    }
}

impl fmt::Display for PackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.pack, self.version)
    }
}

/// Resolves caller pack hints to a [`PackRef`], caching pin lookups.
pub struct PackResolver {
    config: Arc<ConfigClient>,
    fallback_default: String,
    cache: TtlCache<PackRef, PackRef>,
}

impl PackResolver {
    /// `fallback_default` is used when the config store has no
    /// `PROMPT_PACK_DEFAULT`.
    pub fn new(config: Arc<ConfigClient>, fallback_default: impl Into<String>, ttl: Duration) -> Self {
        Self::with_clock(config, fallback_default, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: Arc<ConfigClient>,
        fallback_default: impl Into<String>,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            fallback_default: fallback_default.into(),
            cache: TtlCache::with_clock(ttl, clock),
        }
    }

    /// Resolve `hint` (or the process-wide default) to a pack and version.
    ///
    /// Never fails: an unavailable config store leaves the version as
    /// [`PackVersion::LatestApproved`]. Concurrent resolutions of the same
    /// pack share one pin lookup.
    pub async fn resolve(&self, hint: Option<&str>) -> PackRef {
        let requested = match hint.and_then(PackRef::parse) {
            Some(requested) => requested,
            None => self.default_ref().await,
        };

        if !requested.version.is_latest() {
            return requested;
        }

        let requested = &requested;
        let pinned = self
            .cache
            .get_or_try_insert_with(requested.clone(), move || async move {
                Ok::<_, Infallible>(self.lookup_pin(requested).await)
            })
            .await;
        match pinned {
            Ok(resolved) => resolved,
            Err(never) => match never {},
        }
    }

    async fn lookup_pin(&self, requested: &PackRef) -> PackRef {
        let key = latest_pin_key(&requested.pack);
        let resolved = match self.config.lookup(&key).await {
            Ok(Some(pin)) => PackRef {
                pack: requested.pack.clone(),
                version: PackVersion::parse(&pin),
            },
            Ok(None) => {
                debug!("[pack] no pin for {}; deferring to index", requested.pack);
                requested.clone()
            }
            Err(e) => {
                warn!("[pack] pin lookup for {} unavailable ({e}); deferring to index", requested.pack);
                requested.clone()
            }
        };
        debug!("[pack] resolved {requested} -> {resolved}");
        resolved
    }

    async fn default_ref(&self) -> PackRef {
        let reference = self
            .config
            .get_or(DEFAULT_PACK_KEY, &self.fallback_default)
            .await;
        PackRef::parse(&reference)
            .unwrap_or_else(|| PackRef::new(&self.fallback_default, PackVersion::LatestApproved))
    }
}

impl fmt::Debug for PackResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackResolver")
            .field("fallback_default", &self.fallback_default)
            .field("cache", &self.cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::config::{ConfigFuture, ConfigStore, StaticConfig};
    use crate::error::ConfigError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStore {
        inner: StaticConfig,
        calls: AtomicUsize,
    }

    impl ConfigStore for CountingStore {
        fn get(&self, key: &str) -> ConfigFuture<'_> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.get(key)
        }
    }

    struct DownStore;

    impl ConfigStore for DownStore {
        fn get(&self, _key: &str) -> ConfigFuture<'_> {
            Box::pin(async { Err(ConfigError::Unavailable("connection refused".into())) })
        }
    }

    fn resolver(store: Arc<dyn ConfigStore>, clock: Arc<ManualClock>) -> PackResolver {
        // Config reads use a short TTL so the resolver cache is what is
        // being measured.
        let config = Arc::new(ConfigClient::with_clock(
            store,
            Duration::from_millis(1),
            Duration::from_secs(1),
            clock.clone(),
        ));
        PackResolver::with_clock(config, "edg", Duration::from_secs(30), clock)
    }

    #[test]
    fn parse_forms() {
        assert_eq!(
            PackRef::parse("psg"),
            Some(PackRef::new("PSG", PackVersion::LatestApproved))
        );
        assert_eq!(
            PackRef::parse(" Psg @ 1.0.3 "),
            Some(PackRef::new("PSG", PackVersion::Exact("1.0.3".into())))
        );
        assert_eq!(
            PackRef::parse("psg@"),
            Some(PackRef::new("PSG", PackVersion::LatestApproved))
        );
        assert_eq!(
            PackRef::parse("psg@latest-approved"),
            Some(PackRef::new("PSG", PackVersion::LatestApproved))
        );
        assert_eq!(PackRef::parse(""), None);
        assert_eq!(PackRef::parse("  @2.0.0"), None);
    }

    #[test]
    fn display_is_provenance_form() {
        let r = PackRef::new("psg", PackVersion::Exact("1.0.3".into()));
        assert_eq!(r.to_string(), "PSG@1.0.3");
        let l = PackRef::new("edg", PackVersion::LatestApproved);
        assert_eq!(l.to_string(), "EDG@latest-approved");
    }

    #[tokio::test]
    async fn exact_version_skips_config() {
        let store = Arc::new(CountingStore {
            inner: StaticConfig::new().with("PROMPT_PACK_LATEST.PSG", "9.9.9"),
            calls: AtomicUsize::new(0),
        });
        let resolver = resolver(store.clone(), Arc::new(ManualClock::new()));
        let r = resolver.resolve(Some("psg@1.0.0")).await;
        assert_eq!(r.version, PackVersion::Exact("1.0.0".into()));
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn latest_uses_pin() {
        let store = Arc::new(CountingStore {
            inner: StaticConfig::new().with("PROMPT_PACK_LATEST.PSG", "1.0.3"),
            calls: AtomicUsize::new(0),
        });
        let resolver = resolver(store, Arc::new(ManualClock::new()));
        let r = resolver.resolve(Some("psg")).await;
        assert_eq!(r.to_string(), "PSG@1.0.3");
    }

    #[tokio::test]
    async fn latest_without_pin_keeps_sentinel() {
        let store = Arc::new(CountingStore {
            inner: StaticConfig::new(),
            calls: AtomicUsize::new(0),
        });
        let resolver = resolver(store, Arc::new(ManualClock::new()));
        let r = resolver.resolve(Some("psg")).await;
        assert!(r.version.is_latest());
        assert_eq!(r.pack, "PSG");
    }

    #[tokio::test]
    async fn config_failure_keeps_sentinel() {
        let resolver = resolver(Arc::new(DownStore), Arc::new(ManualClock::new()));
        let r = resolver.resolve(Some("psg")).await;
        assert_eq!(r, PackRef::new("PSG", PackVersion::LatestApproved));
    }

    #[tokio::test]
    async fn default_pack_from_config_store() {
        let store = Arc::new(CountingStore {
            inner: StaticConfig::new()
                .with("PROMPT_PACK_DEFAULT", "psg")
                .with("PROMPT_PACK_LATEST.PSG", "1.0.1"),
            calls: AtomicUsize::new(0),
        });
        let resolver = resolver(store, Arc::new(ManualClock::new()));
        assert_eq!(resolver.resolve(None).await.to_string(), "PSG@1.0.1");
        assert_eq!(resolver.resolve(Some("  ")).await.to_string(), "PSG@1.0.1");
    }

    #[tokio::test]
    async fn default_pack_falls_back_when_unset() {
        let store = Arc::new(CountingStore {
            inner: StaticConfig::new(),
            calls: AtomicUsize::new(0),
        });
        let resolver = resolver(store, Arc::new(ManualClock::new()));
        assert_eq!(resolver.resolve(None).await.to_string(), "EDG@latest-approved");
    }

    #[tokio::test]
    async fn pin_lookup_cached_for_ttl() {
        let store = Arc::new(CountingStore {
            inner: StaticConfig::new().with("PROMPT_PACK_LATEST.PSG", "1.0.3"),
            calls: AtomicUsize::new(0),
        });
        let clock = Arc::new(ManualClock::new());
        let resolver = resolver(store.clone(), clock.clone());

        resolver.resolve(Some("psg")).await;
        clock.advance(Duration::from_secs(10));
        resolver.resolve(Some("PSG")).await;
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(25));
        store.inner.set("PROMPT_PACK_LATEST.PSG", "1.0.4");
        let r = resolver.resolve(Some("psg")).await;
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
        assert_eq!(r.to_string(), "PSG@1.0.4");
    }

    struct SlowStore {
        inner: StaticConfig,
        calls: AtomicUsize,
    }

    impl ConfigStore for SlowStore {
        fn get(&self, key: &str) -> ConfigFuture<'_> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let key = key.to_string();
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                self.inner.get(&key).await
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_resolves_share_one_pin_lookup() {
        let store = Arc::new(SlowStore {
            inner: StaticConfig::new().with("PROMPT_PACK_LATEST.PSG", "1.0.3"),
            calls: AtomicUsize::new(0),
        });
        let resolver = resolver(store.clone(), Arc::new(ManualClock::new()));

        let (a, b) = tokio::join!(resolver.resolve(Some("psg")), resolver.resolve(Some("PSG")));
        assert_eq!(a.to_string(), "PSG@1.0.3");
        assert_eq!(a, b);
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }
}
