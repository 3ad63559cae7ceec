//! Composer settings and the remote key-value configuration layer.
//!
//! [`ComposerConfig`] holds the static settings a [`Composer`](crate::compose::Composer)
//! is built with. Values that operators change at runtime (the default pack,
//! per-pack "latest approved" pins, the evidence character cap) live in a
//! [`ConfigStore`] and are read through a caching [`ConfigClient`].
//!
//! # Examples
//!
//! ```
//! use packsmith::config::ComposerConfig;
//! use std::time::Duration;
//!
//! let config = ComposerConfig::default()
//!     .with_default_pack("psg")
//!     .with_cache_ttl(Duration::from_secs(60))
//!     .with_evidence_char_cap(4000);
//!
//! assert_eq!(config.default_pack, "psg");
//! assert_eq!(config.cache_ttl(), Duration::from_secs(60));
//! ```

pub mod store;

pub use store::{ConfigClient, ConfigFuture, ConfigStore, EnvConfig, StaticConfig};

use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Config key holding the process-wide default pack reference.
pub const DEFAULT_PACK_KEY: &str = "PROMPT_PACK_DEFAULT";

/// Prefix of the per-pack "latest approved" pin keys (`PROMPT_PACK_LATEST.<PACK>`).
pub const LATEST_PIN_PREFIX: &str = "PROMPT_PACK_LATEST";

/// Config key overriding the evidence window character cap.
pub const EVIDENCE_CHAR_CAP_KEY: &str = "EVIDENCE_CHAR_CAP";

/// Key of the "latest approved" pin for `pack` (already uppercased).
pub fn latest_pin_key(pack: &str) -> String {
    format!("{LATEST_PIN_PREFIX}.{pack}")
}

/// Default system message sent ahead of every rendered instruction.
pub const DEFAULT_SYSTEM_MESSAGE: &str = "You are a grant consultant. Use only the provided evidence; \
     cite factual claims with [source:<label>].";

/// Settings for a [`Composer`](crate::compose::Composer).
///
/// Construct with [`ComposerConfig::default()`] and chain `with_*` methods, or
/// deserialize from JSON; missing fields keep their defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ComposerConfig {
    /// Pack reference used when neither the request nor the config store
    /// names one. Default: `"edg"`.
    pub default_pack: String,
    /// Lifetime of pack-resolution and template cache entries, in
    /// milliseconds. Default: 30000.
    pub cache_ttl_ms: u64,
    /// Lifetime of cached config-store reads, in milliseconds. Default: 30000.
    pub config_ttl_ms: u64,
    /// Upper bound on any single remote query, in milliseconds. Default: 10000.
    pub query_timeout_ms: u64,
    /// How many ranked candidates the primary query asks for. Default: 3.
    pub primary_top: usize,
    /// Evidence window cap in characters when the config store has no
    /// `EVIDENCE_CHAR_CAP`. Default: 6000.
    pub evidence_char_cap: usize,
    /// Style used when the request carries none.
    pub default_style: String,
    /// Tone used when the request carries none.
    pub default_tone: String,
    /// Length cap (words) used when the request carries none. Default: 350.
    pub default_length_limit: u32,
    /// System message preceding the rendered instruction.
    pub system_message: String,
    /// Template-facing alias -> evidence label. An alias is bound only when
    /// its target label is among the selected evidence.
    pub label_aliases: BTreeMap<String, String>,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            default_pack: "edg".to_string(),
            cache_ttl_ms: 30_000,
            config_ttl_ms: 30_000,
            query_timeout_ms: 10_000,
            primary_top: 3,
            evidence_char_cap: 6000,
            default_style: "Formal, consultant voice".to_string(),
            default_tone: "Neutral".to_string(),
            default_length_limit: 350,
            system_message: DEFAULT_SYSTEM_MESSAGE.to_string(),
            label_aliases: default_label_aliases(),
        }
    }
}

impl ComposerConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn config_ttl(&self) -> Duration {
        Duration::from_millis(self.config_ttl_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Set the fallback default pack reference.
    pub fn with_default_pack(mut self, pack: impl Into<String>) -> Self {
        self.default_pack = pack.into();
        self
    }

    /// Set the TTL of the pack and template caches.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_ms = saturating_millis(ttl);
        self
    }

    /// Set the TTL of cached config reads.
    pub fn with_config_ttl(mut self, ttl: Duration) -> Self {
        self.config_ttl_ms = saturating_millis(ttl);
        self
    }

    /// Set the per-query timeout.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout_ms = saturating_millis(timeout);
        self
    }

    /// Set the fallback evidence character cap.
    pub fn with_evidence_char_cap(mut self, cap: usize) -> Self {
        self.evidence_char_cap = cap;
        self
    }

    /// Set the style and tone used when a request carries none.
    pub fn with_voice(mut self, style: impl Into<String>, tone: impl Into<String>) -> Self {
        self.default_style = style.into();
        self.default_tone = tone.into();
        self
    }

    /// Replace the system message.
    pub fn with_system_message(mut self, message: impl Into<String>) -> Self {
        self.system_message = message.into();
        self
    }

    /// Add or replace a single label alias.
    pub fn with_label_alias(mut self, alias: impl Into<String>, label: impl Into<String>) -> Self {
        self.label_aliases.insert(alias.into(), label.into());
        self
    }
}

fn default_label_aliases() -> BTreeMap<String, String> {
    [
        ("registry", "acra_bizfile"),
        ("financials", "audited_financials"),
        ("vendor_quote", "vendor_quotation"),
        ("costs", "cost_breakdown"),
        ("deployment_proof", "deployment_location_proof"),
        ("annex3_package", "annex3_package"),
        ("market_analysis", "market_analysis"),
        ("consultant_proposal", "consultant_proposal"),
    ]
    .into_iter()
    .map(|(alias, label)| (alias.to_string(), label.to_string()))
    .collect()
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ComposerConfig::default();
        assert_eq!(config.default_pack, "edg");
        assert_eq!(config.cache_ttl(), Duration::from_secs(30));
        assert_eq!(config.config_ttl(), Duration::from_secs(30));
        assert_eq!(config.query_timeout(), Duration::from_secs(10));
        assert_eq!(config.evidence_char_cap, 6000);
        assert_eq!(config.default_length_limit, 350);
        assert_eq!(config.default_tone, "Neutral");
        assert_eq!(
            config.label_aliases.get("financials").map(String::as_str),
            Some("audited_financials")
        );
    }

    #[test]
    fn deserialize_partial_keeps_defaults() {
        let config: ComposerConfig =
            serde_json::from_str(r#"{"default_pack": "psg", "cache_ttl_ms": 5000}"#).unwrap();
        assert_eq!(config.default_pack, "psg");
        assert_eq!(config.cache_ttl(), Duration::from_secs(5));
        assert_eq!(config.primary_top, 3);
        assert!(config.system_message.contains("[source:<label>]"));
    }

    #[test]
    fn builder_methods() {
        let config = ComposerConfig::default()
            .with_query_timeout(Duration::from_millis(250))
            .with_label_alias("quote", "vendor_quotation")
            .with_system_message("Be brief.");
        assert_eq!(config.query_timeout(), Duration::from_millis(250));
        assert_eq!(config.label_aliases["quote"], "vendor_quotation");
        assert_eq!(config.system_message, "Be brief.");
    }

    #[test]
    fn sub_second_durations_survive_builders() {
        let config = ComposerConfig::default()
            .with_cache_ttl(Duration::from_millis(500))
            .with_config_ttl(Duration::from_millis(1500))
            .with_query_timeout(Duration::MAX);
        assert_eq!(config.cache_ttl(), Duration::from_millis(500));
        assert_eq!(config.config_ttl(), Duration::from_millis(1500));
        assert_eq!(config.query_timeout_ms, u64::MAX);
    }

    #[test]
    fn pin_key_format() {
        assert_eq!(latest_pin_key("PSG"), "PROMPT_PACK_LATEST.PSG");
    }
}
