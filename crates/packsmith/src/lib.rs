//! Versioned prompt-pack resolution and instruction composition.
//!
//! `packsmith` turns a draft request ("write the business case section, SCQA
//! framework, for pack PSG") into a ready-to-send system/user message pair.
//! Templates live in a searchable index as versioned, approved documents; the
//! [`Composer`](compose::Composer) picks the right pack and version, fetches
//! the template, orders the caller's evidence by the template's hints and
//! renders the result. Every composition carries a provenance tag
//! (`"PSG@1.0.3"`) naming exactly which template served it.
//!
//! # Getting started
//!
//! ```
//! use packsmith::prelude::*;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> packsmith::error::Result<()> {
//! let index = InMemoryIndex::new().with_record(
//!     IndexRecord::new("PSG", "1.0.3", "business_case", "Write in a {{style}} voice. {{evidence_window}}")
//!         .with_tags(&["business_case"]),
//! );
//! let store = StaticConfig::new().with("PROMPT_PACK_LATEST.PSG", "1.0.3");
//!
//! let composer = Composer::new(ComposerConfig::default(), Arc::new(store), Arc::new(index));
//! let evidence = EvidenceSet::new().with("vendor_quotation", "Quote: $42,000");
//!
//! let request = DraftRequest::new("business_case", "SCQA").with_pack("psg");
//! let out = composer.compose(&request, &evidence).await?;
//!
//! assert_eq!(out.provenance, "PSG@1.0.3");
//! assert_eq!(out.evidence_order, vec!["vendor_quotation"]);
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`compose`] | [`Composer`](compose::Composer), [`DraftRequest`](compose::DraftRequest), [`Composition`](compose::Composition) |
//! | [`pack`] | Pack references and the caching [`PackResolver`](pack::PackResolver) |
//! | [`repository`] | [`TemplateIndex`](repository::TemplateIndex) trait, in-memory and HTTP indexes, the caching [`TemplateRepository`](repository::TemplateRepository) |
//! | [`render`] | Scalar substitution and conditional `{{#labels.key}}` blocks |
//! | [`evidence`] | Label ordering, evidence gathering and the capped evidence window |
//! | [`config`] | [`ComposerConfig`](config::ComposerConfig) and runtime key-value stores |
//! | [`cache`] | [`TtlCache`](cache::TtlCache) with injectable clocks |
//! | [`evaluate`] | Rule-based draft scoring |
//!
//! # Guarantees
//!
//! 1. **Strict versions stay strict.** A request for `pack@1.0.3` is served
//!    by version 1.0.3 or fails with `NotFound`. Only `latest-approved` ever
//!    falls back to "any approved version".
//!
//! 2. **Provenance is the truth.** The provenance tag reflects the document
//!    actually served, not the version that was asked for.
//!
//! 3. **Only approved templates.** Draft and candidate documents are never
//!    composed.
//!
//! 4. **Bounded staleness.** Pack pins and templates are cached for a fixed
//!    TTL and never invalidated early.

pub mod cache;
pub mod compose;
pub mod config;
pub mod error;
pub mod evaluate;
pub mod evidence;
pub mod message;
pub mod pack;
pub mod prelude;
pub mod render;
pub mod repository;

use schemars::JsonSchema;

pub use error::{ComposeError, Result};
pub use message::{Message, MessageRole};

// Re-export schemars for downstream crates.
pub use schemars;

/// Generate a JSON Schema `serde_json::Value` for a type that implements
/// `schemars::JsonSchema`.
///
/// ```
/// use packsmith::json_schema_for;
/// use packsmith::repository::EvidenceHints;
///
/// let schema = json_schema_for::<EvidenceHints>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["properties"]["priority_labels"].is_object());
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_schema_lists_hint_fields() {
        let schema = repository::metadata_schema();
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"]["evidence_hints"].is_object());
        assert!(schema["properties"]["rubric"].is_object() || schema["properties"]["rubric"] == true);
    }
}
