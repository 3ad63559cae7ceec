//! Draft composition: pack resolution, template retrieval, evidence ordering
//! and rendering, wired together.
//!
//! A [`Composer`] owns one [`PackResolver`] and one [`TemplateRepository`],
//! both with their own TTL caches, and is meant to be shared across requests
//! (`Arc<Composer>`). [`Composer::compose`] is the single entry point:
//!
//! 1. Resolve the request's pack hint (or the default pack) to a
//!    [`PackRef`].
//! 2. Fetch the approved template for the section, ranked by tags built from
//!    the section, framework, pack, caller tags and variant tokens.
//! 3. Order the available evidence labels by the template's hints and the
//!    caller's explicit list.
//! 4. Build the capped evidence window and render the template.
//! 5. Return a system/user message pair, the provenance tag of the template
//!    actually served and the evidence order used.

use crate::cache::{Clock, SystemClock};
use crate::config::{ComposerConfig, ConfigClient, ConfigStore, EVIDENCE_CHAR_CAP_KEY};
use crate::error::Result;
use crate::evidence::{EvidenceSet, EvidenceSource, order_labels};
use crate::message::Message;
use crate::pack::{PackRef, PackResolver};
use crate::render::{LabelBindings, render};
use crate::repository::{TemplateDocument, TemplateIndex, TemplateRepository};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Prefix placed in front of a non-empty operator prompt.
pub const OPERATOR_PROMPT_PREFIX: &str = "Operator prompt (must be addressed explicitly): ";

/// Caller-supplied inputs for one draft.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DraftInputs {
    pub style: Option<String>,
    pub tone: Option<String>,
    /// Length cap in words.
    pub length_limit: Option<u32>,
    /// Free-text operator prompt.
    pub prompt: Option<String>,
    /// Extra retrieval tags.
    pub tags: Vec<String>,
    /// Evidence labels the caller wants cited, in preference order.
    pub evidence_labels: Vec<String>,
    /// Extra scalar variables. Built-in names take precedence.
    pub variables: BTreeMap<String, String>,
}

/// A request to compose the instruction for one section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DraftRequest {
    pub section_id: String,
    pub framework: String,
    pub variant: Option<String>,
    /// `"pack"` or `"pack@version"`; `None` uses the default pack.
    pub pack_hint: Option<String>,
    pub inputs: DraftInputs,
}

impl DraftRequest {
    pub fn new(section_id: impl Into<String>, framework: impl Into<String>) -> Self {
        Self {
            section_id: section_id.into(),
            framework: framework.into(),
            ..Default::default()
        }
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    pub fn with_pack(mut self, hint: impl Into<String>) -> Self {
        self.pack_hint = Some(hint.into());
        self
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.inputs.style = Some(style.into());
        self
    }

    pub fn with_tone(mut self, tone: impl Into<String>) -> Self {
        self.inputs.tone = Some(tone.into());
        self
    }

    pub fn with_length_limit(mut self, words: u32) -> Self {
        self.inputs.length_limit = Some(words);
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.inputs.prompt = Some(prompt.into());
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.inputs.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_evidence_labels(mut self, labels: &[&str]) -> Self {
        self.inputs.evidence_labels = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inputs.variables.insert(name.into(), value.into());
        self
    }

    /// Retrieval tags: section, framework, pack, caller tags, then variant
    /// tokens.
    pub fn retrieval_tags(&self, pack: &PackRef) -> Vec<String> {
        let mut tags = vec![
            self.section_id.clone(),
            self.framework.to_lowercase(),
            pack.pack.to_lowercase(),
        ];
        tags.extend(self.inputs.tags.iter().cloned());
        if let Some(variant) = &self.variant {
            tags.extend(variant_tokens(variant));
        }
        tags.retain(|t| !t.trim().is_empty());
        tags
    }

    fn prompt(&self) -> &str {
        self.inputs.prompt.as_deref().map_or("", str::trim)
    }
}

/// Split a variant id on `.`, `__` and whitespace.
fn variant_tokens(variant: &str) -> Vec<String> {
    variant
        .replace("__", " ")
        .replace('.', " ")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// The result of one composition.
#[derive(Debug, Clone)]
pub struct Composition {
    /// System message followed by the rendered user instruction.
    pub messages: Vec<Message>,
    /// `"<PACK>@<version>"` of the template actually served.
    pub provenance: String,
    /// Evidence labels in the order they were presented.
    pub evidence_order: Vec<String>,
    /// The pack reference the request resolved to.
    pub pack: PackRef,
    pub document: Arc<TemplateDocument>,
}

impl Composition {
    /// The rendered user instruction.
    pub fn instruction(&self) -> &str {
        self.messages.last().map_or("", |m| m.content.as_str())
    }
}

/// Composes draft instructions from versioned prompt packs.
pub struct Composer {
    config: ComposerConfig,
    settings: Arc<ConfigClient>,
    resolver: PackResolver,
    repository: TemplateRepository,
}

impl Composer {
    pub fn new(
        config: ComposerConfig,
        store: Arc<dyn ConfigStore>,
        index: Arc<dyn TemplateIndex>,
    ) -> Self {
        Self::with_clock(config, store, index, Arc::new(SystemClock))
    }

    /// Like [`new`](Self::new), with every cache driven by `clock`.
    pub fn with_clock(
        config: ComposerConfig,
        store: Arc<dyn ConfigStore>,
        index: Arc<dyn TemplateIndex>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let settings = Arc::new(ConfigClient::with_clock(
            store,
            config.config_ttl(),
            config.query_timeout(),
            clock.clone(),
        ));
        let resolver = PackResolver::with_clock(
            settings.clone(),
            config.default_pack.clone(),
            config.cache_ttl(),
            clock.clone(),
        );
        let repository =
            TemplateRepository::with_clock(index, config.cache_ttl(), config.query_timeout(), clock)
                .with_primary_top(config.primary_top);
        Self {
            config,
            settings,
            resolver,
            repository,
        }
    }

    pub fn config(&self) -> &ComposerConfig {
        &self.config
    }

    /// Compose the instruction for `request` against evidence the caller has
    /// already loaded.
    ///
    /// Fails only with [`ComposeError::NotFound`](crate::error::ComposeError::NotFound)
    /// or an index error; config and evidence problems fall back to defaults.
    pub async fn compose(&self, request: &DraftRequest, evidence: &EvidenceSet) -> Result<Composition> {
        let (pack, document) = self.locate(request).await?;
        let cap = self.evidence_char_cap().await;
        Ok(self.assemble(request, pack, document, evidence, cap))
    }

    /// Compose after fetching evidence for `session_id` from `source`.
    ///
    /// Fetches the template's priority and optional labels plus the request's
    /// explicit labels. Each label fetch is bounded by the query timeout and a
    /// label that times out is left out.
    pub async fn compose_for_session(
        &self,
        request: &DraftRequest,
        source: &dyn EvidenceSource,
        session_id: &str,
    ) -> Result<Composition> {
        let (pack, document) = self.locate(request).await?;
        let cap = self.evidence_char_cap().await;

        let hints = document.evidence_hints();
        let wanted: Vec<String> = hints
            .priority_labels
            .iter()
            .chain(&hints.optional_labels)
            .chain(&request.inputs.evidence_labels)
            .cloned()
            .collect();
        let evidence = EvidenceSet::gather(source, session_id, &wanted, cap, self.config.query_timeout()).await;
        debug!(
            "[compose] session={session_id} gathered {}/{} label(s)",
            evidence.len(),
            wanted.len()
        );

        Ok(self.assemble(request, pack, document, &evidence, cap))
    }

    async fn locate(&self, request: &DraftRequest) -> Result<(PackRef, Arc<TemplateDocument>)> {
        let pack = self.resolver.resolve(request.pack_hint.as_deref()).await;
        let tags = request.retrieval_tags(&pack);
        let document = self
            .repository
            .fetch(&pack, &request.section_id, request.variant.as_deref(), &tags)
            .await?;
        Ok((pack, document))
    }

    /// Runtime `EVIDENCE_CHAR_CAP` if it is a plain non-negative integer,
    /// otherwise the configured cap.
    async fn evidence_char_cap(&self) -> usize {
        match self.settings.lookup(EVIDENCE_CHAR_CAP_KEY).await {
            Ok(Some(value)) if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) => {
                value.parse().unwrap_or(self.config.evidence_char_cap)
            }
            _ => self.config.evidence_char_cap,
        }
    }

    fn assemble(
        &self,
        request: &DraftRequest,
        pack: PackRef,
        document: Arc<TemplateDocument>,
        evidence: &EvidenceSet,
        cap: usize,
    ) -> Composition {
        let hints = document.evidence_hints();
        let order = order_labels(
            &evidence.labels(),
            &hints.priority_labels,
            &hints.optional_labels,
            &request.inputs.evidence_labels,
        );
        let labels = self.bind_labels(&order);
        let window = evidence.window(&order, cap);
        let scalars = self.scalars(request, window);

        let rendered = render(&document.template, &scalars, &labels);
        let prompt = request.prompt();
        let instruction = if prompt.is_empty() {
            rendered
        } else {
            format!("{OPERATOR_PROMPT_PREFIX}{prompt}\n\n{rendered}")
        };

        let provenance = document.provenance();
        info!(
            "[compose] section={} requested={pack} served={provenance} evidence={order:?}",
            request.section_id
        );

        Composition {
            messages: vec![
                Message::system(&self.config.system_message),
                Message::user(instruction),
            ],
            provenance,
            evidence_order: order,
            pack,
            document,
        }
    }

    /// Each ordered label bound to itself, plus every alias whose target is
    /// among them.
    fn bind_labels(&self, order: &[String]) -> LabelBindings {
        let mut labels = LabelBindings::new();
        for label in order {
            labels.mark_present(label.clone());
        }
        for (alias, target) in &self.config.label_aliases {
            if !labels.contains(alias) && order.iter().any(|l| l == target) {
                labels.bind(alias.clone(), target.clone());
            }
        }
        labels
    }

    fn scalars(&self, request: &DraftRequest, evidence_window: String) -> BTreeMap<String, String> {
        let inputs = &request.inputs;
        let mut scalars = inputs.variables.clone();
        let builtins = [
            ("framework", request.framework.clone()),
            (
                "style",
                inputs.style.clone().unwrap_or_else(|| self.config.default_style.clone()),
            ),
            (
                "tone",
                inputs.tone.clone().unwrap_or_else(|| self.config.default_tone.clone()),
            ),
            (
                "length_limit",
                inputs
                    .length_limit
                    .unwrap_or(self.config.default_length_limit)
                    .to_string(),
            ),
            ("evidence_window", evidence_window),
            ("user_prompt", request.prompt().to_string()),
            ("section_id", request.section_id.clone()),
        ];
        for (name, value) in builtins {
            scalars.insert(name.to_string(), value);
        }
        scalars
    }
}

impl std::fmt::Debug for Composer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Composer")
            .field("config", &self.config)
            .field("resolver", &self.resolver)
            .field("repository", &self.repository)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticConfig;
    use crate::pack::PackVersion;
    use crate::repository::{EvidenceHints, InMemoryIndex, IndexRecord, TemplateMetadata};

    fn metadata(priority: &[&str], optional: &[&str]) -> TemplateMetadata {
        TemplateMetadata {
            evidence_hints: EvidenceHints {
                priority_labels: priority.iter().map(|s| s.to_string()).collect(),
                optional_labels: optional.iter().map(|s| s.to_string()).collect(),
            },
            ..Default::default()
        }
    }

    fn composer(index: InMemoryIndex, store: StaticConfig) -> Composer {
        Composer::new(ComposerConfig::default(), Arc::new(store), Arc::new(index))
    }

    #[test]
    fn variant_tokens_split() {
        assert_eq!(
            variant_tokens("psg.business_case__short v2"),
            vec!["psg", "business_case", "short", "v2"]
        );
    }

    #[test]
    fn retrieval_tags_order() {
        let request = DraftRequest::new("business_case", "SCQA")
            .with_variant("bc.short")
            .with_tags(&["fintech"]);
        let pack = PackRef::new("psg", PackVersion::LatestApproved);
        assert_eq!(
            request.retrieval_tags(&pack),
            vec!["business_case", "scqa", "psg", "fintech", "bc", "short"]
        );
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let request: DraftRequest = serde_json::from_value(serde_json::json!({
            "section_id": "scope",
            "framework": "SCQA",
            "inputs": {"length_limit": 200, "evidence_labels": ["a"]}
        }))
        .unwrap();
        assert_eq!(request.inputs.length_limit, Some(200));
        assert_eq!(request.pack_hint, None);
        assert!(request.inputs.tags.is_empty());
    }

    #[tokio::test]
    async fn renders_scalars_and_defaults() {
        let index = InMemoryIndex::new().with_record(
            IndexRecord::new("EDG", "1.0.0", "scope", "{{framework}} | {{style}} | {{tone}} | {{length_limit}} | {{section_id}}")
                .with_tags(&["scope"]),
        );
        let composer = composer(index, StaticConfig::new());
        let out = composer
            .compose(&DraftRequest::new("scope", "SCQA"), &EvidenceSet::new())
            .await
            .unwrap();
        assert_eq!(out.instruction(), "SCQA | Formal, consultant voice | Neutral | 350 | scope");
        assert_eq!(out.provenance, "EDG@1.0.0");
        assert_eq!(out.messages.len(), 2);
        assert!(out.messages[0].content.contains("[source:<label>]"));
    }

    #[tokio::test]
    async fn builtins_win_over_extra_variables() {
        let index = InMemoryIndex::new().with_record(
            IndexRecord::new("EDG", "1.0.0", "scope", "{{client}} {{style}}").with_tags(&["scope"]),
        );
        let composer = composer(index, StaticConfig::new());
        let request = DraftRequest::new("scope", "SCQA")
            .with_style("terse")
            .with_variable("client", "Acme")
            .with_variable("style", "ignored");
        let out = composer.compose(&request, &EvidenceSet::new()).await.unwrap();
        assert_eq!(out.instruction(), "Acme terse");
    }

    #[tokio::test]
    async fn operator_prompt_prefixed() {
        let index = InMemoryIndex::new()
            .with_record(IndexRecord::new("EDG", "1.0.0", "scope", "Body.").with_tags(&["scope"]));
        let composer = composer(index, StaticConfig::new());
        let request = DraftRequest::new("scope", "SCQA").with_prompt("  Mention the pilot.  ");
        let out = composer.compose(&request, &EvidenceSet::new()).await.unwrap();
        assert_eq!(
            out.instruction(),
            "Operator prompt (must be addressed explicitly): Mention the pilot.\n\nBody."
        );
    }

    #[tokio::test]
    async fn aliases_bound_only_for_present_targets() {
        let template = "{{#labels.vendor_quote}}Q[{{labels.vendor_quote}}]{{/labels.vendor_quote}} \
                        {{#labels.financials}}F{{/labels.financials}}";
        let index = InMemoryIndex::new()
            .with_record(IndexRecord::new("PSG", "1.0.0", "scope", template).with_tags(&["scope"]));
        let composer = composer(index, StaticConfig::new());
        let evidence = EvidenceSet::new().with("vendor_quotation", "Quote #12");
        let out = composer
            .compose(&DraftRequest::new("scope", "SCQA").with_pack("psg@1.0.0"), &evidence)
            .await
            .unwrap();
        assert_eq!(out.instruction(), "Q[vendor_quotation]");
    }

    #[tokio::test]
    async fn runtime_cap_overrides_config() {
        let index = InMemoryIndex::new().with_record(
            IndexRecord::new("EDG", "1.0.0", "scope", "{{evidence_window}}").with_tags(&["scope"]),
        );
        let store = StaticConfig::new().with(EVIDENCE_CHAR_CAP_KEY, "30");
        let composer = composer(index, store);
        let evidence = EvidenceSet::new().with("fin", "x".repeat(500));
        let out = composer
            .compose(&DraftRequest::new("scope", "SCQA"), &evidence)
            .await
            .unwrap();
        // Whitespace normalization trims the header's leading newlines.
        let window = evidence.window(&["fin".to_string()], 30);
        assert_eq!(out.instruction(), crate::render::normalize_whitespace(&window));
        assert!(out.instruction().chars().count() <= 30);
    }

    #[tokio::test]
    async fn non_numeric_cap_ignored() {
        let index = InMemoryIndex::new().with_record(
            IndexRecord::new("EDG", "1.0.0", "scope", "{{evidence_window}}").with_tags(&["scope"]),
        );
        let store = StaticConfig::new().with(EVIDENCE_CHAR_CAP_KEY, "-5");
        let composer = composer(index, store);
        let evidence = EvidenceSet::new().with("fin", "y".repeat(100));
        let out = composer
            .compose(&DraftRequest::new("scope", "SCQA"), &evidence)
            .await
            .unwrap();
        assert!(out.instruction().ends_with(&"y".repeat(100)));
    }

    #[tokio::test]
    async fn session_gathers_hinted_and_explicit_labels() {
        let record = IndexRecord::new("PSG", "1.0.0", "scope", "{{#labels.acra_bizfile}}R{{/labels.acra_bizfile}}")
            .with_tags(&["scope"])
            .with_metadata(&metadata(&["acra_bizfile"], &["market_analysis"]));
        let composer = composer(InMemoryIndex::new().with_record(record), StaticConfig::new());
        let source = crate::evidence::MemoryEvidence::new()
            .with("s1", "acra_bizfile", "UEN 2019")
            .with("s1", "vendor_quotation", "Quote")
            .with("s1", "unrequested", "never fetched");
        let request = DraftRequest::new("scope", "SCQA")
            .with_pack("psg")
            .with_evidence_labels(&["vendor_quotation"]);
        let out = composer.compose_for_session(&request, &source, "s1").await.unwrap();
        assert_eq!(out.evidence_order, vec!["acra_bizfile", "vendor_quotation"]);
        assert_eq!(out.instruction(), "R");
    }

    struct HangingEvidence;

    impl EvidenceSource for HangingEvidence {
        fn fetch(&self, _session_id: &str, _label: &str) -> crate::evidence::EvidenceFuture<'_> {
            Box::pin(async {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                Some("late".to_string())
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hung_evidence_source_bounded_by_query_timeout() {
        let record = IndexRecord::new("PSG", "1.0.0", "scope", "{{#labels.acra_bizfile}}R{{/labels.acra_bizfile}}done")
            .with_tags(&["scope"])
            .with_metadata(&metadata(&["acra_bizfile"], &[]));
        let config = ComposerConfig::default().with_query_timeout(std::time::Duration::from_secs(1));
        let composer = Composer::new(
            config,
            Arc::new(StaticConfig::new()),
            Arc::new(InMemoryIndex::new().with_record(record)),
        );
        let request = DraftRequest::new("scope", "SCQA").with_pack("psg");

        let started = tokio::time::Instant::now();
        let out = composer
            .compose_for_session(&request, &HangingEvidence, "s1")
            .await
            .unwrap();
        assert!(out.evidence_order.is_empty());
        assert_eq!(out.instruction(), "done");
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }
}
