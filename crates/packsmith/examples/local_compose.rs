//! Compose a draft instruction against a local index snapshot.
//!
//! Loads the snapshot, pins the pack through environment variables and
//! prints the composed messages with their provenance.
//!
//! # Usage
//!
//! ```bash
//! PROMPT_PACK_LATEST__PSG=1.0.3 cargo run --example local_compose -- packs.json
//! ```
//!
//! Without a snapshot path a small built-in pack is used.

use packsmith::prelude::*;
use packsmith::repository::EvidenceHints;
use std::sync::Arc;

fn builtin_index() -> InMemoryIndex {
    let metadata = TemplateMetadata {
        evidence_hints: EvidenceHints {
            priority_labels: vec!["vendor_quotation".into()],
            optional_labels: vec!["audited_financials".into()],
        },
        ..Default::default()
    };
    InMemoryIndex::new().with_record(
        IndexRecord::new(
            "PSG",
            "1.0.3",
            "business_case",
            "Write the {{framework}} business case ({{style}}, at most {{length_limit}} words). \
             {{#labels.vendor_quote}}Quote the vendor [source:{{labels.vendor_quote}}].{{/labels.vendor_quote}} \
             Evidence: {{evidence_window}}",
        )
        .with_tags(&["business_case", "psg"])
        .with_metadata(&metadata),
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "packsmith=debug".into()),
        )
        .init();

    // 1. Load the template index.
    let index = match std::env::args().nth(1) {
        Some(path) => InMemoryIndex::load_file(path)?,
        None => builtin_index(),
    };

    // 2. Runtime settings come from the environment.
    let composer = Composer::new(
        ComposerConfig::default().with_default_pack("psg"),
        Arc::new(EnvConfig::new()),
        Arc::new(index),
    );

    // 3. Compose.
    let evidence = EvidenceSet::new()
        .with("vendor_quotation", "Quote Q-17 from Acme Robotics: S$42,000")
        .with("audited_financials", "FY23 revenue S$1.2M, net margin 8%");
    let request = DraftRequest::new("business_case", "SCQA")
        .with_prompt("Emphasise the productivity gain.");
    let out = composer.compose(&request, &evidence).await?;

    // 4. Print.
    for message in &out.messages {
        println!("[{}] {}\n", message.role, message.content);
    }
    println!("--- {} | evidence {:?} ---", out.provenance, out.evidence_order);
    Ok(())
}
