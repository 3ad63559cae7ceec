//! Template documents as stored in the index and as served to the composer.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use tracing::warn;

/// Publication status of a template document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Draft,
    Candidate,
    #[default]
    Approved,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Draft => "draft",
            ApprovalStatus::Candidate => "candidate",
            ApprovalStatus::Approved => "approved",
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evidence labels a template asks for, most important first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EvidenceHints {
    pub priority_labels: Vec<String>,
    pub optional_labels: Vec<String>,
}

/// Per-template metadata carried in the index record's `metadata_json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TemplateMetadata {
    pub pack_id: Option<String>,
    pub version: Option<String>,
    pub section_id: Option<String>,
    pub evidence_hints: EvidenceHints,
    /// Scoring rubric; opaque to the composer.
    pub rubric: serde_json::Value,
}

static METADATA_VALIDATOR: LazyLock<Option<jsonschema::Validator>> =
    LazyLock::new(|| jsonschema::validator_for(&metadata_schema()).ok());

/// JSON Schema of [`TemplateMetadata`].
pub fn metadata_schema() -> serde_json::Value {
    crate::json_schema_for::<TemplateMetadata>()
}

/// Check a metadata blob against [`metadata_schema`].
///
/// Returns one line per violation; empty when the blob is valid.
pub fn validate_metadata(metadata: &serde_json::Value) -> Vec<String> {
    let Some(validator) = METADATA_VALIDATOR.as_ref() else {
        return Vec::new();
    };
    validator
        .iter_errors(metadata)
        .map(|e| format!("{}: {e}", e.instance_path()))
        .collect()
}

/// A template document as the index stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    #[serde(default)]
    pub id: String,
    pub pack_id: String,
    pub version: String,
    pub section_id: String,
    #[serde(default)]
    pub template_key: Option<String>,
    #[serde(default)]
    pub status: ApprovalStatus,
    /// Free-form tags the index ranks against.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub template_text: String,
    #[serde(default)]
    pub metadata_json: String,
    #[serde(default)]
    pub indexed_at: Option<DateTime<Utc>>,
}

impl IndexRecord {
    /// Record with the given identity, approved, with empty metadata.
    pub fn new(pack_id: &str, version: &str, section_id: &str, template_text: &str) -> Self {
        Self {
            id: format!("{pack_id}:{version}:{section_id}"),
            pack_id: pack_id.to_string(),
            version: version.to_string(),
            section_id: section_id.to_string(),
            template_key: None,
            status: ApprovalStatus::Approved,
            tags: Vec::new(),
            template_text: template_text.to_string(),
            metadata_json: String::new(),
            indexed_at: None,
        }
    }

    pub fn with_status(mut self, status: ApprovalStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_template_key(mut self, key: impl Into<String>) -> Self {
        self.template_key = Some(key.into());
        self
    }

    pub fn with_metadata(mut self, metadata: &TemplateMetadata) -> Self {
        self.metadata_json = serde_json::to_string(metadata).unwrap_or_default();
        self
    }
}

/// A template resolved for composition.
///
/// `pack_id` and `version` are the document's own, taken from its metadata
/// (falling back to the record's identity fields), never the caller's request.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateDocument {
    pub pack_id: String,
    pub version: String,
    pub section_id: String,
    pub template_key: Option<String>,
    pub status: ApprovalStatus,
    pub tags: Vec<String>,
    pub template: String,
    pub metadata: TemplateMetadata,
    pub indexed_at: Option<DateTime<Utc>>,
}

impl TemplateDocument {
    /// Build from an index record, tolerating missing or malformed metadata.
    pub fn from_record(record: IndexRecord) -> Self {
        let metadata = parse_metadata(&record);

        let pack_id = metadata
            .pack_id
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| record.pack_id.clone());
        let version = metadata
            .version
            .clone()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| record.version.clone());

        Self {
            pack_id,
            version,
            section_id: record.section_id,
            template_key: record.template_key,
            status: record.status,
            tags: record.tags,
            template: record.template_text,
            metadata,
            indexed_at: record.indexed_at,
        }
    }

    /// `"<PACK>@<version>"` of the template actually served.
    pub fn provenance(&self) -> String {
        format!("{}@{}", self.pack_id, self.version)
    }

    pub fn evidence_hints(&self) -> &EvidenceHints {
        &self.metadata.evidence_hints
    }
}

fn parse_metadata(record: &IndexRecord) -> TemplateMetadata {
    if record.metadata_json.trim().is_empty() {
        return TemplateMetadata::default();
    }
    let value: serde_json::Value = match serde_json::from_str(&record.metadata_json) {
        Ok(v) => v,
        Err(e) => {
            warn!("[vault] record {} has unparseable metadata: {e}", record.id);
            return TemplateMetadata::default();
        }
    };

    let violations = validate_metadata(&value);
    if !violations.is_empty() {
        warn!(
            "[vault] record {} metadata does not match schema: {}",
            record.id,
            violations.join("; ")
        );
    }

    serde_json::from_value(value).unwrap_or_else(|e| {
        warn!("[vault] record {} metadata ignored: {e}", record.id);
        TemplateMetadata::default()
    })
}
