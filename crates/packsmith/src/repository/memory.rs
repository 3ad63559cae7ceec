//! In-process template index.
//!
//! Applies the same structured filter a remote index would and ranks by token
//! overlap between the search text and each record's tags, section id and
//! template key. Useful for tests and for serving a local snapshot of the
//! published packs.

use super::document::{IndexRecord, validate_metadata};
use super::{IndexFuture, IndexQuery, TemplateIndex};
use crate::error::LoadError;
use std::collections::HashSet;
use std::path::Path;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

#[derive(Debug, Default)]
pub struct InMemoryIndex {
    records: RwLock<Vec<IndexRecord>>,
    queries: AtomicUsize,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(self, record: IndexRecord) -> Self {
        self.insert(record);
        self
    }

    /// Add a record. A record with the same id replaces the old one.
    pub fn insert(&self, record: IndexRecord) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.retain(|r| r.id.is_empty() || r.id != record.id);
        records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of searches served so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }

    /// Parse a snapshot: either a JSON array of records or an object with a
    /// `value` array (the search-service response shape).
    ///
    /// Records with an empty identity or with metadata that fails schema
    /// validation are rejected.
    pub fn from_json_str(json: &str) -> Result<Self, LoadError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let records = match value {
            serde_json::Value::Object(mut obj) => obj
                .remove("value")
                .unwrap_or(serde_json::Value::Array(Vec::new())),
            other => other,
        };
        let records: Vec<IndexRecord> = serde_json::from_value(records)?;

        let index = Self::new();
        for record in records {
            check_record(&record)?;
            index.insert(record);
        }
        debug!("[vault] loaded {} record(s) into memory index", index.len());
        Ok(index)
    }

    /// Load a snapshot file. See [`from_json_str`](Self::from_json_str).
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    fn search_sync(&self, query: &IndexQuery) -> Vec<IndexRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let matching = records.iter().filter(|r| query.filter.matches(r));

        let Some(search_text) = &query.search_text else {
            return matching.take(query.top).cloned().collect();
        };

        let terms: HashSet<String> = tokens(search_text).collect();
        let mut scored: Vec<(usize, &IndexRecord)> = matching
            .map(|r| (score(r, &terms), r))
            .filter(|(s, _)| *s > 0)
            .collect();
        // Stable: equal scores keep insertion order.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored
            .into_iter()
            .take(query.top)
            .map(|(_, r)| r.clone())
            .collect()
    }
}

impl TemplateIndex for InMemoryIndex {
    fn search(&self, query: &IndexQuery) -> IndexFuture<'_> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let results = self.search_sync(query);
        Box::pin(async move { Ok(results) })
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

fn score(record: &IndexRecord, terms: &HashSet<String>) -> usize {
    let mut fields: Vec<&str> = record.tags.iter().map(String::as_str).collect();
    fields.push(&record.section_id);
    if let Some(key) = &record.template_key {
        fields.push(key);
    }
    let doc: HashSet<String> = fields.into_iter().flat_map(tokens).collect();
    terms.iter().filter(|t| doc.contains(*t)).count()
}

fn check_record(record: &IndexRecord) -> Result<(), LoadError> {
    let id = if record.id.is_empty() {
        format!("{}:{}:{}", record.pack_id, record.version, record.section_id)
    } else {
        record.id.clone()
    };
    for (field, value) in [
        ("pack_id", &record.pack_id),
        ("version", &record.version),
        ("section_id", &record.section_id),
    ] {
        if value.trim().is_empty() {
            return Err(LoadError::Invalid {
                id,
                reason: format!("{field} is empty"),
            });
        }
    }
    if !record.metadata_json.trim().is_empty() {
        let metadata: serde_json::Value =
            serde_json::from_str(&record.metadata_json).map_err(|e| LoadError::Invalid {
                id: id.clone(),
                reason: format!("metadata_json is not JSON: {e}"),
            })?;
        let violations = validate_metadata(&metadata);
        if !violations.is_empty() {
            return Err(LoadError::Invalid {
                id,
                reason: violations.join("; "),
            });
        }
    }
    Ok(())
}
