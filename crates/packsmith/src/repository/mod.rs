//! Template repository: finds the approved template for a
//! `(pack, version, section)` in a remote document index.
//!
//! The lookup runs an ordered list of [`QueryStrategy`] values and stops at
//! the first one that yields a document:
//!
//! - A concrete version runs only [`QueryStrategy::Ranked`]. A miss is a hard
//!   [`ComposeError::NotFound`]; another version is never substituted.
//! - `latest-approved` runs [`QueryStrategy::Ranked`] and then
//!   [`QueryStrategy::AnyApproved`], which takes any approved document for
//!   the section.
//!
//! Hits are cached by `(pack, version, section, variant)` for the configured
//! TTL, and concurrent misses on one key wait for a single lookup. Every index
//! query is bounded by a timeout and failures are returned
//! to the caller without retrying.

pub mod document;
pub mod http;
pub mod memory;

pub use document::{
    ApprovalStatus, EvidenceHints, IndexRecord, TemplateDocument, TemplateMetadata,
    metadata_schema, validate_metadata,
};
pub use http::HttpTemplateIndex;
pub use memory::InMemoryIndex;

use crate::cache::{Clock, SystemClock, TtlCache};
use crate::error::{ComposeError, IndexError, Result};
use crate::pack::{PackRef, PackVersion};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Structured filter applied by the index before relevance ranking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFilter {
    pub pack_id: String,
    pub status: ApprovalStatus,
    pub section_id: String,
    /// Restrict to one version; `None` accepts any.
    pub version: Option<String>,
}

impl IndexFilter {
    /// Whether `record` passes this filter.
    pub fn matches(&self, record: &IndexRecord) -> bool {
        record.pack_id == self.pack_id
            && record.status == self.status
            && record.section_id == self.section_id
            && self.version.as_ref().is_none_or(|v| &record.version == v)
    }

    /// OData filter expression, e.g.
    /// `pack_id eq 'PSG' and status eq 'approved' and section_id eq 'scope'`.
    pub fn to_odata(&self) -> String {
        let mut filter = format!(
            "pack_id eq '{}' and status eq '{}' and section_id eq '{}'",
            odata_escape(&self.pack_id),
            self.status,
            odata_escape(&self.section_id)
        );
        if let Some(version) = &self.version {
            filter.push_str(&format!(" and version eq '{}'", odata_escape(version)));
        }
        filter
    }
}

fn odata_escape(value: &str) -> String {
    value.replace('\'', "''")
}

/// One query against a [`TemplateIndex`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexQuery {
    pub filter: IndexFilter,
    /// Free-text relevance query. `None` means no ranking: any document that
    /// passes the filter qualifies.
    pub search_text: Option<String>,
    /// Maximum number of documents to return.
    pub top: usize,
}

/// Boxed future returned by [`TemplateIndex::search`].
pub type IndexFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<Vec<IndexRecord>, IndexError>> + Send + 'a>>;

/// A searchable store of template documents.
///
/// Results come back best match first.
pub trait TemplateIndex: Send + Sync {
    fn search(&self, query: &IndexQuery) -> IndexFuture<'_>;
}

/// How to look for a template, in order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStrategy {
    /// Filter by pack, approved status, section and (if concrete) version;
    /// rank by relevance against the request tags.
    Ranked,
    /// Filter by pack, approved status and section only; take any document.
    AnyApproved,
}

impl QueryStrategy {
    /// The strategies to try for `version`, in order.
    pub fn plan(version: &PackVersion) -> &'static [QueryStrategy] {
        match version {
            PackVersion::Exact(_) => &[QueryStrategy::Ranked],
            PackVersion::LatestApproved => &[QueryStrategy::Ranked, QueryStrategy::AnyApproved],
        }
    }

    /// Build the index query this strategy issues.
    pub fn query(&self, pack: &PackRef, section_id: &str, tags: &[String], top: usize) -> IndexQuery {
        match self {
            QueryStrategy::Ranked => {
                let version = match &pack.version {
                    PackVersion::Exact(v) => Some(v.clone()),
                    PackVersion::LatestApproved => None,
                };
                let search_text = if tags.is_empty() {
                    section_id.to_string()
                } else {
                    tags.join(" ")
                };
                IndexQuery {
                    filter: IndexFilter {
                        pack_id: pack.pack.clone(),
                        status: ApprovalStatus::Approved,
                        section_id: section_id.to_string(),
                        version,
                    },
                    search_text: Some(search_text),
                    top: top.max(1),
                }
            }
            QueryStrategy::AnyApproved => IndexQuery {
                filter: IndexFilter {
                    pack_id: pack.pack.clone(),
                    status: ApprovalStatus::Approved,
                    section_id: section_id.to_string(),
                    version: None,
                },
                search_text: None,
                top: 1,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TemplateKey {
    pack: String,
    version: String,
    section: String,
    variant: String,
}

/// Caching client over a [`TemplateIndex`].
pub struct TemplateRepository {
    index: Arc<dyn TemplateIndex>,
    cache: TtlCache<TemplateKey, Arc<TemplateDocument>>,
    timeout: Duration,
    primary_top: usize,
}

impl TemplateRepository {
    pub fn new(index: Arc<dyn TemplateIndex>, ttl: Duration, timeout: Duration) -> Self {
        Self::with_clock(index, ttl, timeout, Arc::new(SystemClock))
    }

    pub fn with_clock(
        index: Arc<dyn TemplateIndex>,
        ttl: Duration,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            index,
            cache: TtlCache::with_clock(ttl, clock),
            timeout,
            primary_top: 3,
        }
    }

    /// Number of ranked candidates the primary query asks for.
    pub fn with_primary_top(mut self, top: usize) -> Self {
        self.primary_top = top;
        self
    }

    /// Fetch the template for `section_id` in `pack`.
    ///
    /// `tags` feed relevance ranking only. They are not part of the cache
    /// key, so a cached document is reused for any tags within the TTL.
    /// Concurrent fetches of the same key share one round of index queries.
    pub async fn fetch(
        &self,
        pack: &PackRef,
        section_id: &str,
        variant: Option<&str>,
        tags: &[String],
    ) -> Result<Arc<TemplateDocument>> {
        let key = TemplateKey {
            pack: pack.pack.clone(),
            version: pack.version.as_str().to_string(),
            section: section_id.to_string(),
            variant: variant.unwrap_or_default().to_string(),
        };
        self.cache
            .get_or_try_insert_with(key, move || self.lookup(pack, section_id, tags))
            .await
    }

    async fn lookup(
        &self,
        pack: &PackRef,
        section_id: &str,
        tags: &[String],
    ) -> Result<Arc<TemplateDocument>> {
        for strategy in QueryStrategy::plan(&pack.version) {
            let query = strategy.query(pack, section_id, tags, self.primary_top);
            let records = self.run(&query).await?;
            debug!(
                "[vault] {strategy:?} {pack}:{section_id} -> {} candidate(s)",
                records.len()
            );

            if let Some(record) = records.into_iter().next() {
                let doc = Arc::new(TemplateDocument::from_record(record));
                debug!("[vault] {pack}:{section_id} served by {}", doc.provenance());
                return Ok(doc);
            }
        }

        Err(ComposeError::NotFound {
            pack: pack.pack.clone(),
            version: pack.version.to_string(),
            section: section_id.to_string(),
        })
    }

    async fn run(&self, query: &IndexQuery) -> std::result::Result<Vec<IndexRecord>, IndexError> {
        match tokio::time::timeout(self.timeout, self.index.search(query)).await {
            Ok(result) => result,
            Err(_) => Err(IndexError::Timeout(self.timeout)),
        }
    }

    /// Cache statistics: `(hits, misses)`.
    pub fn cache_stats(&self) -> (u64, u64) {
        (self.cache.hits(), self.cache.misses())
    }
}

impl fmt::Debug for TemplateRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateRepository")
            .field("cache", &self.cache)
            .field("timeout", &self.timeout)
            .field("primary_top", &self.primary_top)
            .finish()
    }
}
