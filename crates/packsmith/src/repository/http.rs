//! Template index backed by a search-service REST endpoint.
//!
//! Issues `POST {endpoint}/indexes/{index}/docs/search?api-version=...` with an
//! `api-key` header. The filter travels as an OData expression and the tag
//! list as a simple-syntax search string; documents come back in the `value`
//! array of the response, best match first.

use super::document::IndexRecord;
use super::{IndexFuture, IndexQuery, TemplateIndex};
use crate::error::IndexError;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Search API version sent with every request.
pub const DEFAULT_API_VERSION: &str = "2023-11-01";

/// Fields requested from the index.
const SELECT_FIELDS: &str =
    "id,pack_id,version,section_id,template_key,status,tags,template_text,metadata_json,indexed_at";

/// JSON body of a search request.
#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub search: String,
    pub filter: String,
    pub top: usize,
    pub select: String,
    pub query_type: String,
}

impl SearchRequest {
    pub fn from_query(query: &IndexQuery) -> Self {
        Self {
            search: query
                .search_text
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or("*")
                .to_string(),
            filter: query.filter.to_odata(),
            top: query.top,
            select: SELECT_FIELDS.to_string(),
            query_type: "simple".to_string(),
        }
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    value: Vec<IndexRecord>,
}

/// Async client for a hosted template index.
pub struct HttpTemplateIndex {
    client: reqwest::Client,
    endpoint: String,
    index: String,
    api_key: String,
    api_version: String,
}

impl HttpTemplateIndex {
    /// Create a client for `index` at `endpoint`.
    ///
    /// The HTTP client's own timeout is a backstop; the repository applies the
    /// configured per-query timeout on top of it.
    pub fn new(
        endpoint: impl Into<String>,
        index: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, IndexError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("packsmith/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| IndexError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            index: index.into(),
            api_key: api_key.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
        })
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Full search URL.
    pub fn search_url(&self) -> String {
        format!(
            "{}/indexes/{}/docs/search?api-version={}",
            self.endpoint, self.index, self.api_version
        )
    }

    async fn post(&self, body: SearchRequest) -> Result<Vec<IndexRecord>, IndexError> {
        debug!(
            "[vault] search index={} filter=\"{}\" search=\"{}\" top={}",
            self.index, body.filter, body.search, body.top
        );
        let start = Instant::now();

        let resp = self
            .client
            .post(self.search_url())
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| IndexError::Transport(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| IndexError::Transport(format!("failed to read response: {e}")))?;
        trace!(
            "[vault] HTTP {status} in {:.2}s ({} bytes)",
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(IndexError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        parse_response(&text)
    }
}

impl TemplateIndex for HttpTemplateIndex {
    fn search(&self, query: &IndexQuery) -> IndexFuture<'_> {
        let body = SearchRequest::from_query(query);
        Box::pin(self.post(body))
    }
}

impl std::fmt::Debug for HttpTemplateIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTemplateIndex")
            .field("endpoint", &self.endpoint)
            .field("index", &self.index)
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}

fn parse_response(text: &str) -> Result<Vec<IndexRecord>, IndexError> {
    serde_json::from_str::<SearchResponse>(text)
        .map(|r| r.value)
        .map_err(|e| IndexError::Decode(e.to_string()))
}
