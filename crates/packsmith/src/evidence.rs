//! Evidence selection: which labels a draft cites, in what order, and the
//! capped evidence window shown to the model.
//!
//! [`order_labels`] is the ordering rule. Template-declared priority labels
//! come first, then template-declared optional labels, then the caller's
//! explicit labels, then anything else that is available. Only available
//! labels are ever emitted and none is emitted twice.
//!
//! [`EvidenceSet`] holds the evidence text that is actually available for a
//! request, keyed by label in availability order. It can be filled directly
//! or gathered from an [`EvidenceSource`].

use futures::future::join_all;
use regex::Regex;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, trace, warn};

static EVIDENCE_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"---\s*\[evidence:([^\]]+)\]\s*---").expect("header pattern is valid")
});

/// Order evidence labels for citation.
///
/// ```
/// use packsmith::evidence::order_labels;
///
/// let s = |v: &[&str]| v.iter().map(|x| x.to_string()).collect::<Vec<_>>();
/// let order = order_labels(&s(&["b", "c", "d"]), &s(&["a", "b"]), &s(&["c"]), &s(&["d"]));
/// assert_eq!(order, s(&["b", "c", "d"]));
/// ```
pub fn order_labels(
    available: &[String],
    priority: &[String],
    optional: &[String],
    explicit: &[String],
) -> Vec<String> {
    let present: HashSet<&str> = available.iter().map(String::as_str).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut order = Vec::with_capacity(present.len());

    for label in priority
        .iter()
        .chain(optional)
        .chain(explicit)
        .chain(available)
    {
        if present.contains(label.as_str()) && seen.insert(label.as_str()) {
            order.push(label.clone());
        }
    }
    order
}

/// Labels recovered from `--- [evidence:<label>] ---` headers, in order.
pub fn labels_in_window(window: &str) -> Vec<String> {
    EVIDENCE_HEADER
        .captures_iter(window)
        .filter_map(|c| c.get(1).map(|m| m.as_str().trim().to_string()))
        .collect()
}

/// Header placed in front of each label's text in the evidence window.
pub fn evidence_header(label: &str) -> String {
    format!("\n\n--- [evidence:{label}] ---\n")
}

/// Boxed future returned by [`EvidenceSource::fetch`].
pub type EvidenceFuture<'a> = Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>>;

/// Where uploaded evidence text lives.
///
/// `None` means the label has no text for the session. Implementations map
/// their own failures (missing object, permission, decode) to `None`.
pub trait EvidenceSource: Send + Sync {
    fn fetch(&self, session_id: &str, label: &str) -> EvidenceFuture<'_>;
}

/// Evidence held in memory, keyed by `(session, label)`.
#[derive(Debug, Default, Clone)]
pub struct MemoryEvidence {
    entries: std::collections::HashMap<(String, String), String>,
}

impl MemoryEvidence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(
        mut self,
        session_id: impl Into<String>,
        label: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        self.entries
            .insert((session_id.into(), label.into()), text.into());
        self
    }
}

impl EvidenceSource for MemoryEvidence {
    fn fetch(&self, session_id: &str, label: &str) -> EvidenceFuture<'_> {
        let text = self
            .entries
            .get(&(session_id.to_string(), label.to_string()))
            .cloned();
        Box::pin(async move { text })
    }
}

/// Evidence text available for one request, in availability order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvidenceSet {
    items: Vec<(String, String)>,
}

impl EvidenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `text` under `label`.
    ///
    /// Blank text means the label is unavailable and is ignored, as is a
    /// label that is already present.
    pub fn insert(&mut self, label: impl Into<String>, text: impl Into<String>) -> bool {
        let label = label.into();
        let text = text.into();
        if label.trim().is_empty() || text.trim().is_empty() {
            debug!("[evidence] {label:?} has no text; treating as unavailable");
            return false;
        }
        if self.contains(&label) {
            return false;
        }
        self.items.push((label, text));
        true
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, label: impl Into<String>, text: impl Into<String>) -> Self {
        self.insert(label, text);
        self
    }

    /// Fetch `labels` for `session_id` concurrently and keep the ones that
    /// have text, in the order given.
    ///
    /// Each fetch is bounded by `timeout`; a label whose fetch times out is
    /// treated as unavailable. Stops adding labels once the accumulated
    /// window (headers included) reaches `char_cap` characters.
    pub async fn gather(
        source: &dyn EvidenceSource,
        session_id: &str,
        labels: &[String],
        char_cap: usize,
        timeout: Duration,
    ) -> Self {
        let mut unique: Vec<&str> = Vec::with_capacity(labels.len());
        for label in labels {
            if !unique.contains(&label.as_str()) {
                unique.push(label.as_str());
            }
        }

        let fetched = join_all(unique.iter().map(|&label| async move {
            match tokio::time::timeout(timeout, source.fetch(session_id, label)).await {
                Ok(text) => text,
                Err(_) => {
                    warn!("[evidence] session={session_id} label={label} timed out after {timeout:?}");
                    None
                }
            }
        }))
        .await;

        let mut set = Self::new();
        let mut total = 0usize;
        for (label, text) in unique.into_iter().zip(fetched) {
            let Some(text) = text else {
                debug!("[evidence] session={session_id} label={label} unavailable");
                continue;
            };
            let size = evidence_header(label).chars().count() + text.chars().count();
            if set.insert(label, text) {
                total += size;
                trace!("[evidence] session={session_id} label={label} chars={size}");
            }
            if total >= char_cap {
                debug!("[evidence] session={session_id} cap {char_cap} reached after {label}");
                break;
            }
        }
        set
    }

    /// Labels in availability order.
    pub fn labels(&self) -> Vec<String> {
        self.items.iter().map(|(label, _)| label.clone()).collect()
    }

    pub fn text(&self, label: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, text)| text.as_str())
    }

    pub fn contains(&self, label: &str) -> bool {
        self.items.iter().any(|(l, _)| l == label)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Concatenate the text of `order` (labels without text are skipped),
    /// each under its header, truncated to `char_cap` characters.
    pub fn window(&self, order: &[String], char_cap: usize) -> String {
        let mut window = String::new();
        for label in order {
            if let Some(text) = self.text(label) {
                window.push_str(&evidence_header(label));
                window.push_str(text);
            }
        }
        truncate_chars(window, char_cap)
    }
}

impl<L: Into<String>, T: Into<String>> FromIterator<(L, T)> for EvidenceSet {
    fn from_iter<I: IntoIterator<Item = (L, T)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (label, text) in iter {
            set.insert(label, text);
        }
        set
    }
}

fn truncate_chars(s: String, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((byte_idx, _)) => {
            let mut s = s;
            s.truncate(byte_idx);
            s
        }
        None => s,
    }
}
