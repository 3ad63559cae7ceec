//! Rule-based scoring of generated drafts.

use serde::Serialize;

/// Score given when every check passes.
pub const PASS_SCORE: u32 = 85;
/// Score given when any check fails.
pub const FAIL_SCORE: u32 = 55;

/// Outcome of [`evaluate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    pub score: u32,
    /// `"length_cap"` and/or `"missing:<token>"`, in check order.
    pub fails: Vec<String>,
}

impl Evaluation {
    pub fn passed(&self) -> bool {
        self.fails.is_empty()
    }
}

/// Check `output` against a word cap and a list of required tokens.
///
/// Token matching is a case-insensitive substring test.
///
/// ```
/// use packsmith::evaluate::evaluate;
///
/// let e = evaluate("Revenue grew 20% [source:audited_financials].", &["source:"], 400);
/// assert_eq!(e.score, 85);
///
/// let e = evaluate("Revenue grew 20%.", &["source:"], 2);
/// assert_eq!(e.fails, vec!["length_cap", "missing:source:"]);
/// ```
pub fn evaluate<S: AsRef<str>>(output: &str, require_tokens: &[S], max_words: usize) -> Evaluation {
    let mut fails = Vec::new();
    if output.split_whitespace().count() > max_words {
        fails.push("length_cap".to_string());
    }

    let haystack = output.to_lowercase();
    for token in require_tokens {
        let token = token.as_ref();
        if !haystack.contains(&token.to_lowercase()) {
            fails.push(format!("missing:{token}"));
        }
    }

    Evaluation {
        score: if fails.is_empty() { PASS_SCORE } else { FAIL_SCORE },
        fails,
    }
}

/// Tokens a draft must carry: a citation marker once it states any figure.
pub fn citation_tokens(output: &str) -> Vec<String> {
    if output.chars().any(|c| c.is_ascii_digit()) {
        vec!["source:".to_string()]
    } else {
        Vec::new()
    }
}
