//! Template tokenizer.
//!
//! Splits template text into literal runs and `{{ ... }}` markers. Only four
//! marker shapes mean anything:
//!
//! | Marker | Token |
//! |--------|-------|
//! | `{{name}}` | [`Token::Var`] |
//! | `{{labels.key}}` | [`Token::LabelRef`] |
//! | `{{#labels.key}}` | [`Token::Open`] |
//! | `{{/labels.key}}` | [`Token::Close`] |
//!
//! Whitespace inside the braces is ignored. Anything else that looks like a
//! marker (`{{#name}}`, `{{ not valid }}`) is passed through as text.

use regex::Regex;
use std::sync::LazyLock;

static MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([#/]?)\s*(labels\.)?([A-Za-z0-9_\-]+)\s*\}\}")
        .expect("marker pattern is valid")
});

/// One lexical unit of a template, borrowing from the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    Text(&'a str),
    /// Scalar placeholder. `raw` is the marker as written, emitted verbatim
    /// when the name is unbound.
    Var { name: &'a str, raw: &'a str },
    LabelRef(&'a str),
    Open(&'a str),
    Close(&'a str),
}

/// Tokenize `template` left to right. Concatenating the source spans of the
/// returned tokens reproduces the input exactly.
pub fn tokenize(template: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut last = 0;

    for caps in MARKER.captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() > last {
            tokens.push(Token::Text(&template[last..whole.start()]));
        }
        last = whole.end();

        let sigil = caps.get(1).map_or("", |m| m.as_str());
        let is_label = caps.get(2).is_some();
        let name = caps.get(3).map_or("", |m| m.as_str());

        let token = match (sigil, is_label) {
            ("#", true) => Token::Open(name),
            ("/", true) => Token::Close(name),
            ("", true) => Token::LabelRef(name),
            ("", false) => Token::Var {
                name,
                raw: whole.as_str(),
            },
            _ => Token::Text(whole.as_str()),
        };
        tokens.push(token);
    }

    if last < template.len() {
        tokens.push(Token::Text(&template[last..]));
    }
    tokens
}
