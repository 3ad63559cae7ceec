//! Template rendering: scalar substitution and conditional label blocks.
//!
//! [`render`] is a pure function over a template, a scalar map and a set of
//! [`LabelBindings`]. It never fails. The rules:
//!
//! - `{{name}}` bound in the scalar map is replaced verbatim; an unbound one
//!   is left exactly as written.
//! - `{{#labels.key}} ... {{/labels.key}}` keeps its inner content when `key`
//!   is bound and disappears entirely (markers and content) when it is not.
//!   Blocks nest and resolve innermost first.
//! - `{{labels.key}}` becomes the bound value, or nothing when unbound.
//! - A close marker with no matching open is dropped. An open marker that is
//!   never closed is dropped and its content kept.
//! - Runs of whitespace collapse to a single space and the result is trimmed.
//!
//! ```
//! use packsmith::render::{LabelBindings, render};
//! use std::collections::BTreeMap;
//!
//! let template = "Hello {{name}}! {{#labels.fin}}Revenue: {{labels.fin}}{{/labels.fin}}";
//! let scalars = BTreeMap::from([("name".to_string(), "Acme".to_string())]);
//!
//! let mut labels = LabelBindings::new();
//! labels.bind("fin", "$1M");
//! assert_eq!(render(template, &scalars, &labels), "Hello Acme! Revenue: $1M");
//! assert_eq!(render(template, &scalars, &LabelBindings::new()), "Hello Acme!");
//! ```

pub mod token;

use std::collections::BTreeMap;
use token::{Token, tokenize};

/// Labels that are present for a render, each bound to the value that
/// `{{labels.key}}` expands to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelBindings {
    values: BTreeMap<String, String>,
}

impl LabelBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `label` present and bind it to `value`.
    pub fn bind(&mut self, label: impl Into<String>, value: impl Into<String>) {
        self.values.insert(label.into(), value.into());
    }

    /// Mark `label` present, bound to its own name.
    pub fn mark_present(&mut self, label: impl Into<String>) {
        let label = label.into();
        self.values.insert(label.clone(), label);
    }

    pub fn get(&self, label: &str) -> Option<&str> {
        self.values.get(label).map(String::as_str)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.values.contains_key(label)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LabelBindings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut bindings = Self::new();
        for (k, v) in iter {
            bindings.bind(k, v);
        }
        bindings
    }
}

/// An open block (or the document root) and the output collected inside it.
struct Frame<'a> {
    label: Option<&'a str>,
    out: String,
}

impl<'a> Frame<'a> {
    fn new(label: Option<&'a str>) -> Self {
        Self {
            label,
            out: String::new(),
        }
    }
}

/// Render `template` against `scalars` and `labels`. See the module docs.
pub fn render(template: &str, scalars: &BTreeMap<String, String>, labels: &LabelBindings) -> String {
    // stack[0] is the root and is never popped.
    let mut stack = vec![Frame::new(None)];

    for token in tokenize(template) {
        match token {
            Token::Text(text) => top(&mut stack).push_str(text),
            Token::Var { name, raw } => {
                let value = scalars.get(name).map_or(raw, String::as_str);
                top(&mut stack).push_str(value);
            }
            Token::LabelRef(key) => {
                if let Some(value) = labels.get(key) {
                    top(&mut stack).push_str(value);
                }
            }
            Token::Open(key) => stack.push(Frame::new(Some(key))),
            Token::Close(key) => {
                let Some(idx) = stack.iter().rposition(|f| f.label == Some(key)) else {
                    continue;
                };
                while stack.len() > idx + 1 {
                    fold_unclosed(&mut stack);
                }
                if let Some(frame) = stack.pop() {
                    if labels.contains(key) {
                        top(&mut stack).push_str(&frame.out);
                    }
                }
            }
        }
    }

    while stack.len() > 1 {
        fold_unclosed(&mut stack);
    }

    let root = stack.pop().map(|f| f.out).unwrap_or_default();
    normalize_whitespace(&root)
}

/// Collapse every whitespace run to one space and trim both ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn top<'s>(stack: &'s mut [Frame<'_>]) -> &'s mut String {
    let last = stack.len() - 1;
    &mut stack[last].out
}

/// Pop an unclosed block and keep its content in the parent.
fn fold_unclosed(stack: &mut Vec<Frame<'_>>) {
    if let Some(frame) = stack.pop() {
        top(stack).push_str(&frame.out);
    }
}
