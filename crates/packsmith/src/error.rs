//! Error types for pack resolution and template composition.
//!
//! Only two failures ever reach a `compose` caller: [`ComposeError::NotFound`]
//! when no approved template qualifies, and [`ComposeError::Index`] when the
//! template index itself could not be queried. Configuration and evidence
//! problems are recovered where they happen and only show up in the logs.

use thiserror::Error;

/// Failure surfaced by [`Composer::compose`](crate::compose::Composer::compose)
/// and [`TemplateRepository::fetch`](crate::repository::TemplateRepository::fetch).
#[derive(Error, Debug)]
pub enum ComposeError {
    /// No approved template matched after every query strategy ran.
    #[error("no template found for {pack}@{version}:{section}")]
    NotFound {
        pack: String,
        version: String,
        section: String,
    },

    /// The template index could not be queried.
    #[error("template index query failed: {0}")]
    Index(#[from] IndexError),
}

impl ComposeError {
    /// Whether the caller should treat this as a client-visible "not found".
    pub fn is_not_found(&self) -> bool {
        matches!(self, ComposeError::NotFound { .. })
    }
}

/// Failure talking to a [`TemplateIndex`](crate::repository::TemplateIndex).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// The query did not complete within the configured timeout.
    #[error("index query timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The request never produced a response (connection, DNS, TLS).
    #[error("request failed: {0}")]
    Transport(String),

    /// The index answered with a non-success status.
    #[error("index HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The response body could not be decoded.
    #[error("failed to decode index response: {0}")]
    Decode(String),
}

impl IndexError {
    /// Whether a caller-level retry has a reasonable chance of succeeding.
    ///
    /// Timeouts, transport failures, 429 and 5xx are transient. Client errors
    /// (400, 401, 403, 404, 422) and decode failures are not. Nothing in this
    /// crate retries on its own.
    pub fn is_transient(&self) -> bool {
        match self {
            IndexError::Timeout(_) | IndexError::Transport(_) => true,
            IndexError::Http { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            IndexError::Decode(_) => false,
        }
    }
}

/// Failure reading a key from a [`ConfigStore`](crate::config::ConfigStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config lookup timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("config store unavailable: {0}")]
    Unavailable(String),
}

/// Failure loading a local index snapshot.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to read index snapshot: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse index snapshot: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid record {id}: {reason}")]
    Invalid { id: String, reason: String },
}

/// Result type alias for composition operations.
pub type Result<T> = std::result::Result<T, ComposeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn not_found_message_names_the_request() {
        let err = ComposeError::NotFound {
            pack: "PSG".into(),
            version: "1.0.3".into(),
            section: "business_case".into(),
        };
        assert_eq!(
            err.to_string(),
            "no template found for PSG@1.0.3:business_case"
        );
        assert!(err.is_not_found());
    }

    #[test]
    fn index_errors_convert_into_compose_errors() {
        let err: ComposeError = IndexError::Transport("connection reset".into()).into();
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn transient_index_errors_detected() {
        assert!(IndexError::Timeout(Duration::from_secs(10)).is_transient());
        assert!(IndexError::Transport("connection refused".into()).is_transient());
        assert!(
            IndexError::Http {
                status: 429,
                body: "rate limited".into()
            }
            .is_transient()
        );
        assert!(
            IndexError::Http {
                status: 503,
                body: String::new()
            }
            .is_transient()
        );
    }

    #[test]
    fn permanent_index_errors_not_transient() {
        assert!(
            !IndexError::Http {
                status: 400,
                body: "bad filter".into()
            }
            .is_transient()
        );
        assert!(
            !IndexError::Http {
                status: 403,
                body: String::new()
            }
            .is_transient()
        );
        assert!(!IndexError::Decode("eof".into()).is_transient());
    }
}
