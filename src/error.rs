//! Error types for the carebell engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One candidate listed when a free-text lookup matched several events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCandidate {
    /// Event identifier.
    pub id: String,
    /// Event title.
    pub title: String,
    /// When the event is next due, if the series has not ended.
    pub next_occurrence: Option<DateTime<Utc>>,
}

impl std::fmt::Display for MatchCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.next_occurrence {
            Some(at) => write!(f, "\"{}\" on {}", self.title, at.format("%Y-%m-%d %H:%M UTC")),
            None => write!(f, "\"{}\" (series ended)", self.title),
        }
    }
}

/// Top-level error type for the reminder engine.
#[derive(Debug, thiserror::Error)]
pub enum CarebellError {
    /// An operation referenced an event id that does not exist.
    #[error("event not found: {id}")]
    NotFound {
        /// The id that was looked up.
        id: String,
    },

    /// A free-text lookup matched no pending events.
    #[error("no pending events found matching \"{query}\"")]
    NoMatch {
        /// The search text that failed.
        query: String,
    },

    /// Date/time input could not be parsed.
    #[error("could not understand the time \"{input}\"")]
    InvalidDateTime {
        /// The raw input.
        input: String,
    },

    /// A free-text lookup matched more than one pending event.
    #[error("found multiple events matching \"{query}\": {}", format_candidates(.candidates))]
    AmbiguousMatch {
        /// The search text.
        query: String,
        /// Every matching pending event.
        candidates: Vec<MatchCandidate>,
    },

    /// The durable store could not be opened. Absorbed by fallback mode.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Read/write failure in the active store.
    #[error("storage error: {0}")]
    Storage(String),

    /// A delivery channel's OS permission was not granted.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Every requested delivery channel failed.
    #[error("all notification channels failed: {}", .failures.join("; "))]
    AllChannelsFailed {
        /// One line per failed channel.
        failures: Vec<String>,
    },

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Caller supplied malformed input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Channel send/receive error between coordinator and clients.
    #[error("channel error: {0}")]
    Channel(String),

    /// JSON encode/decode error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_candidates(candidates: &[MatchCandidate]) -> String {
    candidates
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, CarebellError>;

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use chrono::TimeZone;

    #[test]
    fn ambiguous_match_lists_every_candidate() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        let err = CarebellError::AmbiguousMatch {
            query: "reminder".to_owned(),
            candidates: vec![
                MatchCandidate {
                    id: "a".to_owned(),
                    title: "Morning reminder".to_owned(),
                    next_occurrence: Some(at),
                },
                MatchCandidate {
                    id: "b".to_owned(),
                    title: "Evening reminder".to_owned(),
                    next_occurrence: None,
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("\"Morning reminder\" on 2026-03-01 08:00 UTC"));
        assert!(msg.contains("\"Evening reminder\" (series ended)"));
    }

    #[test]
    fn no_match_names_search_text() {
        let err = CarebellError::NoMatch {
            query: "aspirin".to_owned(),
        };
        assert!(err.to_string().contains("\"aspirin\""));
    }
}
