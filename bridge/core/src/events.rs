//! Review Events
//!
//! Everything the bridge tells its observers. Events serialize to JSON with a
//! `type` tag so any surface (console plugin, IDE panel, web page) can switch
//! on it without sharing Rust types.

use std::sync::Arc;

use serde::Serialize;

use crate::history::HistoryEntry;
use crate::session::SessionState;

/// Event emitted to every subscriber
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ReviewEvent {
    /// Full session snapshot after a change
    StateChanged {
        /// The new state
        state: Arc<SessionState>,
    },

    /// One fragment of the in-flight review
    #[serde(rename_all = "camelCase")]
    StreamChunk {
        /// The fragment
        chunk: String,
        /// Everything received so far, including this fragment
        accumulated_so_far: String,
    },

    /// The review finished
    #[serde(rename_all = "camelCase")]
    StreamEnd {
        /// Complete review text
        final_result: String,
    },

    /// The review failed
    StreamError {
        /// Error description
        message: String,
    },

    /// The history cursor moved
    HistorySelected {
        /// The newly selected entry
        entry: Arc<HistoryEntry>,
    },
}

impl ReviewEvent {
    /// Wire name of the event
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state-changed",
            Self::StreamChunk { .. } => "stream-chunk",
            Self::StreamEnd { .. } => "stream-end",
            Self::StreamError { .. } => "stream-error",
            Self::HistorySelected { .. } => "history-selected",
        }
    }

    /// Whether this event ends a review
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::StreamEnd { .. } | Self::StreamError { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_wire_format() {
        let event = ReviewEvent::StreamChunk {
            chunk: "b".to_string(),
            accumulated_so_far: "ab".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "stream-chunk");
        assert_eq!(json["chunk"], "b");
        assert_eq!(json["accumulatedSoFar"], "ab");
        assert_eq!(event.name(), "stream-chunk");
    }

    #[test]
    fn test_state_changed_wire_format() {
        let event = ReviewEvent::StateChanged {
            state: Arc::new(SessionState::default()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "state-changed");
        assert_eq!(json["state"]["isStreaming"], false);
        assert_eq!(json["state"]["strictnessLevel"], 2);
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_terminal_events() {
        let end = ReviewEvent::StreamEnd {
            final_result: "done".to_string(),
        };
        assert!(end.is_terminal());
        assert_eq!(serde_json::to_value(&end).unwrap()["finalResult"], "done");

        let error = ReviewEvent::StreamError {
            message: "boom".to_string(),
        };
        assert!(error.is_terminal());
        assert_eq!(error.name(), "stream-error");
    }
}
