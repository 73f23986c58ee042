//! Completion status for transcription nodes.
//!
//! # Invariants
//! - `Done` is never produced by rollup; only explicit callers set it.
//! - Store representation is a stable snake_case string.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Completion status of a Document, Section, or Bloc.
///
/// Ordered `Draft < InProgress < Done` for rollup purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Created, nothing meaningful transcribed yet.
    Draft,
    /// Transcription has started.
    InProgress,
    /// Marked as fully transcribed by a human.
    Done,
}

impl Status {
    /// Returns the store representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::InProgress => "in_progress",
            Self::Done => "done",
        }
    }

    /// Parses the store representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(Self::Draft),
            "in_progress" => Some(Self::InProgress),
            "done" => Some(Self::Done),
            _ => None,
        }
    }

    /// Whether this status counts as started work for rollup.
    pub fn is_started(self) -> bool {
        matches!(self, Self::InProgress | Self::Done)
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::Status;

    #[test]
    fn parse_accepts_store_values_only() {
        assert_eq!(Status::parse("draft"), Some(Status::Draft));
        assert_eq!(Status::parse("in_progress"), Some(Status::InProgress));
        assert_eq!(Status::parse("done"), Some(Status::Done));
        assert_eq!(Status::parse("Done"), None);
        assert_eq!(Status::parse("in-progress"), None);
    }

    #[test]
    fn order_is_draft_in_progress_done() {
        assert!(Status::Draft < Status::InProgress);
        assert!(Status::InProgress < Status::Done);
    }

    #[test]
    fn started_covers_in_progress_and_done() {
        assert!(!Status::Draft.is_started());
        assert!(Status::InProgress.is_started());
        assert!(Status::Done.is_started());
    }
}
