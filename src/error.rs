//! Error taxonomy for the comparison engine
//!
//! Errors are split by where they can be recovered:
//! - Input-shape errors fail the whole run immediately
//! - Per-pair errors (parse, transport, compare) are captured on the pair
//!   and the run continues
//! - Publish errors are logged and swallowed by the progress layer
//! - Fatal errors are invariant violations and abort the run

use thiserror::Error;

/// Unified error type for the comparison engine
///
/// Each variant carries a short message suitable for per-pair capture and a
/// stable kind label (see [`CompareError::kind`]) used by aggregations.
#[derive(Debug, Error)]
pub enum CompareError {
    /// Missing directory, unresolved model, malformed rules document
    #[error("invalid input: {0}")]
    Input(String),

    /// Malformed rule path (bad bracket syntax, empty segment)
    #[error("invalid rule path '{path}': {message}")]
    RulePath { path: String, message: String },

    /// Payload could not be deserialized into the declared model
    #[error("failed to parse document: {0}")]
    Parse(String),

    /// HTTP send failed (timeout, DNS, connection)
    #[error("transport failure: {0}")]
    Transport(String),

    /// Structural comparison failed mid-walk
    #[error("comparison failure: {0}")]
    Compare(String),

    /// Progress sink rejected an event (logged and swallowed by callers)
    #[error("progress publish failure: {0}")]
    Publish(String),

    /// Invariant violation - a bug, not a recoverable state
    #[error("fatal invariant violation: {0}")]
    Fatal(String),

    /// The run's cancellation token was tripped; partial results discarded
    #[error("cancelled")]
    Cancelled,
}

impl CompareError {
    /// Stable kind label for aggregation buckets
    pub fn kind(&self) -> &'static str {
        match self {
            CompareError::Input(_) => "input",
            CompareError::RulePath { .. } => "input",
            CompareError::Parse(_) => "parse",
            CompareError::Transport(_) => "transport",
            CompareError::Compare(_) => "compare",
            CompareError::Publish(_) => "publish",
            CompareError::Fatal(_) => "fatal",
            CompareError::Cancelled => "cancelled",
        }
    }

    /// True if the error is scoped to a single pair and the run continues
    pub fn is_per_pair(&self) -> bool {
        matches!(
            self,
            CompareError::Parse(_) | CompareError::Transport(_) | CompareError::Compare(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels_are_stable() {
        assert_eq!(CompareError::Input("x".into()).kind(), "input");
        assert_eq!(
            CompareError::RulePath {
                path: "A[".into(),
                message: "unclosed bracket".into()
            }
            .kind(),
            "input"
        );
        assert_eq!(CompareError::Parse("x".into()).kind(), "parse");
        assert_eq!(CompareError::Transport("x".into()).kind(), "transport");
        assert_eq!(CompareError::Fatal("x".into()).kind(), "fatal");
    }

    #[test]
    fn test_per_pair_scoping() {
        assert!(CompareError::Parse("x".into()).is_per_pair());
        assert!(CompareError::Transport("x".into()).is_per_pair());
        assert!(!CompareError::Input("x".into()).is_per_pair());
        assert!(!CompareError::Fatal("x".into()).is_per_pair());
    }
}
