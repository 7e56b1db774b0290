//! Failure taxonomy for host-mediated operations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a failed host operation.
///
/// Every kind is recoverable; the conversation stays actionable after any of
/// them. Cancellation is deliberately *not* a kind here: a cancelled request
/// is not an error and resolves through its own terminal outcome, which the
/// UI discards rather than displays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// A graph or field invariant was violated; carries violation details
    /// and feeds the retry context.
    Validation,
    /// No terminal resolution arrived within the timeout budget.
    Timeout,
    /// The attempted operation is not allowed in the current mode, e.g. an
    /// extended-agent node while the toggle is off.
    ProhibitedOperation,
    /// The external AI capability could not be reached.
    ExecutorUnavailable,
    /// The executor response could not be interpreted as a graph.
    ParseFailure,
    Unknown,
}

impl ErrorKind {
    /// Whether a retry affordance should be offered for this kind.
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::ProhibitedOperation)
    }

    /// Default user-facing text when the host supplied no message.
    pub fn generic_message(self) -> &'static str {
        match self {
            ErrorKind::Validation => "The refined workflow failed validation.",
            ErrorKind::Timeout => "The request took too long and was abandoned.",
            ErrorKind::ProhibitedOperation => "That operation is not allowed in the current mode.",
            ErrorKind::ExecutorUnavailable => "The AI assistant could not be reached.",
            ErrorKind::ParseFailure => "The AI assistant returned something that is not a workflow.",
            ErrorKind::Unknown => "Something went wrong. Please try again.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ProhibitedOperation => "prohibited-operation",
            ErrorKind::ExecutorUnavailable => "executor-unavailable",
            ErrorKind::ParseFailure => "parse-failure",
            ErrorKind::Unknown => "unknown",
        };
        write!(f, "{label}")
    }
}
