//! One-shot retry context for failed refinements.

use rustc_hash::FxHashMap;

use crate::validation::Violation;

use super::history::MessageId;

/// Holds the most recent validation-error set per failed assistant message.
///
/// Strictly one-shot: taking a context deletes it, so an unrelated second
/// retry of the same message cannot replay stale violations. A new failure
/// on the same message overwrites; contexts never accumulate. Manual graph
/// edits invalidate everything, since the stored violations were produced
/// against a graph that no longer exists.
#[derive(Debug, Default)]
pub struct RetryContextStore {
    contexts: FxHashMap<MessageId, Vec<Violation>>,
}

impl RetryContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&mut self, message: MessageId, violations: Vec<Violation>) {
        self.contexts.insert(message, violations);
    }

    /// Consume the stored context for one retry.
    pub fn take(&mut self, message: &MessageId) -> Option<Vec<Violation>> {
        self.contexts.remove(message)
    }

    pub fn invalidate_all(&mut self) {
        self.contexts.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}
