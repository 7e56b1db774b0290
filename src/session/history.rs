//! Persisted conversation state and its transient overlay.
//!
//! A [`ConversationHistory`] is what gets serialized with the owning graph
//! or sub-flow: ordered messages, the iteration counter, and the host
//! session id. UI-only state (loading flags, tool activity) lives in a
//! separate [`MessageOverlay`] keyed by message id, cleared on resolution
//! and never serialized.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::progress::ToolDescriptor;

/// Identifier of a conversation message.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn generate() -> Self {
        Self(format!("msg-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Who authored a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Sender {
    User,
    Assistant,
}

/// One persisted entry of the conversation transcript.
///
/// An assistant message may exist as an empty placeholder while its request
/// is in flight; the loading state itself lives in the overlay. Error state
/// and loading state are mutually exclusive at rest: marking a message
/// errored removes its overlay entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: MessageId,
    pub sender: Sender,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            sender: Sender::User,
            content: content.into(),
            created_at: Utc::now(),
            error: None,
        }
    }

    /// Empty assistant message appended before any network round trip, so
    /// the timeline never appears to jump.
    pub fn assistant_placeholder() -> Self {
        Self {
            id: MessageId::generate(),
            sender: Sender::Assistant,
            content: String::new(),
            created_at: Utc::now(),
            error: None,
        }
    }

    pub fn is_errored(&self) -> bool {
        self.error.is_some()
    }
}

/// Ordered transcript plus session bookkeeping for one scope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationHistory {
    #[serde(default)]
    pub messages: Vec<ConversationMessage>,
    /// Completed user → assistant rounds.
    #[serde(default)]
    pub iterations: u32,
    /// Opaque host-assigned session identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            iterations: 0,
            session_id: None,
            updated_at: Utc::now(),
        }
    }

    pub fn push(&mut self, message: ConversationMessage) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    pub fn message(&self, id: &MessageId) -> Option<&ConversationMessage> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn message_mut(&mut self, id: &MessageId) -> Option<&mut ConversationMessage> {
        self.updated_at = Utc::now();
        self.messages.iter_mut().find(|m| &m.id == id)
    }

    pub fn index_of(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.id == id)
    }

    /// Remove a message entirely, as when a cancelled placeholder never
    /// existed from the user's perspective.
    pub fn remove(&mut self, id: &MessageId) -> Option<ConversationMessage> {
        let index = self.index_of(id)?;
        self.updated_at = Utc::now();
        Some(self.messages.remove(index))
    }

    /// Reset transcript, iteration counter, and session id.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.iterations = 0;
        self.session_id = None;
        self.updated_at = Utc::now();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Transient per-message display state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MessageTransient {
    pub loading: bool,
    pub tool_activity: Option<ToolDescriptor>,
}

/// UI-only state keyed by message id.
///
/// Deliberately not serializable: persisted messages and transient display
/// state never travel together.
#[derive(Debug, Default)]
pub struct MessageOverlay {
    entries: FxHashMap<MessageId, MessageTransient>,
}

impl MessageOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a message as loading.
    pub fn begin_loading(&mut self, id: MessageId) {
        self.entries.insert(
            id,
            MessageTransient {
                loading: true,
                tool_activity: None,
            },
        );
    }

    pub fn set_tool_activity(&mut self, id: &MessageId, tool: Option<ToolDescriptor>) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.tool_activity = tool;
        }
    }

    pub fn get(&self, id: &MessageId) -> Option<&MessageTransient> {
        self.entries.get(id)
    }

    pub fn is_loading(&self, id: &MessageId) -> bool {
        self.entries.get(id).is_some_and(|e| e.loading)
    }

    /// Drop a message's transient state on resolution.
    pub fn finish(&mut self, id: &MessageId) {
        self.entries.remove(id);
    }

    pub fn clear_all(&mut self) {
        self.entries.clear();
    }
}
