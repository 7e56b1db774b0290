//! Refinement conversation sessions.
//!
//! One [`SessionManager`] exists per [`ConversationScope`]: the top-level
//! workflow or one nested sub-flow. Each manager owns its scope's transcript
//! and transient display state, enforces the at-most-one-in-flight rule, and
//! runs the full send → stream → commit cycle against the shared correlator.
//! Requests on different scopes are fully independent; nothing serializes
//! unrelated scopes.
//!
//! All state is explicit: the scope capability owns the graph and history,
//! options travel in every [`RefineOptions`] argument, and there is no
//! ambient mutable configuration.

pub mod history;
pub mod retry;
pub mod scope;

pub use history::{
    ConversationHistory, ConversationMessage, MessageId, MessageOverlay, MessageTransient, Sender,
};
pub use retry::RetryContextStore;
pub use scope::{ConversationScope, SubFlowScope, WorkflowScope};

use std::sync::Arc;
use std::time::Duration;

use miette::Diagnostic;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;

use crate::error::ErrorKind;
use crate::graph::{Node, WorkflowGraph};
use crate::host::{HostClient, HostError};
use crate::progress::ProgressAccumulator;
use crate::protocol::wire::{
    RefineOptions, RefinePayload, RefineSuccess, ReplyPayload, RequestPayload, ScopeDescriptor,
    refine_client_budget,
};
use crate::protocol::{ChannelError, RequestEvent, Resolution};
use crate::validation::{self, Violation};

/// Iteration count at which the standing fresh-conversation advisory shows.
/// Advisory only, never a hard stop.
pub const ITERATION_ADVISORY_THRESHOLD: u32 = 20;
/// Maximum user message length in characters.
pub const MAX_USER_MESSAGE_LEN: usize = 5_000;

/// Errors rejected at the call site, before the channel is contacted.
#[derive(Debug, Error, Diagnostic)]
pub enum SessionError {
    #[error("a refinement is already in flight for this scope")]
    #[diagnostic(
        code(flowsmith::session::request_in_flight),
        help("Wait for the pending request to resolve, or cancel it first.")
    )]
    RequestInFlight,

    #[error("refinement message must be 1-{MAX_USER_MESSAGE_LEN} characters, got {len}")]
    #[diagnostic(code(flowsmith::session::message_length))]
    MessageLength { len: usize },

    /// The current graph fails validation and cannot be the basis for a
    /// refinement request.
    #[error("the current graph fails validation with {} violation(s)", violations.len())]
    #[diagnostic(code(flowsmith::session::graph_invalid))]
    GraphInvalid { violations: Vec<Violation> },

    #[error("no conversation message with id {id}")]
    #[diagnostic(code(flowsmith::session::unknown_message))]
    UnknownMessage { id: MessageId },

    #[error("message {id} is not awaiting a retry")]
    #[diagnostic(
        code(flowsmith::session::not_retryable),
        help("Only errored assistant messages with a retryable error kind can be retried.")
    )]
    NotRetryable { id: MessageId },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Host(#[from] HostError),
}

/// Cooperative cancellation token for one in-flight refinement.
///
/// Cloneable; the UI keeps one side and the awaiting send future watches the
/// other. Cancelling sends a notice to the host but resolution still comes
/// from the channel (or the budget).
#[derive(Clone, Debug)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// How the host session relates to previous turns.
///
/// A reconnect means turn-by-turn context may have been partially lost
/// server-side even though the visible transcript is intact, which is why it
/// is surfaced differently from a first-time start.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionContinuity {
    /// First session for this scope.
    Fresh,
    /// Same host session as the previous turn.
    Continued,
    /// The host lost and recreated its session.
    Reconnected,
}

/// One-time notices surfaced to the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionNotice {
    Reconnected,
}

/// Result of one refinement cycle.
#[derive(Clone, Debug)]
pub enum RefinementOutcome {
    /// The scope's graph was replaced and the transcript committed.
    Success {
        assistant: ConversationMessage,
        continuity: SessionContinuity,
    },
    /// The assistant asked a question instead of producing an edit; the
    /// graph is untouched.
    Clarification {
        assistant: ConversationMessage,
        continuity: SessionContinuity,
    },
    /// The placeholder message is marked errored; retryable kinds keep the
    /// conversation actionable.
    Failure {
        kind: ErrorKind,
        message: String,
        violations: Option<Vec<Violation>>,
        failed_message: MessageId,
    },
    /// The placeholder was removed; nothing to display.
    Cancelled,
}

impl RefinementOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RefinementOutcome::Success { .. } => "success",
            RefinementOutcome::Clarification { .. } => "clarification",
            RefinementOutcome::Failure { .. } => "failure",
            RefinementOutcome::Cancelled => "cancelled",
        }
    }
}

struct SessionState<S> {
    scope: S,
    overlay: MessageOverlay,
    retry_contexts: RetryContextStore,
    in_flight: bool,
    notice: Option<SessionNotice>,
}

/// Conversation session for one scope.
///
/// Cheap to clone; clones share the same state, so the in-flight rule holds
/// across all of them.
pub struct SessionManager<S: ConversationScope> {
    state: Arc<Mutex<SessionState<S>>>,
    client: HostClient,
}

impl<S: ConversationScope> Clone for SessionManager<S> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            client: self.client.clone(),
        }
    }
}

impl<S: ConversationScope> SessionManager<S> {
    pub fn new(scope: S, client: HostClient) -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState {
                scope,
                overlay: MessageOverlay::new(),
                retry_contexts: RetryContextStore::new(),
                in_flight: false,
                notice: None,
            })),
            client,
        }
    }

    /// False whenever this scope has a request pending.
    pub fn can_send(&self) -> bool {
        !self.state.lock().in_flight
    }

    pub fn scope_descriptor(&self) -> ScopeDescriptor {
        self.state.lock().scope.descriptor()
    }

    /// Snapshot of the scope's current graph.
    pub fn graph(&self) -> WorkflowGraph {
        self.state.lock().scope.graph().clone()
    }

    /// Snapshot of the persisted conversation.
    pub fn history(&self) -> ConversationHistory {
        self.state.lock().scope.history().clone()
    }

    /// Transient display state for a message, if any.
    pub fn transient(&self, id: &MessageId) -> Option<MessageTransient> {
        self.state.lock().overlay.get(id).cloned()
    }

    /// One-time notices (session reconnects); taking consumes.
    pub fn take_notice(&self) -> Option<SessionNotice> {
        self.state.lock().notice.take()
    }

    /// True once the advisory banner suggesting a fresh conversation should
    /// show.
    pub fn nearing_iteration_limit(&self) -> bool {
        self.state.lock().scope.history().iterations >= ITERATION_ADVISORY_THRESHOLD
    }

    /// Apply a manual edit to the scope's graph.
    ///
    /// Invalidates all stored retry contexts: their violations were produced
    /// against a graph that no longer exists.
    pub fn edit_graph<R>(&self, edit: impl FnOnce(&mut WorkflowGraph) -> R) -> R {
        let mut state = self.state.lock();
        let result = edit(state.scope.graph_mut());
        state.retry_contexts.invalidate_all();
        result
    }

    /// Send a refinement instruction for this scope.
    ///
    /// The user message and a loading assistant placeholder are appended
    /// before any network round trip. Exactly one request may be in flight
    /// per scope; a second send is rejected without contacting the channel.
    pub async fn send(
        &self,
        text: &str,
        options: RefineOptions,
        cancel: &CancelSignal,
    ) -> Result<RefinementOutcome, SessionError> {
        self.send_inner(text, options, None, cancel).await
    }

    /// Re-invoke the user message behind a failed assistant message,
    /// attaching (and consuming) any stored validation context.
    pub async fn retry(
        &self,
        failed: &MessageId,
        options: RefineOptions,
        cancel: &CancelSignal,
    ) -> Result<RefinementOutcome, SessionError> {
        let (text, context) = {
            let mut state = self.state.lock();
            let index = state
                .scope
                .history()
                .index_of(failed)
                .ok_or_else(|| SessionError::UnknownMessage { id: failed.clone() })?;
            let message = &state.scope.history().messages[index];
            let retryable = message.sender == Sender::Assistant
                && message.error.is_some_and(ErrorKind::is_retryable);
            if !retryable {
                return Err(SessionError::NotRetryable { id: failed.clone() });
            }
            let text = state.scope.history().messages[..index]
                .iter()
                .rev()
                .find(|m| m.sender == Sender::User)
                .map(|m| m.content.clone())
                .ok_or_else(|| SessionError::NotRetryable { id: failed.clone() })?;
            let context = state.retry_contexts.take(failed);
            (text, context)
        };
        self.send_inner(&text, options, context, cancel).await
    }

    /// Clear this scope's conversation.
    ///
    /// The top-level scope round-trips through the host so host-held context
    /// is also cleared; nested scopes have no independent host-side session
    /// and reset locally.
    pub async fn clear_history(&self) -> Result<(), SessionError> {
        let descriptor = {
            let state = self.state.lock();
            if state.in_flight {
                return Err(SessionError::RequestInFlight);
            }
            state.scope.descriptor()
        };
        if descriptor == ScopeDescriptor::TopLevel {
            self.client
                .clear_conversation(ScopeDescriptor::TopLevel)
                .await?;
        }
        let mut state = self.state.lock();
        state.scope.reset_history();
        state.overlay.clear_all();
        state.retry_contexts.invalidate_all();
        state.notice = None;
        Ok(())
    }

    async fn send_inner(
        &self,
        text: &str,
        options: RefineOptions,
        prior_violations: Option<Vec<Violation>>,
        cancel: &CancelSignal,
    ) -> Result<RefinementOutcome, SessionError> {
        let (placeholder_id, payload, budget) = {
            let mut state = self.state.lock();
            if state.in_flight {
                return Err(SessionError::RequestInFlight);
            }
            let len = text.chars().count();
            if len == 0 || len > MAX_USER_MESSAGE_LEN {
                return Err(SessionError::MessageLength { len });
            }
            let violations = validation::validate(state.scope.graph());
            if !violations.is_empty() {
                return Err(SessionError::GraphInvalid { violations });
            }

            state.scope.history_mut().push(ConversationMessage::user(text));
            let history_snapshot = state.scope.history().messages.clone();

            let placeholder = ConversationMessage::assistant_placeholder();
            let placeholder_id = placeholder.id.clone();
            state.scope.history_mut().push(placeholder);
            state.overlay.begin_loading(placeholder_id.clone());

            let budget = refine_client_budget(options.server_budget());
            let timeout_secs = options.server_timeout_secs;
            let payload = RefinePayload {
                scope: state.scope.descriptor(),
                message: text.to_string(),
                graph: state.scope.graph().clone(),
                history: history_snapshot,
                session_id: state.scope.history().session_id.clone(),
                options,
                prior_violations,
                timeout_secs,
            };
            state.in_flight = true;
            (placeholder_id, payload, budget)
        };

        let mut guard = FlightGuard {
            state: Arc::clone(&self.state),
            placeholder: placeholder_id.clone(),
            armed: true,
        };
        let outcome = self.drive(payload, budget, &placeholder_id, cancel).await;
        guard.disarm();
        self.state.lock().in_flight = false;

        tracing::debug!(
            scope = %self.scope_descriptor().label(),
            outcome = outcome.label(),
            "refinement resolved"
        );
        Ok(outcome)
    }

    async fn drive(
        &self,
        payload: RefinePayload,
        budget: Duration,
        placeholder_id: &MessageId,
        cancel: &CancelSignal,
    ) -> RefinementOutcome {
        let use_extended = payload.options.use_extended_agent_nodes;
        let mut handle = match self
            .client
            .correlator()
            .send_with_budget(RequestPayload::RefineGraph(Box::new(payload)), budget)
        {
            Ok(handle) => handle,
            Err(ChannelError::Closed) => {
                return self.fail(
                    placeholder_id,
                    ErrorKind::Unknown,
                    "The editor host is unavailable.".to_string(),
                    None,
                );
            }
        };

        let mut accumulator = ProgressAccumulator::new();
        let mut cancel_sent = false;
        let resolution = loop {
            tokio::select! {
                event = handle.next_event() => match event {
                    RequestEvent::Progress(update) => {
                        accumulator.apply(&update);
                        let mut state = self.state.lock();
                        if let Some(message) =
                            state.scope.history_mut().message_mut(placeholder_id)
                        {
                            message.content = accumulator.display_text();
                        }
                        let tool = accumulator.tool_activity().cloned();
                        state.overlay.set_tool_activity(placeholder_id, tool);
                    }
                    RequestEvent::Resolved(resolution) => break resolution,
                },
                _ = cancel.cancelled(), if !cancel_sent => {
                    cancel_sent = true;
                    tracing::debug!(
                        correlation_id = %handle.correlation_id(),
                        "cancellation requested"
                    );
                    let _ = handle.cancel_notice();
                }
            }
        };
        accumulator.finish();
        self.commit(resolution, &accumulator, placeholder_id, cancel_sent, use_extended)
    }

    fn commit(
        &self,
        resolution: Resolution,
        accumulator: &ProgressAccumulator,
        placeholder_id: &MessageId,
        cancel_sent: bool,
        use_extended: bool,
    ) -> RefinementOutcome {
        match resolution {
            Resolution::Reply(ReplyPayload::RefineSuccess(success)) => {
                self.commit_success(*success, accumulator, placeholder_id, use_extended)
            }
            Resolution::Reply(ReplyPayload::RefineClarification(clarification)) => {
                let mut state = self.state.lock();
                let content = final_content(&clarification.assistant_message, accumulator);
                let assistant = finalize_assistant(&mut state, placeholder_id, content);
                let continuity = register_continuity(
                    &mut state,
                    clarification.session_id,
                    clarification.session_resumed,
                );
                RefinementOutcome::Clarification {
                    assistant,
                    continuity,
                }
            }
            Resolution::Reply(ReplyPayload::RefineCancelled) => {
                self.remove_placeholder(placeholder_id)
            }
            Resolution::Reply(ReplyPayload::RefineFailed(failure))
            | Resolution::Reply(ReplyPayload::Error(failure)) => {
                let message = if failure.message.is_empty() {
                    failure.kind.generic_message().to_string()
                } else {
                    failure.message
                };
                self.fail(placeholder_id, failure.kind, message, failure.violations)
            }
            Resolution::Reply(_) => self.fail(
                placeholder_id,
                ErrorKind::Unknown,
                ErrorKind::Unknown.generic_message().to_string(),
                None,
            ),
            // The host never acknowledged the cancellation; from the user's
            // perspective the request was cancelled, not failed.
            Resolution::TimedOut if cancel_sent => self.remove_placeholder(placeholder_id),
            Resolution::TimedOut => self.fail(
                placeholder_id,
                ErrorKind::Timeout,
                ErrorKind::Timeout.generic_message().to_string(),
                None,
            ),
            Resolution::ChannelClosed => self.fail(
                placeholder_id,
                ErrorKind::Unknown,
                "The editor host is unavailable.".to_string(),
                None,
            ),
        }
    }

    fn commit_success(
        &self,
        success: RefineSuccess,
        accumulator: &ProgressAccumulator,
        placeholder_id: &MessageId,
        use_extended: bool,
    ) -> RefinementOutcome {
        let RefineSuccess {
            graph,
            assistant_message,
            session_id,
            session_resumed,
        } = success;

        if !use_extended && graph.nodes.iter().any(Node::is_extended_agent) {
            return self.fail(
                placeholder_id,
                ErrorKind::ProhibitedOperation,
                "The refined workflow uses extended agent nodes, which are disabled.".to_string(),
                None,
            );
        }

        let violations = validation::validate(&graph);
        if !violations.is_empty() {
            let message = validation::user_facing_message(&violations)
                .unwrap_or_else(|| ErrorKind::Validation.generic_message().to_string());
            return self.fail(
                placeholder_id,
                ErrorKind::Validation,
                message,
                Some(violations),
            );
        }

        let mut state = self.state.lock();
        state.scope.apply_refined(graph);
        let content = final_content(&assistant_message, accumulator);
        let assistant = finalize_assistant(&mut state, placeholder_id, content);
        let continuity = register_continuity(&mut state, session_id, session_resumed);
        state.scope.history_mut().iterations += 1;
        RefinementOutcome::Success {
            assistant,
            continuity,
        }
    }

    fn fail(
        &self,
        placeholder_id: &MessageId,
        kind: ErrorKind,
        message: String,
        violations: Option<Vec<Violation>>,
    ) -> RefinementOutcome {
        let mut state = self.state.lock();
        // Error suppresses loading: the overlay entry goes away.
        state.overlay.finish(placeholder_id);
        if let Some(entry) = state.scope.history_mut().message_mut(placeholder_id) {
            entry.error = Some(kind);
            if entry.content.is_empty() {
                entry.content = message.clone();
            }
        }
        if kind == ErrorKind::Validation
            && let Some(violations) = &violations
        {
            state
                .retry_contexts
                .store(placeholder_id.clone(), violations.clone());
        }
        RefinementOutcome::Failure {
            kind,
            message,
            violations,
            failed_message: placeholder_id.clone(),
        }
    }

    fn remove_placeholder(&self, placeholder_id: &MessageId) -> RefinementOutcome {
        let mut state = self.state.lock();
        state.overlay.finish(placeholder_id);
        state.scope.history_mut().remove(placeholder_id);
        RefinementOutcome::Cancelled
    }
}

/// Final assistant text: the host's returned message, or the accumulated
/// explanatory text when the host returned none. The result replaces the
/// placeholder's streamed content, so identical texts collapse into one
/// bubble.
fn final_content(reply: &str, accumulator: &ProgressAccumulator) -> String {
    let reply = reply.trim();
    if reply.is_empty() {
        accumulator.explanatory_text()
    } else {
        reply.to_string()
    }
}

fn finalize_assistant<S: ConversationScope>(
    state: &mut SessionState<S>,
    placeholder_id: &MessageId,
    content: String,
) -> ConversationMessage {
    state.overlay.finish(placeholder_id);
    match state.scope.history_mut().message_mut(placeholder_id) {
        Some(message) => {
            message.content = content;
            message.error = None;
            message.clone()
        }
        None => {
            let mut message = ConversationMessage::assistant_placeholder();
            message.content = content;
            state.scope.history_mut().push(message.clone());
            message
        }
    }
}

fn register_continuity<S: ConversationScope>(
    state: &mut SessionState<S>,
    session_id: Option<String>,
    session_resumed: bool,
) -> SessionContinuity {
    let continuity = if state.scope.history().session_id.is_none() {
        SessionContinuity::Fresh
    } else if session_resumed {
        state.notice = Some(SessionNotice::Reconnected);
        tracing::info!("host session was reconnected; context may be partial");
        SessionContinuity::Reconnected
    } else {
        SessionContinuity::Continued
    };
    if let Some(session_id) = session_id {
        state.scope.history_mut().session_id = Some(session_id);
    }
    continuity
}

/// Releases the scope if a send future is dropped mid-flight; the
/// half-finished placeholder is removed along with its overlay entry.
struct FlightGuard<S: ConversationScope> {
    state: Arc<Mutex<SessionState<S>>>,
    placeholder: MessageId,
    armed: bool,
}

impl<S: ConversationScope> FlightGuard<S> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<S: ConversationScope> Drop for FlightGuard<S> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.state.lock();
        state.in_flight = false;
        state.overlay.finish(&self.placeholder);
        state.scope.history_mut().remove(&self.placeholder);
    }
}
