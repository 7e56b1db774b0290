//! Wire format of the shared UI ↔ host message channel.
//!
//! Every outbound request carries a type tag, a correlation id, and a
//! kind-specific payload; every inbound message carries a type tag, an
//! optional correlation id (absent for unsolicited host pushes), and a
//! kind-specific payload. The envelopes serialize to flat JSON objects with
//! kebab-case `type` discriminators, which is the shape the host boundary
//! speaks.

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::graph::WorkflowGraph;
use crate::progress::ProgressUpdate;
use crate::session::history::ConversationMessage;
use crate::validation::Violation;

/// Hard ceiling on the client-side refinement budget; bounds "unlimited"
/// server configurations.
pub const REFINE_BUDGET_CEILING: Duration = Duration::from_secs(600);
/// Grace added to a server-declared refinement budget so the server-side
/// timeout fires first.
pub const REFINE_BUDGET_GRACE: Duration = Duration::from_secs(5);
/// Server-declared budget sent with generate-graph requests.
pub const GENERATE_SERVER_BUDGET_SECS: u64 = 60;

/// Opaque token attached to a request and every message of its lifecycle.
///
/// Unique for the process lifetime; time-based with a random suffix, which
/// makes collisions negligible without requiring cryptographic uniqueness.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(format!(
            "req-{}-{:08x}",
            Utc::now().timestamp_millis(),
            rand::random::<u32>()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Which conversation a refinement or clear operation targets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "kebab-case")]
pub enum ScopeDescriptor {
    /// The top-level workflow.
    TopLevel,
    /// One nested sub-flow, identified by its node id.
    SubFlow { flow: String },
}

impl ScopeDescriptor {
    pub fn label(&self) -> String {
        match self {
            ScopeDescriptor::TopLevel => "top-level".to_string(),
            ScopeDescriptor::SubFlow { flow } => format!("sub-flow:{flow}"),
        }
    }
}

/// Kind of an outbound request, used for budget selection and tracing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestKind {
    SaveGraph,
    ExportGraph,
    GenerateGraph,
    RefineGraph,
    CancelRefine,
    ClearConversation,
    ListModels,
}

impl RequestKind {
    /// Default client-side timeout budget for this kind.
    ///
    /// Refinement budgets are caller-supplied; see [`refine_client_budget`].
    pub fn default_budget(self) -> Duration {
        match self {
            RequestKind::SaveGraph | RequestKind::ExportGraph => Duration::from_secs(10),
            RequestKind::GenerateGraph => Duration::from_secs(65),
            RequestKind::RefineGraph => REFINE_BUDGET_CEILING,
            RequestKind::CancelRefine | RequestKind::ClearConversation | RequestKind::ListModels => {
                Duration::from_secs(5)
            }
        }
    }
}

/// Client-side budget for a refinement request.
///
/// `min(server_budget + 5s, 600s)` when the server declared a budget, else
/// the flat 600 s ceiling.
pub fn refine_client_budget(server_budget: Option<Duration>) -> Duration {
    match server_budget {
        Some(server) => (server + REFINE_BUDGET_GRACE).min(REFINE_BUDGET_CEILING),
        None => REFINE_BUDGET_CEILING,
    }
}

/// Caller-selected options carried on refine and generate requests.
///
/// Passed explicitly into every send; the session manager keeps no ambient
/// option state. Provider-dependent fields (allowed tools, reasoning effort)
/// are forwarded as-is; some providers ignore them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RefineOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_tools: Vec<String>,
    #[serde(default)]
    pub use_skills: bool,
    #[serde(default)]
    pub use_extended_agent_nodes: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Server-side refinement budget, in seconds. `None` means the server
    /// runs unlimited and the client ceiling applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_timeout_secs: Option<u64>,
}

impl RefineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = tools;
        self
    }

    #[must_use]
    pub fn with_skills(mut self, enabled: bool) -> Self {
        self.use_skills = enabled;
        self
    }

    #[must_use]
    pub fn with_extended_agent_nodes(mut self, enabled: bool) -> Self {
        self.use_extended_agent_nodes = enabled;
        self
    }

    #[must_use]
    pub fn with_reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning_effort = Some(effort);
        self
    }

    #[must_use]
    pub fn with_server_timeout(mut self, secs: u64) -> Self {
        self.server_timeout_secs = Some(secs);
        self
    }

    /// Server-declared budget as a [`Duration`].
    pub fn server_budget(&self) -> Option<Duration> {
        self.server_timeout_secs.map(Duration::from_secs)
    }
}

/// Reasoning-effort setting, where the selected provider supports one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

/// One provider's selectable models, as reported by list-models.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderModels {
    pub provider: String,
    pub models: Vec<ModelInfo>,
}

/// A selectable model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub supports_reasoning_effort: bool,
}

/// Body of a refine-graph request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefinePayload {
    pub scope: ScopeDescriptor,
    /// The user's instruction, 1–5000 characters.
    pub message: String,
    /// Snapshot of the graph (or sub-flow body) being refined.
    pub graph: WorkflowGraph,
    /// Persisted conversation snapshot, most recent user message included.
    pub history: Vec<ConversationMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub options: RefineOptions,
    /// Violations from the previous failed attempt, attached to exactly one
    /// retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_violations: Option<Vec<Violation>>,
    /// Server-declared budget forwarded for the executor's benefit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Kind-specific payload of an outbound request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RequestPayload {
    SaveGraph { graph: WorkflowGraph },
    ExportGraph { graph: WorkflowGraph },
    GenerateGraph {
        prompt: String,
        options: RefineOptions,
        timeout_secs: u64,
    },
    RefineGraph(Box<RefinePayload>),
    CancelRefine,
    ClearConversation { scope: ScopeDescriptor },
    ListModels,
}

impl RequestPayload {
    pub fn kind(&self) -> RequestKind {
        match self {
            RequestPayload::SaveGraph { .. } => RequestKind::SaveGraph,
            RequestPayload::ExportGraph { .. } => RequestKind::ExportGraph,
            RequestPayload::GenerateGraph { .. } => RequestKind::GenerateGraph,
            RequestPayload::RefineGraph(_) => RequestKind::RefineGraph,
            RequestPayload::CancelRefine => RequestKind::CancelRefine,
            RequestPayload::ClearConversation { .. } => RequestKind::ClearConversation,
            RequestPayload::ListModels => RequestKind::ListModels,
        }
    }
}

/// Error body of a `*-failed` or generic error reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailurePayload {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violations: Option<Vec<Violation>>,
}

impl FailurePayload {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            violations: None,
        }
    }

    #[must_use]
    pub fn with_violations(mut self, violations: Vec<Violation>) -> Self {
        self.violations = Some(violations);
        self
    }
}

/// Successful refinement body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefineSuccess {
    pub graph: WorkflowGraph,
    /// The assistant's final message text. May be empty when the narrative
    /// streamed in full over progress notifications.
    #[serde(default)]
    pub assistant_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// True when the host lost and recreated its session; turn-by-turn
    /// context may have been partially lost even though the transcript is
    /// intact.
    #[serde(default)]
    pub session_resumed: bool,
}

/// Clarification body: the assistant asked a question instead of producing
/// an edit; the graph is untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefineClarification {
    pub assistant_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub session_resumed: bool,
}

/// Kind-specific payload of an inbound message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ReplyPayload {
    RefineSuccess(Box<RefineSuccess>),
    RefineClarification(RefineClarification),
    RefineProgress(ProgressUpdate),
    RefineCancelled,
    RefineFailed(FailurePayload),
    SaveGraphSuccess,
    SaveGraphFailed(FailurePayload),
    ExportGraphSuccess,
    ExportGraphFailed(FailurePayload),
    GenerateGraphSuccess { graph: WorkflowGraph },
    GenerateGraphFailed(FailurePayload),
    ClearConversationSuccess,
    ClearConversationFailed(FailurePayload),
    ListModelsSuccess { providers: Vec<ProviderModels> },
    ListModelsFailed(FailurePayload),
    /// Generic error for requests the host could not attribute to a kind.
    Error(FailurePayload),
    /// Unsolicited host push; never resolves a request.
    StatusUpdate { message: String },
}

impl ReplyPayload {
    /// Progress messages feed the caller's progress stream without resolving
    /// the request.
    pub fn is_progress(&self) -> bool {
        matches!(self, ReplyPayload::RefineProgress(_))
    }

    /// Whether this payload resolves a pending request.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            ReplyPayload::RefineProgress(_) | ReplyPayload::StatusUpdate { .. }
        )
    }
}

/// Outbound message: correlation id plus request payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    pub correlation_id: CorrelationId,
    #[serde(flatten)]
    pub payload: RequestPayload,
}

/// Inbound message: optional correlation id plus reply payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    #[serde(flatten)]
    pub payload: ReplyPayload,
}
