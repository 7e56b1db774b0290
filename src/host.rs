//! Typed façade over the correlator for one-shot host operations.
//!
//! Persist, export, and run are validation-gated here: a graph with
//! violations never reaches the channel. Refinement goes through the
//! session manager instead, which owns its own conversation bookkeeping.

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;

use crate::error::ErrorKind;
use crate::graph::WorkflowGraph;
use crate::protocol::wire::{
    GENERATE_SERVER_BUDGET_SECS, ProviderModels, RefineOptions, ReplyPayload, RequestPayload,
    ScopeDescriptor,
};
use crate::protocol::{ChannelError, Correlator, Resolution};
use crate::validation::{self, Violation};

/// Errors from one-shot host operations.
#[derive(Debug, Error, Diagnostic)]
pub enum HostError {
    /// The graph failed validation locally; the channel was never contacted.
    #[error("graph failed validation with {} violation(s)", violations.len())]
    #[diagnostic(
        code(flowsmith::host::validation),
        help("Fix the reported violations; nothing was sent to the host.")
    )]
    Validation { violations: Vec<Violation> },

    /// The host answered with a failure payload.
    #[error("host rejected the request ({kind}): {message}")]
    #[diagnostic(code(flowsmith::host::rejected))]
    Rejected { kind: ErrorKind, message: String },

    /// No terminal message within the budget for this request kind.
    #[error("host did not answer within the timeout budget")]
    #[diagnostic(code(flowsmith::host::timeout), help("The host may be busy. Try again."))]
    TimedOut,

    #[error(transparent)]
    #[diagnostic(transparent)]
    Channel(#[from] ChannelError),
}

impl HostError {
    fn from_reply(reply: ReplyPayload) -> Self {
        match reply {
            ReplyPayload::SaveGraphFailed(failure)
            | ReplyPayload::ExportGraphFailed(failure)
            | ReplyPayload::GenerateGraphFailed(failure)
            | ReplyPayload::ClearConversationFailed(failure)
            | ReplyPayload::ListModelsFailed(failure)
            | ReplyPayload::RefineFailed(failure)
            | ReplyPayload::Error(failure) => HostError::Rejected {
                kind: failure.kind,
                message: failure.message,
            },
            other => HostError::Rejected {
                kind: ErrorKind::Unknown,
                message: format!("unexpected host reply: {other:?}"),
            },
        }
    }

    fn from_resolution(resolution: Resolution) -> Self {
        match resolution {
            Resolution::Reply(reply) => Self::from_reply(reply),
            Resolution::TimedOut => HostError::TimedOut,
            Resolution::ChannelClosed => HostError::Channel(ChannelError::Closed),
        }
    }
}

/// Cloneable client for host-side operations, sharing one correlator.
#[derive(Clone)]
pub struct HostClient {
    correlator: Arc<Correlator>,
}

impl HostClient {
    pub fn new(correlator: Arc<Correlator>) -> Self {
        Self { correlator }
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    /// Persist the graph. Gated on [`validation::validate_for_launch`].
    pub async fn save_graph(&self, graph: &WorkflowGraph) -> Result<(), HostError> {
        self.launch_gated(graph)?;
        let handle = self.correlator.send(RequestPayload::SaveGraph {
            graph: graph.clone(),
        })?;
        match handle.resolve().await {
            Resolution::Reply(ReplyPayload::SaveGraphSuccess) => Ok(()),
            other => Err(HostError::from_resolution(other)),
        }
    }

    /// Export the graph. Gated on [`validation::validate_for_launch`].
    pub async fn export_graph(&self, graph: &WorkflowGraph) -> Result<(), HostError> {
        self.launch_gated(graph)?;
        let handle = self.correlator.send(RequestPayload::ExportGraph {
            graph: graph.clone(),
        })?;
        match handle.resolve().await {
            Resolution::Reply(ReplyPayload::ExportGraphSuccess) => Ok(()),
            other => Err(HostError::from_resolution(other)),
        }
    }

    /// Ask the executor to generate a fresh graph from a prompt.
    pub async fn generate_graph(
        &self,
        prompt: &str,
        options: RefineOptions,
    ) -> Result<WorkflowGraph, HostError> {
        let handle = self.correlator.send(RequestPayload::GenerateGraph {
            prompt: prompt.to_string(),
            options,
            timeout_secs: GENERATE_SERVER_BUDGET_SECS,
        })?;
        match handle.resolve().await {
            Resolution::Reply(ReplyPayload::GenerateGraphSuccess { graph }) => Ok(graph),
            other => Err(HostError::from_resolution(other)),
        }
    }

    /// List selectable providers and models.
    pub async fn list_models(&self) -> Result<Vec<ProviderModels>, HostError> {
        let handle = self.correlator.send(RequestPayload::ListModels)?;
        match handle.resolve().await {
            Resolution::Reply(ReplyPayload::ListModelsSuccess { providers }) => Ok(providers),
            other => Err(HostError::from_resolution(other)),
        }
    }

    /// Clear the host-held conversation context for a scope.
    pub(crate) async fn clear_conversation(
        &self,
        scope: ScopeDescriptor,
    ) -> Result<(), HostError> {
        let handle = self
            .correlator
            .send(RequestPayload::ClearConversation { scope })?;
        match handle.resolve().await {
            Resolution::Reply(ReplyPayload::ClearConversationSuccess) => Ok(()),
            other => Err(HostError::from_resolution(other)),
        }
    }

    fn launch_gated(&self, graph: &WorkflowGraph) -> Result<(), HostError> {
        let violations = validation::validate_for_launch(graph);
        if violations.is_empty() {
            Ok(())
        } else {
            tracing::debug!(
                graph = %graph.name,
                count = violations.len(),
                "blocking host operation on validation"
            );
            Err(HostError::Validation { violations })
        }
    }
}
