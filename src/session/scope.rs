//! Conversation scopes: the capability a session manager refines through.
//!
//! The refinement algorithm is written once against [`ConversationScope`].
//! The two concrete behaviors live in the trait implementations: replacing
//! the whole top-level graph, versus swapping only a sub-flow's node and
//! connection set.

use crate::graph::WorkflowGraph;
use crate::protocol::wire::ScopeDescriptor;

use super::history::ConversationHistory;

/// Access to the graph-or-subgraph and history of one refinement scope.
pub trait ConversationScope {
    fn descriptor(&self) -> ScopeDescriptor;

    fn graph(&self) -> &WorkflowGraph;

    /// Mutable access for manual edits made outside refinement.
    fn graph_mut(&mut self) -> &mut WorkflowGraph;

    /// Commit a refined result.
    fn apply_refined(&mut self, refined: WorkflowGraph);

    fn history(&self) -> &ConversationHistory;

    fn history_mut(&mut self) -> &mut ConversationHistory;

    fn reset_history(&mut self) {
        self.history_mut().clear();
    }
}

/// The top-level workflow scope: a refined result replaces the graph wholesale.
#[derive(Clone, Debug)]
pub struct WorkflowScope {
    graph: WorkflowGraph,
    history: ConversationHistory,
}

impl WorkflowScope {
    pub fn new(graph: WorkflowGraph) -> Self {
        Self {
            graph,
            history: ConversationHistory::new(),
        }
    }

    pub fn with_history(graph: WorkflowGraph, history: ConversationHistory) -> Self {
        Self { graph, history }
    }

    pub fn into_graph(self) -> WorkflowGraph {
        self.graph
    }
}

impl ConversationScope for WorkflowScope {
    fn descriptor(&self) -> ScopeDescriptor {
        ScopeDescriptor::TopLevel
    }

    fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    fn graph_mut(&mut self) -> &mut WorkflowGraph {
        &mut self.graph
    }

    fn apply_refined(&mut self, refined: WorkflowGraph) {
        self.graph = refined;
    }

    fn history(&self) -> &ConversationHistory {
        &self.history
    }

    fn history_mut(&mut self) -> &mut ConversationHistory {
        &mut self.history
    }
}

/// A nested sub-flow scope.
///
/// Holds the sub-flow's body as a graph; a refined result replaces only the
/// node and connection set, preserving the sub-flow's identity fields.
/// Nested scopes have no independent host-side session, so clearing their
/// history is a purely local reset.
#[derive(Clone, Debug)]
pub struct SubFlowScope {
    flow_id: String,
    graph: WorkflowGraph,
    history: ConversationHistory,
}

impl SubFlowScope {
    pub fn new(flow_id: impl Into<String>, graph: WorkflowGraph) -> Self {
        Self {
            flow_id: flow_id.into(),
            graph,
            history: ConversationHistory::new(),
        }
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }
}

impl ConversationScope for SubFlowScope {
    fn descriptor(&self) -> ScopeDescriptor {
        ScopeDescriptor::SubFlow {
            flow: self.flow_id.clone(),
        }
    }

    fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    fn graph_mut(&mut self) -> &mut WorkflowGraph {
        &mut self.graph
    }

    fn apply_refined(&mut self, refined: WorkflowGraph) {
        self.graph.nodes = refined.nodes;
        self.graph.connections = refined.connections;
    }

    fn history(&self) -> &ConversationHistory {
        &self.history
    }

    fn history_mut(&mut self) -> &mut ConversationHistory {
        &mut self.history
    }
}
