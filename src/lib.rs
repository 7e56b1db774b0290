//! # Flowsmith: core engine for an AI-assisted workflow editor
//!
//! Flowsmith is the engine underneath a visual editor for AI-agent workflow
//! graphs: the graph validation rules, the request/response protocol to the
//! embedding host, and the multi-turn refinement sessions that let a user
//! rewrite a graph by describing the change in natural language.
//!
//! Rendering, drag-and-drop, dialogs, and the AI executor itself are
//! external collaborators: the host supplies a message channel and an
//! executor behind it, and this crate supplies everything between the user's
//! instruction and the committed graph.
//!
//! ## Core Concepts
//!
//! - **Graph**: the [`graph::WorkflowGraph`] of typed nodes and connections
//!   being edited
//! - **Validation**: total, synchronous invariant checks gating persist,
//!   export, run, and refinement
//! - **Correlator**: demultiplexes one shared host channel by correlation
//!   id, with budgets, cancellation, and exactly-once resolution
//! - **Sessions**: per-scope conversation state machines driving the
//!   refinement cycle
//!
//! ## Validating a graph
//!
//! ```
//! use flowsmith::graph::{Connection, Node, NodeConfig, WorkflowGraph};
//! use flowsmith::validation::validate_for_launch;
//!
//! let graph = WorkflowGraph::new("wf-1", "daily-report", "1.0.0")
//!     .with_node(Node::new("start", NodeConfig::Start))
//!     .with_node(Node::new("end", NodeConfig::End))
//!     .with_connection(Connection::new("c1", "start", "end"));
//!
//! assert!(validate_for_launch(&graph).is_empty());
//! ```
//!
//! ## Driving a refinement session
//!
//! ```no_run
//! use std::sync::Arc;
//! use flowsmith::graph::WorkflowGraph;
//! use flowsmith::host::HostClient;
//! use flowsmith::protocol::{Correlator, RefineOptions};
//! use flowsmith::session::{CancelSignal, SessionManager, WorkflowScope};
//!
//! # async fn example(
//! #     outbound: flume::Sender<flowsmith::protocol::OutboundEnvelope>,
//! #     inbound: flume::Receiver<flowsmith::protocol::InboundEnvelope>,
//! #     graph: WorkflowGraph,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let client = HostClient::new(Arc::new(Correlator::new(outbound, inbound)));
//! let session = SessionManager::new(WorkflowScope::new(graph), client);
//!
//! let cancel = CancelSignal::new();
//! let outcome = session
//!     .send("add a summary step before the end", RefineOptions::new(), &cancel)
//!     .await?;
//! println!("refinement: {}", outcome.label());
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`graph`] - Workflow graph data model
//! - [`validation`] - Structural and semantic invariant checks
//! - [`protocol`] - Wire format and correlation over the host channel
//! - [`progress`] - Streaming progress accumulation
//! - [`session`] - Per-scope refinement conversations
//! - [`host`] - Typed one-shot host operations (save, export, generate)
//! - [`error`] - Failure taxonomy
//! - [`telemetry`] - Tracing bootstrap

pub mod error;
pub mod graph;
pub mod host;
pub mod progress;
pub mod protocol;
pub mod session;
pub mod telemetry;
pub mod validation;
