//! Shared helpers: a scripted fake host on the other side of the channel.
#![allow(dead_code)]

use std::sync::Arc;

use flowsmith::graph::{Connection, Node, NodeConfig, WorkflowGraph};
use flowsmith::host::HostClient;
use flowsmith::protocol::{
    Correlator, CorrelationId, InboundEnvelope, OutboundEnvelope, ReplyPayload,
};

/// The host side of the shared channel, driven explicitly by each test.
#[derive(Clone)]
pub struct FakeHost {
    outbound: flume::Receiver<OutboundEnvelope>,
    inbound: flume::Sender<InboundEnvelope>,
}

impl FakeHost {
    /// Next request the UI side dispatched.
    pub async fn recv(&self) -> OutboundEnvelope {
        self.outbound
            .recv_async()
            .await
            .expect("ui side closed the channel")
    }

    /// Non-blocking check that nothing (more) reached the channel.
    pub fn try_recv(&self) -> Option<OutboundEnvelope> {
        self.outbound.try_recv().ok()
    }

    /// Reply to a specific correlation id.
    pub fn reply(&self, correlation_id: CorrelationId, payload: ReplyPayload) {
        self.inbound
            .send(InboundEnvelope {
                correlation_id: Some(correlation_id),
                payload,
            })
            .expect("ui side closed the channel");
    }

    /// Push an unsolicited message (no correlation id).
    pub fn push(&self, payload: ReplyPayload) {
        self.inbound
            .send(InboundEnvelope {
                correlation_id: None,
                payload,
            })
            .expect("ui side closed the channel");
    }
}

/// Wire up a correlator/client against a fake host.
pub fn host_pair() -> (HostClient, FakeHost) {
    let (out_tx, out_rx) = flume::unbounded();
    let (in_tx, in_rx) = flume::unbounded();
    let client = HostClient::new(Arc::new(Correlator::new(out_tx, in_rx)));
    (
        client,
        FakeHost {
            outbound: out_rx,
            inbound: in_tx,
        },
    )
}

/// A valid two-node graph: start -> end.
pub fn minimal_graph() -> WorkflowGraph {
    WorkflowGraph::new("wf-1", "daily-report", "1.0.0")
        .with_node(Node::new("start", NodeConfig::Start))
        .with_node(Node::new("end", NodeConfig::End))
        .with_connection(Connection::new("c1", "start", "end"))
}

/// A valid refined variant of [`minimal_graph`] with an agent step added.
pub fn refined_graph() -> WorkflowGraph {
    WorkflowGraph::new("wf-1", "daily-report", "1.0.1")
        .with_node(Node::new("start", NodeConfig::Start))
        .with_node(Node::new(
            "summarize",
            NodeConfig::AgentCall {
                description: "Summarize the day's activity".into(),
                prompt: "Write a short summary of today's events.".into(),
            },
        ))
        .with_node(Node::new("end", NodeConfig::End))
        .with_connection(Connection::new("c1", "start", "summarize"))
        .with_connection(Connection::new("c2", "summarize", "end"))
}

pub fn agent_node(id: &str) -> Node {
    Node::new(
        id,
        NodeConfig::AgentCall {
            description: "worker".into(),
            prompt: "do the work".into(),
        },
    )
}
