//! Workflow graph data model.
//!
//! This module defines the artifact the editor operates on: a
//! [`WorkflowGraph`] of typed [`Node`]s joined by [`Connection`]s. The model
//! carries exactly the structure the validator and the refinement protocol
//! need; node-type semantics beyond that (how a node *executes*) belong to
//! the host application.
//!
//! # Examples
//!
//! ```
//! use flowsmith::graph::{Connection, Node, NodeConfig, WorkflowGraph};
//!
//! let graph = WorkflowGraph::new("wf-1", "daily-report", "1.0.0")
//!     .with_node(Node::new("start", NodeConfig::Start))
//!     .with_node(Node::new("end", NodeConfig::End))
//!     .with_connection(Connection::new("c1", "start", "end"));
//!
//! assert!(graph.has_end_node());
//! assert_eq!(graph.node("start").unwrap().display_name(), "start");
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The workflow artifact being edited.
///
/// Node order is irrelevant; identity is by id. Structural invariants
/// (name/version patterns, node cardinality, referential integrity) are
/// checked by [`crate::validation::validate`], not enforced on construction,
/// so that in-progress edits can always be represented.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Semantic version string, `major.minor.patch`.
    pub version: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl WorkflowGraph {
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            version: version.into(),
            nodes: Vec::new(),
            connections: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    #[must_use]
    pub fn with_connection(mut self, connection: Connection) -> Self {
        self.connections.push(connection);
        self
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// True when at least one terminal (`end`) node is present.
    pub fn has_end_node(&self) -> bool {
        self.nodes.iter().any(Node::is_end)
    }
}

/// A single step in the workflow.
///
/// The display name is optional and falls back to the id; the type-specific
/// payload is carried inline under a `type` discriminator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub config: NodeConfig,
}

impl Node {
    pub fn new(id: impl Into<String>, config: NodeConfig) -> Self {
        Self {
            id: id.into(),
            name: None,
            config,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Display name shown in the editor; falls back to the node id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn is_end(&self) -> bool {
        matches!(self.config, NodeConfig::End)
    }

    /// True for the extensible agent kind with configurable model/sandbox.
    pub fn is_extended_agent(&self) -> bool {
        matches!(self.config, NodeConfig::CustomAgent { .. })
    }

    /// The outgoing-branch labels a node of this type declares, when the
    /// type carries labeled options. Connection condition labels are checked
    /// against this set by the validator.
    pub fn option_labels(&self) -> Option<Vec<String>> {
        match &self.config {
            NodeConfig::UserQuestion { options, .. } => {
                Some(options.iter().map(|o| o.label.clone()).collect())
            }
            NodeConfig::LegacyBranch { options } => Some(options.clone()),
            NodeConfig::IfElse { .. } => Some(vec!["true".into(), "false".into()]),
            NodeConfig::Switch { cases, .. } => Some(cases.clone()),
            _ => None,
        }
    }

    /// Kebab-case label of the node type, as used in messages and the wire
    /// format.
    pub fn type_label(&self) -> &'static str {
        match self.config {
            NodeConfig::Start => "start",
            NodeConfig::End => "end",
            NodeConfig::AgentCall { .. } => "agent-call",
            NodeConfig::UserQuestion { .. } => "user-question",
            NodeConfig::LegacyBranch { .. } => "legacy-branch",
            NodeConfig::IfElse { .. } => "if-else",
            NodeConfig::Switch { .. } => "switch",
            NodeConfig::PromptTemplate { .. } => "prompt-template",
            NodeConfig::SkillReference { .. } => "skill-reference",
            NodeConfig::ToolCall { .. } => "tool-call",
            NodeConfig::AgentFlowReference { .. } => "agent-flow-reference",
            NodeConfig::AgentFlow { .. } => "agent-flow",
            NodeConfig::CustomAgent { .. } => "custom-agent",
        }
    }
}

/// Type-specific node payload.
///
/// The variant set is closed apart from [`NodeConfig::CustomAgent`], the
/// extensible agent kind. Payload fields are limited to what validation
/// needs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum NodeConfig {
    Start,
    End,
    AgentCall {
        description: String,
        prompt: String,
    },
    UserQuestion {
        question: String,
        /// When set, the host suggests options at runtime and the 2–4
        /// options rule is waived.
        #[serde(default)]
        use_ai_suggestions: bool,
        #[serde(default)]
        options: Vec<QuestionOption>,
    },
    LegacyBranch {
        #[serde(default)]
        options: Vec<String>,
    },
    IfElse {
        condition: String,
    },
    Switch {
        expression: String,
        #[serde(default)]
        cases: Vec<String>,
    },
    PromptTemplate {
        template: String,
    },
    SkillReference {
        skill: String,
    },
    ToolCall {
        tool: String,
        #[serde(default)]
        arguments: Value,
    },
    AgentFlowReference {
        flow: String,
    },
    /// A nested sub-flow embedded in the parent graph. This is the body a
    /// nested conversation scope edits.
    AgentFlow {
        #[serde(default)]
        nodes: Vec<Node>,
        #[serde(default)]
        connections: Vec<Connection>,
    },
    /// Extensible agent kind with configurable model and sandbox mode.
    CustomAgent {
        description: String,
        prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default)]
        sandbox: SandboxMode,
    },
}

/// Sandbox mode for [`NodeConfig::CustomAgent`] nodes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxMode {
    #[default]
    Inherit,
    ReadOnly,
    Unrestricted,
}

/// One selectable option of a user-question node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,
    pub description: String,
}

impl QuestionOption {
    pub fn new(label: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            description: description.into(),
        }
    }
}

/// A directed edge between two node ports.
///
/// Connections have no ownership beyond the graph; deleting either endpoint
/// node deletes the connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub source_port: String,
    #[serde(default)]
    pub target_port: String,
    /// Branch label; must match one of the source node's declared option
    /// labels when the source type carries them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl Connection {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            source_port: String::from("out"),
            target_port: String::from("in"),
            condition: None,
        }
    }

    #[must_use]
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    /// Nodes serialize with an inline kebab-case `type` discriminator.
    fn node_serialization_uses_type_tag() {
        let node = Node::new(
            "ask",
            NodeConfig::UserQuestion {
                question: "Which format?".into(),
                use_ai_suggestions: false,
                options: vec![
                    QuestionOption::new("pdf", "Portable document"),
                    QuestionOption::new("html", "Web page"),
                ],
            },
        )
        .with_name("pick-format");

        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "user-question");
        assert_eq!(json["name"], "pick-format");

        let parsed: Node = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, node);
    }

    #[test]
    fn display_name_falls_back_to_id() {
        let anonymous = Node::new("fetch", NodeConfig::Start);
        assert_eq!(anonymous.display_name(), "fetch");

        let named = anonymous.with_name("fetch-data");
        assert_eq!(named.display_name(), "fetch-data");
    }

    #[test]
    fn option_labels_cover_branching_types() {
        let question = Node::new(
            "q",
            NodeConfig::UserQuestion {
                question: "?".into(),
                use_ai_suggestions: false,
                options: vec![QuestionOption::new("yes", "y"), QuestionOption::new("no", "n")],
            },
        );
        assert_eq!(
            question.option_labels(),
            Some(vec!["yes".into(), "no".into()])
        );

        let branch = Node::new(
            "b",
            NodeConfig::IfElse {
                condition: "count > 3".into(),
            },
        );
        assert_eq!(
            branch.option_labels(),
            Some(vec!["true".into(), "false".into()])
        );

        let agent = Node::new(
            "a",
            NodeConfig::AgentCall {
                description: "d".into(),
                prompt: "p".into(),
            },
        );
        assert_eq!(agent.option_labels(), None);
    }

    #[test]
    fn nested_flow_round_trips() {
        let flow = Node::new(
            "sub",
            NodeConfig::AgentFlow {
                nodes: vec![
                    Node::new("s", NodeConfig::Start),
                    Node::new("e", NodeConfig::End),
                ],
                connections: vec![Connection::new("c", "s", "e")],
            },
        );
        let json = serde_json::to_string(&flow).unwrap();
        let parsed: Node = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, flow);
    }
}
