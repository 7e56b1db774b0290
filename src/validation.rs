//! Structural and semantic validation of workflow graphs.
//!
//! [`validate`] is a total, synchronous check: it never fails on well-formed
//! structures, it only reports [`Violation`]s. A graph with zero violations
//! is valid and may be persisted, exported, run, or used as the basis for a
//! refinement request. The terminal-node rule is stricter and applies only
//! at persist/export/run time via [`validate_for_launch`], so in-progress
//! editing is never blocked by it.
//!
//! Re-running validation on an unchanged graph yields an identical violation
//! list; callers may cache or diff results freely.
//!
//! # Examples
//!
//! ```
//! use flowsmith::graph::{Connection, Node, NodeConfig, WorkflowGraph};
//! use flowsmith::validation::{validate, validate_for_launch};
//!
//! let graph = WorkflowGraph::new("wf-1", "daily-report", "1.0.0")
//!     .with_node(Node::new("start", NodeConfig::Start))
//!     .with_node(Node::new("end", NodeConfig::End))
//!     .with_connection(Connection::new("c1", "start", "end"));
//!
//! assert!(validate(&graph).is_empty());
//! assert!(validate_for_launch(&graph).is_empty());
//! ```

use std::sync::LazyLock;

use regex::Regex;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::graph::{Connection, Node, NodeConfig, WorkflowGraph};

/// Maximum node count per graph (and per nested sub-flow body).
pub const MAX_NODES: usize = 50;
/// Maximum agent prompt length in characters.
pub const MAX_PROMPT_LEN: usize = 10_000;
/// Graph name length bounds.
pub const MAX_GRAPH_NAME_LEN: usize = 100;
/// Node display name length bounds.
pub const MAX_DISPLAY_NAME_LEN: usize = 50;
/// Question option label length bound.
pub const MAX_OPTION_LABEL_LEN: usize = 50;
/// Question option description length bound.
pub const MAX_OPTION_DESCRIPTION_LEN: usize = 200;

const MIN_QUESTION_OPTIONS: usize = 2;
const MAX_QUESTION_OPTIONS: usize = 4;

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[a-z0-9_-]+$").expect("static pattern"));
static VERSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("static pattern"));

pub(crate) const MISSING_END_MESSAGE: &str = "workflow has no end node";

/// Category of a reported invariant breach.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationKind {
    MissingField,
    PatternMismatch,
    LengthBound,
    CardinalityBound,
    DanglingReference,
    CrossFieldMismatch,
}

/// A single reported breach of a graph or node invariant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub message: String,
    /// Offending node or connection id, when the breach is element-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
}

impl Violation {
    pub fn new(kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            element: None,
        }
    }

    #[must_use]
    pub fn with_element(mut self, element: impl Into<String>) -> Self {
        self.element = Some(element.into());
        self
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.element {
            Some(element) => write!(f, "{} ({element})", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Validate a graph's structural and per-node-type invariants.
///
/// Deterministic and idempotent; violations are reported in a stable order
/// (graph fields, then nodes in declaration order, then connections).
pub fn validate(graph: &WorkflowGraph) -> Vec<Violation> {
    let mut out = Vec::new();
    check_graph_fields(graph, &mut out);
    check_body(&graph.nodes, &graph.connections, &mut out);
    out
}

/// [`validate`] plus the terminal-node rule enforced at persist, export,
/// and run time.
pub fn validate_for_launch(graph: &WorkflowGraph) -> Vec<Violation> {
    let mut out = validate(graph);
    if !graph.has_end_node() {
        out.push(Violation::new(
            ViolationKind::CardinalityBound,
            MISSING_END_MESSAGE,
        ));
    }
    out
}

/// Translate the first violation into user-facing text.
///
/// Known cases get friendlier wording; anything else falls back to a generic
/// validation-failed message. Returns `None` for an empty list.
pub fn user_facing_message(violations: &[Violation]) -> Option<String> {
    let first = violations.first()?;
    if first.message == MISSING_END_MESSAGE {
        return Some("The workflow needs at least one end step before it can be saved or run.".into());
    }
    Some(match first.kind {
        ViolationKind::PatternMismatch => format!(
            "Names may only contain lowercase letters, digits, '-' and '_': {first}"
        ),
        ViolationKind::MissingField => format!("A required field is empty: {first}"),
        ViolationKind::LengthBound | ViolationKind::CardinalityBound => {
            format!("A limit was exceeded: {first}")
        }
        ViolationKind::DanglingReference => {
            format!("A connection points at a missing step: {first}")
        }
        ViolationKind::CrossFieldMismatch => {
            "The workflow failed validation. Review the highlighted steps and try again.".into()
        }
    })
}

fn check_graph_fields(graph: &WorkflowGraph, out: &mut Vec<Violation>) {
    check_name(&graph.name, "graph name", MAX_GRAPH_NAME_LEN, None, out);
    if !VERSION_PATTERN.is_match(&graph.version) {
        out.push(Violation::new(
            ViolationKind::PatternMismatch,
            format!("graph version must be major.minor.patch, got {:?}", graph.version),
        ));
    }
}

/// Checks shared by the top-level graph and nested sub-flow bodies.
fn check_body(nodes: &[Node], connections: &[Connection], out: &mut Vec<Violation>) {
    if nodes.len() > MAX_NODES {
        out.push(Violation::new(
            ViolationKind::CardinalityBound,
            format!("at most {MAX_NODES} nodes allowed, found {}", nodes.len()),
        ));
    }

    let mut seen = FxHashSet::default();
    for node in nodes {
        if !seen.insert(node.id.as_str()) {
            out.push(
                Violation::new(ViolationKind::CrossFieldMismatch, "duplicate node id")
                    .with_element(&node.id),
            );
        }
        check_node(node, out);
    }

    for connection in connections {
        check_connection(connection, nodes, out);
    }
}

fn check_node(node: &Node, out: &mut Vec<Violation>) {
    if let Some(name) = &node.name {
        check_name(
            name,
            "node name",
            MAX_DISPLAY_NAME_LEN,
            Some(&node.id),
            out,
        );
    }

    match &node.config {
        NodeConfig::Start | NodeConfig::End => {}
        NodeConfig::AgentCall { description, prompt }
        | NodeConfig::CustomAgent {
            description, prompt, ..
        } => {
            if description.trim().is_empty() {
                out.push(
                    Violation::new(
                        ViolationKind::MissingField,
                        format!("{} node requires a description", node.type_label()),
                    )
                    .with_element(&node.id),
                );
            }
            if prompt.trim().is_empty() {
                out.push(
                    Violation::new(
                        ViolationKind::MissingField,
                        format!("{} node requires a prompt", node.type_label()),
                    )
                    .with_element(&node.id),
                );
            } else if prompt.chars().count() > MAX_PROMPT_LEN {
                out.push(
                    Violation::new(
                        ViolationKind::LengthBound,
                        format!("prompt exceeds {MAX_PROMPT_LEN} characters"),
                    )
                    .with_element(&node.id),
                );
            }
        }
        NodeConfig::UserQuestion {
            question,
            use_ai_suggestions,
            options,
        } => {
            if question.trim().is_empty() {
                out.push(
                    Violation::new(ViolationKind::MissingField, "question text is required")
                        .with_element(&node.id),
                );
            }
            if !use_ai_suggestions
                && !(MIN_QUESTION_OPTIONS..=MAX_QUESTION_OPTIONS).contains(&options.len())
            {
                out.push(
                    Violation::new(
                        ViolationKind::CardinalityBound,
                        format!(
                            "user-question expects {MIN_QUESTION_OPTIONS}-{MAX_QUESTION_OPTIONS} options, found {}",
                            options.len()
                        ),
                    )
                    .with_element(&node.id),
                );
            }
            for option in options {
                let label_len = option.label.chars().count();
                if label_len == 0 {
                    out.push(
                        Violation::new(ViolationKind::MissingField, "option label is required")
                            .with_element(&node.id),
                    );
                } else if label_len > MAX_OPTION_LABEL_LEN {
                    out.push(
                        Violation::new(
                            ViolationKind::LengthBound,
                            format!("option label exceeds {MAX_OPTION_LABEL_LEN} characters"),
                        )
                        .with_element(&node.id),
                    );
                }
                let description_len = option.description.chars().count();
                if description_len == 0 {
                    out.push(
                        Violation::new(
                            ViolationKind::MissingField,
                            "option description is required",
                        )
                        .with_element(&node.id),
                    );
                } else if description_len > MAX_OPTION_DESCRIPTION_LEN {
                    out.push(
                        Violation::new(
                            ViolationKind::LengthBound,
                            format!(
                                "option description exceeds {MAX_OPTION_DESCRIPTION_LEN} characters"
                            ),
                        )
                        .with_element(&node.id),
                    );
                }
            }
        }
        NodeConfig::LegacyBranch { options } => {
            if options.is_empty() {
                out.push(
                    Violation::new(
                        ViolationKind::CardinalityBound,
                        "legacy-branch requires at least one option",
                    )
                    .with_element(&node.id),
                );
            }
        }
        NodeConfig::IfElse { condition } => {
            if condition.trim().is_empty() {
                out.push(
                    Violation::new(ViolationKind::MissingField, "if-else requires a condition")
                        .with_element(&node.id),
                );
            }
        }
        NodeConfig::Switch { expression, cases } => {
            if expression.trim().is_empty() {
                out.push(
                    Violation::new(ViolationKind::MissingField, "switch requires an expression")
                        .with_element(&node.id),
                );
            }
            if cases.is_empty() {
                out.push(
                    Violation::new(
                        ViolationKind::CardinalityBound,
                        "switch requires at least one case",
                    )
                    .with_element(&node.id),
                );
            }
        }
        NodeConfig::PromptTemplate { template } => {
            if template.trim().is_empty() {
                out.push(
                    Violation::new(
                        ViolationKind::MissingField,
                        "prompt-template requires a template",
                    )
                    .with_element(&node.id),
                );
            }
        }
        NodeConfig::SkillReference { skill } => {
            if skill.trim().is_empty() {
                out.push(
                    Violation::new(
                        ViolationKind::MissingField,
                        "skill-reference requires a skill id",
                    )
                    .with_element(&node.id),
                );
            }
        }
        NodeConfig::ToolCall { tool, .. } => {
            if tool.trim().is_empty() {
                out.push(
                    Violation::new(ViolationKind::MissingField, "tool-call requires a tool name")
                        .with_element(&node.id),
                );
            }
        }
        NodeConfig::AgentFlowReference { flow } => {
            if flow.trim().is_empty() {
                out.push(
                    Violation::new(
                        ViolationKind::MissingField,
                        "agent-flow-reference requires a flow id",
                    )
                    .with_element(&node.id),
                );
            }
        }
        NodeConfig::AgentFlow { nodes, connections } => {
            check_body(nodes, connections, out);
        }
    }
}

fn check_connection(connection: &Connection, nodes: &[Node], out: &mut Vec<Violation>) {
    let source = nodes.iter().find(|n| n.id == connection.source);
    if source.is_none() {
        out.push(
            Violation::new(
                ViolationKind::DanglingReference,
                format!("connection source {:?} does not exist", connection.source),
            )
            .with_element(&connection.id),
        );
    }
    if !nodes.iter().any(|n| n.id == connection.target) {
        out.push(
            Violation::new(
                ViolationKind::DanglingReference,
                format!("connection target {:?} does not exist", connection.target),
            )
            .with_element(&connection.id),
        );
    }
    if let (Some(condition), Some(source)) = (&connection.condition, source)
        && let Some(labels) = source.option_labels()
        && !labels.iter().any(|l| l == condition)
    {
        out.push(
            Violation::new(
                ViolationKind::CrossFieldMismatch,
                format!(
                    "condition {condition:?} is not an option of source node {:?}",
                    connection.source
                ),
            )
            .with_element(&connection.id),
        );
    }
}

fn check_name(
    name: &str,
    what: &str,
    max_len: usize,
    element: Option<&str>,
    out: &mut Vec<Violation>,
) {
    let len = name.chars().count();
    let violation = if len == 0 || len > max_len {
        Some(Violation::new(
            ViolationKind::LengthBound,
            format!("{what} must be 1-{max_len} characters, got {len}"),
        ))
    } else if !NAME_PATTERN.is_match(name) {
        Some(Violation::new(
            ViolationKind::PatternMismatch,
            format!("{what} {name:?} contains characters outside [a-z0-9_-]"),
        ))
    } else {
        None
    };
    if let Some(violation) = violation {
        out.push(match element {
            Some(id) => violation.with_element(id),
            None => violation,
        });
    }
}
