//! Streaming progress accumulation for an in-flight refinement.
//!
//! While a refinement request is pending, the host forwards the executor's
//! partial output as a sequence of [`ProgressUpdate`]s: narrative text
//! chunks and tool-invocation notices. [`ProgressAccumulator`] folds that
//! sequence into the transient display state of the in-flight assistant
//! message.
//!
//! Nothing here persists; the session manager copies the accumulator's
//! output into the placeholder message's transient overlay on every
//! notification and drops the accumulator at terminal resolution.

use serde::{Deserialize, Serialize};

/// Descriptor of a tool the executor is currently running.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            invocation_id: None,
        }
    }
}

/// One partial-content notification for an in-flight request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ProgressUpdate {
    /// An incremental chunk of the assistant's running narrative.
    NarrativeText { chunk: String },
    /// The executor started a tool invocation.
    ToolInvocation { tool: ToolDescriptor },
}

#[derive(Clone, Debug)]
enum Segment {
    Narrative(String),
    Tool(String),
}

/// Folds progress notifications into display state for one request.
///
/// The accumulated display text interleaves narrative chunks with
/// `[tool: …]` marker lines; the explanatory text is the narrative alone,
/// markers stripped, and is legitimately empty when the assistant only
/// invoked tools. The tool-activity indicator is set by a tool invocation
/// and cleared by the next narrative chunk, since narrative content after a
/// tool call signals that the call completed.
///
/// # Examples
///
/// ```
/// use flowsmith::progress::{ProgressAccumulator, ProgressUpdate, ToolDescriptor};
///
/// let mut acc = ProgressAccumulator::new();
/// acc.apply(&ProgressUpdate::NarrativeText { chunk: "Looking at the graph.".into() });
/// acc.apply(&ProgressUpdate::ToolInvocation { tool: ToolDescriptor::new("inspect_nodes") });
/// assert_eq!(acc.tool_activity().unwrap().name, "inspect_nodes");
///
/// acc.apply(&ProgressUpdate::NarrativeText { chunk: " Done.".into() });
/// assert!(acc.tool_activity().is_none());
/// assert_eq!(acc.explanatory_text(), "Looking at the graph. Done.");
/// assert!(acc.display_text().contains("[tool: inspect_nodes]"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct ProgressAccumulator {
    segments: Vec<Segment>,
    tool_activity: Option<ToolDescriptor>,
}

impl ProgressAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one notification into the accumulated state.
    pub fn apply(&mut self, update: &ProgressUpdate) {
        match update {
            ProgressUpdate::NarrativeText { chunk } => {
                self.tool_activity = None;
                match self.segments.last_mut() {
                    Some(Segment::Narrative(text)) => text.push_str(chunk),
                    _ => self.segments.push(Segment::Narrative(chunk.clone())),
                }
            }
            ProgressUpdate::ToolInvocation { tool } => {
                self.segments.push(Segment::Tool(tool.name.clone()));
                self.tool_activity = Some(tool.clone());
            }
        }
    }

    /// The running transcript text, tool markers included.
    pub fn display_text(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Narrative(text) => out.push_str(text),
                Segment::Tool(name) => {
                    if !out.is_empty() && !out.ends_with('\n') {
                        out.push('\n');
                    }
                    out.push_str("[tool: ");
                    out.push_str(name);
                    out.push_str("]\n");
                }
            }
        }
        out
    }

    /// The narrative alone, tool markers stripped. May be empty.
    pub fn explanatory_text(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            if let Segment::Narrative(text) = segment {
                out.push_str(text);
            }
        }
        out.trim().to_string()
    }

    /// The tool currently executing, if any.
    pub fn tool_activity(&self) -> Option<&ToolDescriptor> {
        self.tool_activity.as_ref()
    }

    /// Clear the activity indicator; called on terminal resolution.
    pub fn finish(&mut self) {
        self.tool_activity = None;
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}
