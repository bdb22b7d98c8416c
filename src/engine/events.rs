//! Events streamed out of an engine subprocess.
//!
//! An engine run is a lazy, finite sequence of [`EngineEvent`]s terminated
//! by `Error` or `Done`. The helpers here are pure functions over collected
//! event lists.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One parsed line of an engine CLI's stream-json output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A text fragment.
    Content { text: String, index: usize },

    /// A complete tool invocation header.
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },

    /// A partial tool-input fragment (accumulated by index).
    ToolUsePartial { partial_json: String, index: usize },

    /// Result of a tool invocation.
    ToolResult { tool_use_id: String, result: Value },

    /// Anything informational the caller may ignore.
    Metadata { data: Value },

    /// Stream error. Terminates the sequence but carries the raw payload so
    /// nothing is lost.
    Error { message: String },

    /// Normal end of stream.
    Done { stop_reason: Option<String> },
}

impl EngineEvent {
    pub fn is_error(&self) -> bool {
        matches!(self, EngineEvent::Error { .. })
    }

    pub fn is_done(&self) -> bool {
        matches!(self, EngineEvent::Done { .. })
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        self.is_error() || self.is_done()
    }
}

/// A complete tool invocation extracted from an event list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// Concatenate all content fragments in order.
pub fn extract_text_content(events: &[EngineEvent]) -> String {
    let mut text = String::new();
    for event in events {
        if let EngineEvent::Content { text: fragment, .. } = event {
            text.push_str(fragment);
        }
    }
    text
}

/// All complete tool invocations (partials are skipped).
pub fn extract_tool_uses(events: &[EngineEvent]) -> Vec<ToolInvocation> {
    events
        .iter()
        .filter_map(|event| match event {
            EngineEvent::ToolUse { id, name, input } => Some(ToolInvocation {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            }),
            _ => None,
        })
        .collect()
}

/// Reasoning fragments from consultant metadata events.
pub fn extract_reasoning(events: &[EngineEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            EngineEvent::Metadata { data } => data
                .get("reasoning")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .collect()
}

/// Whether any event in the list is an error.
pub fn has_error(events: &[EngineEvent]) -> bool {
    events.iter().any(EngineEvent::is_error)
}
