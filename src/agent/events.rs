//! Typed stream events and their `data: <json>` wire form
//!
//! Each line of the streaming chat body carries one JSON object with a
//! `type` discriminator. This module maps those objects onto [`StreamEvent`].

use crate::{LunaError, Result};
use serde::Deserialize;
use serde_json::Value;

/// One decoded event from the agent stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Phase(String),
    ThinkingToken(String),
    ThinkingDone,
    ToolStart {
        tool: String,
        query: String,
    },
    ToolResult(String),
    Verification {
        confidence: f32,
        level: String,
        sources: Vec<String>,
        issues: Vec<String>,
    },
    ResponseReplaced(String),
    ResponseToken(String),
    Done(Vec<String>),
    Error(String),
}

impl StreamEvent {
    pub fn is_done(&self) -> bool {
        matches!(self, StreamEvent::Done(_))
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Phase(_) => "phase",
            StreamEvent::ThinkingToken(_) => "thinking",
            StreamEvent::ThinkingDone => "thinking_done",
            StreamEvent::ToolStart { .. } => "tool",
            StreamEvent::ToolResult(_) => "tool_result",
            StreamEvent::Verification { .. } => "verification",
            StreamEvent::ResponseReplaced(_) => "response_improved",
            StreamEvent::ResponseToken(_) => "response",
            StreamEvent::Done(_) => "done",
            StreamEvent::Error(_) => "error",
        }
    }
}

/// Raw JSON shape of a stream line. Every field except `type` is optional
/// because each event kind uses a different subset.
#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    phase: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    sources: Vec<Value>,
    #[serde(default)]
    issues: Vec<Value>,
    #[serde(default)]
    suggested_actions: Vec<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl WireEvent {
    fn text(&self) -> Option<String> {
        self.content.clone().or_else(|| self.token.clone())
    }

    fn require_text(&self) -> Result<String> {
        self.text().ok_or_else(|| {
            LunaError::ParseError(format!("'{}' event without content", self.kind))
        })
    }

    fn into_event(self) -> Result<StreamEvent> {
        let event = match self.kind.as_str() {
            "phase" => {
                let name = self
                    .phase
                    .clone()
                    .or_else(|| self.content.clone())
                    .ok_or_else(|| LunaError::ParseError("phase event without name".into()))?;
                StreamEvent::Phase(name)
            }
            "thinking" | "thinking_token" => StreamEvent::ThinkingToken(self.require_text()?),
            "thinking_done" | "thinking_complete" => StreamEvent::ThinkingDone,
            "tool" | "tool_start" => match (self.tool.clone(), self.result.clone()) {
                // A tool line that carries a result completes the pending call
                (_, Some(result)) => StreamEvent::ToolResult(result),
                (Some(tool), None) => StreamEvent::ToolStart {
                    tool,
                    query: self.query.clone().unwrap_or_default(),
                },
                (None, None) => {
                    return Err(LunaError::ParseError("tool event without tool name".into()))
                }
            },
            "tool_result" => StreamEvent::ToolResult(
                self.result.clone().or_else(|| self.text()).unwrap_or_default(),
            ),
            // A failed call still completes its trace entry
            "tool_error" => StreamEvent::ToolResult(format!(
                "failed: {}",
                self.text().unwrap_or_else(|| "unknown error".to_string())
            )),
            "verification" => StreamEvent::Verification {
                confidence: self.confidence.unwrap_or(0.0).clamp(0.0, 1.0) as f32,
                level: self.level.clone().unwrap_or_default(),
                sources: self.sources.iter().map(value_label).collect(),
                issues: self.issues.iter().map(value_label).collect(),
            },
            "response_improved" => StreamEvent::ResponseReplaced(self.require_text()?),
            "response" | "response_token" => StreamEvent::ResponseToken(self.require_text()?),
            "done" => StreamEvent::Done(self.suggested_actions),
            "error" => StreamEvent::Error(
                self.message
                    .or(self.error)
                    .or(self.content)
                    .unwrap_or_else(|| "Unknown stream error".to_string()),
            ),
            other => {
                return Err(LunaError::ParseError(format!("unknown event type '{}'", other)))
            }
        };
        Ok(event)
    }
}

/// Sources and issues arrive either as plain strings or as small objects
fn value_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => ["title", "url", "name", "description"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}

/// Parse the JSON payload of one `data:` line
pub fn parse_event(payload: &str) -> Result<StreamEvent> {
    let wire: WireEvent = serde_json::from_str(payload)?;
    wire.into_event()
}
