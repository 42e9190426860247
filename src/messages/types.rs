use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Coarse stage of an assistant turn
///
/// Phases only move forward: thinking → (tool)* → responding → done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Thinking,
    Tool,
    Responding,
    Done,
}

impl Phase {
    /// Parse a phase name as sent by the agent
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "thinking" | "reasoning" => Some(Phase::Thinking),
            "tool" | "tools" | "searching" => Some(Phase::Tool),
            "responding" | "response" => Some(Phase::Responding),
            "done" => Some(Phase::Done),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done)
    }

    /// Whether moving from `self` to `next` keeps the forward ordering
    ///
    /// Tool may repeat, everything else must strictly advance.
    pub fn can_advance_to(&self, next: Phase) -> bool {
        match (self, next) {
            (Phase::Done, _) => false,
            (Phase::Tool, Phase::Tool) => true,
            (current, next) => next > *current,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Thinking => write!(f, "thinking"),
            Phase::Tool => write!(f, "tool"),
            Phase::Responding => write!(f, "responding"),
            Phase::Done => write!(f, "done"),
        }
    }
}

/// What the assistant is doing right now. Holds no history.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CurrentAction {
    #[default]
    None,
    Thinking,
    Tool {
        tool: String,
        query: String,
    },
    ToolResult {
        summary: String,
    },
    Verifying {
        confidence: f32,
    },
    Responding,
    Error {
        message: String,
    },
}

/// One tool call made during a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolTraceEntry {
    pub tool: String,
    pub query: String,
    /// `None` while the call is still pending
    pub result_summary: Option<String>,
}

impl ToolTraceEntry {
    pub fn pending(tool: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            query: query.into(),
            result_summary: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.result_summary.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Verification {
    /// Clamped to [0, 1]
    pub confidence: f32,
    pub level: String,
    pub sources: Vec<String>,
    pub issues: Vec<String>,
}

impl Verification {
    pub fn new(confidence: f32, level: impl Into<String>, sources: Vec<String>, issues: Vec<String>) -> Self {
        Self {
            confidence: confidence.clamp(0.0, 1.0),
            level: level.into(),
            sources,
            issues,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    /// Finalized text (mirrors `response_buffer` while streaming)
    pub content: String,
    pub created_at: DateTime<Utc>,

    pub thinking_buffer: String,
    pub response_buffer: String,
    pub phase: Phase,
    pub current_action: CurrentAction,
    pub tool_trace: Vec<ToolTraceEntry>,
    pub verification: Option<Verification>,
    pub thinking_started_at: Option<DateTime<Utc>>,
    pub thinking_ended_at: Option<DateTime<Utc>>,
    pub is_streaming: bool,
    pub suggested_follow_ups: Vec<String>,

    /// Set by a response rewrite; later tokens are ignored until the next phase event
    #[serde(skip)]
    pub response_sealed: bool,
}

impl Message {
    fn base(role: Role, content: String, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content,
            created_at,
            thinking_buffer: String::new(),
            response_buffer: String::new(),
            phase: Phase::Done,
            current_action: CurrentAction::None,
            tool_trace: Vec::new(),
            verification: None,
            thinking_started_at: None,
            thinking_ended_at: None,
            is_streaming: false,
            suggested_follow_ups: Vec::new(),
            response_sealed: false,
        }
    }

    /// A finalized user message
    pub fn user(text: impl Into<String>) -> Self {
        Self::base(Role::User, text.into(), Utc::now())
    }

    /// An assistant message opened at stream start
    pub fn streaming_assistant(opened_at: DateTime<Utc>) -> Self {
        let mut message = Self::base(Role::Assistant, String::new(), opened_at);
        message.phase = Phase::Thinking;
        message.current_action = CurrentAction::Thinking;
        message.thinking_started_at = Some(opened_at);
        message.is_streaming = true;
        message
    }

    /// A finalized assistant message with complete text
    pub fn assistant(text: impl Into<String>) -> Self {
        let text = text.into();
        let mut message = Self::base(Role::Assistant, text.clone(), Utc::now());
        message.response_buffer = text;
        message
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    /// Time spent reasoning, if both boundaries are known
    pub fn thinking_duration(&self) -> Option<chrono::Duration> {
        match (self.thinking_started_at, self.thinking_ended_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    pub fn pending_tool(&self) -> Option<&ToolTraceEntry> {
        self.tool_trace.iter().rev().find(|entry| entry.is_pending())
    }
}
