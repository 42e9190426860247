//! Read-only views derived from turn state
//!
//! The status line shows one label for what the assistant is doing. Tool
//! names map to a fixed set of categories through [`TOOL_CATEGORIES`].

use crate::messages::{CurrentAction, Message, Phase};
use std::fmt;

/// Display category of a tool call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionCategory {
    KnowledgeBase,
    Documents,
    Web,
    MarketData,
    Memory,
    Projects,
    Other,
}

/// Tool name → category
pub const TOOL_CATEGORIES: &[(&str, ActionCategory)] = &[
    ("search_knowledge_base", ActionCategory::KnowledgeBase),
    ("search_uploaded_documents", ActionCategory::Documents),
    ("download_and_read_pdf", ActionCategory::Documents),
    ("search_web", ActionCategory::Web),
    ("tavily_search", ActionCategory::Web),
    ("tavily_research", ActionCategory::Web),
    ("scrape_webpage", ActionCategory::Web),
    ("search_one_development_website", ActionCategory::Web),
    ("search_web_for_market_data", ActionCategory::MarketData),
    ("get_dubai_market_context", ActionCategory::MarketData),
    ("get_user_context", ActionCategory::Memory),
    ("save_user_information", ActionCategory::Memory),
    ("fetch_project_brochure", ActionCategory::Projects),
    ("find_and_read_brochure", ActionCategory::Projects),
    ("get_project_details", ActionCategory::Projects),
];

impl ActionCategory {
    pub fn of_tool(tool: &str) -> Self {
        TOOL_CATEGORIES
            .iter()
            .find(|(name, _)| *name == tool)
            .map(|(_, category)| *category)
            .unwrap_or(ActionCategory::Other)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ActionCategory::KnowledgeBase => "Searching knowledge base",
            ActionCategory::Documents => "Reading documents",
            ActionCategory::Web => "Searching the web",
            ActionCategory::MarketData => "Getting market data",
            ActionCategory::Memory => "Checking your preferences",
            ActionCategory::Projects => "Getting project details",
            ActionCategory::Other => "Using a tool",
        }
    }
}

impl fmt::Display for ActionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Label for the status line, or `None` when there is nothing to show
pub fn action_label(action: &CurrentAction) -> Option<String> {
    let label = match action {
        CurrentAction::None => return None,
        CurrentAction::Thinking => "Analyzing your question...".to_string(),
        CurrentAction::Tool { tool, query } => {
            let category = ActionCategory::of_tool(tool);
            match (category, query.trim()) {
                (ActionCategory::Other, "") => format!("Using {}", tool),
                (ActionCategory::Other, q) => format!("Using {}: {}", tool, q),
                (c, "") => c.label().to_string(),
                (c, q) => format!("{}: {}", c.label(), q),
            }
        }
        CurrentAction::ToolResult { summary } if summary.is_empty() => "Got results".to_string(),
        CurrentAction::ToolResult { summary } => format!("Got {}", summary),
        CurrentAction::Verifying { confidence } => {
            format!("Verifying answer ({:.0}% confidence)", confidence * 100.0)
        }
        CurrentAction::Responding => "Writing response...".to_string(),
        CurrentAction::Error { message } => message.clone(),
    };
    Some(label)
}

/// Label for a message: its action while streaming, nothing once finalized
pub fn message_label(message: &Message) -> Option<String> {
    if !message.is_streaming || message.phase == Phase::Done {
        return None;
    }
    action_label(&message.current_action)
}

/// Presence shown next to the avatar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Idle,
    Listening,
    Thinking,
    Speaking,
}

impl Presence {
    /// Speaking wins over listening, which wins over thinking
    pub fn derive(speaking: bool, listening: bool, processing: bool) -> Self {
        if speaking {
            Presence::Speaking
        } else if listening {
            Presence::Listening
        } else if processing {
            Presence::Thinking
        } else {
            Presence::Idle
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Presence::Idle => "Ready",
            Presence::Listening => "Listening...",
            Presence::Thinking => "Thinking...",
            Presence::Speaking => "Speaking...",
        }
    }
}
