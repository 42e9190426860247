//! Pure per-turn transition function
//!
//! `reduce` folds one [`StreamEvent`] into an assistant [`Message`]. The
//! timestamp is passed in, so replaying the same events at the same times
//! always yields the same message. Ill-ordered input (phase regression,
//! events after `done`) is logged and leaves the message untouched.

use crate::agent::StreamEvent;
use crate::messages::{CurrentAction, Message, Phase, Verification};
use chrono::{DateTime, Utc};
use tracing::warn;

/// Result of one reduction step
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub message: Message,
    /// Session-level error raised by this event, if any
    pub session_error: Option<String>,
}

impl Transition {
    fn unchanged(message: Message) -> Self {
        Self {
            message,
            session_error: None,
        }
    }
}

/// Apply `event` to `message` at time `now`
pub fn reduce(mut message: Message, event: &StreamEvent, now: DateTime<Utc>) -> Transition {
    if message.phase.is_terminal() && !event.is_done() {
        warn!("Ignoring '{}' event after turn completed", event.kind());
        return Transition::unchanged(message);
    }

    let mut session_error = None;

    match event {
        StreamEvent::Phase(name) => {
            let Some(next) = Phase::from_name(name) else {
                warn!("Ignoring unknown phase '{}'", name);
                return Transition::unchanged(message);
            };
            if next != message.phase && !message.phase.can_advance_to(next) {
                warn!("Ignoring phase regression {} -> {}", message.phase, next);
                return Transition::unchanged(message);
            }
            enter_phase(&mut message, next, now);
        }

        StreamEvent::ThinkingToken(text) => {
            if message.phase == Phase::Thinking {
                message.thinking_buffer.push_str(text);
            }
        }

        StreamEvent::ThinkingDone => {
            mark_thinking_ended(&mut message, now);
        }

        StreamEvent::ToolStart { tool, query } => {
            message.thinking_buffer.clear();
            if message.phase == Phase::Thinking {
                message.phase = Phase::Tool;
            }
            message.current_action = CurrentAction::Tool {
                tool: tool.clone(),
                query: query.clone(),
            };
            message
                .tool_trace
                .push(crate::messages::ToolTraceEntry::pending(tool, query));
        }

        StreamEvent::ToolResult(summary) => {
            message.current_action = CurrentAction::ToolResult {
                summary: summary.clone(),
            };
            match message.tool_trace.iter_mut().rev().find(|e| e.is_pending()) {
                Some(entry) => entry.result_summary = Some(summary.clone()),
                None => warn!("Tool result without a pending tool call"),
            }
        }

        StreamEvent::Verification {
            confidence,
            level,
            sources,
            issues,
        } => {
            let verification =
                Verification::new(*confidence, level.clone(), sources.clone(), issues.clone());
            message.current_action = CurrentAction::Verifying {
                confidence: verification.confidence,
            };
            message.verification = Some(verification);
        }

        StreamEvent::ResponseReplaced(text) => {
            message.response_buffer = text.clone();
            message.content = text.clone();
            message.response_sealed = true;
        }

        StreamEvent::ResponseToken(text) => {
            if message.response_sealed {
                return Transition::unchanged(message);
            }
            message.response_buffer.push_str(text);
            message.content.clone_from(&message.response_buffer);
        }

        StreamEvent::Done(actions) => {
            message.phase = Phase::Done;
            message.current_action = CurrentAction::None;
            message.is_streaming = false;
            message.suggested_follow_ups = actions.clone();
            mark_thinking_ended(&mut message, now);
        }

        StreamEvent::Error(text) => {
            message.current_action = CurrentAction::Error {
                message: text.clone(),
            };
            session_error = Some(text.clone());
        }
    }

    Transition {
        message,
        session_error,
    }
}

/// Fold a whole event sequence, as a replay would
pub fn replay<'a, I>(message: Message, events: I, now: DateTime<Utc>) -> Message
where
    I: IntoIterator<Item = &'a StreamEvent>,
{
    events
        .into_iter()
        .fold(message, |message, event| reduce(message, event, now).message)
}

fn enter_phase(message: &mut Message, phase: Phase, now: DateTime<Utc>) {
    message.phase = phase;
    // A new phase lifts the seal placed by a response rewrite
    message.response_sealed = false;

    match phase {
        Phase::Thinking => {
            message.current_action = CurrentAction::Thinking;
        }
        Phase::Tool => {}
        Phase::Responding => {
            message.current_action = CurrentAction::Responding;
            message.thinking_buffer.clear();
            mark_thinking_ended(message, now);
        }
        Phase::Done => {
            message.current_action = CurrentAction::None;
            message.is_streaming = false;
            mark_thinking_ended(message, now);
        }
    }
}

fn mark_thinking_ended(message: &mut Message, now: DateTime<Utc>) {
    if message.thinking_ended_at.is_none() {
        message.thinking_ended_at = Some(now);
    }
}
