//! Owner of the conversation record
//!
//! [`TurnStore`] is the only place messages are mutated. Everything else
//! dispatches events into it. Observers are called synchronously with the
//! updated message before `dispatch` returns, so every token update is seen
//! before the next event is processed.

use super::reducer::reduce;
use crate::agent::{ChatResponse, StreamEvent};
use crate::messages::{CurrentAction, Message, Phase, Session};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

/// Called with the assistant message after every change
pub type Observer = Box<dyn FnMut(&Message) + Send>;

/// What a running turn hands to the store
#[derive(Debug, Clone, PartialEq)]
pub enum TurnUpdate {
    Event(StreamEvent),
    /// Streaming failed; partial content is kept and the error is shown
    /// unless the turn already reported one
    StreamFailed(String),
    /// Single-shot answer
    Complete(ChatResponse),
    /// Both paths failed
    Failed(String),
}

pub struct TurnStore {
    session: Session,
    active: Option<Uuid>,
    observers: Vec<Observer>,
}

impl TurnStore {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            active: None,
            observers: Vec::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Register an observer of message updates
    pub fn subscribe(&mut self, observer: Observer) {
        self.observers.push(observer);
    }

    /// The assistant message of the turn in progress
    pub fn active(&self) -> Option<&Message> {
        self.active.and_then(|id| self.session.get(id))
    }

    pub fn has_active_turn(&self) -> bool {
        self.active.is_some()
    }

    /// Record the user's text and open a streaming assistant message
    ///
    /// Returns the id of the new assistant message.
    pub fn begin_turn(&mut self, text: impl Into<String>) -> Uuid {
        self.begin_turn_at(text, Utc::now())
    }

    pub fn begin_turn_at(&mut self, text: impl Into<String>, now: DateTime<Utc>) -> Uuid {
        if self.active.is_some() {
            debug!("New turn started while another was streaming");
            self.abandon_turn();
        }

        self.session.clear_error();
        self.session.push(Message::user(text));

        let assistant = Message::streaming_assistant(now);
        let id = assistant.id;
        self.session.push(assistant);
        self.active = Some(id);
        self.notify(id);
        id
    }

    /// Apply one stream event to the active message
    pub fn dispatch(&mut self, event: &StreamEvent) -> Option<&Message> {
        self.dispatch_at(event, Utc::now())
    }

    pub fn dispatch_at(&mut self, event: &StreamEvent, now: DateTime<Utc>) -> Option<&Message> {
        let Some(id) = self.active else {
            warn!("Dropping '{}' event with no active turn", event.kind());
            return None;
        };

        let current = self.session.get(id)?.clone();
        let transition = reduce(current, event, now);

        if let Some(error) = transition.session_error {
            self.session.set_error(error);
        }
        let finished = !transition.message.is_streaming;
        self.replace(id, transition.message);

        if finished {
            self.active = None;
        }
        self.notify(id);
        self.session.get(id)
    }

    /// Apply one update from a running turn
    pub fn apply(&mut self, update: &TurnUpdate) -> Option<&Message> {
        match update {
            TurnUpdate::Event(event) => self.dispatch(event),
            TurnUpdate::StreamFailed(user_message) => {
                self.report_error(user_message);
                let id = self.active?;
                self.notify(id);
                self.session.get(id)
            }
            TurnUpdate::Complete(response) => self.apply_full_response(response),
            TurnUpdate::Failed(user_message) => self.fail_turn(user_message),
        }
    }

    /// Write a single-shot answer into the active message in one update
    pub fn apply_full_response(&mut self, response: &ChatResponse) -> Option<&Message> {
        let id = self.active.take()?;
        let now = Utc::now();

        let message = self.session.get_mut(id)?;
        message.response_buffer = response.response.clone();
        message.content = response.response.clone();
        message.thinking_buffer.clear();
        message.phase = Phase::Done;
        message.current_action = CurrentAction::None;
        message.is_streaming = false;
        message.suggested_follow_ups = response.suggested_actions.clone();
        if message.thinking_ended_at.is_none() {
            message.thinking_ended_at = Some(now);
        }

        self.notify(id);
        self.session.get(id)
    }

    /// Finalize the active turn after a failure
    ///
    /// Partial content is kept; an empty message receives `user_message`.
    pub fn fail_turn(&mut self, user_message: &str) -> Option<&Message> {
        self.report_error(user_message);
        let id = self.active.take()?;

        let message = self.session.get_mut(id)?;
        if message.content.is_empty() {
            message.content = user_message.to_string();
            message.response_buffer = user_message.to_string();
        }
        message.current_action = CurrentAction::None;
        message.is_streaming = false;

        self.notify(id);
        self.session.get(id)
    }

    /// Finalize the active turn without changing its content
    pub fn abandon_turn(&mut self) {
        let Some(id) = self.active.take() else {
            return;
        };
        if let Some(message) = self.session.get_mut(id) {
            message.current_action = CurrentAction::None;
            message.is_streaming = false;
        }
        self.notify(id);
    }

    /// Drop the whole conversation
    pub fn clear(&mut self) {
        self.active = None;
        self.session.clear();
    }

    /// One banner per turn: the first failure of a turn keeps the slot
    fn report_error(&mut self, user_message: &str) {
        if self.session.error().is_none() {
            self.session.set_error(user_message);
        } else {
            debug!("Keeping earlier error, not showing '{}'", user_message);
        }
    }

    fn replace(&mut self, id: Uuid, message: Message) {
        if let Some(slot) = self.session.get_mut(id) {
            *slot = message;
        }
    }

    fn notify(&mut self, id: Uuid) {
        let Some(message) = self.session.get(id) else {
            return;
        };
        for observer in self.observers.iter_mut() {
            observer(message);
        }
    }
}

impl Default for TurnStore {
    fn default() -> Self {
        Self::new(Session::default())
    }
}
