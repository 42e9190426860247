//! Platform speech-to-text contract
//!
//! A recognizer runs continuous recognition and reports results, session
//! ends and errors as [`RecognitionEvent`]s on the channel it was given.

use crate::Result;
use tokio::sync::mpsc::UnboundedSender;

/// Error codes reported by the platform recognizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionErrorKind {
    /// Microphone permission denied; voice input stays off for the session
    NotAllowed,
    /// Nothing was heard; recognition carries on
    NoSpeech,
    Aborted,
    Network,
    Other(String),
}

impl RecognitionErrorKind {
    pub fn from_code(code: &str) -> Self {
        match code {
            "not-allowed" | "service-not-allowed" => RecognitionErrorKind::NotAllowed,
            "no-speech" => RecognitionErrorKind::NoSpeech,
            "aborted" => RecognitionErrorKind::Aborted,
            "network" => RecognitionErrorKind::Network,
            other => RecognitionErrorKind::Other(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RecognitionErrorKind::NotAllowed)
    }

    pub fn code(&self) -> &str {
        match self {
            RecognitionErrorKind::NotAllowed => "not-allowed",
            RecognitionErrorKind::NoSpeech => "no-speech",
            RecognitionErrorKind::Aborted => "aborted",
            RecognitionErrorKind::Network => "network",
            RecognitionErrorKind::Other(code) => code,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    /// One result callback. `final_text` is empty when only interim text arrived.
    Result { final_text: String, interim_text: String },
    /// The platform ended the recognition session
    Ended,
    Error(RecognitionErrorKind),
}

impl RecognitionEvent {
    pub fn interim(text: impl Into<String>) -> Self {
        RecognitionEvent::Result {
            final_text: String::new(),
            interim_text: text.into(),
        }
    }

    pub fn final_result(text: impl Into<String>) -> Self {
        RecognitionEvent::Result {
            final_text: text.into(),
            interim_text: String::new(),
        }
    }
}

/// Continuous recognizer with interim and final results
pub trait SpeechRecognizer: Send {
    /// Begin a recognition session in `language` (a BCP 47 tag such as
    /// `en-US`) reporting to `events`
    fn start(&mut self, language: &str, events: UnboundedSender<RecognitionEvent>) -> Result<()>;

    /// Stop gracefully; pending results may still arrive
    fn stop(&mut self);

    /// Stop immediately and discard pending results
    fn abort(&mut self);
}
