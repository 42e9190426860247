pub mod agent;
pub mod integration;
pub mod messages;
pub mod playback;
pub mod speech;
pub mod turn;
pub mod utils;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LunaError {
    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("HTTP error! status: {0}")]
    HttpStatus(u16),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Synthesis error: {0}")]
    SynthesisError(String),

    #[error("Recognition error: {0}")]
    RecognitionError(String),

    #[error("Playback error: {0}")]
    PlaybackError(String),

    #[error("Audio device error: {0}")]
    AudioDeviceError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("IO error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for LunaError {
    fn from(e: std::io::Error) -> Self {
        LunaError::IOError(e.to_string())
    }
}

impl From<reqwest::Error> for LunaError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => LunaError::HttpStatus(status.as_u16()),
            None => LunaError::TransportError(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for LunaError {
    fn from(e: serde_json::Error) -> Self {
        LunaError::ParseError(e.to_string())
    }
}

impl LunaError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Streaming falls back to single-shot requests
            LunaError::TransportError(_) => true,
            LunaError::HttpStatus(_) => true,
            // Malformed lines are skipped
            LunaError::ParseError(_) => true,
            // The next synthesis tier takes over
            LunaError::SynthesisError(_) => true,
            LunaError::PlaybackError(_) => true,
            // Permission problems need the user to re-grant access
            LunaError::RecognitionError(_) => false,
            LunaError::AudioDeviceError(_) => false,
            LunaError::ConfigError(_) => false,
            LunaError::ChannelError(_) => false,
            LunaError::IOError(_) => false,
        }
    }

    /// Whether this error comes from the network path to the agent
    pub fn is_transport(&self) -> bool {
        matches!(self, LunaError::TransportError(_) | LunaError::HttpStatus(_))
    }

    /// Get a user-friendly description
    pub fn user_message(&self) -> String {
        match self {
            LunaError::TransportError(_) | LunaError::HttpStatus(_) => {
                "I'm having trouble connecting. Please try again.".to_string()
            }
            LunaError::ParseError(_) => {
                "Part of the answer could not be read.".to_string()
            }
            LunaError::SynthesisError(_) => {
                "Voice output failed. Response will be shown as text.".to_string()
            }
            LunaError::RecognitionError(_) => {
                "Microphone access was denied. Voice input is disabled.".to_string()
            }
            LunaError::PlaybackError(_) => {
                "Audio playback failed. Response will be shown as text.".to_string()
            }
            LunaError::AudioDeviceError(_) => {
                "Audio device error. Please check your microphone/speakers.".to_string()
            }
            LunaError::ConfigError(_) => {
                "Configuration error. Please check settings.".to_string()
            }
            LunaError::ChannelError(_) => {
                "Internal communication error. Please restart the application.".to_string()
            }
            LunaError::IOError(_) => "File system error occurred.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LunaError>;
