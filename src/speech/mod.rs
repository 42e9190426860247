//! Speech input: continuous recognition with silence-based auto-send
//!
//! This module provides:
//! - The platform recognizer contract
//! - The utterance state machine and its capture loop
//! - Microphone levels and the waveform ring

pub mod activity;
pub mod capture;
#[cfg(feature = "audio-io")]
pub mod microphone;
pub mod recognizer;

pub use activity::{normalized_level, AmplitudeRing};
pub use capture::{
    CaptureDriver, CaptureHandle, CaptureSignal, CaptureStep, MicLevel, UtteranceCapture,
    UtteranceSession,
};
#[cfg(feature = "audio-io")]
pub use microphone::Microphone;
pub use recognizer::{RecognitionErrorKind, RecognitionEvent, SpeechRecognizer};
