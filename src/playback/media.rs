//! Playback collaborators: media elements, on-device speech and the
//! synthesis services

use crate::agent::{AgentClient, AvatarClip};
use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// What a media element plays
#[derive(Debug, Clone, PartialEq)]
pub enum MediaSource {
    /// Encoded audio from cloud synthesis
    Audio(Vec<u8>),
    /// Talking-head clip with embedded audio
    Video(String),
}

/// One playing (or loaded) audio/video element
pub trait MediaElement: Send {
    /// Begin playback; returns once playback has started
    fn play(&mut self) -> Result<()>;

    /// Halt playback immediately
    fn stop(&mut self);

    /// Current play-head position
    fn position(&self) -> Duration;

    /// Total length if the element knows it
    fn duration(&self) -> Option<Duration>;

    /// Playback reached the end (or the element failed)
    fn is_finished(&self) -> bool;
}

/// Creates media elements
pub trait MediaBackend: Send + Sync {
    fn load(&self, source: MediaSource) -> Result<Box<dyn MediaElement>>;
}

/// On-device speech synthesis, the last fallback tier
pub trait DeviceSpeech: Send + Sync {
    /// Start speaking `text`
    fn speak(&self, text: &str, rate: f32, pitch: f32) -> Result<()>;

    fn cancel(&self);

    fn is_speaking(&self) -> bool;
}

/// Remote synthesis services
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Cloud TTS; returns encoded audio
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>>;

    /// Talking-head clip for `text`
    async fn render_avatar(&self, text: &str) -> Result<AvatarClip>;

    /// Whether the talking-head service is up
    async fn avatar_available(&self) -> bool;
}

#[async_trait]
impl SpeechBackend for AgentClient {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        self.tts_generate(text, voice).await
    }

    async fn render_avatar(&self, text: &str) -> Result<AvatarClip> {
        self.avatar_generate(text, None).await
    }

    async fn avatar_available(&self) -> bool {
        self.avatar_health().await
    }
}

/// Device speech that never produces sound, for text-only setups
#[derive(Debug, Default)]
pub struct SilentDevice;

impl DeviceSpeech for SilentDevice {
    fn speak(&self, text: &str, _rate: f32, _pitch: f32) -> Result<()> {
        tracing::debug!("Device speech unavailable, not speaking {} chars", text.len());
        Ok(())
    }

    fn cancel(&self) {}

    fn is_speaking(&self) -> bool {
        false
    }
}

/// Media backend for builds without an audio device
#[derive(Debug, Default)]
pub struct NoMedia;

impl MediaBackend for NoMedia {
    fn load(&self, _source: MediaSource) -> Result<Box<dyn MediaElement>> {
        Err(crate::LunaError::PlaybackError("No audio output configured".into()))
    }
}
