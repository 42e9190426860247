//! Configuration for the integration layer
//!
//! Provides centralized configuration for all components. Values come from
//! defaults, an optional TOML file and a couple of environment overrides.

use crate::{LunaError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable pointing at a config file
pub const CONFIG_PATH_ENV: &str = "LUNA_CONFIG";

/// Environment variable overriding the agent base URL
pub const API_URL_ENV: &str = "LUNA_API_URL";

/// Backend agent endpoints and request behaviour
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Base URL, e.g. `http://localhost:8000/api`
    pub api_url: String,

    /// Timeout for single-shot requests (chat, tts)
    pub request_timeout_secs: u64,

    /// How long to wait for a talking-head clip before speaking audio only
    pub avatar_timeout_secs: u64,

    /// Voice used for cloud synthesis
    pub voice: String,

    /// Voice id sent to the avatar service
    pub avatar_voice_id: String,

    /// Render quality requested from the avatar service
    pub avatar_quality: String,

    /// Number of suggested questions to fetch
    pub suggested_question_count: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000/api".to_string(),
            request_timeout_secs: 60,
            avatar_timeout_secs: 90,
            voice: "shimmer".to_string(),
            avatar_voice_id: "default".to_string(),
            avatar_quality: "fast".to_string(),
            suggested_question_count: 4,
        }
    }
}

/// Speech capture and silence detection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Silence after speech before the utterance is sent
    pub silence_threshold_ms: u64,

    /// How often the silence check runs
    pub check_interval_ms: u64,

    /// Normalized RMS above which the microphone counts as speech
    pub activity_threshold: f32,

    /// Delay before restarting an ended recognition session
    pub restart_delay_ms: u64,

    /// Number of buckets in the waveform ring
    pub waveform_buckets: usize,

    /// Recognition language tag
    pub language: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            silence_threshold_ms: 2000,
            check_interval_ms: 300,
            activity_threshold: 0.02,
            restart_delay_ms: 100,
            waveform_buckets: 32,
            language: "en-US".to_string(),
        }
    }
}

/// Voice/video playback
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Try the talking-head clip before audio-only synthesis
    pub enable_avatar: bool,

    /// Speak answers at all
    pub enable_voice: bool,

    /// Animation frame interval
    pub frame_interval_ms: u64,

    /// Speaking rate used to estimate duration when none is known
    pub chars_per_second: f32,

    /// Rate and pitch for on-device speech
    pub device_rate: f32,
    pub device_pitch: f32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            enable_avatar: true,
            enable_voice: true,
            frame_interval_ms: 16,
            chars_per_second: 14.0,
            device_rate: 0.95,
            device_pitch: 1.0,
        }
    }
}

/// Configuration for the complete client
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LunaConfig {
    pub agent: AgentConfig,
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,

    /// Start with streaming disabled (single-shot requests only)
    pub disable_streaming: bool,
}

impl LunaConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            LunaError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: LunaConfig = toml::from_str(&content).map_err(|e| {
            LunaError::ConfigError(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Default config file location: `<config_dir>/luna/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("luna").join("config.toml"))
    }

    /// Resolve configuration from `$LUNA_CONFIG`, then the default path,
    /// then built-in defaults. `$LUNA_API_URL` overrides the agent URL.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .or_else(|| Self::default_path().filter(|p| p.exists()));

        let config = match path {
            Some(path) => Self::load(path)?,
            None => {
                debug!("No config file found, using defaults");
                Self::default()
            }
        };

        let config = match std::env::var(API_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => config.with_api_url(url),
            _ => config,
        };

        config.validate()?;
        Ok(config)
    }

    /// Set the agent base URL
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.agent.api_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the silence timeout for auto-send
    pub fn with_silence_threshold_ms(mut self, ms: u64) -> Self {
        self.capture.silence_threshold_ms = ms;
        self
    }

    /// Set the voice used for cloud synthesis
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.agent.voice = voice.into();
        self
    }

    /// Never attempt the talking-head clip
    pub fn without_avatar(mut self) -> Self {
        self.playback.enable_avatar = false;
        self
    }

    /// Text-only mode
    pub fn without_voice(mut self) -> Self {
        self.playback.enable_voice = false;
        self.playback.enable_avatar = false;
        self
    }

    /// Use single-shot requests from the first turn
    pub fn without_streaming(mut self) -> Self {
        self.disable_streaming = true;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.agent.api_url.starts_with("http://") && !self.agent.api_url.starts_with("https://") {
            return Err(LunaError::ConfigError(format!(
                "API URL must be http(s): {}",
                self.agent.api_url
            )));
        }

        if self.capture.check_interval_ms == 0 {
            return Err(LunaError::ConfigError(
                "Silence check interval must be positive".to_string(),
            ));
        }

        if self.capture.silence_threshold_ms < self.capture.check_interval_ms {
            return Err(LunaError::ConfigError(format!(
                "Silence threshold ({}ms) is shorter than the check interval ({}ms)",
                self.capture.silence_threshold_ms, self.capture.check_interval_ms
            )));
        }

        if !(0.0..=1.0).contains(&self.capture.activity_threshold) {
            return Err(LunaError::ConfigError(
                "Activity threshold must be within [0, 1]".to_string(),
            ));
        }

        if self.capture.waveform_buckets == 0 {
            return Err(LunaError::ConfigError("Waveform needs at least one bucket".to_string()));
        }

        if self.playback.frame_interval_ms == 0 || self.playback.chars_per_second <= 0.0 {
            return Err(LunaError::ConfigError(
                "Playback frame interval and speaking rate must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
