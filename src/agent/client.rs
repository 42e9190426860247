//! HTTP client for the backend agent
//!
//! Covers the streaming and single-shot chat endpoints plus the speech
//! endpoints used by playback (cloud TTS and the talking-head service).

use super::events::StreamEvent;
use super::ingest::{ingest, reject_status, AbandonFlag, IngestOutcome};
use crate::integration::config::AgentConfig;
use crate::{LunaError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Questions offered when the backend cannot provide any
pub const FALLBACK_QUESTIONS: [&str; 4] = [
    "Tell me about One Development",
    "What projects are available?",
    "What are the payment plans?",
    "Where are you located?",
];

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest<'a> {
    pub message: &'a str,
    pub session_id: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatMetadata {
    #[serde(default)]
    pub thinking: Option<String>,
    #[serde(default)]
    pub tools_used: Vec<String>,
    #[serde(default)]
    pub reasoning_steps: Vec<Value>,
}

/// Body of `POST /chat/`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub entities: Value,
    #[serde(default)]
    pub suggested_actions: Vec<String>,
    #[serde(default)]
    pub metadata: ChatMetadata,
}

impl ChatResponse {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            response: text.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuggestedQuestion {
    pub id: Value,
    pub question: String,
}

#[derive(Debug, Clone, Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    voice: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct AvatarRequest<'a> {
    text: &'a str,
    audio_url: Option<&'a str>,
    voice_id: &'a str,
    quality: &'a str,
}

/// Successful reply from the talking-head service
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AvatarClip {
    pub video_url: String,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub video_id: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AvatarBody {
    #[serde(default)]
    fallback: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    audio_url: Option<String>,
    #[serde(default)]
    video_id: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    status: Option<String>,
}

impl AvatarBody {
    fn into_clip(self) -> Result<AvatarClip> {
        if self.fallback {
            return Err(LunaError::SynthesisError(
                self.error.unwrap_or_else(|| "avatar service requested fallback".to_string()),
            ));
        }
        let video_url = self
            .video_url
            .ok_or_else(|| LunaError::SynthesisError("avatar reply without video_url".into()))?;
        Ok(AvatarClip {
            video_url,
            audio_url: self.audio_url,
            video_id: self.video_id,
            duration: self.duration,
            status: self.status,
        })
    }
}

#[derive(Debug, Deserialize)]
struct HealthBody {
    #[serde(default)]
    status: String,
}

/// The chat half of the agent, as used by the fallback controller
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Stream one answer, handing events to `on_event` in arrival order
    async fn stream_chat(
        &self,
        text: &str,
        session_id: &str,
        abandon: &AbandonFlag,
        on_event: &mut (dyn FnMut(StreamEvent) + Send),
    ) -> Result<IngestOutcome>;

    /// Request one complete answer
    async fn chat(&self, text: &str, session_id: &str) -> Result<ChatResponse>;
}

/// reqwest-backed agent client
#[derive(Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    config: AgentConfig,
}

impl AgentClient {
    pub fn new(config: AgentConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| LunaError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_url.trim_end_matches('/'), path)
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_secs)
    }

    /// Synthesize `text` in the cloud; returns the encoded audio bytes
    pub async fn tts_generate(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        debug!("[TTS] Generating ({}) for {} chars", voice, text.len());

        let response = self
            .http
            .post(self.url("tts/generate/"))
            .timeout(self.request_timeout())
            .json(&TtsRequest { text, voice })
            .send()
            .await
            .map_err(|e| LunaError::SynthesisError(format!("TTS request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LunaError::SynthesisError(format!("TTS failed with status {}", status)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| LunaError::SynthesisError(format!("TTS body read failed: {}", e)))?;
        Ok(bytes.to_vec())
    }

    /// Ask the talking-head service for a clip of `text`
    ///
    /// A `{fallback: true}` reply (on any status) becomes a
    /// [`LunaError::SynthesisError`], as do timeouts.
    pub async fn avatar_generate(&self, text: &str, audio_url: Option<&str>) -> Result<AvatarClip> {
        let request = AvatarRequest {
            text,
            audio_url,
            voice_id: &self.config.avatar_voice_id,
            quality: &self.config.avatar_quality,
        };

        let response = self
            .http
            .post(self.url("avatar/generate/"))
            .timeout(Duration::from_secs(self.config.avatar_timeout_secs))
            .json(&request)
            .send()
            .await
            .map_err(|e| LunaError::SynthesisError(format!("Avatar request failed: {}", e)))?;

        let status = response.status();
        let body: AvatarBody = response.json().await.map_err(|e| {
            LunaError::SynthesisError(format!("Avatar reply unreadable (status {}): {}", status, e))
        })?;

        if !status.is_success() && !body.fallback {
            return Err(LunaError::SynthesisError(format!(
                "Avatar generation failed with status {}",
                status
            )));
        }

        body.into_clip()
    }

    /// Whether the talking-head service reports itself healthy
    pub async fn avatar_health(&self) -> bool {
        let response = match self
            .http
            .get(self.url("avatar/health/"))
            .timeout(self.request_timeout())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Avatar health check failed: {}", e);
                return false;
            }
        };

        match response.json::<HealthBody>().await {
            Ok(body) => {
                let healthy = body.status == "healthy";
                info!("Avatar service status: {}", body.status);
                healthy
            }
            Err(e) => {
                warn!("Avatar health reply unreadable: {}", e);
                false
            }
        }
    }

    /// Fetch starter questions, falling back to the built-in list
    pub async fn suggested_questions(&self, count: usize) -> Vec<String> {
        let result = async {
            let response = self
                .http
                .get(self.url("suggested-questions/"))
                .query(&[("count", count)])
                .timeout(self.request_timeout())
                .send()
                .await?
                .error_for_status()?;
            response.json::<Vec<SuggestedQuestion>>().await
        }
        .await;

        match result {
            Ok(questions) if !questions.is_empty() => {
                questions.into_iter().map(|q| q.question).take(count).collect()
            }
            Ok(_) => fallback_questions(count),
            Err(e) => {
                warn!("Error fetching suggested questions: {}", e);
                fallback_questions(count)
            }
        }
    }
}

fn fallback_questions(count: usize) -> Vec<String> {
    FALLBACK_QUESTIONS
        .iter()
        .take(count.max(1))
        .map(|q| q.to_string())
        .collect()
}

#[async_trait]
impl ChatTransport for AgentClient {
    async fn stream_chat(
        &self,
        text: &str,
        session_id: &str,
        abandon: &AbandonFlag,
        on_event: &mut (dyn FnMut(StreamEvent) + Send),
    ) -> Result<IngestOutcome> {
        let url = self.url("chat/stream/");
        info!("[Stream] Starting stream to: {}", url);

        let response = self
            .http
            .post(&url)
            .json(&ChatRequest {
                message: text,
                session_id,
            })
            .send()
            .await
            .map_err(|e| LunaError::TransportError(e.to_string()))?;

        let status = response.status();
        debug!("[Stream] Response received, status: {}", status);
        if !status.is_success() {
            return Err(reject_status(status.as_u16(), on_event));
        }

        ingest(response.bytes_stream(), abandon, on_event).await
    }

    async fn chat(&self, text: &str, session_id: &str) -> Result<ChatResponse> {
        let response = self
            .http
            .post(self.url("chat/"))
            .timeout(self.request_timeout())
            .json(&ChatRequest {
                message: text,
                session_id,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LunaError::HttpStatus(status.as_u16()));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| LunaError::TransportError(format!("Chat reply unreadable: {}", e)))?;
        Ok(body)
    }
}
