//! Playback of finished answers
//!
//! Per turn exactly one source plays: a talking-head clip with its own
//! audio, or synthesized audio with a client-side lip-sync track. The
//! fallback ladder is clip → cloud audio → on-device speech, and one turn is
//! never spoken twice. Starting a new playback first stops the previous
//! element and its animation task (barge-in).

use super::media::{DeviceSpeech, MediaBackend, MediaElement, MediaSource, SpeechBackend};
use super::sanitize::sanitize_for_speech;
use super::viseme::{LipSync, Viseme};
use super::wav::{amplitude_envelope, AmplitudeEnvelope};
use crate::integration::config::{AgentConfig, PlaybackConfig};
use crate::Result;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackMode {
    #[default]
    Idle,
    Synthesizing,
    Playing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackSource {
    Audio,
    Video,
}

/// Published on every animation frame
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlaybackState {
    pub mode: PlaybackMode,
    pub source: Option<PlaybackSource>,
    pub viseme: Viseme,
    pub amplitude: f32,
    pub current_word: String,
    /// Fraction of the answer played, 0–1
    pub progress: f32,
}

impl PlaybackState {
    pub fn is_active(&self) -> bool {
        self.mode != PlaybackMode::Idle
    }
}

/// How a turn ended up being spoken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Spoken {
    Video,
    Audio,
    Device,
    /// Every tier failed; the answer stays text-only
    TextOnly,
    /// Nothing left to say after sanitizing
    Skipped,
    /// A newer playback started first
    Superseded,
}

/// What the last answer left behind for replay
#[derive(Debug, Clone)]
enum LastAnswer {
    Clip { url: String, duration: Option<Duration> },
    /// Sanitized text, spoken again through the audio tiers
    Text(String),
}

#[derive(Default)]
struct Active {
    element: Option<Arc<Mutex<Box<dyn MediaElement>>>>,
    animation: Option<JoinHandle<()>>,
}

struct Inner {
    backend: Arc<dyn SpeechBackend>,
    media: Arc<dyn MediaBackend>,
    device: Arc<dyn DeviceSpeech>,
    config: PlaybackConfig,
    voice: String,
    avatar_timeout: Duration,
    avatar_available: AtomicBool,
    generation: AtomicU64,
    active: Mutex<Active>,
    last: Mutex<Option<LastAnswer>>,
    state: watch::Sender<PlaybackState>,
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn publish(&self, state: PlaybackState) {
        self.state.send_replace(state);
    }

    fn publish_idle(&self) {
        self.publish(PlaybackState::default());
    }
}

/// Owner of the single active playback element
#[derive(Clone)]
pub struct Synthesizer {
    inner: Arc<Inner>,
}

impl Synthesizer {
    pub fn new(
        backend: Arc<dyn SpeechBackend>,
        media: Arc<dyn MediaBackend>,
        device: Arc<dyn DeviceSpeech>,
        playback: PlaybackConfig,
        agent: &AgentConfig,
    ) -> Self {
        let (state, _) = watch::channel(PlaybackState::default());
        Self {
            inner: Arc::new(Inner {
                backend,
                media,
                device,
                voice: agent.voice.clone(),
                avatar_timeout: Duration::from_secs(agent.avatar_timeout_secs),
                avatar_available: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                active: Mutex::new(Active::default()),
                last: Mutex::new(None),
                state,
                config: playback,
            }),
        }
    }

    /// Subscribe to playback state
    pub fn state(&self) -> watch::Receiver<PlaybackState> {
        self.inner.state.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.borrow().is_active()
    }

    /// Probe the talking-head service; the clip path is only tried when healthy
    pub async fn refresh_avatar_health(&self) -> bool {
        if !self.inner.config.enable_avatar {
            return false;
        }
        let available = self.inner.backend.avatar_available().await;
        if !available {
            info!("Avatar service not available, using TTS fallback");
        }
        self.inner.avatar_available.store(available, Ordering::SeqCst);
        available
    }

    pub fn set_avatar_available(&self, available: bool) {
        self.inner.avatar_available.store(available, Ordering::SeqCst);
    }

    /// Speak a finished answer
    ///
    /// Returns once playback has started (or every tier has failed).
    pub async fn speak(&self, text: &str) -> Result<Spoken> {
        let generation = self.halt();

        if !self.inner.config.enable_voice {
            return Ok(Spoken::Skipped);
        }

        let spoken = sanitize_for_speech(text);
        if spoken.is_empty() {
            return Ok(Spoken::Skipped);
        }

        *self.inner.last.lock() = Some(LastAnswer::Text(spoken.clone()));
        self.inner.publish(PlaybackState {
            mode: PlaybackMode::Synthesizing,
            ..Default::default()
        });

        if self.inner.config.enable_avatar && self.inner.avatar_available.load(Ordering::SeqCst) {
            match time::timeout(self.inner.avatar_timeout, self.inner.backend.render_avatar(&spoken)).await {
                Ok(Ok(clip)) => {
                    debug!("Avatar video generated: {}", clip.video_url);
                    let duration = clip.duration.and_then(|d| Duration::try_from_secs_f64(d).ok());
                    let source = MediaSource::Video(clip.video_url.clone());
                    match self.start_element(generation, source, None, None, duration) {
                        Ok(true) => {
                            *self.inner.last.lock() = Some(LastAnswer::Clip {
                                url: clip.video_url,
                                duration,
                            });
                            return Ok(Spoken::Video);
                        }
                        Ok(false) => return Ok(Spoken::Superseded),
                        Err(e) => warn!("Avatar clip failed to play, using TTS: {}", e),
                    }
                }
                Ok(Err(e)) => warn!("Avatar generation failed, using TTS: {}", e),
                Err(_) => warn!("Avatar generation timed out, using TTS"),
            }
        }

        if !self.inner.is_current(generation) {
            return Ok(Spoken::Superseded);
        }

        Ok(self.speak_audio(generation, &spoken).await)
    }

    /// Play the last answer again, interrupting whatever is playing
    ///
    /// A clip is replayed as is. Otherwise the text goes through the audio
    /// tiers without asking for a new clip.
    pub async fn replay(&self) -> Result<Spoken> {
        let generation = self.halt();
        let last = self.inner.last.lock().clone();

        match last {
            None => Ok(Spoken::Skipped),
            Some(_) if !self.inner.config.enable_voice => Ok(Spoken::Skipped),
            Some(LastAnswer::Clip { url, duration }) => {
                debug!("Replaying clip {}", url);
                match self.start_element(generation, MediaSource::Video(url), None, None, duration) {
                    Ok(true) => Ok(Spoken::Video),
                    Ok(false) => Ok(Spoken::Superseded),
                    Err(e) => {
                        warn!("Replay of clip failed: {}", e);
                        Err(e)
                    }
                }
            }
            Some(LastAnswer::Text(spoken)) => {
                self.inner.publish(PlaybackState {
                    mode: PlaybackMode::Synthesizing,
                    ..Default::default()
                });
                Ok(self.speak_audio(generation, &spoken).await)
            }
        }
    }

    /// Cloud audio, then on-device speech
    async fn speak_audio(&self, generation: u64, spoken: &str) -> Spoken {
        match self.inner.backend.synthesize(spoken, &self.inner.voice).await {
            Ok(bytes) => {
                let envelope = amplitude_envelope(&bytes).ok();
                let lip_sync = LipSync::new(spoken);
                let estimate = self.estimate_duration(spoken);
                match self.start_element(
                    generation,
                    MediaSource::Audio(bytes),
                    Some(lip_sync),
                    envelope,
                    Some(estimate),
                ) {
                    Ok(true) => Spoken::Audio,
                    Ok(false) => Spoken::Superseded,
                    Err(e) => {
                        warn!("Audio playback error, using device speech: {}", e);
                        self.speak_on_device(generation, spoken)
                    }
                }
            }
            Err(e) => {
                warn!("TTS error, falling back to device speech: {}", e);
                self.speak_on_device(generation, spoken)
            }
        }
    }

    /// Stop whatever is playing
    pub fn stop(&self) {
        self.halt();
    }

    /// Cancel the animation, stop the element and device speech; returns the
    /// generation owned by the caller from now on
    fn halt(&self) -> u64 {
        let mut active = self.inner.active.lock();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(animation) = active.animation.take() {
            animation.abort();
        }
        if let Some(element) = active.element.take() {
            element.lock().stop();
            debug!("Stopped previous playback");
        }
        self.inner.device.cancel();
        drop(active);

        self.inner.publish_idle();
        generation
    }

    fn estimate_duration(&self, text: &str) -> Duration {
        let letters = text.chars().filter(|c| !c.is_whitespace()).count().max(1);
        Duration::from_secs_f32(letters as f32 / self.inner.config.chars_per_second)
    }

    /// Load and play `source` if `generation` is still current
    fn start_element(
        &self,
        generation: u64,
        source: MediaSource,
        lip_sync: Option<LipSync>,
        envelope: Option<AmplitudeEnvelope>,
        fallback_duration: Option<Duration>,
    ) -> Result<bool> {
        let kind = match source {
            MediaSource::Audio(_) => PlaybackSource::Audio,
            MediaSource::Video(_) => PlaybackSource::Video,
        };

        let mut active = self.inner.active.lock();
        if !self.inner.is_current(generation) {
            return Ok(false);
        }

        let mut element = self.inner.media.load(source)?;
        element.play()?;
        info!("Playing {:?}", kind);

        let element = Arc::new(Mutex::new(element));
        let animation = tokio::spawn(animate(
            Arc::clone(&self.inner),
            generation,
            Arc::clone(&element),
            kind,
            lip_sync,
            envelope,
            fallback_duration,
        ));

        active.element = Some(element);
        active.animation = Some(animation);
        drop(active);

        self.inner.publish(PlaybackState {
            mode: PlaybackMode::Playing,
            source: Some(kind),
            ..Default::default()
        });
        Ok(true)
    }

    fn speak_on_device(&self, generation: u64, text: &str) -> Spoken {
        let mut active = self.inner.active.lock();
        if !self.inner.is_current(generation) {
            return Spoken::Superseded;
        }

        let config = &self.inner.config;
        if let Err(e) = self.inner.device.speak(text, config.device_rate, config.device_pitch) {
            warn!("Device speech failed, answer stays text-only: {}", e);
            drop(active);
            self.inner.publish_idle();
            return Spoken::TextOnly;
        }

        active.animation = Some(tokio::spawn(watch_device(Arc::clone(&self.inner), generation)));
        drop(active);

        self.inner.publish(PlaybackState {
            mode: PlaybackMode::Playing,
            source: Some(PlaybackSource::Audio),
            ..Default::default()
        });
        Spoken::Device
    }
}

/// Per-frame lip-sync loop for one element
async fn animate(
    inner: Arc<Inner>,
    generation: u64,
    element: Arc<Mutex<Box<dyn MediaElement>>>,
    kind: PlaybackSource,
    mut lip_sync: Option<LipSync>,
    envelope: Option<AmplitudeEnvelope>,
    fallback_duration: Option<Duration>,
) {
    let mut frames = time::interval(Duration::from_millis(inner.config.frame_interval_ms));
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        frames.tick().await;

        let (position, duration, finished) = {
            let element = element.lock();
            (element.position(), element.duration(), element.is_finished())
        };
        if finished {
            break;
        }

        let total = duration
            .or_else(|| envelope.as_ref().map(AmplitudeEnvelope::duration))
            .or(fallback_duration)
            .filter(|d| !d.is_zero());
        let progress = total
            .map(|t| (position.as_secs_f32() / t.as_secs_f32()).clamp(0.0, 1.0))
            .unwrap_or(0.0);
        let amplitude = envelope.as_ref().map(|e| e.at(position));

        let (viseme, current_word) = match lip_sync.as_mut() {
            Some(sync) => {
                let frame = sync.frame(progress, amplitude);
                (frame.viseme, frame.current_word)
            }
            None => (Viseme::SILENCE, String::new()),
        };

        inner.publish(PlaybackState {
            mode: PlaybackMode::Playing,
            source: Some(kind),
            viseme,
            amplitude: amplitude.unwrap_or(0.0),
            current_word,
            progress,
        });
    }

    finish(&inner, generation);
}

/// Wait for on-device speech to end
async fn watch_device(inner: Arc<Inner>, generation: u64) {
    let mut frames = time::interval(Duration::from_millis(inner.config.frame_interval_ms.max(50)));
    // The first tick fires immediately; give the device a moment to start
    frames.tick().await;
    loop {
        frames.tick().await;
        if !inner.device.is_speaking() {
            break;
        }
    }
    finish(&inner, generation);
}

fn finish(inner: &Inner, generation: u64) {
    let mut active = inner.active.lock();
    if !inner.is_current(generation) {
        return;
    }
    active.element = None;
    // Detach our own handle; the task is about to return
    active.animation = None;
    drop(active);

    debug!("Playback finished");
    inner.publish_idle();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AvatarClip;
    use crate::LunaError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::Instant;

    #[derive(Default)]
    struct FakeBackend {
        avatar_fails: bool,
        synth_fails: bool,
        synth_delay: Duration,
        avatar_calls: AtomicUsize,
        synth_calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SpeechBackend for FakeBackend {
        async fn synthesize(&self, text: &str, _voice: &str) -> Result<Vec<u8>> {
            self.synth_calls.lock().push(text.to_string());
            if !self.synth_delay.is_zero() {
                time::sleep(self.synth_delay).await;
            }
            if self.synth_fails {
                return Err(LunaError::SynthesisError("tts down".into()));
            }
            Ok(vec![1, 2, 3])
        }

        async fn render_avatar(&self, _text: &str) -> Result<AvatarClip> {
            self.avatar_calls.fetch_add(1, Ordering::SeqCst);
            if self.avatar_fails {
                return Err(LunaError::SynthesisError("avatar crashed".into()));
            }
            Ok(AvatarClip {
                video_url: "/media/luna.mp4".into(),
                audio_url: None,
                video_id: None,
                duration: Some(3.0),
                status: Some("completed".into()),
            })
        }

        async fn avatar_available(&self) -> bool {
            true
        }
    }

    type Log = Arc<Mutex<Vec<String>>>;

    struct FakeElement {
        name: String,
        log: Log,
        length: Duration,
        started: Option<Instant>,
        stopped: bool,
    }

    impl MediaElement for FakeElement {
        fn play(&mut self) -> Result<()> {
            self.log.lock().push(format!("play {}", self.name));
            self.started = Some(Instant::now());
            Ok(())
        }

        fn stop(&mut self) {
            self.log.lock().push(format!("stop {}", self.name));
            self.stopped = true;
        }

        fn position(&self) -> Duration {
            self.started.map(|s| s.elapsed().min(self.length)).unwrap_or_default()
        }

        fn duration(&self) -> Option<Duration> {
            Some(self.length)
        }

        fn is_finished(&self) -> bool {
            self.stopped || self.position() >= self.length
        }
    }

    struct FakeMedia {
        log: Log,
        count: AtomicUsize,
        length: Duration,
    }

    impl MediaBackend for FakeMedia {
        fn load(&self, source: MediaSource) -> Result<Box<dyn MediaElement>> {
            let n = self.count.fetch_add(1, Ordering::SeqCst) + 1;
            let kind = match source {
                MediaSource::Audio(_) => "audio",
                MediaSource::Video(_) => "video",
            };
            Ok(Box::new(FakeElement {
                name: format!("{}#{}", kind, n),
                log: self.log.clone(),
                length: self.length,
                started: None,
                stopped: false,
            }))
        }
    }

    #[derive(Default)]
    struct FakeDevice {
        spoken: Mutex<Vec<(String, f32, f32)>>,
    }

    impl DeviceSpeech for FakeDevice {
        fn speak(&self, text: &str, rate: f32, pitch: f32) -> Result<()> {
            self.spoken.lock().push((text.to_string(), rate, pitch));
            Ok(())
        }

        fn cancel(&self) {}

        fn is_speaking(&self) -> bool {
            false
        }
    }

    struct Rig {
        synth: Synthesizer,
        backend: Arc<FakeBackend>,
        device: Arc<FakeDevice>,
        log: Log,
    }

    fn rig(backend: FakeBackend, avatar: bool) -> Rig {
        let backend = Arc::new(backend);
        let device = Arc::new(FakeDevice::default());
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let media = Arc::new(FakeMedia {
            log: log.clone(),
            count: AtomicUsize::new(0),
            length: Duration::from_secs(10),
        });
        let synth = Synthesizer::new(
            backend.clone(),
            media,
            device.clone(),
            PlaybackConfig::default(),
            &AgentConfig::default(),
        );
        synth.set_avatar_available(avatar);
        Rig {
            synth,
            backend,
            device,
            log,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_avatar_failure_synthesizes_audio_once() {
        let rig = rig(
            FakeBackend {
                avatar_fails: true,
                ..Default::default()
            },
            true,
        );

        let spoken = rig.synth.speak("Welcome to Dubai.").await.unwrap();

        assert_eq!(spoken, Spoken::Audio);
        assert_eq!(rig.backend.avatar_calls.load(Ordering::SeqCst), 1);
        assert_eq!(*rig.backend.synth_calls.lock(), vec!["Welcome to Dubai.".to_string()]);
        assert!(rig.device.spoken.lock().is_empty());
        assert_eq!(*rig.log.lock(), vec!["play audio#1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_video_suppresses_audio() {
        let rig = rig(FakeBackend::default(), true);

        let spoken = rig.synth.speak("Hello").await.unwrap();

        assert_eq!(spoken, Spoken::Video);
        assert!(rig.backend.synth_calls.lock().is_empty());
        assert_eq!(rig.synth.state().borrow().source, Some(PlaybackSource::Video));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhealthy_avatar_is_skipped() {
        let rig = rig(FakeBackend::default(), false);
        assert_eq!(rig.synth.speak("Hello").await.unwrap(), Spoken::Audio);
        assert_eq!(rig.backend.avatar_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tts_failure_uses_device_speech() {
        let rig = rig(
            FakeBackend {
                synth_fails: true,
                ..Default::default()
            },
            false,
        );

        let spoken = rig.synth.speak("It costs $500").await.unwrap();

        assert_eq!(spoken, Spoken::Device);
        assert_eq!(
            *rig.device.spoken.lock(),
            vec![("It costs 500 dollars".to_string(), 0.95, 1.0)]
        );
        assert!(rig.log.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_barge_in_stops_previous_before_next_plays() {
        let rig = rig(FakeBackend::default(), false);

        assert_eq!(rig.synth.speak("First answer").await.unwrap(), Spoken::Audio);
        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(rig.synth.speak("Second answer").await.unwrap(), Spoken::Audio);

        assert_eq!(
            *rig.log.lock(),
            vec![
                "play audio#1".to_string(),
                "stop audio#1".to_string(),
                "play audio#2".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_synthesis_is_superseded() {
        let rig = rig(
            FakeBackend {
                synth_delay: Duration::from_millis(200),
                ..Default::default()
            },
            false,
        );

        let first = {
            let synth = rig.synth.clone();
            tokio::spawn(async move { synth.speak("First").await })
        };
        tokio::task::yield_now().await;
        let second = rig.synth.speak("Second").await.unwrap();

        assert_eq!(first.await.unwrap().unwrap(), Spoken::Superseded);
        assert_eq!(second, Spoken::Audio);
        assert_eq!(*rig.log.lock(), vec!["play audio#1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_returns_to_idle_when_finished() {
        let rig = rig(FakeBackend::default(), false);
        let state = rig.synth.state();

        rig.synth.speak("Short").await.unwrap();
        time::sleep(Duration::from_millis(100)).await;
        {
            let current = state.borrow();
            assert_eq!(current.mode, PlaybackMode::Playing);
            assert!(current.progress > 0.0);
        }

        time::sleep(Duration::from_secs(11)).await;
        assert_eq!(state.borrow().mode, PlaybackMode::Idle);
        assert!(!rig.synth.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_interrupts_and_speaks_once() {
        let rig = rig(FakeBackend::default(), false);
        assert_eq!(rig.synth.replay().await.unwrap(), Spoken::Skipped);

        rig.synth.speak("Welcome to Dubai.").await.unwrap();
        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(rig.synth.replay().await.unwrap(), Spoken::Audio);

        assert_eq!(
            *rig.log.lock(),
            vec![
                "play audio#1".to_string(),
                "stop audio#1".to_string(),
                "play audio#2".to_string(),
            ]
        );
        assert_eq!(
            *rig.backend.synth_calls.lock(),
            vec!["Welcome to Dubai.".to_string(), "Welcome to Dubai.".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_reuses_clip() {
        let rig = rig(FakeBackend::default(), true);

        assert_eq!(rig.synth.speak("Hello").await.unwrap(), Spoken::Video);
        assert_eq!(rig.synth.replay().await.unwrap(), Spoken::Video);

        assert_eq!(rig.backend.avatar_calls.load(Ordering::SeqCst), 1);
        assert!(rig.backend.synth_calls.lock().is_empty());
        assert_eq!(
            *rig.log.lock(),
            vec![
                "play video#1".to_string(),
                "stop video#1".to_string(),
                "play video#2".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_markdown_only_answer_is_skipped() {
        let rig = rig(FakeBackend::default(), false);
        assert_eq!(rig.synth.speak("<br/>").await.unwrap(), Spoken::Skipped);
        assert!(rig.backend.synth_calls.lock().is_empty());
    }
}
