//! Utterance capture with silence-based auto-send
//!
//! [`UtteranceCapture`] is the state machine: it takes recognition events,
//! microphone levels and clock readings and decides when an utterance is
//! over. [`CaptureDriver`] runs it on a Tokio task with the 300ms silence
//! check, recognizer restarts and the waveform ring.

use super::activity::AmplitudeRing;
use super::recognizer::{RecognitionErrorKind, RecognitionEvent, SpeechRecognizer};
use crate::integration::config::CaptureConfig;
use crate::{LunaError, Result};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Signals reported to the rest of the client
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureSignal {
    /// Listening began (sent once per `start`, never for restarts)
    Started,
    /// Transcript changed
    Transcript { final_text: String, interim_text: String },
    /// Silence ended the utterance; carries the trimmed transcript
    AutoSend(String),
    Stopped,
    /// Voice input is off for the rest of the session
    VoiceDisabled(String),
}

/// Mutable state of one listening session
#[derive(Debug, Clone)]
pub struct UtteranceSession {
    pub is_listening: bool,
    pub final_transcript: String,
    pub interim_transcript: String,
    pub last_speech_at: Instant,
    pub has_spoken: bool,
}

impl UtteranceSession {
    fn new(now: Instant) -> Self {
        Self {
            is_listening: false,
            final_transcript: String::new(),
            interim_transcript: String::new(),
            last_speech_at: now,
            has_spoken: false,
        }
    }

    /// Final text if any, otherwise the interim text
    pub fn transcript(&self) -> &str {
        if self.final_transcript.is_empty() {
            &self.interim_transcript
        } else {
            &self.final_transcript
        }
    }

    fn clear_transcript(&mut self) {
        self.final_transcript.clear();
        self.interim_transcript.clear();
    }
}

/// What the driver should do after a recognition event
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureStep {
    Signal(CaptureSignal),
    RestartRecognizer,
    Nothing,
}

pub struct UtteranceCapture {
    session: UtteranceSession,
    silence_threshold: Duration,
    activity_threshold: f32,
    voice_disabled: bool,
}

impl UtteranceCapture {
    pub fn new(config: &CaptureConfig, now: Instant) -> Self {
        Self {
            session: UtteranceSession::new(now),
            silence_threshold: Duration::from_millis(config.silence_threshold_ms),
            activity_threshold: config.activity_threshold,
            voice_disabled: false,
        }
    }

    pub fn session(&self) -> &UtteranceSession {
        &self.session
    }

    pub fn is_listening(&self) -> bool {
        self.session.is_listening
    }

    pub fn is_voice_disabled(&self) -> bool {
        self.voice_disabled
    }

    /// Reset the transcript and begin listening
    pub fn start_listening(&mut self, now: Instant) -> Result<()> {
        if self.voice_disabled {
            return Err(LunaError::RecognitionError(
                RecognitionErrorKind::NotAllowed.code().to_string(),
            ));
        }
        self.session = UtteranceSession::new(now);
        self.session.is_listening = true;
        Ok(())
    }

    /// Stop listening; returns the pending transcript for a manual send
    pub fn stop_listening(&mut self) -> Option<String> {
        self.session.is_listening = false;
        self.session.has_spoken = false;

        let pending = self.session.transcript().trim().to_string();
        self.session.clear_transcript();
        (!pending.is_empty()).then_some(pending)
    }

    pub fn on_recognition(&mut self, event: &RecognitionEvent, now: Instant) -> CaptureStep {
        match event {
            RecognitionEvent::Result {
                final_text,
                interim_text,
            } => {
                if !self.session.is_listening {
                    return CaptureStep::Nothing;
                }
                self.session.last_speech_at = now;
                self.session.has_spoken = true;

                if final_text.is_empty() {
                    self.session.interim_transcript = interim_text.clone();
                } else {
                    let joined = format!("{} {}", self.session.final_transcript, final_text);
                    self.session.final_transcript = joined.trim().to_string();
                    self.session.interim_transcript.clear();
                }

                CaptureStep::Signal(CaptureSignal::Transcript {
                    final_text: self.session.final_transcript.clone(),
                    interim_text: self.session.interim_transcript.clone(),
                })
            }

            RecognitionEvent::Ended => {
                if self.session.is_listening {
                    CaptureStep::RestartRecognizer
                } else {
                    CaptureStep::Nothing
                }
            }

            RecognitionEvent::Error(kind) => match kind {
                RecognitionErrorKind::NotAllowed => {
                    warn!("Microphone permission denied, disabling voice input");
                    self.voice_disabled = true;
                    self.session.is_listening = false;
                    self.session.has_spoken = false;
                    self.session.clear_transcript();
                    CaptureStep::Signal(CaptureSignal::VoiceDisabled(kind.code().to_string()))
                }
                RecognitionErrorKind::NoSpeech => {
                    debug!("No speech detected, continuing...");
                    CaptureStep::Nothing
                }
                other => {
                    warn!("Speech recognition error: {}", other.code());
                    CaptureStep::Nothing
                }
            },
        }
    }

    /// Feed a normalized microphone level
    pub fn on_audio_level(&mut self, level: f32, now: Instant) {
        if self.session.is_listening && level > self.activity_threshold {
            self.session.last_speech_at = now;
            self.session.has_spoken = true;
        }
    }

    /// Periodic check; returns the utterance to send once silence is long enough
    pub fn check_silence(&mut self, now: Instant) -> Option<String> {
        if !self.session.is_listening || !self.session.has_spoken {
            return None;
        }

        let text = self.session.transcript().trim().to_string();
        if text.is_empty() {
            return None;
        }

        let silent_for = now.saturating_duration_since(self.session.last_speech_at);
        if silent_for <= self.silence_threshold {
            return None;
        }

        self.session.has_spoken = false;
        self.session.clear_transcript();
        Some(text)
    }
}

/// Microphone level and waveform for display
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MicLevel {
    pub level: f32,
    pub waveform: Vec<f32>,
}

enum CaptureCommand {
    Start,
    Stop(oneshot::Sender<Option<String>>),
    Shutdown,
}

/// Control side of a running [`CaptureDriver`]
#[derive(Clone)]
pub struct CaptureHandle {
    commands: mpsc::UnboundedSender<CaptureCommand>,
    frames: mpsc::UnboundedSender<Vec<f32>>,
    level: watch::Receiver<MicLevel>,
}

impl CaptureHandle {
    pub fn start(&self) -> Result<()> {
        self.send(CaptureCommand::Start)
    }

    /// Stop listening and return whatever was transcribed so far
    pub async fn stop(&self) -> Result<Option<String>> {
        let (tx, rx) = oneshot::channel();
        self.send(CaptureCommand::Stop(tx))?;
        rx.await
            .map_err(|e| LunaError::ChannelError(format!("Capture task dropped reply: {}", e)))
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(CaptureCommand::Shutdown);
    }

    /// Sender for mono time-domain frames from the microphone
    pub fn frame_sender(&self) -> mpsc::UnboundedSender<Vec<f32>> {
        self.frames.clone()
    }

    pub fn level(&self) -> watch::Receiver<MicLevel> {
        self.level.clone()
    }

    fn send(&self, command: CaptureCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| LunaError::ChannelError("Capture task has stopped".into()))
    }
}

/// Runs [`UtteranceCapture`] against a recognizer and the microphone
pub struct CaptureDriver {
    capture: UtteranceCapture,
    ring: AmplitudeRing,
    recognizer: Box<dyn SpeechRecognizer>,
    check_interval: Duration,
    restart_delay: Duration,
    language: String,
}

impl CaptureDriver {
    pub fn new(config: &CaptureConfig, recognizer: Box<dyn SpeechRecognizer>) -> Self {
        Self {
            capture: UtteranceCapture::new(config, Instant::now()),
            ring: AmplitudeRing::new(config.waveform_buckets, config.activity_threshold),
            recognizer,
            check_interval: Duration::from_millis(config.check_interval_ms),
            restart_delay: Duration::from_millis(config.restart_delay_ms),
            language: config.language.clone(),
        }
    }

    /// Spawn the capture loop on the current runtime
    pub fn spawn(self, signals: mpsc::UnboundedSender<CaptureSignal>) -> (CaptureHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (level_tx, level_rx) = watch::channel(MicLevel::default());

        let handle = CaptureHandle {
            commands: command_tx,
            frames: frame_tx,
            level: level_rx,
        };
        let task = tokio::spawn(self.run(command_rx, frame_rx, level_tx, signals));
        (handle, task)
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<CaptureCommand>,
        mut frames: mpsc::UnboundedReceiver<Vec<f32>>,
        level: watch::Sender<MicLevel>,
        signals: mpsc::UnboundedSender<CaptureSignal>,
    ) {
        let (recognition_tx, mut recognition_rx) = mpsc::unbounded_channel();
        let mut silence_check = time::interval(self.check_interval);
        silence_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut restart_at: Option<Instant> = None;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(CaptureCommand::Start) => {
                        match self.capture.start_listening(Instant::now()) {
                            Ok(()) => {
                                self.recognizer.abort();
                                restart_at = Some(Instant::now() + self.restart_delay);
                                silence_check.reset();
                                info!("Listening started");
                                let _ = signals.send(CaptureSignal::Started);
                            }
                            Err(e) => {
                                let _ = signals.send(CaptureSignal::VoiceDisabled(e.to_string()));
                            }
                        }
                    }
                    Some(CaptureCommand::Stop(reply)) => {
                        let pending = self.release(&level, &mut restart_at);
                        let _ = signals.send(CaptureSignal::Stopped);
                        let _ = reply.send(pending);
                    }
                    Some(CaptureCommand::Shutdown) | None => {
                        self.release(&level, &mut restart_at);
                        break;
                    }
                },

                Some(event) = recognition_rx.recv() => {
                    match self.capture.on_recognition(&event, Instant::now()) {
                        CaptureStep::Signal(signal) => {
                            if matches!(signal, CaptureSignal::VoiceDisabled(_)) {
                                self.recognizer.abort();
                                self.ring.clear();
                                restart_at = None;
                                let _ = level.send(MicLevel::default());
                            }
                            let _ = signals.send(signal);
                        }
                        CaptureStep::RestartRecognizer => {
                            debug!("Speech recognition ended, restarting...");
                            restart_at = Some(Instant::now() + self.restart_delay);
                        }
                        CaptureStep::Nothing => {}
                    }
                }

                Some(frame) = frames.recv() => {
                    if self.capture.is_listening() {
                        let current = self.ring.push_frame(&frame);
                        self.capture.on_audio_level(current, Instant::now());
                        let _ = level.send(MicLevel {
                            level: current,
                            waveform: self.ring.waveform(),
                        });
                    }
                }

                _ = silence_check.tick(), if self.capture.is_listening() => {
                    if let Some(text) = self.capture.check_silence(Instant::now()) {
                        info!("Auto-sending after silence: {}", text);
                        let _ = signals.send(CaptureSignal::AutoSend(text));
                    }
                }

                _ = time::sleep_until(restart_at.unwrap_or_else(Instant::now)), if restart_at.is_some() => {
                    restart_at = None;
                    if self.capture.is_listening() {
                        if let Err(e) = self.recognizer.start(&self.language, recognition_tx.clone()) {
                            warn!("Restart failed: {}", e);
                        }
                    }
                }
            }
        }

        debug!("Capture loop exited");
    }

    /// Stop recognition and close the microphone view; returns the pending transcript
    fn release(&mut self, level: &watch::Sender<MicLevel>, restart_at: &mut Option<Instant>) -> Option<String> {
        *restart_at = None;
        let pending = self.capture.stop_listening();
        self.recognizer.stop();
        self.ring.clear();
        let _ = level.send(MicLevel::default());
        pending
    }
}
