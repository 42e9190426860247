//! Orchestrator for the realtime conversation loop
//!
//! Connects all components: Voice -> transcript -> agent stream -> turn
//! store -> playback. Everything runs on one thread with a current-thread
//! runtime; the UI talks to it through [`OrchestratorHandle`].

use crate::agent::{AbandonFlag, AgentClient, ChatTransport};
use crate::integration::config::LunaConfig;
use crate::integration::controller::{FallbackController, TurnOutcome, TurnReport};
use crate::messages::{Message, Session};
use crate::playback::{
    DeviceSpeech, MediaBackend, NoMedia, PlaybackState, SilentDevice, SpeechBackend, Spoken,
    Synthesizer,
};
use crate::speech::{CaptureDriver, CaptureHandle, CaptureSignal, SpeechRecognizer};
use crate::turn::{Presence, TurnStore, TurnUpdate};
use crate::utils::{LatencyWindow, TurnTiming};
use crate::{LunaError, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time;
use tracing::{debug, info, warn};

const COMMAND_POLL: Duration = Duration::from_millis(10);
const LATENCY_WINDOW: usize = 20;

/// Commands that can be sent to the orchestrator
#[derive(Debug, Clone)]
pub enum OrchestratorCommand {
    /// Ask the agent a typed question
    SendText(String),

    StartListening,

    /// Stop listening; a pending transcript is sent
    StopListening,

    /// Cut off the answer being spoken
    StopSpeaking,

    /// Play the last answer again (clip if there was one, else its text)
    Replay,

    ClearHistory,

    Shutdown,
}

/// Events emitted by the orchestrator
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// The assistant message changed (every token)
    MessageUpdated(Message),

    Transcript {
        final_text: String,
        interim_text: String,
    },

    ListeningStarted,

    ListeningStopped,

    /// Voice input is off for the rest of the session
    VoiceDisabled(String),

    TurnComplete {
        outcome: TurnOutcome,
        timing: TurnTiming,
    },

    /// Playback of the answer began
    SpeechStarted(Spoken),

    PresenceChanged(Presence),

    /// User-visible error banner
    Error(String),

    Shutdown,
}

/// Handle for controlling the orchestrator from the UI
pub struct OrchestratorHandle {
    command_tx: Sender<OrchestratorCommand>,
    event_rx: Receiver<OrchestratorEvent>,
    playback: watch::Receiver<PlaybackState>,
    capture: Arc<Mutex<Option<CaptureHandle>>>,
}

impl OrchestratorHandle {
    pub fn send_command(&self, cmd: OrchestratorCommand) -> Result<()> {
        self.command_tx
            .send(cmd)
            .map_err(|e| LunaError::ChannelError(format!("Failed to send command: {}", e)))
    }

    pub fn try_recv_event(&self) -> Option<OrchestratorEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Block up to `timeout` for the next event
    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<OrchestratorEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    /// Current playback frame (mouth shape, word, progress)
    pub fn playback_state(&self) -> PlaybackState {
        self.playback.borrow().clone()
    }

    /// Capture control, once the orchestrator has started with a recognizer
    ///
    /// Microphone frames go to its `frame_sender`, levels come from `level`.
    pub fn capture(&self) -> Option<CaptureHandle> {
        self.capture.lock().clone()
    }
}

/// Main orchestrator that coordinates all components
pub struct Orchestrator {
    config: LunaConfig,
    transport: Arc<dyn ChatTransport>,
    synthesizer: Synthesizer,
    recognizer: Option<Box<dyn SpeechRecognizer>>,
    command_rx: Receiver<OrchestratorCommand>,
    event_tx: Sender<OrchestratorEvent>,
    capture: Arc<Mutex<Option<CaptureHandle>>>,
}

impl Orchestrator {
    pub fn new(
        config: LunaConfig,
        transport: Arc<dyn ChatTransport>,
        synthesizer: Synthesizer,
        recognizer: Option<Box<dyn SpeechRecognizer>>,
    ) -> (Self, OrchestratorHandle) {
        let (command_tx, command_rx) = bounded(100);
        // Unbounded: the loop must never block on a slow UI
        let (event_tx, event_rx) = unbounded();
        let capture = Arc::new(Mutex::new(None));

        let handle = OrchestratorHandle {
            command_tx,
            event_rx,
            playback: synthesizer.state(),
            capture: Arc::clone(&capture),
        };

        let orchestrator = Self {
            config,
            transport,
            synthesizer,
            recognizer,
            command_rx,
            event_tx,
            capture,
        };

        (orchestrator, handle)
    }

    /// Start the loop on its own thread
    ///
    /// Returns once the runtime is up and capture (if any) is running.
    pub fn start(self) -> Result<JoinHandle<()>> {
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);

        let handle = thread::Builder::new()
            .name("luna-orchestrator".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(LunaError::IOError(format!(
                            "Failed to build runtime: {}",
                            e
                        ))));
                        return;
                    }
                };
                runtime.block_on(self.run(ready_tx));
            })?;

        ready_rx
            .recv()
            .map_err(|e| LunaError::ChannelError(format!("Orchestrator failed to start: {}", e)))??;
        Ok(handle)
    }

    async fn run(mut self, ready: Sender<Result<()>>) {
        info!("Orchestrator started");

        let (signal_tx, mut signals) = mpsc::unbounded_channel();
        let capture = self.recognizer.take().map(|recognizer| {
            let (handle, _task) = CaptureDriver::new(&self.config.capture, recognizer).spawn(signal_tx);
            handle
        });
        *self.capture.lock() = capture.clone();

        if self.config.playback.enable_avatar && self.config.playback.enable_voice {
            let synthesizer = self.synthesizer.clone();
            tokio::spawn(async move {
                synthesizer.refresh_avatar_health().await;
            });
        }

        let mut store = TurnStore::new(Session::random());
        let events = self.event_tx.clone();
        store.subscribe(Box::new(move |message: &Message| {
            let _ = events.send(OrchestratorEvent::MessageUpdated(message.clone()));
        }));

        let mut controller = FallbackController::new(Arc::clone(&self.transport), store.session().id());
        if self.config.disable_streaming {
            controller = controller.without_streaming();
        }

        let (turn_tx, mut turn_rx) = mpsc::unbounded_channel();
        let mut playback = self.synthesizer.state();

        let mut conversation = Conversation {
            store,
            controller: Arc::new(controller),
            synthesizer: self.synthesizer.clone(),
            capture,
            events: self.event_tx.clone(),
            turns: turn_tx,
            turn: None,
            next_turn: 0,
            listening: false,
            speak_answers: self.config.playback.enable_voice,
            presence: Presence::Idle,
            last_error: None,
            latency: LatencyWindow::new(LATENCY_WINDOW),
        };

        let _ = ready.send(Ok(()));

        let mut poll = time::interval(COMMAND_POLL);
        'main: loop {
            tokio::select! {
                _ = poll.tick() => {
                    loop {
                        match self.command_rx.try_recv() {
                            Ok(command) => {
                                if !conversation.on_command(command).await {
                                    break 'main;
                                }
                            }
                            Err(TryRecvError::Empty) => break,
                            Err(TryRecvError::Disconnected) => {
                                warn!("Command channel disconnected");
                                break 'main;
                            }
                        }
                    }
                }

                Some(signal) = signals.recv() => conversation.on_capture(signal),

                Some((id, message)) = turn_rx.recv() => conversation.on_turn(id, message),

                Ok(()) = playback.changed() => conversation.refresh_presence(),
            }
        }

        conversation.teardown();
        info!("Orchestrator stopped");
    }
}

enum TurnMessage {
    Update(TurnUpdate),
    Finished(TurnReport),
}

struct ActiveTurn {
    id: u64,
    abandon: AbandonFlag,
    task: tokio::task::JoinHandle<()>,
}

/// Loop-owned state; the only writer of the turn store
struct Conversation {
    store: TurnStore,
    controller: Arc<FallbackController>,
    synthesizer: Synthesizer,
    capture: Option<CaptureHandle>,
    events: Sender<OrchestratorEvent>,
    turns: mpsc::UnboundedSender<(u64, TurnMessage)>,
    turn: Option<ActiveTurn>,
    next_turn: u64,
    listening: bool,
    speak_answers: bool,
    presence: Presence,
    last_error: Option<String>,
    latency: LatencyWindow,
}

impl Conversation {
    fn emit(&self, event: OrchestratorEvent) {
        let _ = self.events.send(event);
    }

    /// Returns false on shutdown
    async fn on_command(&mut self, command: OrchestratorCommand) -> bool {
        match command {
            OrchestratorCommand::SendText(text) => self.start_turn(text),
            OrchestratorCommand::StartListening => {
                self.synthesizer.stop();
                match &self.capture {
                    Some(capture) => {
                        if let Err(e) = capture.start() {
                            self.emit(OrchestratorEvent::Error(e.user_message()));
                        }
                    }
                    None => self.emit(OrchestratorEvent::VoiceDisabled(
                        "Voice input is not available".to_string(),
                    )),
                }
            }
            OrchestratorCommand::StopListening => {
                if let Some(capture) = self.capture.clone() {
                    match capture.stop().await {
                        Ok(Some(text)) => self.start_turn(text),
                        Ok(None) => {}
                        Err(e) => warn!("Failed to stop capture: {}", e),
                    }
                }
            }
            OrchestratorCommand::StopSpeaking => self.synthesizer.stop(),
            OrchestratorCommand::Replay => self.replay_answer(),
            OrchestratorCommand::ClearHistory => {
                self.cancel_turn();
                self.synthesizer.stop();
                self.store.clear();
                self.last_error = None;
                debug!("Conversation cleared");
            }
            OrchestratorCommand::Shutdown => {
                info!("Orchestrator shutdown requested");
                return false;
            }
        }
        self.refresh_presence();
        true
    }

    fn on_capture(&mut self, signal: CaptureSignal) {
        match signal {
            CaptureSignal::Started => {
                self.listening = true;
                self.emit(OrchestratorEvent::ListeningStarted);
            }
            CaptureSignal::Transcript {
                final_text,
                interim_text,
            } => self.emit(OrchestratorEvent::Transcript {
                final_text,
                interim_text,
            }),
            CaptureSignal::AutoSend(text) => self.start_turn(text),
            CaptureSignal::Stopped => {
                self.listening = false;
                self.emit(OrchestratorEvent::ListeningStopped);
            }
            CaptureSignal::VoiceDisabled(reason) => {
                self.listening = false;
                self.emit(OrchestratorEvent::VoiceDisabled(reason));
            }
        }
        self.refresh_presence();
    }

    fn on_turn(&mut self, id: u64, message: TurnMessage) {
        if self.turn.as_ref().map(|t| t.id) != Some(id) {
            debug!("Dropping update from superseded turn {}", id);
            return;
        }

        match message {
            TurnMessage::Update(update) => {
                self.store.apply(&update);
            }
            TurnMessage::Finished(report) => {
                self.turn = None;
                if report.outcome != TurnOutcome::Abandoned {
                    self.latency.record(&report.timing);
                    debug!("Latency {}", self.latency.summary());
                }
                if self.store.has_active_turn() {
                    self.store.abandon_turn();
                }
                self.emit(OrchestratorEvent::TurnComplete {
                    outcome: report.outcome,
                    timing: report.timing,
                });
                if matches!(report.outcome, TurnOutcome::Streamed | TurnOutcome::FellBack) {
                    self.speak_answer();
                }
            }
        }

        self.report_error();
        self.refresh_presence();
    }

    fn start_turn(&mut self, text: String) {
        let text = text.trim().to_string();
        if text.is_empty() {
            return;
        }

        // Input is closed until the current answer finishes
        if let Some(turn) = &self.turn {
            debug!("Turn {} still running, ignoring input: {}", turn.id, text);
            return;
        }

        // Barge-in: a new question silences the old answer
        self.synthesizer.stop();

        self.next_turn += 1;
        let id = self.next_turn;
        self.store.begin_turn(text.clone());
        self.last_error = None;
        info!("Turn {} started", id);

        let abandon = AbandonFlag::new();
        let flag = abandon.clone();
        let controller = Arc::clone(&self.controller);
        let turns = self.turns.clone();
        let task = tokio::spawn(async move {
            let report = {
                let mut forward = |update: TurnUpdate| {
                    let _ = turns.send((id, TurnMessage::Update(update)));
                };
                controller.run_turn(&text, &flag, &mut forward).await
            };
            let _ = turns.send((id, TurnMessage::Finished(report)));
        });

        self.turn = Some(ActiveTurn { id, abandon, task });
    }

    fn cancel_turn(&mut self) {
        if let Some(turn) = self.turn.take() {
            turn.abandon.abandon();
            turn.task.abort();
            self.store.abandon_turn();
            debug!("Turn {} abandoned", turn.id);
        }
    }

    fn speak_answer(&self) {
        if !self.speak_answers {
            return;
        }
        let Some(text) = self
            .store
            .session()
            .last()
            .filter(|m| m.is_assistant() && !m.content.trim().is_empty())
            .map(|m| m.content.clone())
        else {
            return;
        };

        let synthesizer = self.synthesizer.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            match synthesizer.speak(&text).await {
                Ok(spoken) => {
                    debug!("Answer playback: {:?}", spoken);
                    let _ = events.send(OrchestratorEvent::SpeechStarted(spoken));
                }
                Err(e) => warn!("Playback failed, answer stays text-only: {}", e),
            }
        });
    }

    fn replay_answer(&self) {
        if !self.speak_answers {
            return;
        }
        let synthesizer = self.synthesizer.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            match synthesizer.replay().await {
                Ok(Spoken::Skipped) => debug!("Nothing to replay"),
                Ok(spoken) => {
                    let _ = events.send(OrchestratorEvent::SpeechStarted(spoken));
                }
                Err(e) => warn!("Replay failed: {}", e),
            }
        });
    }

    /// Surface a new session error once
    fn report_error(&mut self) {
        let current = self.store.session().error().map(str::to_string);
        if current.is_some() && current != self.last_error {
            if let Some(error) = &current {
                self.emit(OrchestratorEvent::Error(error.clone()));
            }
        }
        self.last_error = current;
    }

    fn refresh_presence(&mut self) {
        let presence = Presence::derive(
            self.synthesizer.is_active(),
            self.listening,
            self.store.has_active_turn(),
        );
        if presence != self.presence {
            self.presence = presence;
            self.emit(OrchestratorEvent::PresenceChanged(presence));
        }
    }

    fn teardown(&mut self) {
        self.cancel_turn();
        self.synthesizer.stop();
        if let Some(capture) = &self.capture {
            capture.shutdown();
        }
        self.emit(OrchestratorEvent::Shutdown);
    }
}

/// Builder for creating an orchestrator
///
/// Collaborators not supplied default to the HTTP agent client, text-only
/// media and silent device speech.
pub struct OrchestratorBuilder {
    config: LunaConfig,
    transport: Option<Arc<dyn ChatTransport>>,
    speech: Option<Arc<dyn SpeechBackend>>,
    media: Option<Arc<dyn MediaBackend>>,
    device: Option<Arc<dyn DeviceSpeech>>,
    recognizer: Option<Box<dyn SpeechRecognizer>>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: LunaConfig::default(),
            transport: None,
            speech: None,
            media: None,
            device: None,
            recognizer: None,
        }
    }

    pub fn with_config(mut self, config: LunaConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn ChatTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_speech_backend(mut self, speech: Arc<dyn SpeechBackend>) -> Self {
        self.speech = Some(speech);
        self
    }

    pub fn with_media(mut self, media: Arc<dyn MediaBackend>) -> Self {
        self.media = Some(media);
        self
    }

    pub fn with_device_speech(mut self, device: Arc<dyn DeviceSpeech>) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_recognizer(mut self, recognizer: Box<dyn SpeechRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    pub fn build(self) -> Result<(Orchestrator, OrchestratorHandle)> {
        self.config.validate()?;

        let mut client: Option<Arc<AgentClient>> = None;
        let mut agent = |config: &LunaConfig| -> Result<Arc<AgentClient>> {
            if let Some(existing) = &client {
                return Ok(Arc::clone(existing));
            }
            let created = Arc::new(AgentClient::new(config.agent.clone())?);
            client = Some(Arc::clone(&created));
            Ok(created)
        };

        let transport: Arc<dyn ChatTransport> = match self.transport {
            Some(transport) => transport,
            None => agent(&self.config)?,
        };
        let speech: Arc<dyn SpeechBackend> = match self.speech {
            Some(speech) => speech,
            None => agent(&self.config)?,
        };
        let media = self.media.unwrap_or_else(|| Arc::new(NoMedia));
        let device = self.device.unwrap_or_else(|| Arc::new(SilentDevice));

        let synthesizer = Synthesizer::new(
            speech,
            media,
            device,
            self.config.playback.clone(),
            &self.config.agent,
        );

        Ok(Orchestrator::new(self.config, transport, synthesizer, self.recognizer))
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ingest::reject_status;
    use crate::agent::{AvatarClip, ChatResponse, IngestOutcome, StreamEvent};
    use async_trait::async_trait;
    use tokio::sync::Notify;

    struct ScriptedTransport {
        events: Vec<StreamEvent>,
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn stream_chat(
            &self,
            _text: &str,
            _session_id: &str,
            _abandon: &AbandonFlag,
            on_event: &mut (dyn FnMut(StreamEvent) + Send),
        ) -> Result<IngestOutcome> {
            let mut outcome = IngestOutcome::default();
            for event in &self.events {
                outcome.saw_done |= event.is_done();
                outcome.events_delivered += 1;
                on_event(event.clone());
            }
            Ok(outcome)
        }

        async fn chat(&self, _text: &str, _session_id: &str) -> Result<ChatResponse> {
            Err(LunaError::TransportError("offline".into()))
        }
    }

    /// Answers with "Hel", waits for `release`, then finishes with "lo"
    #[derive(Default)]
    struct HeldTransport {
        release: Notify,
        questions: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatTransport for HeldTransport {
        async fn stream_chat(
            &self,
            text: &str,
            _session_id: &str,
            _abandon: &AbandonFlag,
            on_event: &mut (dyn FnMut(StreamEvent) + Send),
        ) -> Result<IngestOutcome> {
            self.questions.lock().push(text.to_string());
            on_event(StreamEvent::ResponseToken("Hel".into()));
            self.release.notified().await;
            on_event(StreamEvent::ResponseToken("lo".into()));
            on_event(StreamEvent::Done(vec![]));
            Ok(IngestOutcome {
                events_delivered: 3,
                saw_done: true,
                ..Default::default()
            })
        }

        async fn chat(&self, _text: &str, _session_id: &str) -> Result<ChatResponse> {
            Err(LunaError::TransportError("offline".into()))
        }
    }

    /// Rejects every stream with 503; single-shot works
    struct UnavailableStream;

    #[async_trait]
    impl ChatTransport for UnavailableStream {
        async fn stream_chat(
            &self,
            _text: &str,
            _session_id: &str,
            _abandon: &AbandonFlag,
            on_event: &mut (dyn FnMut(StreamEvent) + Send),
        ) -> Result<IngestOutcome> {
            Err(reject_status(503, on_event))
        }

        async fn chat(&self, _text: &str, _session_id: &str) -> Result<ChatResponse> {
            Ok(ChatResponse::from_text("Rents start at 5000 dirhams."))
        }
    }

    #[derive(Default)]
    struct CountingVoice {
        spoken: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SpeechBackend for CountingVoice {
        async fn synthesize(&self, text: &str, _voice: &str) -> Result<Vec<u8>> {
            self.spoken.lock().push(text.to_string());
            Ok(Vec::new())
        }

        async fn render_avatar(&self, _text: &str) -> Result<AvatarClip> {
            Err(LunaError::SynthesisError("no avatar".into()))
        }

        async fn avatar_available(&self) -> bool {
            false
        }
    }

    fn text_only() -> LunaConfig {
        LunaConfig::default().without_avatar().without_voice()
    }

    fn wait_for<F>(handle: &OrchestratorHandle, mut predicate: F) -> Vec<OrchestratorEvent>
    where
        F: FnMut(&OrchestratorEvent) -> bool,
    {
        let mut seen = Vec::new();
        while let Some(event) = handle.recv_event_timeout(Duration::from_secs(5)) {
            let hit = predicate(&event);
            seen.push(event);
            if hit {
                break;
            }
        }
        seen
    }

    #[test]
    fn test_text_turn_streams_into_messages() {
        let transport = Arc::new(ScriptedTransport {
            events: vec![
                StreamEvent::Phase("thinking".into()),
                StreamEvent::ResponseToken("Hello".into()),
                StreamEvent::ResponseToken(" there".into()),
                StreamEvent::Done(vec!["More?".into()]),
            ],
        });
        let (orchestrator, handle) = OrchestratorBuilder::new()
            .with_config(text_only())
            .with_transport(transport)
            .build()
            .unwrap();
        let thread = orchestrator.start().unwrap();

        handle
            .send_command(OrchestratorCommand::SendText("hi".into()))
            .unwrap();
        let events = wait_for(&handle, |e| matches!(e, OrchestratorEvent::TurnComplete { .. }));

        let last = events
            .iter()
            .filter_map(|e| match e {
                OrchestratorEvent::MessageUpdated(m) => Some(m.clone()),
                _ => None,
            })
            .last()
            .unwrap();
        assert_eq!(last.content, "Hello there");
        assert!(!last.is_streaming);
        assert!(events.iter().any(|e| matches!(
            e,
            OrchestratorEvent::TurnComplete {
                outcome: TurnOutcome::Streamed,
                ..
            }
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, OrchestratorEvent::PresenceChanged(Presence::Thinking))));

        handle.send_command(OrchestratorCommand::Shutdown).unwrap();
        wait_for(&handle, |e| matches!(e, OrchestratorEvent::Shutdown));
        thread.join().unwrap();
    }

    #[test]
    fn test_listening_without_recognizer_reports_voice_disabled() {
        let transport = Arc::new(ScriptedTransport { events: vec![] });
        let (orchestrator, handle) = OrchestratorBuilder::new()
            .with_config(text_only())
            .with_transport(transport)
            .build()
            .unwrap();
        let thread = orchestrator.start().unwrap();
        assert!(handle.capture().is_none());

        handle.send_command(OrchestratorCommand::StartListening).unwrap();
        let events = wait_for(&handle, |e| matches!(e, OrchestratorEvent::VoiceDisabled(_)));
        assert!(matches!(events.last(), Some(OrchestratorEvent::VoiceDisabled(_))));

        handle.send_command(OrchestratorCommand::Shutdown).unwrap();
        thread.join().unwrap();
    }

    #[test]
    fn test_rejected_stream_shows_one_banner() {
        let (orchestrator, handle) = OrchestratorBuilder::new()
            .with_config(text_only())
            .with_transport(Arc::new(UnavailableStream))
            .build()
            .unwrap();
        let thread = orchestrator.start().unwrap();

        handle
            .send_command(OrchestratorCommand::SendText("rents?".into()))
            .unwrap();
        let events = wait_for(&handle, |e| matches!(e, OrchestratorEvent::TurnComplete { .. }));

        let banners: Vec<&String> = events
            .iter()
            .filter_map(|e| match e {
                OrchestratorEvent::Error(text) => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(banners, vec!["HTTP error! status: 503"]);
        assert!(events.iter().any(|e| matches!(
            e,
            OrchestratorEvent::TurnComplete {
                outcome: TurnOutcome::FellBack,
                ..
            }
        )));

        handle.send_command(OrchestratorCommand::Shutdown).unwrap();
        thread.join().unwrap();
    }

    #[test]
    fn test_input_ignored_while_answer_streams() {
        let transport = Arc::new(HeldTransport::default());
        let (orchestrator, handle) = OrchestratorBuilder::new()
            .with_config(text_only())
            .with_transport(transport.clone())
            .build()
            .unwrap();
        let thread = orchestrator.start().unwrap();

        handle
            .send_command(OrchestratorCommand::SendText("first".into()))
            .unwrap();
        wait_for(&handle, |e| {
            matches!(e, OrchestratorEvent::MessageUpdated(m) if m.content == "Hel")
        });

        handle
            .send_command(OrchestratorCommand::SendText("uh".into()))
            .unwrap();
        // Commands run in order; once this is answered the send above was handled
        handle.send_command(OrchestratorCommand::StartListening).unwrap();
        wait_for(&handle, |e| matches!(e, OrchestratorEvent::VoiceDisabled(_)));
        transport.release.notify_one();

        let events = wait_for(&handle, |e| matches!(e, OrchestratorEvent::TurnComplete { .. }));
        let last = events
            .iter()
            .filter_map(|e| match e {
                OrchestratorEvent::MessageUpdated(m) => Some(m.clone()),
                _ => None,
            })
            .last()
            .unwrap();
        assert_eq!(last.content, "Hello");
        assert!(!last.is_streaming);
        assert_eq!(*transport.questions.lock(), vec!["first".to_string()]);

        handle.send_command(OrchestratorCommand::Shutdown).unwrap();
        thread.join().unwrap();
    }

    #[test]
    fn test_replay_speaks_last_answer_again() {
        let voice = Arc::new(CountingVoice::default());
        let transport = Arc::new(ScriptedTransport {
            events: vec![
                StreamEvent::ResponseToken("Welcome to Dubai.".into()),
                StreamEvent::Done(vec![]),
            ],
        });
        let (orchestrator, handle) = OrchestratorBuilder::new()
            .with_config(LunaConfig::default().without_avatar())
            .with_transport(transport)
            .with_speech_backend(voice.clone())
            .build()
            .unwrap();
        let thread = orchestrator.start().unwrap();

        handle
            .send_command(OrchestratorCommand::SendText("hi".into()))
            .unwrap();
        wait_for(&handle, |e| matches!(e, OrchestratorEvent::SpeechStarted(_)));

        handle.send_command(OrchestratorCommand::Replay).unwrap();
        let events = wait_for(&handle, |e| matches!(e, OrchestratorEvent::SpeechStarted(_)));
        assert!(matches!(
            events.last(),
            Some(OrchestratorEvent::SpeechStarted(Spoken::Device))
        ));
        assert_eq!(
            *voice.spoken.lock(),
            vec!["Welcome to Dubai.".to_string(), "Welcome to Dubai.".to_string()]
        );

        handle.send_command(OrchestratorCommand::Shutdown).unwrap();
        thread.join().unwrap();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = text_only().with_api_url("ftp://example.com");
        assert!(OrchestratorBuilder::new().with_config(config).build().is_err());
    }
}
