//! Per-turn supervision of the agent request
//!
//! Streaming is preferred. When the stream fails before `done` the session
//! switches to single-shot requests for good and the same text is
//! resubmitted.

use crate::agent::{AbandonFlag, ChatTransport, StreamEvent};
use crate::turn::TurnUpdate;
use crate::utils::perf::{Stopwatch, TurnTiming, FIRST_TOKEN};
use crate::LunaError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shown when neither path produced an answer
pub const APOLOGY: &str = "I'm having trouble connecting. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Streamed,
    /// Answered by the single-shot request
    FellBack,
    Failed,
    Abandoned,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    pub outcome: TurnOutcome,
    pub timing: TurnTiming,
}

pub struct FallbackController {
    transport: Arc<dyn ChatTransport>,
    session_id: String,
    streaming_disabled: AtomicBool,
}

impl FallbackController {
    pub fn new(transport: Arc<dyn ChatTransport>, session_id: impl Into<String>) -> Self {
        Self {
            transport,
            session_id: session_id.into(),
            streaming_disabled: AtomicBool::new(false),
        }
    }

    /// Start the session on single-shot requests
    pub fn without_streaming(self) -> Self {
        self.streaming_disabled.store(true, Ordering::SeqCst);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_streaming_disabled(&self) -> bool {
        self.streaming_disabled.load(Ordering::SeqCst)
    }

    /// Run one turn, handing every update to `on_update` in order
    pub async fn run_turn(
        &self,
        text: &str,
        abandon: &AbandonFlag,
        on_update: &mut (dyn FnMut(TurnUpdate) + Send),
    ) -> TurnReport {
        let mut stopwatch = Stopwatch::start();

        if !self.is_streaming_disabled() {
            let result = {
                let mut forward = |event: StreamEvent| {
                    if matches!(
                        event,
                        StreamEvent::ResponseToken(_) | StreamEvent::ResponseReplaced(_)
                    ) {
                        stopwatch.split(FIRST_TOKEN);
                    }
                    on_update(TurnUpdate::Event(event));
                };
                self.transport
                    .stream_chat(text, &self.session_id, abandon, &mut forward)
                    .await
            };

            match result {
                Ok(outcome) if outcome.abandoned => {
                    debug!("Turn abandoned after {} events", outcome.events_delivered);
                    return self.report(TurnOutcome::Abandoned, &stopwatch, false);
                }
                Ok(outcome) => {
                    if !outcome.saw_done {
                        debug!("Stream ended without done, finalizing");
                        on_update(TurnUpdate::Event(StreamEvent::Done(Vec::new())));
                    }
                    return self.report(TurnOutcome::Streamed, &stopwatch, false);
                }
                Err(e) => {
                    warn!("Streaming failed, using single-shot requests from now on: {}", e);
                    self.streaming_disabled.store(true, Ordering::SeqCst);
                    on_update(TurnUpdate::StreamFailed(e.user_message()));
                }
            }
        }

        if abandon.is_abandoned() {
            return self.report(TurnOutcome::Abandoned, &stopwatch, true);
        }

        match self.transport.chat(text, &self.session_id).await {
            Ok(_) if abandon.is_abandoned() => self.report(TurnOutcome::Abandoned, &stopwatch, true),
            Ok(response) => {
                on_update(TurnUpdate::Complete(response));
                self.report(TurnOutcome::FellBack, &stopwatch, true)
            }
            Err(e) => {
                warn!("Single-shot request failed: {}", e);
                let message = match e {
                    LunaError::TransportError(_) | LunaError::HttpStatus(_) => APOLOGY.to_string(),
                    other => other.user_message(),
                };
                on_update(TurnUpdate::Failed(message));
                self.report(TurnOutcome::Failed, &stopwatch, true)
            }
        }
    }

    fn report(&self, outcome: TurnOutcome, stopwatch: &Stopwatch, used_fallback: bool) -> TurnReport {
        let timing = TurnTiming::from_stopwatch(stopwatch, used_fallback);
        info!("Turn {:?}: {}", outcome, timing.summary());
        TurnReport { outcome, timing }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{ChatResponse, IngestOutcome};
    use crate::turn::TurnStore;
    use crate::Result;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Transport whose stream delivers `events` and then optionally fails
    struct FakeTransport {
        events: Vec<StreamEvent>,
        stream_error: Option<LunaError>,
        chat_result: Result<ChatResponse>,
        stream_calls: Mutex<usize>,
        chat_calls: Mutex<Vec<String>>,
    }

    impl FakeTransport {
        fn streaming(events: Vec<StreamEvent>) -> Self {
            Self {
                events,
                stream_error: None,
                chat_result: Ok(ChatResponse::from_text("single-shot")),
                stream_calls: Mutex::new(0),
                chat_calls: Mutex::new(Vec::new()),
            }
        }

        fn failing_after(events: Vec<StreamEvent>, chat_result: Result<ChatResponse>) -> Self {
            Self {
                stream_error: Some(LunaError::TransportError("connection reset".into())),
                chat_result,
                ..Self::streaming(events)
            }
        }
    }

    #[async_trait]
    impl ChatTransport for FakeTransport {
        async fn stream_chat(
            &self,
            _text: &str,
            _session_id: &str,
            abandon: &AbandonFlag,
            on_event: &mut (dyn FnMut(StreamEvent) + Send),
        ) -> Result<IngestOutcome> {
            *self.stream_calls.lock() += 1;
            let mut outcome = IngestOutcome::default();
            for event in &self.events {
                if abandon.is_abandoned() {
                    outcome.abandoned = true;
                    return Ok(outcome);
                }
                outcome.saw_done |= event.is_done();
                outcome.events_delivered += 1;
                on_event(event.clone());
            }
            match &self.stream_error {
                Some(e) => Err(e.clone()),
                None => Ok(outcome),
            }
        }

        async fn chat(&self, text: &str, _session_id: &str) -> Result<ChatResponse> {
            self.chat_calls.lock().push(text.to_string());
            self.chat_result.clone()
        }
    }

    async fn run(controller: &FallbackController, store: &mut TurnStore, text: &str) -> TurnReport {
        store.begin_turn(text);
        let abandon = AbandonFlag::new();
        controller
            .run_turn(text, &abandon, &mut |update: TurnUpdate| {
                store.apply(&update);
            })
            .await
    }

    #[tokio::test]
    async fn test_streamed_turn() {
        let transport = Arc::new(FakeTransport::streaming(vec![
            StreamEvent::ResponseToken("Hi".into()),
            StreamEvent::Done(vec![]),
        ]));
        let controller = FallbackController::new(transport.clone(), "s1");
        let mut store = TurnStore::default();

        let report = run(&controller, &mut store, "hello").await;

        assert_eq!(report.outcome, TurnOutcome::Streamed);
        assert!(report.timing.first_token_ms.is_some());
        assert!(!store.has_active_turn());
        assert_eq!(store.session().messages()[1].content, "Hi");
        assert!(transport.chat_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_stream_without_done_is_finalized() {
        let transport = Arc::new(FakeTransport::streaming(vec![StreamEvent::ResponseToken(
            "cut".into(),
        )]));
        let controller = FallbackController::new(transport, "s1");
        let mut store = TurnStore::default();

        run(&controller, &mut store, "hello").await;

        let answer = &store.session().messages()[1];
        assert!(!answer.is_streaming);
        assert_eq!(answer.content, "cut");
    }

    #[tokio::test]
    async fn test_transport_failure_falls_back_and_sticks() {
        let transport = Arc::new(FakeTransport::failing_after(
            vec![StreamEvent::ResponseToken("partial".into())],
            Ok(ChatResponse::from_text("Full answer")),
        ));
        let controller = FallbackController::new(transport.clone(), "s1");
        let mut store = TurnStore::default();

        let report = run(&controller, &mut store, "prices?").await;

        assert_eq!(report.outcome, TurnOutcome::FellBack);
        assert!(report.timing.used_fallback);
        assert!(controller.is_streaming_disabled());
        assert_eq!(store.session().messages()[1].content, "Full answer");
        assert_eq!(store.session().error(), Some(APOLOGY));

        // Next turn skips streaming entirely
        let report = run(&controller, &mut store, "and rents?").await;
        assert_eq!(report.outcome, TurnOutcome::FellBack);
        assert_eq!(*transport.stream_calls.lock(), 1);
        assert_eq!(
            *transport.chat_calls.lock(),
            vec!["prices?".to_string(), "and rents?".to_string()]
        );
    }

    #[tokio::test]
    async fn test_both_paths_failing_apologizes() {
        let transport = Arc::new(FakeTransport::failing_after(
            vec![],
            Err(LunaError::HttpStatus(503)),
        ));
        let controller = FallbackController::new(transport, "s1");
        let mut store = TurnStore::default();

        let report = run(&controller, &mut store, "hello").await;

        assert_eq!(report.outcome, TurnOutcome::Failed);
        let answer = &store.session().messages()[1];
        assert_eq!(answer.content, APOLOGY);
        assert!(!answer.is_streaming);
        assert!(!store.has_active_turn());
    }

    #[tokio::test]
    async fn test_partial_content_kept_when_fallback_fails() {
        let transport = Arc::new(FakeTransport::failing_after(
            vec![StreamEvent::ResponseToken("partial".into())],
            Err(LunaError::TransportError("down".into())),
        ));
        let controller = FallbackController::new(transport, "s1");
        let mut store = TurnStore::default();

        run(&controller, &mut store, "hello").await;

        assert_eq!(store.session().messages()[1].content, "partial");
    }

    #[tokio::test]
    async fn test_abandoned_turn_does_not_fall_back() {
        let transport = Arc::new(FakeTransport::streaming(vec![
            StreamEvent::ResponseToken("a".into()),
            StreamEvent::ResponseToken("b".into()),
        ]));
        let controller = FallbackController::new(transport.clone(), "s1");
        let abandon = AbandonFlag::new();
        abandon.abandon();

        let mut updates = Vec::new();
        let report = controller
            .run_turn("hello", &abandon, &mut |u: TurnUpdate| updates.push(u))
            .await;

        assert_eq!(report.outcome, TurnOutcome::Abandoned);
        assert!(updates.is_empty());
        assert!(transport.chat_calls.lock().is_empty());
        assert!(!controller.is_streaming_disabled());
    }

    #[tokio::test]
    async fn test_disabled_streaming_goes_straight_to_chat() {
        let transport = Arc::new(FakeTransport::streaming(vec![]));
        let controller = FallbackController::new(transport.clone(), "s1").without_streaming();
        let mut store = TurnStore::default();

        let report = run(&controller, &mut store, "hello").await;

        assert_eq!(report.outcome, TurnOutcome::FellBack);
        assert_eq!(*transport.stream_calls.lock(), 0);
        assert_eq!(store.session().messages()[1].content, "single-shot");
    }
}
