//! Stream ingestion: chunked body → ordered [`StreamEvent`] callbacks
//!
//! The consumer callback is invoked once per event, strictly in arrival
//! order, and never re-entered. A shared [`AbandonFlag`] lets the consumer
//! drop the rest of a turn without waiting for the transfer to finish.

use super::decoder::{DecodedLine, LineDecoder};
use super::events::StreamEvent;
use crate::{LunaError, Result};
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared "this turn was abandoned" marker
#[derive(Debug, Clone, Default)]
pub struct AbandonFlag(Arc<AtomicBool>);

impl AbandonFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abandon(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_abandoned(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Summary of one completed ingestion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub events_delivered: usize,
    pub lines_dropped: usize,
    pub saw_done: bool,
    pub abandoned: bool,
}

/// Deliver the `Error` event for a rejected response and build the error
/// that rejects the completion.
pub fn reject_status<F>(status: u16, on_event: &mut F) -> LunaError
where
    F: FnMut(StreamEvent) + ?Sized,
{
    let err = LunaError::HttpStatus(status);
    on_event(StreamEvent::Error(err.to_string()));
    err
}

/// Decode `body` and hand each event to `on_event`
///
/// Returns once a `done` event is seen, the body ends, or the turn is
/// abandoned. A read failure rejects with [`LunaError::TransportError`];
/// events already delivered stay delivered.
pub async fn ingest<S, B, E, F>(
    body: S,
    abandon: &AbandonFlag,
    mut on_event: F,
) -> Result<IngestOutcome>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
    F: FnMut(StreamEvent),
{
    let mut body = std::pin::pin!(body);
    let mut decoder = LineDecoder::new();
    let mut outcome = IngestOutcome::default();

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| {
            warn!("[Stream] Read failed after {} events: {}", outcome.events_delivered, e);
            LunaError::TransportError(e.to_string())
        })?;

        for line in decoder.feed(chunk.as_ref()) {
            if deliver(line, abandon, &mut outcome, &mut on_event) {
                return Ok(outcome);
            }
        }
    }

    if let Some(line) = decoder.finish() {
        deliver(line, abandon, &mut outcome, &mut on_event);
    }

    debug!(
        "[Stream] Body ended: {} events, {} dropped, done={}",
        outcome.events_delivered, outcome.lines_dropped, outcome.saw_done
    );
    Ok(outcome)
}

/// Returns true when ingestion should stop
fn deliver<F>(
    line: DecodedLine,
    abandon: &AbandonFlag,
    outcome: &mut IngestOutcome,
    on_event: &mut F,
) -> bool
where
    F: FnMut(StreamEvent),
{
    if abandon.is_abandoned() {
        if !outcome.abandoned {
            debug!("[Stream] Turn abandoned, dropping remaining events");
        }
        outcome.abandoned = true;
        return true;
    }

    match line {
        DecodedLine::Event(event) => {
            let done = event.is_done();
            on_event(event);
            outcome.events_delivered += 1;
            if done {
                outcome.saw_done = true;
            }
            done
        }
        DecodedLine::Malformed(_) => {
            outcome.lines_dropped += 1;
            false
        }
        DecodedLine::Ignored => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn chunks(parts: &[&str]) -> Vec<std::result::Result<Vec<u8>, String>> {
        parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect()
    }

    #[tokio::test]
    async fn test_events_delivered_in_order() {
        let body = stream::iter(chunks(&[
            "data: {\"type\":\"phase\",\"phase\":\"responding\"}\ndata: {\"type\":\"resp",
            "onse\",\"content\":\"The \"}\ndata: {\"type\":\"response\",\"content\":\"end\"}\n",
            "data: {\"type\":\"done\"}\n",
        ]));

        let mut seen = Vec::new();
        let outcome = ingest(body, &AbandonFlag::new(), |e| seen.push(e)).await.unwrap();

        assert_eq!(
            seen,
            vec![
                StreamEvent::Phase("responding".into()),
                StreamEvent::ResponseToken("The ".into()),
                StreamEvent::ResponseToken("end".into()),
                StreamEvent::Done(vec![]),
            ]
        );
        assert!(outcome.saw_done);
        assert_eq!(outcome.events_delivered, 4);
    }

    #[tokio::test]
    async fn test_bad_line_skipped_stream_continues() {
        let body = stream::iter(chunks(&[
            "data: {\"type\":\"response\",\"content\":\"a\"}\ndata: {broken\n",
            "data: {\"type\":\"response\",\"content\":\"b\"}\ndata: {\"type\":\"done\"}\n",
        ]));

        let mut text = String::new();
        let outcome = ingest(body, &AbandonFlag::new(), |e| {
            if let StreamEvent::ResponseToken(t) = e {
                text.push_str(&t);
            }
        })
        .await
        .unwrap();

        assert_eq!(text, "ab");
        assert_eq!(outcome.lines_dropped, 1);
    }

    #[tokio::test]
    async fn test_read_failure_keeps_delivered_events() {
        let body = stream::iter(vec![
            Ok(b"data: {\"type\":\"response\",\"content\":\"partial\"}\n".to_vec()),
            Err("connection reset".to_string()),
            Ok(b"data: {\"type\":\"response\",\"content\":\"never\"}\n".to_vec()),
        ]);

        let mut seen = Vec::new();
        let result = ingest(body, &AbandonFlag::new(), |e| seen.push(e)).await;

        assert!(matches!(result, Err(LunaError::TransportError(_))));
        assert_eq!(seen, vec![StreamEvent::ResponseToken("partial".into())]);
    }

    #[tokio::test]
    async fn test_abandoned_turn_drops_late_events() {
        let flag = AbandonFlag::new();
        let body = stream::iter(chunks(&[
            "data: {\"type\":\"response\",\"content\":\"first\"}\n",
            "data: {\"type\":\"response\",\"content\":\"late\"}\n",
        ]));

        let mut seen = Vec::new();
        let outcome = ingest(body, &flag, |e| {
            seen.push(e);
            flag.abandon();
        })
        .await
        .unwrap();

        assert_eq!(seen.len(), 1);
        assert!(outcome.abandoned);
        assert!(!outcome.saw_done);
    }

    #[tokio::test]
    async fn test_unterminated_final_line_flushed() {
        let body = stream::iter(chunks(&["data: {\"type\":\"done\",\"suggested_actions\":[\"More\"]}"]));
        let mut seen = Vec::new();
        let outcome = ingest(body, &AbandonFlag::new(), |e| seen.push(e)).await.unwrap();
        assert_eq!(seen, vec![StreamEvent::Done(vec!["More".into()])]);
        assert!(outcome.saw_done);
    }

    #[test]
    fn test_reject_status_emits_error_event() {
        let mut seen = Vec::new();
        let err = reject_status(503, &mut |e| seen.push(e));
        assert_eq!(err, LunaError::HttpStatus(503));
        assert_eq!(seen, vec![StreamEvent::Error("HTTP error! status: 503".into())]);
    }
}
