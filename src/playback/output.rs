use super::media::{MediaBackend, MediaElement, MediaSource};
use crate::{LunaError, Result};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use std::io::Cursor;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Speaker output through the default device
///
/// The rodio stream is not `Send`, so it lives on its own thread until this
/// value is dropped.
pub struct SpeakerOutput {
    handle: OutputStreamHandle,
    _keepalive: crossbeam_channel::Sender<()>,
}

impl SpeakerOutput {
    pub fn new() -> Result<Self> {
        let (handle_tx, handle_rx) = crossbeam_channel::bounded(1);
        let (keepalive_tx, keepalive_rx) = crossbeam_channel::bounded::<()>(0);

        std::thread::Builder::new()
            .name("luna-speaker".into())
            .spawn(move || match OutputStream::try_default() {
                Ok((stream, handle)) => {
                    let _ = handle_tx.send(Ok(handle));
                    // Blocks until the owner is dropped
                    let _ = keepalive_rx.recv();
                    drop(stream);
                    debug!("Speaker stream closed");
                }
                Err(e) => {
                    error!("Failed to open output stream: {}", e);
                    let _ = handle_tx.send(Err(e.to_string()));
                }
            })?;

        let handle = handle_rx
            .recv()
            .map_err(|e| LunaError::ChannelError(e.to_string()))?
            .map_err(|e| LunaError::AudioDeviceError(format!("No output device available: {}", e)))?;

        info!("Speaker output ready");
        Ok(Self {
            handle,
            _keepalive: keepalive_tx,
        })
    }
}

impl MediaBackend for SpeakerOutput {
    fn load(&self, source: MediaSource) -> Result<Box<dyn MediaElement>> {
        let bytes = match source {
            MediaSource::Audio(bytes) => bytes,
            MediaSource::Video(url) => {
                return Err(LunaError::PlaybackError(format!(
                    "Video playback is not supported on this output: {}",
                    url
                )))
            }
        };

        let decoder = Decoder::new(Cursor::new(bytes))
            .map_err(|e| LunaError::PlaybackError(format!("Failed to decode audio: {}", e)))?;
        let duration = decoder.total_duration();

        let sink = Sink::try_new(&self.handle)
            .map_err(|e| LunaError::PlaybackError(format!("Failed to create sink: {}", e)))?;
        sink.pause();
        sink.append(decoder);

        Ok(Box::new(SpeakerElement {
            sink,
            duration,
            started: None,
            stopped: false,
        }))
    }
}

struct SpeakerElement {
    sink: Sink,
    duration: Option<Duration>,
    started: Option<Instant>,
    stopped: bool,
}

impl MediaElement for SpeakerElement {
    fn play(&mut self) -> Result<()> {
        self.sink.play();
        self.started = Some(Instant::now());
        Ok(())
    }

    fn stop(&mut self) {
        self.sink.stop();
        self.stopped = true;
    }

    fn position(&self) -> Duration {
        let elapsed = self.started.map(|s| s.elapsed()).unwrap_or_default();
        match self.duration {
            Some(total) => elapsed.min(total),
            None => elapsed,
        }
    }

    fn duration(&self) -> Option<Duration> {
        self.duration
    }

    fn is_finished(&self) -> bool {
        self.stopped || (self.started.is_some() && self.sink.empty())
    }
}
