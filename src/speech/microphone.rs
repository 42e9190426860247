use crate::{LunaError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

/// The single open microphone stream, feeding mono frames to capture
///
/// Embedders that supply a recognizer open it with
/// `CaptureHandle::frame_sender`. The CLI has no recognizer and never opens it.
pub struct Microphone {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
    is_open: Arc<AtomicBool>,
}

impl Microphone {
    /// Use the default input device
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| LunaError::AudioDeviceError("No input device available".into()))?;

        info!("Using input device: {}", device.name().unwrap_or_else(|_| "Unknown".to_string()));

        let config = device
            .default_input_config()
            .map_err(|e| LunaError::AudioDeviceError(format!("Failed to get input config: {}", e)))?
            .into();

        Ok(Self {
            device,
            config,
            stream: None,
            is_open: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Open the stream; every callback becomes one frame on `frames`
    pub fn open(&mut self, frames: UnboundedSender<Vec<f32>>) -> Result<()> {
        if self.is_open.load(Ordering::SeqCst) {
            warn!("Microphone already open");
            return Ok(());
        }

        let channels = self.config.channels as usize;
        let is_open = Arc::clone(&self.is_open);

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if !is_open.load(Ordering::Relaxed) {
                        return;
                    }

                    let frame = if channels == 1 {
                        data.to_vec()
                    } else {
                        data.chunks(channels)
                            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                            .collect()
                    };

                    // Receiver gone means capture shut down
                    let _ = frames.send(frame);
                },
                |err| error!("Audio input stream error: {}", err),
                None,
            )
            .map_err(|e| LunaError::AudioDeviceError(format!("Failed to build input stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| LunaError::AudioDeviceError(format!("Failed to start input stream: {}", e)))?;

        self.is_open.store(true, Ordering::SeqCst);
        self.stream = Some(stream);
        info!("Microphone opened");
        Ok(())
    }

    /// Release the device
    pub fn close(&mut self) {
        self.is_open.store(false, Ordering::SeqCst);
        if self.stream.take().is_some() {
            info!("Microphone closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }
}

impl Drop for Microphone {
    fn drop(&mut self) {
        self.close();
    }
}
