use crate::speech::normalized_level;
use crate::{LunaError, Result};
use hound::{SampleFormat, WavReader};
use std::io::Cursor;
use std::time::Duration;
use tracing::debug;

/// Window used for one amplitude value
pub const ENVELOPE_WINDOW: Duration = Duration::from_millis(20);

/// Amplitude over time for a decoded reply, used to drive the mouth
#[derive(Debug, Clone, PartialEq)]
pub struct AmplitudeEnvelope {
    window: Duration,
    values: Vec<f32>,
    duration: Duration,
}

impl AmplitudeEnvelope {
    /// Normalized amplitude at `position`; zero past the end
    pub fn at(&self, position: Duration) -> f32 {
        if self.values.is_empty() || self.window.is_zero() {
            return 0.0;
        }
        let index = (position.as_secs_f64() / self.window.as_secs_f64()) as usize;
        self.values.get(index).copied().unwrap_or(0.0)
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Decode WAV bytes and build their envelope
///
/// Other encodings return an error; callers fall back to text-only lip-sync.
pub fn amplitude_envelope(bytes: &[u8]) -> Result<AmplitudeEnvelope> {
    let mut reader = WavReader::new(Cursor::new(bytes))
        .map_err(|e| LunaError::PlaybackError(format!("Not a WAV reply: {}", e)))?;

    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, _) => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| LunaError::PlaybackError(format!("Failed to read sample: {}", e)))?,
        (SampleFormat::Int, bits) => {
            let scale = (1i64 << (bits.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| LunaError::PlaybackError(format!("Failed to read sample: {}", e)))?
        }
    };

    // Mix down to mono
    let mono: Vec<f32> = samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    let rate = spec.sample_rate.max(1);
    let per_window = ((rate as u128 * ENVELOPE_WINDOW.as_millis()) / 1000).max(1) as usize;
    let values: Vec<f32> = mono.chunks(per_window).map(normalized_level).collect();
    let duration = Duration::from_nanos(mono.len() as u64 * 1_000_000_000 / rate as u64);

    debug!(
        "Envelope: {} Hz, {} channels, {:?}, {} windows",
        rate,
        channels,
        duration,
        values.len()
    );

    Ok(AmplitudeEnvelope {
        window: ENVELOPE_WINDOW,
        values,
        duration,
    })
}
