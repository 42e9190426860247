use ringbuf::{traits::*, HeapRb};

/// Normalized RMS is amplified by this factor before clamping to 1
pub const LEVEL_GAIN: f32 = 3.0;

/// Normalized level of one time-domain frame: `min(rms * 3, 1)`
pub fn normalized_level(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum: f32 = frame.iter().map(|s| s * s).sum();
    let rms = (sum / frame.len() as f32).sqrt();
    (rms * LEVEL_GAIN).min(1.0)
}

/// Fixed-size ring of amplitude buckets for the microphone waveform
///
/// Each display frame is reduced to `bucket_count` points which overwrite
/// the oldest buckets. The frame's level drives the speech activity signal.
pub struct AmplitudeRing {
    buckets: HeapRb<f32>,
    bucket_count: usize,
    level: f32,
    activity_threshold: f32,
}

impl AmplitudeRing {
    pub fn new(bucket_count: usize, activity_threshold: f32) -> Self {
        let bucket_count = bucket_count.max(1);
        Self {
            buckets: HeapRb::new(bucket_count),
            bucket_count,
            level: 0.0,
            activity_threshold,
        }
    }

    /// Sample one frame; returns its normalized level
    pub fn push_frame(&mut self, frame: &[f32]) -> f32 {
        self.level = normalized_level(frame);

        if !frame.is_empty() {
            let step = (frame.len() / self.bucket_count).max(1);
            for sample in frame.iter().step_by(step).take(self.bucket_count) {
                self.buckets.push_overwrite(sample.abs().min(1.0));
            }
        }

        self.level
    }

    /// Level of the most recent frame
    pub fn level(&self) -> f32 {
        self.level
    }

    /// Whether the most recent frame counts as speech
    pub fn is_active(&self) -> bool {
        self.level > self.activity_threshold
    }

    /// Current waveform, oldest bucket first, padded with zeros
    pub fn waveform(&self) -> Vec<f32> {
        let mut points: Vec<f32> = self.buckets.iter().copied().collect();
        points.resize(self.bucket_count, 0.0);
        points
    }

    pub fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    /// Drop all samples, as when the microphone closes
    pub fn clear(&mut self) {
        self.buckets.clear();
        self.level = 0.0;
    }
}
