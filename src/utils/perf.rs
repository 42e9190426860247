//! Turn latency measurement
//!
//! A turn is timed from the moment the question is sent: first streamed
//! token, finished answer, and the start of speech.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Rolling latency over the last few turns of a session
#[derive(Debug)]
pub struct LatencyWindow {
    first_token_ms: VecDeque<u64>,
    total_ms: VecDeque<u64>,
    capacity: usize,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            first_token_ms: VecDeque::with_capacity(capacity),
            total_ms: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a finished turn; turns without a streamed token only count toward totals
    pub fn record(&mut self, timing: &TurnTiming) {
        if let Some(ttft) = timing.first_token_ms {
            push_bounded(&mut self.first_token_ms, ttft, self.capacity);
        }
        push_bounded(&mut self.total_ms, timing.total_ms, self.capacity);
    }

    pub fn turns(&self) -> usize {
        self.total_ms.len()
    }

    pub fn mean_first_token_ms(&self) -> Option<u64> {
        mean(&self.first_token_ms)
    }

    /// Nearest-rank 95th percentile of time to first token
    pub fn p95_first_token_ms(&self) -> Option<u64> {
        if self.first_token_ms.is_empty() {
            return None;
        }
        let mut sorted: Vec<u64> = self.first_token_ms.iter().copied().collect();
        sorted.sort_unstable();
        let rank = (sorted.len() * 95).div_ceil(100);
        sorted.get(rank.saturating_sub(1)).copied()
    }

    pub fn mean_total_ms(&self) -> Option<u64> {
        mean(&self.total_ms)
    }

    pub fn summary(&self) -> String {
        let ms = |v: Option<u64>| v.map_or_else(|| "-".to_string(), |v| format!("{}ms", v));
        format!(
            "last {} turns: TTFT avg {} p95 {} | Total avg {}",
            self.turns(),
            ms(self.mean_first_token_ms()),
            ms(self.p95_first_token_ms()),
            ms(self.mean_total_ms()),
        )
    }
}

fn push_bounded(samples: &mut VecDeque<u64>, value: u64, capacity: usize) {
    if samples.len() == capacity {
        samples.pop_front();
    }
    samples.push_back(value);
}

fn mean(samples: &VecDeque<u64>) -> Option<u64> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().sum::<u64>() / samples.len() as u64)
}

/// Elapsed-time measurement with named splits
#[derive(Debug)]
pub struct Stopwatch {
    start: Instant,
    splits: Vec<(String, Duration)>,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            splits: Vec::new(),
        }
    }

    /// Record a split; only the first split per label is kept
    pub fn split(&mut self, label: impl Into<String>) {
        let label = label.into();
        if self.split_ms(&label).is_none() {
            self.splits.push((label, self.start.elapsed()));
        }
    }

    pub fn split_ms(&self, label: &str) -> Option<u64> {
        self.splits
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, d)| d.as_millis() as u64)
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

pub const FIRST_TOKEN: &str = "first_token";

/// Latency of one finished turn
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TurnTiming {
    /// Time to first streamed token (ms)
    pub first_token_ms: Option<u64>,

    /// Time until the answer was complete (ms)
    pub total_ms: u64,

    /// Whether the answer came from the single-shot fallback
    pub used_fallback: bool,
}

impl TurnTiming {
    pub fn from_stopwatch(stopwatch: &Stopwatch, used_fallback: bool) -> Self {
        Self {
            first_token_ms: stopwatch.split_ms(FIRST_TOKEN),
            total_ms: stopwatch.elapsed_ms(),
            used_fallback,
        }
    }

    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(ttft) = self.first_token_ms {
            parts.push(format!("TTFT: {}ms", ttft));
        }
        parts.push(format!("Total: {}ms", self.total_ms));
        if self.used_fallback {
            parts.push("fallback".to_string());
        }
        parts.join(" | ")
    }
}
