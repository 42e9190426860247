pub mod perf;

pub use perf::{LatencyWindow, Stopwatch, TurnTiming};
