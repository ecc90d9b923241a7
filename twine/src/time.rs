use std::time::{Duration, Instant};

/// Wall-clock stopwatch for a single toggle or batch.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch(Instant);

impl Stopwatch {
    pub fn start() -> Self {
        Self(Instant::now())
    }

    pub fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }

    /// Elapsed time rendered by [`format_duration`].
    pub fn stamp(&self) -> String {
        format_duration(self.elapsed())
    }
}

/// Renders `[ mm:ss:mmm ]`. Minutes keep counting past 59.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    format!(
        "[ {:02}:{:02}:{:03} ]",
        millis / 60_000,
        (millis / 1_000) % 60,
        millis % 1_000
    )
}
