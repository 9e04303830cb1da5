// Throughput counter for the publish cycle
use std::time::{Duration, Instant};

/// Frames published over one report interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    pub frames: u64,
    pub per_second: f64,
}

/// Counts published frames and yields a report once per interval
pub struct ThroughputCounter {
    /// When the current interval started
    last_report: Instant,
    /// Frames since last report
    frames: u64,
    report_interval: Duration,
}

impl ThroughputCounter {
    pub fn new(report_interval: Duration) -> Self {
        Self::starting_at(report_interval, Instant::now())
    }

    pub fn starting_at(report_interval: Duration, now: Instant) -> Self {
        Self {
            last_report: now,
            frames: 0,
            report_interval,
        }
    }

    /// Call this after each publish cycle
    /// Returns Some(report) when the interval has elapsed
    pub fn add(&mut self, frames: u64, now: Instant) -> Option<Throughput> {
        self.frames += frames;

        let elapsed = now.saturating_duration_since(self.last_report);
        if elapsed < self.report_interval {
            return None;
        }
        let report = Throughput {
            frames: self.frames,
            per_second: self.frames as f64 / elapsed.as_secs_f64().max(1.0),
        };
        self.frames = 0;
        self.last_report = now;
        Some(report)
    }
}
