use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sliding-window transfer rate tracker.
///
/// A transfer is considered stalled once it has been observed for at least a
/// full window and the bytes received within the most recent window fall
/// below `floor` bytes per second.
#[derive(Debug)]
pub struct ThroughputMonitor {
    window: Duration,
    floor: u64,
    started: Instant,
    samples: VecDeque<(Instant, u64)>,
}

impl ThroughputMonitor {
    pub fn new(window: Duration, floor_bytes_per_sec: u64, now: Instant) -> Self {
        Self {
            window,
            floor: floor_bytes_per_sec,
            started: now,
            samples: VecDeque::new(),
        }
    }

    pub fn record(&mut self, bytes: u64, now: Instant) {
        self.samples.push_back((now, bytes));
    }

    /// Average rate over the current window, in bytes per second.
    pub fn rate(&mut self, now: Instant) -> u64 {
        self.evict(now);
        let secs = self.window.as_secs_f64();
        if secs <= 0.0 {
            return u64::MAX;
        }
        let total: u64 = self.samples.iter().map(|(_, n)| n).sum();
        (total as f64 / secs) as u64
    }

    /// Returns the observed rate when the transfer is below the floor.
    pub fn check(&mut self, now: Instant) -> Option<u64> {
        if self.floor == 0 || self.window.is_zero() {
            return None;
        }
        if now.saturating_duration_since(self.started) < self.window {
            return None;
        }
        let rate = self.rate(now);
        (rate < self.floor).then_some(rate)
    }

    fn evict(&mut self, now: Instant) {
        while let Some((at, _)) = self.samples.front() {
            if now.saturating_duration_since(*at) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}
