//! Tick-duration watchdog.

use std::collections::VecDeque;

use log::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogVerdict {
    Ok,
    /// Over budget, but below the trip threshold.
    Slow { consecutive: u32 },
    /// Threshold reached; the caller must stop ticking.
    Tripped,
}

/// Keeps a rolling window of recent tick durations and counts consecutive
/// over-budget ticks. One slow tick only warns.
#[derive(Debug, Clone)]
pub struct TickWatchdog {
    budget_ms: u64,
    threshold: u32,
    window: usize,
    recent: VecDeque<u64>,
    consecutive_slow: u32,
}

impl TickWatchdog {
    pub fn new(budget_ms: u64, threshold: u32, window: usize) -> Self {
        Self {
            budget_ms,
            threshold: threshold.max(1),
            window: window.max(1),
            recent: VecDeque::new(),
            consecutive_slow: 0,
        }
    }

    pub fn observe(&mut self, duration_ms: u64) -> WatchdogVerdict {
        if self.recent.len() == self.window {
            self.recent.pop_front();
        }
        self.recent.push_back(duration_ms);

        if duration_ms <= self.budget_ms {
            self.consecutive_slow = 0;
            return WatchdogVerdict::Ok;
        }
        self.consecutive_slow += 1;
        if self.consecutive_slow >= self.threshold {
            WatchdogVerdict::Tripped
        } else {
            warn!(
                "Slow tick: {} ms (budget {} ms, {} in a row)",
                duration_ms, self.budget_ms, self.consecutive_slow
            );
            WatchdogVerdict::Slow {
                consecutive: self.consecutive_slow,
            }
        }
    }

    pub fn recent_durations(&self) -> Vec<u64> {
        self.recent.iter().copied().collect()
    }

    pub fn budget_ms(&self) -> u64 {
        self.budget_ms
    }

    pub fn reset(&mut self) {
        self.recent.clear();
        self.consecutive_slow = 0;
    }
}
