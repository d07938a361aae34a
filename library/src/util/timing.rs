//! Wall-time measurement for manager-side passes.

use std::time::{Duration, Instant};

use log::{Level, debug, log_enabled, warn};

/// Passes slower than this are reported at `warn` regardless of log level.
pub const SLOW_PASS: Duration = Duration::from_millis(20);

/// Logs how long a scope took when dropped.
///
/// The label is built lazily; with debug logging off it is only built if
/// the scope turns out slow.
pub struct ScopedTimer<F: FnOnce() -> String> {
    label: Option<F>,
    start: Instant,
    slow: Duration,
}

impl<F: FnOnce() -> String> ScopedTimer<F> {
    pub fn debug_lazy(label: F) -> Self {
        Self::with_threshold(label, SLOW_PASS)
    }

    pub fn with_threshold(label: F, slow: Duration) -> Self {
        Self {
            label: Some(label),
            start: Instant::now(),
            slow,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F: FnOnce() -> String> Drop for ScopedTimer<F> {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let slow = elapsed >= self.slow;
        if !slow && !log_enabled!(Level::Debug) {
            return;
        }
        let Some(label) = self.label.take() else {
            return;
        };
        if slow {
            warn!("{} took {} us (slow)", label(), elapsed.as_micros());
        } else {
            debug!("{} took {} us", label(), elapsed.as_micros());
        }
    }
}
