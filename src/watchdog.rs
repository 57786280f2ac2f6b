//! Stall detector evaluated at poll time

use embassy_time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub(crate) struct Watchdog {
    enabled: bool,
    timeout: Duration,
    last_progress: Instant,
}

impl Watchdog {
    pub(crate) fn new(enabled: bool, timeout: Duration, now: Instant) -> Self {
        Watchdog {
            enabled,
            timeout,
            last_progress: now,
        }
    }

    pub(crate) fn progress(&mut self, now: Instant) {
        self.last_progress = now;
    }

    /// Applies new settings and restarts the timeout window
    pub(crate) fn configure(&mut self, enabled: bool, timeout: Duration, now: Instant) {
        self.enabled = enabled;
        self.timeout = timeout;
        self.last_progress = now;
    }

    pub(crate) fn expired(&self, now: Instant) -> bool {
        self.enabled && now.saturating_duration_since(self.last_progress) > self.timeout
    }

    pub(crate) fn last_progress(&self) -> Instant {
        self.last_progress
    }
}
