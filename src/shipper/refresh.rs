use std::time::Duration;
use tokio::time::Instant;

/// Percentage of the provider's refresh interval after which the session is refreshed.
pub const REFRESH_PERCENT: u32 = 85;

/// Shortest time between two refreshes of the same session.
pub const MIN_REFRESH_DELTA: Duration = Duration::from_secs(1);

/// Delay before the next attempt after a failed refresh.
pub const REFRESH_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Keeps a partition's stream session alive ahead of its expiry.
#[derive(Debug, Clone)]
pub struct RefreshSchedule {
    delta: Duration,
    next_refresh: Instant,
}

impl RefreshSchedule {
    pub fn new(refresh_interval: Duration, discovered_at: Instant) -> Self {
        let delta = (refresh_interval * REFRESH_PERCENT / 100).max(MIN_REFRESH_DELTA);

        Self {
            delta,
            next_refresh: discovered_at + delta,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_refresh
    }

    pub fn next_refresh(&self) -> Instant {
        self.next_refresh
    }

    /// Time between a successful refresh and the next one.
    pub fn delta(&self) -> Duration {
        self.delta
    }

    pub fn on_success(&mut self, now: Instant) {
        self.next_refresh = now + self.delta;
    }

    pub fn on_failure(&mut self, now: Instant) {
        self.next_refresh = now + REFRESH_RETRY_BACKOFF;
    }
}
