use std::time::{Duration, Instant};

/// Per-device watchdog state. `remaining` and `last_sync` are always
/// updated together (Invariant: the effective remaining time at any
/// instant is `max(0, remaining - (now - last_sync))`).
#[derive(Debug, Clone)]
pub struct MonitoredDeviceInfo {
    pub timeout: Duration,
    remaining: Duration,
    last_sync: Instant,
    pub in_comm_fail: bool,
}

impl MonitoredDeviceInfo {
    pub fn new(now: Instant, timeout: Duration, in_comm_fail: bool) -> Self {
        MonitoredDeviceInfo {
            timeout,
            remaining: timeout,
            last_sync: now,
            in_comm_fail,
        }
    }

    pub fn millis_until_comm_fail(&self, now: Instant) -> Duration {
        let since_last_check = now.saturating_duration_since(self.last_sync);
        self.remaining.saturating_sub(since_last_check)
    }

    /// Resets `remaining`/`last_sync` to `now` and returns the elapsed time
    /// since the previous sync, used by callers that need to anti-thrash
    /// secondary updates (e.g. `dateLastContacted`).
    pub fn set_remaining(&mut self, now: Instant, remaining: Duration) -> Duration {
        let diff = now.saturating_duration_since(self.last_sync);
        self.last_sync = now;
        self.remaining = remaining;
        diff
    }
}
