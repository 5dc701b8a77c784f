//! Nudge tracking for the awake sentinel
//!
//! The hub broadcasts `nudge{time, interval}` on a fixed cadence. By
//! comparing wall-clock gaps against that cadence the client can tell a
//! suspended execution environment (laptop sleep froze the timers) apart
//! from an unreachable hub: after suspension the gap since the last nudge
//! far exceeds anything the reconnect loop would produce on its own.
//!
//! Timestamps are stored as milliseconds past an internal epoch so the
//! tracker can be read lock-free from any task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Default sentinel poll cadence before any nudge announced an interval
pub const FALLBACK_CHECK_INTERVAL: Duration = Duration::from_secs(4);

/// Slack added on top of three missed nudges before declaring suspension
const THRESHOLD_SLACK: Duration = Duration::from_millis(2000);

pub struct NudgeTracker {
    epoch: Instant,
    /// Last nudge receipt (ms since epoch), 0 = never
    last_nudge_ms: AtomicU64,
    /// Interval the hub announced with its last nudge
    interval_ms: AtomicU64,
}

impl Default for NudgeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl NudgeTracker {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_nudge_ms: AtomicU64::new(0),
            interval_ms: AtomicU64::new(0),
        }
    }

    /// Record a nudge and the cadence the hub advertised
    pub fn record(&self, interval_ms: u64) {
        let now = self.epoch.elapsed().as_millis() as u64;
        // A nudge arriving "now" still counts as seen
        self.last_nudge_ms.store(now.max(1), Ordering::Release);
        self.interval_ms.store(interval_ms, Ordering::Release);
    }

    pub fn has_nudged(&self) -> bool {
        self.last_nudge_ms.load(Ordering::Acquire) != 0
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms.load(Ordering::Acquire)
    }

    /// Time since the last nudge, None when none was ever seen
    pub fn elapsed_since_nudge(&self) -> Option<Duration> {
        let last = self.last_nudge_ms.load(Ordering::Acquire);
        if last == 0 {
            return None;
        }
        let now = self.epoch.elapsed().as_millis() as u64;
        Some(Duration::from_millis(now.saturating_sub(last)))
    }

    /// Sentinel poll cadence: a fraction of the nudge interval so a
    /// suspension is noticed within one hub cycle
    pub fn check_interval(&self) -> Duration {
        let interval = self.interval_ms();
        if interval == 0 {
            return FALLBACK_CHECK_INTERVAL;
        }
        Duration::from_millis((interval as f64 / 2.5).ceil() as u64)
    }

    /// Silence longer than this means the host was suspended
    pub fn threshold(&self) -> Duration {
        Duration::from_millis(self.interval_ms() * 3) + THRESHOLD_SLACK
    }
}
