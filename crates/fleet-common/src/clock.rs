//! Monotonic clock and tick sources

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Process-wide monotonic clock with millisecond resolution.
///
/// Readings never go backwards: a wall-clock step back yields the last
/// issued millisecond instead. Cheap to clone; all clones share state.
#[derive(Debug, Clone, Default)]
pub struct Clock {
    last_ms: Arc<AtomicI64>,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current time, clamped to be non-decreasing
    pub fn now(&self) -> DateTime<Utc> {
        let ms = self.now_ms();
        // In range for any plausible wall clock
        Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
    }

    /// Current time in unix milliseconds, clamped to be non-decreasing
    pub fn now_ms(&self) -> i64 {
        let wall = Utc::now().timestamp_millis();
        let prev = self.last_ms.fetch_max(wall, Ordering::AcqRel);
        wall.max(prev)
    }
}

/// Periodic tick source; missed ticks are skipped, not bursted
pub fn ticker(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readings_never_decrease() {
        let clock = Clock::new();
        let mut prev = clock.now_ms();
        for _ in 0..1000 {
            let next = clock.now_ms();
            assert!(next >= prev);
            prev = next;
        }
    }

    #[test]
    fn clones_share_the_monotonic_floor() {
        let clock = Clock::new();
        let other = clock.clone();
        let a = clock.now_ms();
        assert!(other.now_ms() >= a);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_fires_on_the_period() {
        let mut ticks = ticker(Duration::from_millis(100));
        ticks.tick().await; // first tick is immediate
        let before = tokio::time::Instant::now();
        ticks.tick().await;
        assert!(before.elapsed() >= Duration::from_millis(100));
    }
}
