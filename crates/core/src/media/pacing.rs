//! Timestamp-driven playout pacing.
//!
//! Both ends of a stream use a [`RateLimiter`] to turn media timestamps
//! (milliseconds, 40 per frame at 25 fps) into wall-clock delays: the
//! sender to space out transmissions, the receiver to space out delivery
//! to the consumer.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug)]
struct State {
    previous: Option<u32>,
    target: Instant,
}

/// Paces presentations according to their media timestamps.
///
/// A consumer that falls behind catches up instead of accumulating
/// latency: the next target is never earlier than the moment of the
/// previous presentation.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                previous: None,
                target: Instant::now(),
            }),
        }
    }

    /// How long to wait before presenting `timestamp`.
    ///
    /// Zero until the first [`present`](Self::present) after construction
    /// or [`reset`](Self::reset).
    pub fn sleep_time(&self, timestamp: u32) -> Duration {
        let state = self.state.lock();
        let Some(previous) = state.previous else {
            return Duration::ZERO;
        };
        let target = state.target + delta(previous, timestamp);
        target.saturating_duration_since(Instant::now())
    }

    /// Record that `timestamp` has just been presented.
    pub fn present(&self, timestamp: u32) {
        let now = Instant::now();
        let mut state = self.state.lock();
        let delta = state
            .previous
            .map_or(Duration::ZERO, |previous| delta(previous, timestamp));

        state.previous = Some(timestamp);
        state.target = (state.target + delta).max(now);
    }

    /// Forget the previous presentation so pacing restarts without a burst.
    pub fn reset(&self) {
        self.state.lock().previous = None;
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward distance between two timestamps; zero if `timestamp` is behind.
fn delta(previous: u32, timestamp: u32) -> Duration {
    let diff = timestamp.wrapping_sub(previous) as i32;
    Duration::from_millis(diff.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn first_sleep_is_zero() {
        let limiter = RateLimiter::new();
        assert_eq!(limiter.sleep_time(1_000_000), Duration::ZERO);
    }

    #[test]
    fn paces_by_timestamp_delta() {
        let limiter = RateLimiter::new();
        limiter.present(100);
        limiter.present(140);

        let sleep = limiter.sleep_time(180);
        assert!(sleep <= Duration::from_millis(80), "slept {:?}", sleep);
        assert!(sleep >= Duration::from_millis(30), "slept {:?}", sleep);
    }

    #[test]
    fn backwards_timestamp_does_not_wait() {
        let limiter = RateLimiter::new();
        limiter.present(1000);
        assert!(limiter.sleep_time(500) <= Duration::from_millis(1));
    }

    #[test]
    fn late_consumer_catches_up() {
        let limiter = RateLimiter::new();
        limiter.present(0);
        thread::sleep(Duration::from_millis(100));
        limiter.present(40);

        // The target moved to "now" rather than lagging 60ms behind it.
        let sleep = limiter.sleep_time(80);
        assert!(sleep >= Duration::from_millis(20), "slept {:?}", sleep);
    }

    #[test]
    fn reset_clears_baseline() {
        let limiter = RateLimiter::new();
        limiter.present(0);
        limiter.reset();
        assert_eq!(limiter.sleep_time(10_000), Duration::ZERO);
    }

    #[test]
    fn timestamp_wrap_is_forward() {
        assert_eq!(delta(u32::MAX - 9, 30), Duration::from_millis(40));
        assert_eq!(delta(50, 10), Duration::ZERO);
    }
}
