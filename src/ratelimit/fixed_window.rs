//! Fixed window counter.

use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use super::params::WindowParams;
use super::RateLimiter;
use crate::clock::{Clock, SystemClock};
use crate::error::Result;

/// A rate limiter counting requests per fixed, epoch-aligned window.
///
/// Time is cut into windows of `window` length starting at the clock's origin
/// (the UNIX epoch by default). Each window admits up to `limit` units; the
/// count starts over from zero as soon as a call lands in a different window,
/// however many windows were skipped in between.
///
/// Because the count restarts at each boundary, up to `2 * limit` units can be
/// admitted within a span of `window` that straddles a boundary.
#[derive(Debug)]
pub struct FixedWindow<C: Clock = SystemClock> {
    params: WindowParams,
    clock: C,
    state: Mutex<WindowState>,
}

#[derive(Debug)]
struct WindowState {
    /// Epoch index of the window `count` belongs to
    window_start: u64,
    count: u64,
}

impl WindowState {
    fn settle(&mut self, params: &WindowParams, now: Duration) {
        let epoch = params.epoch_index(now);
        if epoch != self.window_start {
            trace!(
                from = self.window_start,
                to = epoch,
                "Fixed window rolled over"
            );
            self.window_start = epoch;
            self.count = 0;
        }
    }
}

impl FixedWindow {
    /// Create a limiter admitting `limit` units per `window`.
    pub fn new(limit: u64, window: Duration) -> Result<Self> {
        Ok(Self::from_params(WindowParams::new(limit, window)?))
    }

    pub fn from_params(params: WindowParams) -> Self {
        Self::with_clock(params, SystemClock)
    }
}

impl<C: Clock> FixedWindow<C> {
    pub fn with_clock(params: WindowParams, clock: C) -> Self {
        let window_start = params.epoch_index(clock.now());
        Self {
            params,
            clock,
            state: Mutex::new(WindowState {
                window_start,
                count: 0,
            }),
        }
    }

    pub fn params(&self) -> WindowParams {
        self.params
    }

    /// Units admitted so far in the window containing now.
    pub fn count(&self) -> u64 {
        let state = self.state.lock();
        if state.window_start == self.params.epoch_index(self.clock.now()) {
            state.count
        } else {
            0
        }
    }

    /// Units still admissible in the current window.
    pub fn remaining(&self) -> u64 {
        self.params.limit().saturating_sub(self.count())
    }

    /// Time left until the current window ends.
    pub fn duration_until_reset(&self) -> Duration {
        let window = self.params.window().as_nanos();
        let into_window = self.clock.now().as_nanos() % window;
        Duration::from_nanos((window - into_window) as u64)
    }
}

impl<C: Clock> RateLimiter for FixedWindow<C> {
    fn consume(&self, cost: u64) -> bool {
        let mut state = self.state.lock();
        state.settle(&self.params, self.clock.now());

        if state.count.saturating_add(cost) <= self.params.limit() {
            state.count += cost;
            true
        } else {
            trace!(
                cost = cost,
                count = state.count,
                limit = self.params.limit(),
                "Fixed window limit reached"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn manual_window(limit: u64, window: Duration) -> (FixedWindow<ManualClock>, ManualClock) {
        let clock = ManualClock::new(Duration::from_secs(1_000));
        let params = WindowParams::new(limit, window).unwrap();
        (FixedWindow::with_clock(params, clock.clone()), clock)
    }

    #[test]
    fn test_admits_up_to_limit_then_resets() {
        let (limiter, clock) = manual_window(3, Duration::from_secs(1));

        assert!(limiter.consume(1));
        assert!(limiter.consume(1));
        assert!(limiter.consume(1));
        assert!(!limiter.consume(1));
        assert_eq!(limiter.count(), 3);

        clock.advance(Duration::from_millis(1100));
        assert_eq!(limiter.count(), 0);
        assert!(limiter.consume(1));
        assert_eq!(limiter.count(), 1);
    }

    #[test]
    fn test_multi_unit_cost() {
        let (limiter, _clock) = manual_window(10, Duration::from_secs(60));

        assert!(limiter.consume(8));
        assert!(!limiter.consume(3));
        assert!(limiter.consume(2));
        assert_eq!(limiter.remaining(), 0);
    }

    #[test]
    fn test_rejection_does_not_count() {
        let (limiter, _clock) = manual_window(5, Duration::from_secs(1));

        assert!(limiter.consume(4));
        assert!(!limiter.consume(2));
        assert_eq!(limiter.count(), 4);
        assert!(limiter.consume(1));
    }

    #[test]
    fn test_edge_burst_across_boundary() {
        let (limiter, clock) = manual_window(5, Duration::from_secs(10));

        // Last 100ms of one window, then first 100ms of the next.
        clock.set(Duration::from_millis(1_009_900));
        for _ in 0..5 {
            assert!(limiter.consume(1));
        }
        clock.advance(Duration::from_millis(200));
        for _ in 0..5 {
            assert!(limiter.consume(1));
        }
        assert!(!limiter.consume(1));
    }

    #[test]
    fn test_skipped_windows_reset_once() {
        let (limiter, clock) = manual_window(2, Duration::from_secs(1));
        assert!(limiter.consume(2));

        clock.advance(Duration::from_secs(7));
        assert!(limiter.consume(2));
        assert!(!limiter.consume(1));
    }

    #[test]
    fn test_duration_until_reset() {
        let (limiter, clock) = manual_window(1, Duration::from_secs(4));

        assert_eq!(limiter.duration_until_reset(), Duration::from_secs(4));
        clock.advance(Duration::from_secs(1));
        assert_eq!(limiter.duration_until_reset(), Duration::from_secs(3));
    }

    #[test]
    fn test_cost_above_limit_never_admits() {
        let (limiter, clock) = manual_window(3, Duration::from_secs(1));
        assert!(!limiter.consume(4));
        clock.advance(Duration::from_secs(1));
        assert!(!limiter.consume(4));
        assert!(!limiter.consume(u64::MAX));
    }

    #[test]
    fn test_real_clock_window_reset() {
        let limiter = FixedWindow::new(3, Duration::from_millis(200)).unwrap();

        assert!(limiter.consume(1));
        assert!(limiter.consume(1));
        assert!(limiter.consume(1));
        assert!(!limiter.consume(1));

        std::thread::sleep(Duration::from_millis(250));
        assert!(limiter.consume(1));
    }
}
