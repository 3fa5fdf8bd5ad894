//! Sliding window counter: two fixed windows blended into an estimate.

use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use super::params::WindowParams;
use super::RateLimiter;
use crate::clock::{Clock, SystemClock};
use crate::error::Result;

/// A rate limiter approximating a sliding window in constant space.
///
/// Counts are kept for the current fixed window and the one before it. The
/// previous count is weighted by how much of it still overlaps the trailing
/// window:
///
/// ```text
/// estimate = prev_count * (1 - elapsed_fraction) + curr_count
/// ```
///
/// and a request is admitted while `estimate < limit`. Only single-unit
/// requests are supported; through [`RateLimiter::consume`] any cost above
/// one is rejected.
#[derive(Debug)]
pub struct SlidingWindowCounter<C: Clock = SystemClock> {
    params: WindowParams,
    clock: C,
    state: Mutex<CounterState>,
}

#[derive(Debug, Clone, Copy)]
struct CounterState {
    prev_window: u64,
    prev_count: u64,
    curr_window: u64,
    curr_count: u64,
}

impl CounterState {
    fn new(epoch: u64) -> Self {
        Self {
            prev_window: epoch.saturating_sub(1),
            prev_count: 0,
            curr_window: epoch,
            curr_count: 0,
        }
    }

    /// Rotate the windows so that `curr_window` is the epoch containing `now`.
    fn settle(&mut self, params: &WindowParams, now: Duration) {
        let epoch = params.epoch_index(now);
        if epoch == self.curr_window {
            return;
        }

        if epoch == self.curr_window + 1 {
            self.prev_window = self.curr_window;
            self.prev_count = self.curr_count;
            self.curr_window = epoch;
            self.curr_count = 0;
        } else {
            // A gap of more than one window (or a clock that stepped back):
            // nothing carries over.
            trace!(
                from = self.curr_window,
                to = epoch,
                "Sliding window counter fully decayed"
            );
            *self = Self::new(epoch);
        }
    }

    fn estimate(&self, params: &WindowParams, now: Duration) -> f64 {
        let weight = params.elapsed_fraction(now);
        self.prev_count as f64 * (1.0 - weight) + self.curr_count as f64
    }
}

impl SlidingWindowCounter {
    /// Create a limiter admitting roughly `limit` requests per trailing `window`.
    pub fn new(limit: u64, window: Duration) -> Result<Self> {
        Ok(Self::from_params(WindowParams::new(limit, window)?))
    }

    pub fn from_params(params: WindowParams) -> Self {
        Self::with_clock(params, SystemClock)
    }
}

impl<C: Clock> SlidingWindowCounter<C> {
    pub fn with_clock(params: WindowParams, clock: C) -> Self {
        let epoch = params.epoch_index(clock.now());
        Self {
            params,
            clock,
            state: Mutex::new(CounterState::new(epoch)),
        }
    }

    pub fn params(&self) -> WindowParams {
        self.params
    }

    /// Try to admit one request.
    pub fn consume(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.settle(&self.params, now);

        let estimate = state.estimate(&self.params, now);
        if estimate < self.params.limit() as f64 {
            state.curr_count += 1;
            true
        } else {
            trace!(
                estimate = estimate,
                limit = self.params.limit(),
                "Sliding window counter estimate at limit"
            );
            false
        }
    }

    /// The weighted request count as of now.
    pub fn estimate(&self) -> f64 {
        let now = self.clock.now();
        let mut state = *self.state.lock();
        state.settle(&self.params, now);
        state.estimate(&self.params, now)
    }
}

impl<C: Clock> RateLimiter for SlidingWindowCounter<C> {
    fn consume(&self, cost: u64) -> bool {
        match cost {
            0 => true,
            1 => Self::consume(self),
            _ => {
                trace!(cost = cost, "Sliding window counter only admits unit cost");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    /// The clock starts exactly on a window boundary for any whole-second window.
    fn manual_counter(
        limit: u64,
        window: Duration,
    ) -> (SlidingWindowCounter<ManualClock>, ManualClock) {
        let clock = ManualClock::new(Duration::from_secs(1_000));
        let params = WindowParams::new(limit, window).unwrap();
        (SlidingWindowCounter::with_clock(params, clock.clone()), clock)
    }

    #[test]
    fn test_allows_within_limit() {
        let (limiter, _clock) = manual_counter(5, Duration::from_secs(2));

        for _ in 0..5 {
            assert!(limiter.consume());
        }
        assert!(!limiter.consume());
    }

    #[test]
    fn test_resets_after_window_rollover() {
        let (limiter, clock) = manual_counter(3, Duration::from_secs(1));

        assert!(limiter.consume());
        assert!(limiter.consume());
        assert!(limiter.consume());
        assert!(!limiter.consume());

        // 5% into the next window the previous count weighs 2.85.
        clock.advance(Duration::from_millis(1050));
        assert!(limiter.consume());
        assert!(!limiter.consume());
    }

    #[test]
    fn test_gradual_rollover() {
        let (limiter, clock) = manual_counter(4, Duration::from_secs(1));

        assert!(limiter.consume());
        clock.advance(Duration::from_millis(500));
        assert!(limiter.consume());
        clock.advance(Duration::from_millis(500));
        assert!(limiter.consume());
        assert!(limiter.consume());
        assert!(!limiter.consume());
    }

    #[test]
    fn test_previous_window_is_weighted() {
        let (limiter, clock) = manual_counter(10, Duration::from_secs(10));
        for _ in 0..10 {
            assert!(limiter.consume());
        }

        // Halfway through the next window only half the old count remains.
        clock.advance(Duration::from_secs(15));
        assert_eq!(limiter.estimate(), 5.0);

        let admitted = (0..10).filter(|_| limiter.consume()).count();
        assert_eq!(admitted, 5);
        assert_eq!(limiter.estimate(), 10.0);
    }

    #[test]
    fn test_never_admits_at_or_over_estimate() {
        let (limiter, clock) = manual_counter(7, Duration::from_secs(1));

        for _ in 0..200 {
            let before = limiter.estimate();
            let admitted = limiter.consume();
            if before >= 7.0 {
                assert!(!admitted);
            }
            clock.advance(Duration::from_millis(37));
        }
    }

    #[test]
    fn test_skipped_windows_fully_decay() {
        let (limiter, clock) = manual_counter(2, Duration::from_secs(1));
        assert!(limiter.consume());
        assert!(limiter.consume());

        clock.advance(Duration::from_millis(2100));
        assert_eq!(limiter.estimate(), 0.0);
        assert!(limiter.consume());
        assert!(limiter.consume());
        assert!(!limiter.consume());
    }

    #[test]
    fn test_backwards_clock_decays() {
        let (limiter, clock) = manual_counter(1, Duration::from_secs(1));
        assert!(limiter.consume());

        clock.set(Duration::from_secs(900));
        assert!(limiter.consume());
    }

    #[test]
    fn test_estimate_does_not_rotate() {
        let (limiter, clock) = manual_counter(4, Duration::from_secs(1));
        assert!(limiter.consume());
        assert!(limiter.consume());

        clock.advance(Duration::from_millis(1500));
        assert_eq!(limiter.estimate(), 1.0);
        clock.set(Duration::from_millis(1_000_500));
        assert_eq!(limiter.estimate(), 2.0);
    }

    #[test]
    fn test_trait_consume_handles_cost() {
        let (limiter, _clock) = manual_counter(1, Duration::from_secs(1));
        let limiter: &dyn RateLimiter = &limiter;

        assert!(!limiter.consume(5));
        assert!(limiter.consume(1));
        assert!(!limiter.consume(1));
    }
}
