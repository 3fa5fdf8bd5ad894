//! Sliding window log: exact sliding window over admitted timestamps.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use super::params::WindowParams;
use super::RateLimiter;
use crate::clock::{Clock, SystemClock};
use crate::error::Result;

/// A rate limiter that remembers the time of every admitted request.
///
/// A request is admitted when fewer than `limit` requests were admitted in
/// the trailing `window`. This is exact, with no boundary bursts, at the cost
/// of storing up to `limit` timestamps.
///
/// Only single-unit requests are supported. Through [`RateLimiter::consume`]
/// any cost above one is rejected.
#[derive(Debug)]
pub struct SlidingWindowLog<C: Clock = SystemClock> {
    params: WindowParams,
    clock: C,
    log: Mutex<VecDeque<Duration>>,
}

fn is_live(entry: Duration, params: &WindowParams, now: Duration) -> bool {
    now.saturating_sub(entry) <= params.window()
}

impl SlidingWindowLog {
    /// Create a limiter admitting `limit` requests per trailing `window`.
    pub fn new(limit: u64, window: Duration) -> Result<Self> {
        Ok(Self::from_params(WindowParams::new(limit, window)?))
    }

    pub fn from_params(params: WindowParams) -> Self {
        Self::with_clock(params, SystemClock)
    }
}

impl<C: Clock> SlidingWindowLog<C> {
    pub fn with_clock(params: WindowParams, clock: C) -> Self {
        Self {
            params,
            clock,
            log: Mutex::new(VecDeque::new()),
        }
    }

    pub fn params(&self) -> WindowParams {
        self.params
    }

    /// Try to admit one request.
    pub fn consume(&self) -> bool {
        let now = self.clock.now();
        let mut log = self.log.lock();

        // Entries are chronological, so expired ones are all at the front.
        while log.front().is_some_and(|&entry| !is_live(entry, &self.params, now)) {
            log.pop_front();
        }

        if (log.len() as u64) < self.params.limit() {
            log.push_back(now);
            true
        } else {
            trace!(
                logged = log.len(),
                limit = self.params.limit(),
                "Sliding window log full"
            );
            false
        }
    }

    /// Requests admitted within the trailing window, without evicting.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.log
            .lock()
            .iter()
            .filter(|&&entry| is_live(entry, &self.params, now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<C: Clock> RateLimiter for SlidingWindowLog<C> {
    fn consume(&self, cost: u64) -> bool {
        match cost {
            0 => true,
            1 => Self::consume(self),
            _ => {
                trace!(cost = cost, "Sliding window log only admits unit cost");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn manual_log(limit: u64, window: Duration) -> (SlidingWindowLog<ManualClock>, ManualClock) {
        let clock = ManualClock::new(Duration::from_secs(500));
        let params = WindowParams::new(limit, window).unwrap();
        (SlidingWindowLog::with_clock(params, clock.clone()), clock)
    }

    #[test]
    fn test_admits_limit_then_expires() {
        let (limiter, clock) = manual_log(2, Duration::from_secs(1));

        assert!(limiter.consume());
        assert!(limiter.consume());
        assert!(!limiter.consume());

        clock.advance(Duration::from_millis(1100));
        assert!(limiter.consume());
        assert!(limiter.consume());
        assert!(!limiter.consume());
    }

    #[test]
    fn test_no_burst_at_window_edges() {
        let (limiter, clock) = manual_log(2, Duration::from_secs(10));

        clock.set(Duration::from_millis(509_900));
        assert!(limiter.consume());
        assert!(limiter.consume());

        // A fixed window would have reset at 510s.
        clock.advance(Duration::from_millis(200));
        assert!(!limiter.consume());

        clock.set(Duration::from_millis(519_901));
        assert!(limiter.consume());
    }

    #[test]
    fn test_entries_slide_out_one_by_one() {
        let (limiter, clock) = manual_log(3, Duration::from_secs(3));

        assert!(limiter.consume());
        clock.advance(Duration::from_secs(1));
        assert!(limiter.consume());
        clock.advance(Duration::from_secs(1));
        assert!(limiter.consume());
        assert!(!limiter.consume());

        // Only the oldest entry has left the window.
        clock.advance(Duration::from_millis(1500));
        assert_eq!(limiter.len(), 2);
        assert!(limiter.consume());
        assert!(!limiter.consume());
    }

    #[test]
    fn test_entry_exactly_window_old_still_counts() {
        let (limiter, clock) = manual_log(1, Duration::from_secs(2));
        assert!(limiter.consume());

        clock.advance(Duration::from_secs(2));
        assert!(!limiter.consume());

        clock.advance(Duration::from_nanos(1));
        assert!(limiter.consume());
    }

    #[test]
    fn test_rejections_are_not_logged() {
        let (limiter, clock) = manual_log(2, Duration::from_secs(1));

        assert!(limiter.consume());
        assert!(limiter.consume());
        for _ in 0..10 {
            assert!(!limiter.consume());
        }
        assert_eq!(limiter.len(), 2);

        clock.advance(Duration::from_millis(1001));
        assert!(limiter.is_empty());
    }

    #[test]
    fn test_trait_consume_handles_cost() {
        let (limiter, _clock) = manual_log(3, Duration::from_secs(1));
        let limiter: &dyn RateLimiter = &limiter;

        assert!(!limiter.consume(2));
        assert!(limiter.consume(0));
        assert!(limiter.consume(1));
    }

    #[test]
    fn test_real_clock_sliding() {
        let limiter = SlidingWindowLog::new(2, Duration::from_millis(100)).unwrap();

        assert!(limiter.consume());
        assert!(limiter.consume());
        assert!(!limiter.consume());

        std::thread::sleep(Duration::from_millis(110));
        assert!(limiter.consume());
        assert!(limiter.consume());
    }
}
