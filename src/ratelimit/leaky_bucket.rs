//! Leaky bucket: occupancy that drains at a constant rate.

use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use super::params::BucketParams;
use super::RateLimiter;
use crate::clock::{Clock, MonotonicClock};
use crate::error::Result;

/// A leaky bucket rate limiter.
///
/// Admitted requests pour `cost` units into the bucket, which leaks at `rate`
/// units per second. A request is rejected when it would overflow `capacity`.
/// Numerically this mirrors [`TokenBucket`](super::TokenBucket), but it models
/// queue occupancy and a smoothed outflow rather than available credit.
#[derive(Debug)]
pub struct LeakyBucket<C: Clock = MonotonicClock> {
    params: BucketParams,
    clock: C,
    state: Mutex<LeakState>,
}

#[derive(Debug)]
struct LeakState {
    occupancy: f64,
    last_leak: Duration,
}

impl LeakState {
    fn settle(&mut self, params: &BucketParams, now: Duration) {
        self.occupancy = drained(self.occupancy, self.last_leak, params, now);
        self.last_leak = self.last_leak.max(now);
    }
}

fn drained(occupancy: f64, last_leak: Duration, params: &BucketParams, now: Duration) -> f64 {
    let leaked = now.saturating_sub(last_leak).as_secs_f64() * params.rate();
    (occupancy - leaked).max(0.0)
}

impl LeakyBucket {
    /// Create an empty bucket leaking `rate` units per second.
    pub fn new(rate: f64, capacity: f64) -> Result<Self> {
        Ok(Self::from_params(BucketParams::new(rate, capacity)?))
    }

    pub fn from_params(params: BucketParams) -> Self {
        Self::with_clock(params, MonotonicClock::new())
    }
}

impl<C: Clock> LeakyBucket<C> {
    pub fn with_clock(params: BucketParams, clock: C) -> Self {
        let now = clock.now();
        Self {
            params,
            clock,
            state: Mutex::new(LeakState {
                occupancy: 0.0,
                last_leak: now,
            }),
        }
    }

    pub fn params(&self) -> BucketParams {
        self.params
    }

    /// Occupancy after leaking up to now, without committing the leak.
    pub fn occupancy(&self) -> f64 {
        let state = self.state.lock();
        drained(state.occupancy, state.last_leak, &self.params, self.clock.now())
    }
}

impl<C: Clock> RateLimiter for LeakyBucket<C> {
    fn consume(&self, cost: u64) -> bool {
        let mut state = self.state.lock();
        state.settle(&self.params, self.clock.now());

        let cost = cost as f64;
        if state.occupancy + cost <= self.params.capacity() {
            state.occupancy += cost;
            true
        } else {
            trace!(
                cost = cost,
                occupancy = state.occupancy,
                "Leaky bucket overflow, rejecting request"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn manual_bucket(rate: f64, capacity: f64) -> (LeakyBucket<ManualClock>, ManualClock) {
        let clock = ManualClock::default();
        let params = BucketParams::new(rate, capacity).unwrap();
        (LeakyBucket::with_clock(params, clock.clone()), clock)
    }

    #[test]
    fn test_new_rejects_invalid_parameters() {
        assert!(LeakyBucket::new(-0.5, 3.0).is_err());
        assert!(LeakyBucket::new(1.0, 0.0).is_err());
    }

    #[test]
    fn test_fills_to_capacity() {
        let (bucket, _clock) = manual_bucket(1.0, 3.0);

        assert!(bucket.consume(1));
        assert!(bucket.consume(1));
        assert!(bucket.consume(1));
        assert!(!bucket.consume(1));
        assert_eq!(bucket.occupancy(), 3.0);
    }

    #[test]
    fn test_leaks_over_time() {
        let (bucket, clock) = manual_bucket(2.0, 4.0);
        assert!(bucket.consume(4));

        clock.advance(Duration::from_secs(1));
        assert_eq!(bucket.occupancy(), 2.0);
        assert!(bucket.consume(2));
        assert!(!bucket.consume(1));
    }

    #[test]
    fn test_occupancy_never_negative() {
        let (bucket, clock) = manual_bucket(5.0, 2.0);
        assert!(bucket.consume(1));

        clock.advance(Duration::from_secs(30));
        assert_eq!(bucket.occupancy(), 0.0);
        assert!(bucket.consume(2));
        assert!(!bucket.consume(1));
    }

    #[test]
    fn test_occupancy_never_increases_without_consumption() {
        let (bucket, clock) = manual_bucket(0.5, 8.0);
        assert!(bucket.consume(8));

        let mut last = bucket.occupancy();
        for _ in 0..40 {
            clock.advance(Duration::from_millis(500));
            let now = bucket.occupancy();
            assert!(now <= last);
            assert!(now >= 0.0);
            last = now;
        }
    }

    #[test]
    fn test_rejection_leaves_occupancy_unchanged() {
        let (bucket, clock) = manual_bucket(1.0, 5.0);
        assert!(bucket.consume(4));

        assert!(!bucket.consume(2));
        assert_eq!(bucket.occupancy(), 4.0);

        clock.advance(Duration::from_secs(1));
        assert!(bucket.consume(2));
        assert_eq!(bucket.occupancy(), 5.0);
    }

    #[test]
    fn test_cost_above_capacity_never_admits() {
        let (bucket, clock) = manual_bucket(1.0, 2.0);
        assert!(!bucket.consume(3));
        clock.advance(Duration::from_secs(100));
        assert!(!bucket.consume(3));
    }
}
