//! Token bucket: continuous refill of credit, bounded by capacity.

use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use super::params::BucketParams;
use super::RateLimiter;
use crate::clock::{Clock, MonotonicClock};
use crate::error::Result;

/// A token bucket rate limiter.
///
/// The bucket starts full and refills lazily at `rate` tokens per second on
/// every call; there is no background task. A request of `cost` units is
/// admitted when the refilled bucket holds at least `cost` tokens.
///
/// A `cost` larger than `capacity` can never be admitted. That is not an
/// error: the request is simply rejected every time.
#[derive(Debug)]
pub struct TokenBucket<C: Clock = MonotonicClock> {
    params: BucketParams,
    clock: C,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Duration,
}

impl BucketState {
    /// Credit the tokens earned since the last refill.
    fn settle(&mut self, params: &BucketParams, now: Duration) {
        self.tokens = refilled(self.tokens, self.last_refill, params, now);
        self.last_refill = self.last_refill.max(now);
    }
}

fn refilled(tokens: f64, last_refill: Duration, params: &BucketParams, now: Duration) -> f64 {
    let elapsed = now.saturating_sub(last_refill);
    (tokens + elapsed.as_secs_f64() * params.rate()).min(params.capacity())
}

impl TokenBucket {
    /// Create a full bucket refilling at `rate` tokens per second.
    pub fn new(rate: f64, capacity: f64) -> Result<Self> {
        Ok(Self::from_params(BucketParams::new(rate, capacity)?))
    }

    pub fn from_params(params: BucketParams) -> Self {
        Self::with_clock(params, MonotonicClock::new())
    }
}

impl<C: Clock> TokenBucket<C> {
    /// Create a full bucket reading time from `clock`.
    pub fn with_clock(params: BucketParams, clock: C) -> Self {
        let now = clock.now();
        Self {
            params,
            clock,
            state: Mutex::new(BucketState {
                tokens: params.capacity(),
                last_refill: now,
            }),
        }
    }

    pub fn params(&self) -> BucketParams {
        self.params
    }

    /// Tokens the bucket would hold if refilled now. Does not commit the refill.
    pub fn available(&self) -> f64 {
        let state = self.state.lock();
        refilled(state.tokens, state.last_refill, &self.params, self.clock.now())
    }
}

impl<C: Clock> RateLimiter for TokenBucket<C> {
    fn consume(&self, cost: u64) -> bool {
        let mut state = self.state.lock();
        state.settle(&self.params, self.clock.now());

        let cost = cost as f64;
        if state.tokens >= cost {
            state.tokens -= cost;
            true
        } else {
            trace!(
                cost = cost,
                tokens = state.tokens,
                "Token bucket rejected request"
            );
            false
        }
    }
}
