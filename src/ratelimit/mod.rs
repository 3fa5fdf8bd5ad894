//! Rate limiting algorithms and the per-key wrapper.

mod fixed_window;
mod keyed;
mod leaky_bucket;
mod params;
mod sliding_counter;
mod sliding_log;
mod token_bucket;

use std::fmt::Debug;
use std::sync::Arc;

pub use fixed_window::FixedWindow;
pub use keyed::KeyedLimiter;
pub use leaky_bucket::LeakyBucket;
pub use params::{BucketParams, WindowParams};
pub use sliding_counter::SlidingWindowCounter;
pub use sliding_log::SlidingWindowLog;
pub use token_bucket::TokenBucket;

/// The admission contract shared by every algorithm.
///
/// Implementations own their state behind a single lock, so `consume` can be
/// called from any number of threads through a shared reference.
pub trait RateLimiter: Send + Sync + Debug {
    /// Try to admit a request weighing `cost` units.
    ///
    /// Returns `true` if the request was admitted and its cost accounted for,
    /// `false` if it was rejected. A rejection leaves admitted usage untouched.
    fn consume(&self, cost: u64) -> bool;
}

impl<L: RateLimiter + ?Sized> RateLimiter for Box<L> {
    fn consume(&self, cost: u64) -> bool {
        (**self).consume(cost)
    }
}

impl<L: RateLimiter + ?Sized> RateLimiter for Arc<L> {
    fn consume(&self, cost: u64) -> bool {
        (**self).consume(cost)
    }
}
