//! Ratekeeper - In-process Rate Limiting
//!
//! This crate implements five admission-control algorithms (token bucket,
//! leaky bucket, fixed window, sliding window log and sliding window counter)
//! behind a single `consume(cost) -> bool` contract, plus a keyed wrapper that
//! gives every tenant its own lazily created, independently locked instance.
//!
//! ```
//! use ratekeeper::{KeyedLimiter, RateLimiter, TokenBucket};
//!
//! let bucket = TokenBucket::new(2.0, 4.0).unwrap();
//! assert!(bucket.consume(4));
//! assert!(!bucket.consume(1));
//!
//! let per_user: KeyedLimiter<String, _> = KeyedLimiter::token_bucket(1.0, 2.0).unwrap();
//! assert!(per_user.consume("u1", 2));
//! assert!(!per_user.consume("u1", 1));
//! assert!(per_user.consume("u2", 1));
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;

pub use clock::{Clock, ManualClock, MonotonicClock, SystemClock};
pub use error::{RatekeeperError, Result};
pub use ratelimit::{
    BucketParams, FixedWindow, KeyedLimiter, LeakyBucket, RateLimiter, SlidingWindowCounter,
    SlidingWindowLog, TokenBucket, WindowParams,
};
