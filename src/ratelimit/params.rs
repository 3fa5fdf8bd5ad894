//! Validated construction parameters shared by the algorithms.
//!
//! Parameters are checked once here so that building an instance from them
//! (possibly many times, lazily, from a keyed limiter) cannot fail.

use std::time::Duration;

use crate::error::{RatekeeperError, Result};

/// Parameters for the bucket algorithms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketParams {
    rate: f64,
    capacity: f64,
}

impl BucketParams {
    /// `rate` is in units per second; `capacity` bounds the bucket contents.
    pub fn new(rate: f64, capacity: f64) -> Result<Self> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(RatekeeperError::InvalidArgument(format!(
                "rate must be a positive finite number, got {}",
                rate
            )));
        }
        if !(capacity.is_finite() && capacity > 0.0) {
            return Err(RatekeeperError::InvalidArgument(format!(
                "capacity must be a positive finite number, got {}",
                capacity
            )));
        }
        Ok(Self { rate, capacity })
    }

    /// Units per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }
}

/// Parameters for the window algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowParams {
    limit: u64,
    window: Duration,
}

impl WindowParams {
    /// At most `limit` units are admitted per `window`.
    pub fn new(limit: u64, window: Duration) -> Result<Self> {
        if limit == 0 {
            return Err(RatekeeperError::InvalidArgument(
                "limit must be greater than 0".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(RatekeeperError::InvalidArgument(
                "window size must be greater than 0".to_string(),
            ));
        }
        Ok(Self { limit, window })
    }

    /// Same as [`WindowParams::new`] with the window given in seconds.
    pub fn from_secs_f64(limit: u64, window_secs: f64) -> Result<Self> {
        let window = Duration::try_from_secs_f64(window_secs).map_err(|_| {
            RatekeeperError::InvalidArgument(format!(
                "window size must be a positive finite number of seconds, got {}",
                window_secs
            ))
        })?;
        Self::new(limit, window)
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Index of the fixed window containing `now`.
    #[inline]
    pub fn epoch_index(&self, now: Duration) -> u64 {
        (now.as_nanos() / self.window.as_nanos()) as u64
    }

    /// Fraction of the current window already elapsed at `now`, in `[0, 1)`.
    #[inline]
    pub fn elapsed_fraction(&self, now: Duration) -> f64 {
        let window = self.window.as_nanos();
        (now.as_nanos() % window) as f64 / window as f64
    }
}
