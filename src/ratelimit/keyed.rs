//! Per-key rate limiting.

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::params::BucketParams;
use super::{RateLimiter, TokenBucket};
use crate::config::LimiterConfig;
use crate::error::Result;

type Factory<L> = Arc<dyn Fn() -> L + Send + Sync>;

/// A rate limiter that gives every key its own independent limiter instance.
///
/// Instances are created on first use from a shared factory and live as long
/// as the `KeyedLimiter` itself; keys are never evicted. Each instance guards
/// its own state, so requests for different keys never contend with each
/// other beyond the brief map lookup.
pub struct KeyedLimiter<K, L = Box<dyn RateLimiter>> {
    /// Per-key limiter instances
    limiters: DashMap<K, Arc<L>>,
    /// Builds the instance for a key seen for the first time
    factory: Factory<L>,
}

impl<K, L> KeyedLimiter<K, L>
where
    K: Eq + Hash,
    L: RateLimiter,
{
    /// Create a keyed limiter building each new key's instance with `factory`.
    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn() -> L + Send + Sync + 'static,
    {
        Self {
            limiters: DashMap::new(),
            factory: Arc::new(factory),
        }
    }

    /// Try to admit a request of `cost` units for `key`.
    ///
    /// The key's instance is created if this is the first request for it. The
    /// result is exactly what that instance decides.
    pub fn consume<Q>(&self, key: &Q, cost: u64) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + fmt::Debug + ?Sized,
    {
        let limiter = self.resolve(key);

        let admitted = limiter.consume(cost);
        if !admitted {
            debug!(key = ?key, cost = cost, "Rate limit exceeded");
        }
        admitted
    }

    /// Get or create the instance for `key`.
    ///
    /// The common case only takes a read lock on one shard. On a miss the
    /// shard is write-locked and the key checked again before creating, so
    /// racing first requests agree on a single instance. No map lock is held
    /// once the `Arc` has been cloned out.
    fn resolve<Q>(&self, key: &Q) -> Arc<L>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + fmt::Debug + ?Sized,
    {
        if let Some(limiter) = self.limiters.get(key) {
            return Arc::clone(limiter.value());
        }

        let limiter = self.limiters.entry(key.to_owned()).or_insert_with(|| {
            debug!(key = ?key, "Creating new rate limiter");
            Arc::new((self.factory)())
        });
        Arc::clone(limiter.value())
    }

    /// The instance for `key`, if one has been created.
    pub fn get<Q>(&self, key: &Q) -> Option<Arc<L>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.limiters.get(key).map(|limiter| Arc::clone(limiter.value()))
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.limiters.contains_key(key)
    }

    /// Number of keys seen so far.
    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}

impl<K: Eq + Hash> KeyedLimiter<K, TokenBucket> {
    /// Every key gets a full [`TokenBucket`] with the same `rate` and `capacity`.
    pub fn token_bucket(rate: f64, capacity: f64) -> Result<Self> {
        let params = BucketParams::new(rate, capacity)?;
        Ok(Self::with_factory(move || TokenBucket::from_params(params)))
    }
}

impl<K: Eq + Hash> KeyedLimiter<K> {
    /// Every key gets an instance of the configured algorithm.
    pub fn from_config(config: &LimiterConfig) -> Result<Self> {
        let factory = config.build_factory()?;
        Ok(Self::with_factory(move || factory()))
    }
}

impl<K: Eq + Hash, L> fmt::Debug for KeyedLimiter<K, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedLimiter")
            .field("keys", &self.limiters.len())
            .finish_non_exhaustive()
    }
}
