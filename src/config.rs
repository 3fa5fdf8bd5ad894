//! Configuration management for Ratekeeper.
//!
//! A configuration names one algorithm and its parameters. Parameters are
//! validated when a limiter (or a factory for keyed limiters) is built from
//! it, not when it is parsed.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{RatekeeperError, Result};
use crate::ratelimit::{
    BucketParams, FixedWindow, LeakyBucket, RateLimiter, SlidingWindowCounter, SlidingWindowLog,
    TokenBucket, WindowParams,
};

/// Prefix for environment variable overrides, e.g. `RATEKEEPER__LIMITER__RATE=5`.
const ENV_PREFIX: &str = "RATEKEEPER";

/// Builds a fresh limiter instance on every call.
pub type LimiterFactory = Arc<dyn Fn() -> Box<dyn RateLimiter> + Send + Sync>;

/// Main configuration for Ratekeeper.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatekeeperConfig {
    /// Algorithm applied to every key
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// Which algorithm to run, with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum LimiterConfig {
    TokenBucket {
        /// Tokens added per second
        rate: f64,
        capacity: f64,
    },
    LeakyBucket {
        /// Units drained per second
        rate: f64,
        capacity: f64,
    },
    FixedWindow {
        limit: u64,
        window_secs: f64,
    },
    SlidingWindowLog {
        limit: u64,
        window_secs: f64,
    },
    SlidingWindowCounter {
        limit: u64,
        window_secs: f64,
    },
}

impl Default for LimiterConfig {
    fn default() -> Self {
        LimiterConfig::TokenBucket {
            rate: default_rate(),
            capacity: default_capacity(),
        }
    }
}

fn default_rate() -> f64 {
    10.0
}

fn default_capacity() -> f64 {
    10.0
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn boxed<L, F>(build: F) -> LimiterFactory
where
    L: RateLimiter + 'static,
    F: Fn() -> L + Send + Sync + 'static,
{
    Arc::new(move || Box::new(build()) as Box<dyn RateLimiter>)
}

impl LimiterConfig {
    /// Short algorithm name, as spelled in configuration files.
    pub fn algorithm(&self) -> &'static str {
        match self {
            LimiterConfig::TokenBucket { .. } => "token_bucket",
            LimiterConfig::LeakyBucket { .. } => "leaky_bucket",
            LimiterConfig::FixedWindow { .. } => "fixed_window",
            LimiterConfig::SlidingWindowLog { .. } => "sliding_window_log",
            LimiterConfig::SlidingWindowCounter { .. } => "sliding_window_counter",
        }
    }

    /// Validate the parameters and return a factory for limiter instances.
    pub fn build_factory(&self) -> Result<LimiterFactory> {
        let factory = match *self {
            LimiterConfig::TokenBucket { rate, capacity } => {
                let params = BucketParams::new(rate, capacity)?;
                boxed(move || TokenBucket::from_params(params))
            }
            LimiterConfig::LeakyBucket { rate, capacity } => {
                let params = BucketParams::new(rate, capacity)?;
                boxed(move || LeakyBucket::from_params(params))
            }
            LimiterConfig::FixedWindow { limit, window_secs } => {
                let params = WindowParams::from_secs_f64(limit, window_secs)?;
                boxed(move || FixedWindow::from_params(params))
            }
            LimiterConfig::SlidingWindowLog { limit, window_secs } => {
                let params = WindowParams::from_secs_f64(limit, window_secs)?;
                boxed(move || SlidingWindowLog::from_params(params))
            }
            LimiterConfig::SlidingWindowCounter { limit, window_secs } => {
                let params = WindowParams::from_secs_f64(limit, window_secs)?;
                boxed(move || SlidingWindowCounter::from_params(params))
            }
        };
        Ok(factory)
    }

    /// Validate the parameters and build a single limiter instance.
    pub fn build(&self) -> Result<Box<dyn RateLimiter>> {
        let factory = self.build_factory()?;
        Ok(factory())
    }
}

impl RatekeeperConfig {
    /// Load configuration from a file, with `RATEKEEPER__*` environment overrides.
    ///
    /// The format follows the file extension (`.yaml`, `.toml`, `.json`, ...).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        ::config::Config::builder()
            .add_source(::config::File::from(path))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| RatekeeperError::Config(e.to_string()))
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| RatekeeperError::Config(format!("Failed to parse configuration: {}", e)))
    }
}
