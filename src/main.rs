use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, ensure, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rand::Rng;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use ratekeeper::config::{LimiterConfig, LogConfig, RatekeeperConfig};
use ratekeeper::KeyedLimiter;

/// Per-key rate limiting from the command line.
#[derive(Parser, Debug)]
#[command(name = "ratekeeper", version, about)]
struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    limiter: LimiterArgs,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

/// Limiter settings; these override the configuration file.
#[derive(Args, Debug)]
struct LimiterArgs {
    #[arg(long, value_enum)]
    algorithm: Option<Algorithm>,

    /// Units per second (bucket algorithms)
    #[arg(long)]
    rate: Option<f64>,

    /// Bucket capacity (bucket algorithms)
    #[arg(long)]
    capacity: Option<f64>,

    /// Units per window (window algorithms)
    #[arg(long)]
    limit: Option<u64>,

    /// Window size in seconds (window algorithms)
    #[arg(long)]
    window_secs: Option<f64>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Algorithm {
    TokenBucket,
    LeakyBucket,
    FixedWindow,
    SlidingWindowLog,
    SlidingWindowCounter,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read `key [cost]` lines from stdin and print one decision per line
    Replay {
        /// Print decisions as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Drive one keyed limiter from several threads and report per-key totals
    Simulate {
        #[arg(long, default_value_t = 4)]
        threads: usize,

        /// Total requests across all threads
        #[arg(long, default_value_t = 10_000)]
        requests: usize,

        /// Number of distinct keys to spread requests over
        #[arg(long, default_value_t = 16)]
        keys: usize,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

impl LimiterArgs {
    /// Merge the command line over `base`.
    fn resolve(&self, base: LimiterConfig) -> anyhow::Result<LimiterConfig> {
        let (base_rate, base_capacity, base_limit, base_window) = match base {
            LimiterConfig::TokenBucket { rate, capacity }
            | LimiterConfig::LeakyBucket { rate, capacity } => {
                (Some(rate), Some(capacity), None, None)
            }
            LimiterConfig::FixedWindow { limit, window_secs }
            | LimiterConfig::SlidingWindowLog { limit, window_secs }
            | LimiterConfig::SlidingWindowCounter { limit, window_secs } => {
                (None, None, Some(limit), Some(window_secs))
            }
        };

        let algorithm = match self.algorithm {
            Some(algorithm) => algorithm,
            None => match base {
                LimiterConfig::TokenBucket { .. } => Algorithm::TokenBucket,
                LimiterConfig::LeakyBucket { .. } => Algorithm::LeakyBucket,
                LimiterConfig::FixedWindow { .. } => Algorithm::FixedWindow,
                LimiterConfig::SlidingWindowLog { .. } => Algorithm::SlidingWindowLog,
                LimiterConfig::SlidingWindowCounter { .. } => Algorithm::SlidingWindowCounter,
            },
        };

        let rate = || self.rate.or(base_rate).context("--rate is required");
        let capacity = || self.capacity.or(base_capacity).context("--capacity is required");
        let limit = || self.limit.or(base_limit).context("--limit is required");
        let window_secs = || {
            self.window_secs
                .or(base_window)
                .context("--window-secs is required")
        };

        Ok(match algorithm {
            Algorithm::TokenBucket => LimiterConfig::TokenBucket {
                rate: rate()?,
                capacity: capacity()?,
            },
            Algorithm::LeakyBucket => LimiterConfig::LeakyBucket {
                rate: rate()?,
                capacity: capacity()?,
            },
            Algorithm::FixedWindow => LimiterConfig::FixedWindow {
                limit: limit()?,
                window_secs: window_secs()?,
            },
            Algorithm::SlidingWindowLog => LimiterConfig::SlidingWindowLog {
                limit: limit()?,
                window_secs: window_secs()?,
            },
            Algorithm::SlidingWindowCounter => LimiterConfig::SlidingWindowCounter {
                limit: limit()?,
                window_secs: window_secs()?,
            },
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => RatekeeperConfig::from_file(path)?,
        None => RatekeeperConfig::default(),
    };
    config.limiter = cli.limiter.resolve(config.limiter)?;
    config.log.json |= cli.log_json;

    init_tracing(&config.log);

    info!("Starting Ratekeeper");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        algorithm = config.limiter.algorithm(),
        config = ?config.limiter,
        "Configuration loaded"
    );

    let limiter: Arc<KeyedLimiter<String>> = Arc::new(KeyedLimiter::from_config(&config.limiter)?);

    match cli.command {
        Command::Replay { json } => replay(limiter, json).await?,
        Command::Simulate {
            threads,
            requests,
            keys,
            json,
        } => {
            let report =
                tokio::task::spawn_blocking(move || simulate(&limiter, threads, requests, keys))
                    .await??;
            print_report(&report, json)?;
        }
    }

    info!("Ratekeeper stopped");
    Ok(())
}

/// Logs go to stderr so that decisions on stdout stay machine-readable.
fn init_tracing(log: &LogConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[derive(Debug, PartialEq)]
struct Request {
    key: String,
    cost: u64,
}

/// Parse one `key [cost]` line. Blank lines and `#` comments yield `None`.
fn parse_request(line: &str) -> anyhow::Result<Option<Request>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut fields = line.split_whitespace();
    let key = match fields.next() {
        Some(key) => key.to_string(),
        None => return Ok(None),
    };
    let cost = match fields.next() {
        Some(cost) => cost
            .parse()
            .with_context(|| format!("invalid cost {:?} for key {:?}", cost, key))?,
        None => 1,
    };
    if let Some(extra) = fields.next() {
        bail!("unexpected field {:?} after cost for key {:?}", extra, key);
    }

    Ok(Some(Request { key, cost }))
}

#[derive(Serialize)]
struct Decision<'a> {
    key: &'a str,
    cost: u64,
    admitted: bool,
}

async fn replay(limiter: Arc<KeyedLimiter<String>>, json: bool) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = &mut shutdown => break,
        };
        let Some(line) = line else {
            break;
        };
        let Some(request) = parse_request(&line)? else {
            continue;
        };

        let admitted = limiter.consume(request.key.as_str(), request.cost);
        let output = if json {
            serde_json::to_string(&Decision {
                key: &request.key,
                cost: request.cost,
                admitted,
            })?
        } else {
            let verdict = if admitted { "admit" } else { "reject" };
            format!("{} {}", request.key, verdict)
        };

        stdout.write_all(output.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
    }

    stdout.flush().await?;
    info!(keys = limiter.len(), "Replay finished");
    Ok(())
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
struct KeyTotals {
    admitted: u64,
    rejected: u64,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    elapsed_ms: u128,
    keys: BTreeMap<String, KeyTotals>,
}

fn simulate(
    limiter: &KeyedLimiter<String>,
    threads: usize,
    requests: usize,
    keys: usize,
) -> anyhow::Result<SimulationReport> {
    ensure!(threads > 0, "--threads must be at least 1");
    ensure!(keys > 0, "--keys must be at least 1");

    let started = Instant::now();
    let per_thread: Vec<BTreeMap<String, KeyTotals>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|worker| {
                let share = requests / threads + usize::from(worker < requests % threads);
                scope.spawn(move || {
                    let mut rng = rand::thread_rng();
                    let mut totals: BTreeMap<String, KeyTotals> = BTreeMap::new();
                    for _ in 0..share {
                        let key = format!("key-{}", rng.gen_range(0..keys));
                        let admitted = limiter.consume(key.as_str(), 1);
                        let entry = totals.entry(key).or_default();
                        if admitted {
                            entry.admitted += 1;
                        } else {
                            entry.rejected += 1;
                        }
                    }
                    debug!(worker = worker, requests = share, "Simulation worker finished");
                    totals
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_default())
            .collect()
    });

    let mut merged: BTreeMap<String, KeyTotals> = BTreeMap::new();
    for totals in per_thread {
        for (key, counts) in totals {
            let entry = merged.entry(key).or_default();
            entry.admitted += counts.admitted;
            entry.rejected += counts.rejected;
        }
    }

    Ok(SimulationReport {
        elapsed_ms: started.elapsed().as_millis(),
        keys: merged,
    })
}

fn print_report(report: &SimulationReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let mut admitted = 0;
    let mut rejected = 0;
    for (key, totals) in &report.keys {
        println!(
            "{} admitted={} rejected={}",
            key, totals.admitted, totals.rejected
        );
        admitted += totals.admitted;
        rejected += totals.rejected;
    }
    println!(
        "total admitted={} rejected={} elapsed={}ms",
        admitted, rejected, report.elapsed_ms
    );
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping replay");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping replay");
        }
    }
}
