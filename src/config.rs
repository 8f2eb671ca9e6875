//! Configuration for Gantry
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

use crate::logging::{LogFormat, DEFAULT_TRACE_CAPACITY};
use crate::types::{GantryError, Result};
use crate::worker::{
    BackoffStrategy, ConstantBackoff, ExponentialBackoff, Jittered, LinearBackoff, RetryPolicy,
};

/// Gantry - worker connection probe for the CI control plane
#[derive(Parser, Debug, Clone)]
#[command(name = "gantry")]
#[command(about = "Probes worker container daemons through the worker directory")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "gantry")]
    pub mongodb_db: String,

    /// Comma-separated workers to probe.
    /// Entries are `name` or `name=host:port`; dev mode needs the address
    /// form and serves it as a static directory instead of MongoDB.
    #[arg(long, env = "WORKERS")]
    pub workers: Option<String>,

    /// Enable development mode (static worker list, no MongoDB)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "pretty")]
    pub log_format: LogFormat,

    /// Seconds between probes of each worker
    #[arg(long, env = "PROBE_INTERVAL_SECS", default_value = "30")]
    pub probe_interval_secs: u64,

    /// Connection trace events kept in memory
    #[arg(long, env = "TRACE_CAPACITY", default_value_t = DEFAULT_TRACE_CAPACITY)]
    pub trace_capacity: usize,

    /// Retry configuration
    #[command(flatten)]
    pub retry: RetryArgs,
}

/// Backoff curve between retried attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackoffKind {
    Exponential,
    Linear,
    Constant,
}

/// Retry policy for worker requests
#[derive(Parser, Debug, Clone)]
pub struct RetryArgs {
    /// Total time budget for one worker request, retries included
    #[arg(long, env = "RETRY_TIMEOUT_SECS", default_value = "3600")]
    pub retry_timeout_secs: u64,

    /// Backoff curve
    #[arg(long, env = "BACKOFF", value_enum, default_value = "exponential")]
    pub backoff: BackoffKind,

    /// First delay (and step, for linear backoff)
    #[arg(long, env = "BACKOFF_INITIAL_MS", default_value = "1000")]
    pub backoff_initial_ms: u64,

    /// Largest delay
    #[arg(long, env = "BACKOFF_MAX_MS", default_value = "16000")]
    pub backoff_max_ms: u64,

    /// Random spread applied to each delay, 0.0 to 1.0
    #[arg(long, env = "BACKOFF_JITTER", default_value = "0.0")]
    pub backoff_jitter: f64,
}

impl RetryArgs {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.retry_timeout_secs)
    }

    fn strategy(&self) -> Box<dyn BackoffStrategy> {
        let initial = Duration::from_millis(self.backoff_initial_ms);
        let max = Duration::from_millis(self.backoff_max_ms);

        let base: Box<dyn BackoffStrategy> = match self.backoff {
            BackoffKind::Exponential => Box::new(ExponentialBackoff {
                initial,
                max,
                multiplier: 2,
            }),
            BackoffKind::Linear => Box::new(LinearBackoff { step: initial, max }),
            BackoffKind::Constant => Box::new(ConstantBackoff(initial)),
        };

        if self.backoff_jitter > 0.0 {
            Box::new(Jittered::new(base, self.backoff_jitter))
        } else {
            base
        }
    }

    /// Build the retry policy these arguments describe
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.timeout(), self.strategy())
    }
}

impl Args {
    /// Names of the workers to probe
    pub fn worker_names(&self) -> Vec<String> {
        self.workers
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(|entry| entry.split('=').next().unwrap_or_default().trim().to_string())
            .filter(|name| !name.is_empty())
            .collect()
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    /// Retry policy for probes: same curve, budget capped at one interval
    /// so a dead worker cannot pile up overlapping probes.
    pub fn probe_policy(&self) -> RetryPolicy {
        let policy = self.retry.policy();
        let budget = policy.timeout().min(self.probe_interval());
        policy.with_timeout(budget)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.dev_mode {
            let workers = self.workers.as_deref().unwrap_or_default();
            if workers.trim().is_empty() {
                return Err(GantryError::Config(
                    "WORKERS is required in dev mode".to_string(),
                ));
            }
            if let Some(entry) = workers
                .split(',')
                .map(str::trim)
                .find(|e| !e.is_empty() && !e.contains('='))
            {
                return Err(GantryError::Config(format!(
                    "dev mode needs name=host:port in WORKERS, got '{}'",
                    entry
                )));
            }
        }

        if self.probe_interval_secs == 0 {
            return Err(GantryError::Config("PROBE_INTERVAL_SECS must be positive".to_string()));
        }

        if self.trace_capacity == 0 {
            return Err(GantryError::Config("TRACE_CAPACITY must be positive".to_string()));
        }

        if self.retry.retry_timeout_secs == 0 {
            return Err(GantryError::Config("RETRY_TIMEOUT_SECS must be positive".to_string()));
        }

        if self.retry.backoff_initial_ms == 0 {
            return Err(GantryError::Config("BACKOFF_INITIAL_MS must be positive".to_string()));
        }

        if self.retry.backoff_initial_ms > self.retry.backoff_max_ms {
            return Err(GantryError::Config(
                "BACKOFF_INITIAL_MS must be less than or equal to BACKOFF_MAX_MS".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.retry.backoff_jitter) {
            return Err(GantryError::Config("BACKOFF_JITTER must be between 0.0 and 1.0".to_string()));
        }

        Ok(())
    }
}
