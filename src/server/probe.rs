//! Periodic worker probes
//!
//! One task per configured worker pings its daemon through a directory-backed
//! connection, so each probe also exercises resolution. The latest result per
//! worker lands on a shared [`ProbeBoard`].

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::worker::ConnectionFactory;

/// Outcome of the most recent probe of one worker
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub worker: String,
    pub healthy: bool,
    /// HTTP status the failure maps to (200 when healthy)
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub latency_ms: u64,
    pub checked_at: DateTime<Utc>,
}

/// Latest probe result per worker
#[derive(Default)]
pub struct ProbeBoard {
    results: DashMap<String, ProbeResult>,
}

impl ProbeBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, result: ProbeResult) {
        self.results.insert(result.worker.clone(), result);
    }

    pub fn get(&self, worker: &str) -> Option<ProbeResult> {
        self.results.get(worker).map(|r| r.clone())
    }

    /// All results, ordered by worker name
    pub fn snapshot(&self) -> Vec<ProbeResult> {
        let mut results: Vec<ProbeResult> = self.results.iter().map(|r| r.value().clone()).collect();
        results.sort_by(|a, b| a.worker.cmp(&b.worker));
        results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Resolve and ping one worker
pub async fn probe_worker(factory: &ConnectionFactory, name: &str) -> ProbeResult {
    let started = Instant::now();

    let outcome = match factory.build_connection_from_directory(name).await {
        Ok(conn) => conn.ping().await,
        Err(e) => Err(e),
    };
    let latency_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(()) => {
            debug!(worker = %name, latency_ms, "Worker probe succeeded");
            ProbeResult {
                worker: name.to_string(),
                healthy: true,
                status: 200,
                error: None,
                latency_ms,
                checked_at: Utc::now(),
            }
        }
        Err(e) => {
            warn!(worker = %name, error = %e, "Worker probe failed");
            ProbeResult {
                worker: name.to_string(),
                healthy: false,
                status: e.status_code().as_u16(),
                error: Some(e.to_string()),
                latency_ms,
                checked_at: Utc::now(),
            }
        }
    }
}

/// Probe a worker now and then every `interval`
pub fn spawn_probe_task(
    factory: ConnectionFactory,
    board: Arc<ProbeBoard>,
    worker: String,
    interval: Duration,
) -> JoinHandle<()> {
    info!(
        worker = %worker,
        interval_secs = interval.as_secs(),
        "Worker probe task started"
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            board.record(probe_worker(&factory, &worker).await);
        }
    })
}
