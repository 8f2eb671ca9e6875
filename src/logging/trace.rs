//! Connection trace log
//!
//! Records what happened on the way to each worker: which address a name
//! resolved to, every dispatch, failed attempt, backoff, hijack and close.
//! The log is a bounded ring owned by whoever builds the connection factory
//! and is handed to connections as an `Arc<dyn TraceSink>`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Default number of events retained
pub const DEFAULT_TRACE_CAPACITY: usize = 1024;

/// What happened
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    /// Worker name resolved to an address
    Resolved,
    /// Request sent to an address
    Dispatched,
    /// Attempt failed with a retriable error
    AttemptFailed,
    /// Waiting before the next attempt
    BackingOff,
    /// Exchange completed with a 2xx status
    Succeeded,
    /// Request failed terminally
    Failed,
    /// Connection switched to a raw stream
    Hijacked,
    /// Hijacked stream closed
    Closed,
}

/// A single trace event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: TraceKind,
    pub worker: String,
    pub address: Option<String>,
    pub attempt: Option<u32>,
    pub detail: Option<String>,
}

impl TraceEvent {
    pub fn new(kind: TraceKind, worker: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            worker: worker.into(),
            address: None,
            attempt: None,
            detail: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.with_detail(format!("{:?}", delay))
    }
}

impl std::fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {:?}",
            self.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.kind
        )?;
        if let Some(ref address) = self.address {
            write!(f, " address={}", address)?;
        }
        if let Some(attempt) = self.attempt {
            write!(f, " attempt={}", attempt)?;
        }
        if let Some(ref detail) = self.detail {
            write!(f, " {}", detail)?;
        }
        Ok(())
    }
}

/// Receives trace events
pub trait TraceSink: Send + Sync {
    fn record(&self, event: TraceEvent);
}

/// Bounded in-memory trace log; the oldest events are evicted first
pub struct TraceLog {
    events: Mutex<VecDeque<TraceEvent>>,
    capacity: usize,
}

impl Default for TraceLog {
    fn default() -> Self {
        Self::new(DEFAULT_TRACE_CAPACITY)
    }
}

impl TraceLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_TRACE_CAPACITY))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of every retained event, oldest first
    pub fn snapshot(&self) -> Vec<TraceEvent> {
        self.lock().iter().cloned().collect()
    }

    /// Retained events for one worker, oldest first
    pub fn for_worker(&self, worker: &str) -> Vec<TraceEvent> {
        self.lock()
            .iter()
            .filter(|e| e.worker == worker)
            .cloned()
            .collect()
    }

    /// Text dump: one block per worker (in order of first appearance),
    /// blocks separated by blank lines
    pub fn render(&self) -> String {
        let events = self.snapshot();

        let mut workers: Vec<&str> = Vec::new();
        for event in &events {
            if !workers.contains(&event.worker.as_str()) {
                workers.push(&event.worker);
            }
        }

        let blocks: Vec<String> = workers
            .iter()
            .map(|worker| {
                let mut block = format!("worker {}", worker);
                for event in events.iter().filter(|e| e.worker == *worker) {
                    block.push_str("\n  ");
                    block.push_str(&event.to_string());
                }
                block
            })
            .collect();

        blocks.join("\n\n\n")
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<TraceEvent>> {
        // A panic while holding the lock cannot leave the deque half-written
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TraceSink for TraceLog {
    fn record(&self, event: TraceEvent) {
        let mut events = self.lock();
        while events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }
}
