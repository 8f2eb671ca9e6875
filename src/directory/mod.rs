//! Worker directory - where a worker name turns into an address
//!
//! The directory is owned by the registration subsystem: workers write their
//! current address when they (re-)register, and everything in this crate only
//! ever reads. A lookup answers `Ok(None)` when the worker is unknown, which is
//! distinct from the lookup itself failing.
//!
//! ## Adapters
//!
//! - [`InMemoryDirectory`]: DashMap-backed, used for static configuration and tests
//! - [`MongoDirectory`]: reads the `workers` collection written by registration

pub mod memory;
pub mod mongo;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use memory::InMemoryDirectory;
pub use mongo::{redact_uri, MongoDirectory, WorkerDoc, WORKER_COLLECTION};

/// Lifecycle state a worker reports to the directory
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Heartbeating and accepting work
    #[default]
    Running,
    /// Missed heartbeats, may come back at a new address
    Stalled,
    /// Draining before a restart
    Landing,
    /// Draining before removal
    Retiring,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Stalled => "stalled",
            Self::Landing => "landing",
            Self::Retiring => "retiring",
        };
        f.write_str(s)
    }
}

/// A worker as the directory currently knows it. Never cached past one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRecord {
    /// Unique worker name
    pub name: String,
    /// host:port of the worker's container daemon
    pub address: String,
    /// Reported lifecycle state
    pub state: WorkerState,
    /// When the worker last registered
    pub registered_at: DateTime<Utc>,
    /// Platform the worker runs builds on (e.g. "linux")
    pub platform: Option<String>,
    /// Scheduling tags
    pub tags: Vec<String>,
    /// Owning team, if the worker is team-scoped
    pub team: Option<String>,
    /// Containers currently running on the worker
    pub active_containers: u32,
}

impl WorkerRecord {
    /// A running worker with no optional attributes
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            state: WorkerState::Running,
            registered_at: Utc::now(),
            platform: None,
            tags: Vec::new(),
            team: None,
            active_containers: 0,
        }
    }

    /// Set the lifecycle state
    pub fn with_state(mut self, state: WorkerState) -> Self {
        self.state = state;
        self
    }
}

/// Read side of the worker registry
#[async_trait::async_trait]
pub trait WorkerDirectory: Send + Sync {
    /// Look up a worker by name. `Ok(None)` means the worker is not registered.
    async fn get_worker(&self, name: &str) -> anyhow::Result<Option<WorkerRecord>>;
}

#[async_trait::async_trait]
impl<D: WorkerDirectory + ?Sized> WorkerDirectory for std::sync::Arc<D> {
    async fn get_worker(&self, name: &str) -> anyhow::Result<Option<WorkerRecord>> {
        (**self).get_worker(name).await
    }
}
