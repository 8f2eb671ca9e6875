//! In-memory worker directory
//!
//! Backs static `WORKERS=name=addr,...` configuration in dev mode and every
//! test that needs a directory. Uses DashMap so concurrent resolutions never
//! contend with a re-registration writing a new address.

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

use super::{WorkerDirectory, WorkerRecord};
use crate::types::{GantryError, Result};

/// Worker directory held entirely in memory
#[derive(Default)]
pub struct InMemoryDirectory {
    /// worker name → current record
    workers: DashMap<String, WorkerRecord>,
    /// Number of lookups served
    lookups: AtomicUsize,
}

impl InMemoryDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a static worker list: `name=host:port` pairs separated by commas
    pub fn from_static_list(list: &str) -> Result<Self> {
        let directory = Self::new();

        for pair in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (name, address) = pair.split_once('=').ok_or_else(|| {
                GantryError::Config(format!("expected name=host:port, got '{}'", pair))
            })?;

            let (name, address) = (name.trim(), address.trim());
            if name.is_empty() || address.is_empty() {
                return Err(GantryError::Config(format!(
                    "empty worker name or address in '{}'",
                    pair
                )));
            }

            directory.register(WorkerRecord::new(name, address));
        }

        Ok(directory)
    }

    /// Register a worker, replacing any previous record with the same name
    pub fn register(&self, record: WorkerRecord) {
        info!(
            worker = %record.name,
            address = %record.address,
            state = %record.state,
            "Registered worker"
        );
        self.workers.insert(record.name.clone(), record);
    }

    /// Move a registered worker to a new address. Returns false if unknown.
    pub fn set_address(&self, name: &str, address: &str) -> bool {
        match self.workers.get_mut(name) {
            Some(mut record) => {
                info!(worker = %name, from = %record.address, to = %address, "Worker re-registered");
                record.address = address.to_string();
                true
            }
            None => false,
        }
    }

    /// Remove a worker. Returns the removed record, if any.
    pub fn remove(&self, name: &str) -> Option<WorkerRecord> {
        self.workers.remove(name).map(|(_, record)| record)
    }

    /// Names of all registered workers
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of registered workers
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Total lookups served so far
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl WorkerDirectory for InMemoryDirectory {
    async fn get_worker(&self, name: &str) -> anyhow::Result<Option<WorkerRecord>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self.workers.get(name).map(|r| r.value().clone()))
    }
}
