//! Worker name → address resolution
//!
//! One directory lookup per call. No caching: the directory is the only
//! source of truth for where a worker lives right now.

use std::sync::Arc;
use tracing::debug;

use crate::directory::WorkerDirectory;
use crate::types::{GantryError, Result};

/// Resolves worker names through the directory
#[derive(Clone)]
pub struct AddressResolver {
    directory: Arc<dyn WorkerDirectory>,
}

impl AddressResolver {
    pub fn new(directory: Arc<dyn WorkerDirectory>) -> Self {
        Self { directory }
    }

    /// Current address of a worker.
    ///
    /// Unknown workers fail with `WorkerNotFound`; a failing lookup fails with
    /// `DirectoryUnavailable` carrying the directory's error.
    pub async fn resolve(&self, name: &str) -> Result<String> {
        let record = self
            .directory
            .get_worker(name)
            .await
            .map_err(|source| GantryError::DirectoryUnavailable {
                worker: name.to_string(),
                source,
            })?
            .ok_or_else(|| GantryError::WorkerNotFound(name.to_string()))?;

        debug!(worker = %name, address = %record.address, state = %record.state, "Resolved worker");
        Ok(record.address)
    }
}
