//! MongoDB-backed worker directory
//!
//! Reads the `workers` collection maintained by worker registration. Each
//! lookup is a single `find_one` on the unique `name` index; nothing is cached
//! here, so a worker that re-registers at a new address is visible to the
//! very next lookup.

use bson::{doc, oid::ObjectId, DateTime, Document};
use chrono::Utc;
use mongodb::{options::IndexOptions, Client, Collection, IndexModel};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{WorkerDirectory, WorkerRecord, WorkerState};
use crate::types::{GantryError, Result};

/// Collection name for workers
pub const WORKER_COLLECTION: &str = "workers";

/// Worker document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct WorkerDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Unique worker name
    pub name: String,

    /// Container daemon address (host:port)
    pub address: String,

    #[serde(default)]
    pub state: WorkerState,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub registered_at: Option<DateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,

    #[serde(default)]
    pub active_containers: i32,
}

impl WorkerDoc {
    /// Index definitions applied when the directory is opened
    pub fn indexes() -> Vec<(Document, IndexOptions)> {
        vec![
            (
                doc! { "name": 1 },
                IndexOptions::builder()
                    .unique(true)
                    .name("name_unique".to_string())
                    .build(),
            ),
            (
                doc! { "state": 1 },
                IndexOptions::builder()
                    .name("state_index".to_string())
                    .build(),
            ),
        ]
    }
}

impl From<WorkerDoc> for WorkerRecord {
    fn from(doc: WorkerDoc) -> Self {
        Self {
            name: doc.name,
            address: doc.address,
            state: doc.state,
            registered_at: doc
                .registered_at
                .map(|dt| dt.to_chrono())
                .unwrap_or_else(Utc::now),
            platform: doc.platform,
            tags: doc.tags,
            team: doc.team,
            active_containers: doc.active_containers.max(0) as u32,
        }
    }
}

/// The URI with any `user:password@` credentials masked, for logging
pub fn redact_uri(uri: &str) -> String {
    let (scheme, rest) = match uri.find("://") {
        Some(i) => uri.split_at(i + 3),
        None => ("", uri),
    };
    let authority_end = rest.find(['/', '?']).unwrap_or(rest.len());

    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{}***{}", scheme, &rest[at..]),
        None => uri.to_string(),
    }
}

/// Worker directory backed by MongoDB
#[derive(Clone)]
pub struct MongoDirectory {
    collection: Collection<WorkerDoc>,
}

impl MongoDirectory {
    /// Connect to MongoDB and open the workers collection
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB at {}", redact_uri(uri));

        // Bound server selection so an unreachable store fails fast at startup
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| GantryError::Config(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| GantryError::Config(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        let directory = Self::from_collection(
            client
                .database(db_name)
                .collection::<WorkerDoc>(WORKER_COLLECTION),
        );
        directory.apply_indexes().await?;

        Ok(directory)
    }

    /// Wrap an already-open collection
    pub fn from_collection(collection: Collection<WorkerDoc>) -> Self {
        Self { collection }
    }

    async fn apply_indexes(&self) -> Result<()> {
        let models: Vec<IndexModel> = WorkerDoc::indexes()
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.collection
            .create_indexes(models)
            .await
            .map_err(|e| GantryError::Config(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl WorkerDirectory for MongoDirectory {
    async fn get_worker(&self, name: &str) -> anyhow::Result<Option<WorkerRecord>> {
        let found = self.collection.find_one(doc! { "name": name }).await?;
        debug!(worker = %name, found = found.is_some(), "Directory lookup");
        Ok(found.map(WorkerRecord::from))
    }
}
