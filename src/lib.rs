//! Gantry - worker connections for a CI control plane
//!
//! Gantry turns "talk to worker X" into traffic on the right container daemon,
//! even while workers come and go and re-register at new addresses.
//!
//! ## Components
//!
//! - **Directory**: where a worker name becomes an address (in-memory or MongoDB)
//! - **Worker**: resolver, connection factory, retrying connections, hijacked streams
//! - **Transport**: HTTP/1.1 wire transport and the daemon's route table
//! - **Logging**: tracing setup and the bounded connection trace log
//! - **Server**: probe service exposing worker health and connection traces

pub mod config;
pub mod directory;
pub mod logging;
pub mod server;
pub mod transport;
pub mod types;
pub mod worker;

pub use config::Args;
pub use directory::{InMemoryDirectory, MongoDirectory, WorkerDirectory, WorkerRecord};
pub use transport::{
    HttpTransport, RequestSpec, StreamedResponse, WireTransport, WorkerRequest, WorkerResponse,
};
pub use types::{BackendError, GantryError, Result};
pub use worker::{Connection, ConnectionFactory, RetryPolicy, StreamHandle};
