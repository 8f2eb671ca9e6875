//! Worker connections
//!
//! Everything between "talk to worker X" and bytes on the wire:
//!
//! - [`resolver::AddressResolver`]: worker name to current address
//! - [`factory::ConnectionFactory`]: builds direct and directory-backed connections
//! - [`connection::Connection`]: retrying request transport plus hijack
//! - [`retry::RetryPolicy`]: time budget and backoff for retried requests
//! - [`stream::StreamHandle`]: the raw stream a hijack hands back

pub mod connection;
pub mod factory;
pub mod resolver;
pub mod retry;
pub mod stream;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{Connection, WorkerRef};
pub use factory::ConnectionFactory;
pub use resolver::AddressResolver;
pub use retry::{
    BackoffStrategy, ConstantBackoff, ExponentialBackoff, Jittered, LinearBackoff, RetryPolicy,
    DEFAULT_WORKER_TIMEOUT,
};
pub use stream::StreamHandle;
