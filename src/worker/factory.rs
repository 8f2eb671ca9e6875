//! Connection factory
//!
//! Builds [`Connection`]s either to a fixed address or to a worker named in
//! the directory. The factory itself is stateless apart from the shared
//! resolver, wire transport, retry policy and optional trace sink.

use std::sync::Arc;
use tracing::debug;

use super::connection::Connection;
use super::resolver::AddressResolver;
use super::retry::RetryPolicy;
use crate::directory::WorkerDirectory;
use crate::logging::TraceSink;
use crate::transport::{HttpTransport, WireTransport};
use crate::types::Result;

/// Builds connections to worker container daemons
#[derive(Clone)]
pub struct ConnectionFactory {
    resolver: AddressResolver,
    transport: Arc<dyn WireTransport>,
    policy: RetryPolicy,
    trace: Option<Arc<dyn TraceSink>>,
}

impl ConnectionFactory {
    pub fn new(
        directory: Arc<dyn WorkerDirectory>,
        transport: Arc<dyn WireTransport>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            resolver: AddressResolver::new(directory),
            transport,
            policy,
            trace: None,
        }
    }

    /// HTTP transport and the default one-hour exponential policy
    pub fn with_http(directory: Arc<dyn WorkerDirectory>) -> Self {
        Self::new(directory, Arc::new(HttpTransport::new()), RetryPolicy::default())
    }

    /// Record connection events into a trace sink
    pub fn with_trace(mut self, trace: Arc<dyn TraceSink>) -> Self {
        self.trace = Some(trace);
        self
    }

    /// A factory sharing everything but the retry policy
    pub fn with_retry_policy(&self, policy: RetryPolicy) -> Self {
        Self {
            policy,
            ..self.clone()
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn resolver(&self) -> &AddressResolver {
        &self.resolver
    }

    /// Connection to a daemon at a fixed, already trusted address
    pub fn build_connection(&self, address: impl Into<String>) -> Connection {
        Connection::direct(
            address.into(),
            Arc::clone(&self.transport),
            self.policy.clone(),
            self.trace.clone(),
        )
    }

    /// Connection to a worker by name.
    ///
    /// Resolves once now so an unknown worker fails fast, but the address
    /// found here is not kept: every request on the returned connection
    /// resolves again.
    pub async fn build_connection_from_directory(&self, name: &str) -> Result<Connection> {
        let address = self.resolver.resolve(name).await?;
        debug!(worker = %name, address = %address, "Validated worker for connection");

        Ok(Connection::from_directory(
            name.to_string(),
            self.resolver.clone(),
            Arc::clone(&self.transport),
            self.policy.clone(),
            self.trace.clone(),
        ))
    }
}
