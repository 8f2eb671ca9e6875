//! Wire transport to worker container daemons
//!
//! The [`WireTransport`] trait is the network seam: it takes an already
//! resolved address and a request, and either performs one request/response
//! exchange or one upgrade handshake. It never retries and never resolves
//! names; both belong to [`crate::worker::Connection`].
//!
//! - [`http::HttpTransport`]: HTTP/1.1 over a fresh TCP connection per call;
//!   bodies are either buffered ([`WorkerResponse`]) or streamed
//!   ([`StreamedResponse`])
//! - [`routes`]: the daemon's route table, turning handler ids into requests

pub mod http;
pub mod routes;

use bytes::Bytes;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{HeaderMap, Method, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::types::{GantryError, Result};

pub use http::HttpTransport;
pub use routes::{RequestSpec, Route, ROUTES};

/// A request to a worker daemon, independent of which address it goes to.
///
/// Cheap to clone: the body is reference counted, so every retry attempt
/// dispatches the identical request.
#[derive(Debug, Clone)]
pub struct WorkerRequest {
    pub method: Method,
    /// Path and query, e.g. `/containers/abc/processes?tty=true`
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl WorkerRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// GET request for a path
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Attach a body with its content type
    pub fn with_body(mut self, content_type: &str, body: impl Into<Bytes>) -> Result<Self> {
        let value = HeaderValue::from_str(content_type)
            .map_err(|e| GantryError::InvalidRequest(format!("content type: {}", e)))?;
        self.headers.insert(CONTENT_TYPE, value);
        self.body = body.into();
        Ok(self)
    }

    /// Set a header, replacing any previous value
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// Response from a worker daemon, fully buffered
#[derive(Debug, Clone)]
pub struct WorkerResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl WorkerResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// 2xx status
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Body bytes read as they arrive from the daemon
pub type ResponseBody = Box<dyn AsyncRead + Send + Unpin>;

/// Response whose body has not been read yet (file streaming in and out of
/// containers). Dropping it closes the underlying connection.
pub struct StreamedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl std::fmt::Debug for StreamedResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamedResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Raw duplex byte stream left behind by a successful upgrade
pub trait DuplexStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> DuplexStream for T {}

/// Outcome of an upgrade handshake that reached the daemon
pub enum Upgrade {
    /// The daemon switched protocols; the connection is now a raw stream
    Switched(Box<dyn DuplexStream>),
    /// The daemon answered without switching protocols
    Refused(WorkerResponse),
}

/// One network exchange with a worker daemon at a known address
#[async_trait::async_trait]
pub trait WireTransport: Send + Sync {
    /// Perform a single request/response exchange.
    ///
    /// Connect and transport failures come back as `GantryError::NetworkFailure`.
    /// Any status code, including non-2xx, is a successful exchange.
    async fn round_trip(&self, address: &str, request: WorkerRequest) -> Result<WorkerResponse>;

    /// Like `round_trip`, but hand back the body unread once the status
    /// line and headers have arrived
    async fn open(&self, address: &str, request: WorkerRequest) -> Result<StreamedResponse>;

    /// Send the request and ask the daemon to switch to a raw stream
    async fn upgrade(&self, address: &str, request: WorkerRequest) -> Result<Upgrade>;
}

#[async_trait::async_trait]
impl<T: WireTransport + ?Sized> WireTransport for std::sync::Arc<T> {
    async fn round_trip(&self, address: &str, request: WorkerRequest) -> Result<WorkerResponse> {
        (**self).round_trip(address, request).await
    }

    async fn open(&self, address: &str, request: WorkerRequest) -> Result<StreamedResponse> {
        (**self).open(address, request).await
    }

    async fn upgrade(&self, address: &str, request: WorkerRequest) -> Result<Upgrade> {
        (**self).upgrade(address, request).await
    }
}
