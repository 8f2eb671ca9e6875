//! HTTP/1.1 wire transport
//!
//! Every call dials a fresh TCP connection to the resolved address; there is
//! no keep-alive and no pooling, so a worker that moved never receives traffic
//! over a connection opened to its old address. Upgrades use hyper's
//! `with_upgrades` connection driver and hand back the raw upgraded IO.

use bytes::{Bytes, BytesMut};
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Incoming};
use hyper::client::conn::http1;
use hyper::header::{HeaderValue, CONNECTION, HOST, UPGRADE};
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::net::TcpStream;
use tracing::debug;

use super::{StreamedResponse, Upgrade, WireTransport, WorkerRequest, WorkerResponse};
use crate::types::{GantryError, Result};

/// Protocol token sent in the `Upgrade` header for hijacked streams
pub const HIJACK_PROTOCOL: &str = "tcp";

/// Default bound on establishing the TCP connection
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP/1.1 transport, one TCP connection per call
#[derive(Debug, Clone)]
pub struct HttpTransport {
    connect_timeout: Duration,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the TCP connect timeout
    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn dial(&self, address: &str) -> Result<TokioIo<TcpStream>> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| GantryError::network(address, "connect timed out"))?
            .map_err(|e| GantryError::network(address, format!("connect failed: {}", e)))?;

        // Interactive streams are latency sensitive
        let _ = stream.set_nodelay(true);

        Ok(TokioIo::new(stream))
    }

    /// Dial, drive the connection in the background and send one request.
    /// Resolves once the status line and headers are in.
    async fn exchange(
        &self,
        address: &str,
        http_request: Request<Full<Bytes>>,
        upgrades: bool,
    ) -> Result<Response<Incoming>> {
        let io = self.dial(address).await?;

        let (mut sender, conn) = http1::handshake(io)
            .await
            .map_err(|e| GantryError::network(address, format!("handshake failed: {}", e)))?;

        let conn_address = address.to_string();
        tokio::spawn(async move {
            let ended = if upgrades {
                conn.with_upgrades().await
            } else {
                conn.await
            };
            if let Err(e) = ended {
                debug!(address = %conn_address, error = %e, "Worker connection ended with error");
            }
        });

        debug!(address = %address, method = %http_request.method(), path = %http_request.uri(), "Dispatching request");

        sender
            .send_request(http_request)
            .await
            .map_err(|e| GantryError::network(address, format!("request failed: {}", e)))
    }
}

/// Build the hyper request for an address: origin-form URI plus Host header
fn to_http(address: &str, request: WorkerRequest) -> Result<Request<Full<Bytes>>> {
    let mut builder = Request::builder()
        .method(request.method)
        .uri(request.path.as_str());

    if let Some(headers) = builder.headers_mut() {
        *headers = request.headers;
        let host = HeaderValue::from_str(address)
            .map_err(|e| GantryError::InvalidRequest(format!("bad worker address '{}': {}", address, e)))?;
        headers.insert(HOST, host);
    }

    builder
        .body(Full::new(request.body))
        .map_err(|e| GantryError::InvalidRequest(format!("Failed to build request: {}", e)))
}

/// Buffer a whole response body.
///
/// A 2xx body cut short is a network failure. A rejection body cut short is
/// kept as far as it got: the status already settles the outcome.
async fn collect(address: &str, response: Response<Incoming>) -> Result<WorkerResponse> {
    let (parts, mut body) = response.into_parts();
    let mut buf = BytesMut::new();

    while let Some(frame) = body.frame().await {
        match frame {
            Ok(frame) => {
                if let Some(data) = frame.data_ref() {
                    buf.extend_from_slice(data);
                }
            }
            Err(e) if parts.status.is_success() => {
                return Err(GantryError::network(address, format!("reading response body: {}", e)));
            }
            Err(e) => {
                debug!(address = %address, status = %parts.status, error = %e, "Rejection body cut short");
                break;
            }
        }
    }

    Ok(WorkerResponse {
        status: parts.status,
        headers: parts.headers,
        body: buf.freeze(),
    })
}

/// `AsyncRead` over a response body, one data frame at a time
struct IncomingReader {
    address: String,
    body: Incoming,
    chunk: Bytes,
    done: bool,
}

impl IncomingReader {
    fn new(address: &str, body: Incoming) -> Self {
        Self {
            address: address.to_string(),
            body,
            chunk: Bytes::new(),
            done: false,
        }
    }
}

impl AsyncRead for IncomingReader {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if !this.chunk.is_empty() {
                let n = this.chunk.len().min(buf.remaining());
                buf.put_slice(&this.chunk.split_to(n));
                return Poll::Ready(Ok(()));
            }
            if this.done {
                return Poll::Ready(Ok(()));
            }

            match ready!(Pin::new(&mut this.body).poll_frame(cx)) {
                Some(Ok(frame)) => {
                    // Trailers carry nothing for the reader
                    if let Ok(data) = frame.into_data() {
                        this.chunk = data;
                    }
                }
                Some(Err(e)) => {
                    this.done = true;
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::Other,
                        format!("reading body from {}: {}", this.address, e),
                    )));
                }
                None => this.done = true,
            }
        }
    }
}

#[async_trait::async_trait]
impl WireTransport for HttpTransport {
    async fn round_trip(&self, address: &str, request: WorkerRequest) -> Result<WorkerResponse> {
        let http_request = to_http(address, request)?;
        let response = self.exchange(address, http_request, false).await?;
        collect(address, response).await
    }

    async fn open(&self, address: &str, request: WorkerRequest) -> Result<StreamedResponse> {
        let http_request = to_http(address, request)?;
        let response = self.exchange(address, http_request, false).await?;

        let (parts, body) = response.into_parts();
        Ok(StreamedResponse {
            status: parts.status,
            headers: parts.headers,
            body: Box::new(IncomingReader::new(address, body)),
        })
    }

    async fn upgrade(&self, address: &str, request: WorkerRequest) -> Result<Upgrade> {
        let mut http_request = to_http(address, request)?;
        http_request
            .headers_mut()
            .insert(CONNECTION, HeaderValue::from_static("Upgrade"));
        http_request
            .headers_mut()
            .insert(UPGRADE, HeaderValue::from_static(HIJACK_PROTOCOL));

        let response = self.exchange(address, http_request, true).await?;

        if response.status() != StatusCode::SWITCHING_PROTOCOLS {
            return Ok(Upgrade::Refused(collect(address, response).await?));
        }

        let upgraded = hyper::upgrade::on(response)
            .await
            .map_err(|e| GantryError::network(address, format!("upgrade failed: {}", e)))?;

        debug!(address = %address, "Connection upgraded to raw stream");
        Ok(Upgrade::Switched(Box::new(TokioIo::new(upgraded))))
    }
}
