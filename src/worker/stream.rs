//! Hijacked stream handle
//!
//! Once a connection has been upgraded the caller owns the raw byte stream
//! outright: nothing in the transport keeps a reference, retries it, or
//! re-resolves the worker. Bytes pass through unmodified.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tracing::debug;

use crate::logging::{TraceEvent, TraceKind, TraceSink};
use crate::transport::DuplexStream;

/// Live duplex byte stream to a worker process (exec/attach)
pub struct StreamHandle {
    worker: String,
    address: String,
    inner: Option<Box<dyn DuplexStream>>,
    /// Write side already shut down through `AsyncWrite::poll_shutdown`
    shut_down: bool,
    trace: Option<Arc<dyn TraceSink>>,
}

impl StreamHandle {
    pub(crate) fn new(
        worker: String,
        address: String,
        inner: Box<dyn DuplexStream>,
        trace: Option<Arc<dyn TraceSink>>,
    ) -> Self {
        Self {
            worker,
            address,
            inner: Some(inner),
            shut_down: false,
            trace,
        }
    }

    /// Worker this stream is attached to
    pub fn worker(&self) -> &str {
        &self.worker
    }

    /// Address the stream was opened against
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Shut down and release the underlying connection.
    ///
    /// Only the first call touches the connection; later calls return `Ok(())`.
    /// A write side already shut down is not shut down again.
    pub async fn close(&mut self) -> io::Result<()> {
        let Some(mut inner) = self.inner.take() else {
            return Ok(());
        };

        let result = if self.shut_down {
            Ok(())
        } else {
            inner.shutdown().await
        };
        self.shut_down = true;
        drop(inner);

        debug!(worker = %self.worker, address = %self.address, "Hijacked stream closed");
        if let Some(ref trace) = self.trace {
            let mut event = TraceEvent::new(TraceKind::Closed, &self.worker).with_address(&self.address);
            if let Err(ref e) = result {
                event = event.with_detail(format!("shutdown error: {}", e));
            }
            trace.record(event);
        }

        result
    }

    fn closed_error() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, "hijacked stream already closed")
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("worker", &self.worker)
            .field("address", &self.address)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl AsyncRead for StreamHandle {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.inner.as_mut() {
            Some(inner) => Pin::new(inner).poll_read(cx, buf),
            None => Poll::Ready(Err(Self::closed_error())),
        }
    }
}

impl AsyncWrite for StreamHandle {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.inner.as_mut() {
            Some(inner) => Pin::new(inner).poll_write(cx, buf),
            None => Poll::Ready(Err(Self::closed_error())),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.inner.as_mut() {
            Some(inner) => Pin::new(inner).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.shut_down {
            return Poll::Ready(Ok(()));
        }
        match this.inner.as_mut() {
            Some(inner) => {
                let result = ready!(Pin::new(inner).poll_shutdown(cx));
                this.shut_down = true;
                Poll::Ready(result)
            }
            None => Poll::Ready(Ok(())),
        }
    }
}
