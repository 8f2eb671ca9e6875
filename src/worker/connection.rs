//! Worker connections
//!
//! A [`Connection`] holds a way of finding its worker, not an address. For
//! directory-backed connections every request resolves the worker's name
//! again, inside the retry loop, so a worker that re-registers at a new
//! address mid-retry is picked up on the next attempt.
//!
//! ## Failure handling per call shape
//!
//! - `send` / `request` / `stream`: network failures are retried under the
//!   connection's [`RetryPolicy`] until its time budget runs out; everything
//!   else is final. Directory lookups count against the same budget.
//! - `hijack`: one resolution, one attempt. Once the upgrade succeeds the
//!   caller owns the stream and any further failure is theirs to handle.

use hyper::StatusCode;
use std::future::Future;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::resolver::AddressResolver;
use super::retry::RetryPolicy;
use super::stream::StreamHandle;
use crate::logging::{TraceEvent, TraceKind, TraceSink};
use crate::transport::routes::{self, RequestSpec};
use crate::transport::{StreamedResponse, Upgrade, WireTransport, WorkerRequest, WorkerResponse};
use crate::types::{BackendError, GantryError, Result};

/// Identity of a worker: its name and, for direct connections, its address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerRef {
    name: String,
    address: Option<String>,
}

impl WorkerRef {
    /// A worker known only by name; its address comes from the directory
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
        }
    }

    /// A worker at a fixed address. The address doubles as its name.
    pub fn direct(address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            name: address.clone(),
            address: Some(address),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The directly-known address, if any
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }
}

/// What one attempt got back from the daemon
enum Answer<T> {
    Accepted(StatusCode, T),
    Rejected(BackendError),
}

/// How a connection finds its worker on each call
#[derive(Clone)]
enum AddressSource {
    Direct(String),
    Directory(AddressResolver),
}

/// Handle to one worker's container daemon
#[derive(Clone)]
pub struct Connection {
    worker: WorkerRef,
    source: AddressSource,
    transport: Arc<dyn WireTransport>,
    policy: RetryPolicy,
    trace: Option<Arc<dyn TraceSink>>,
}

impl Connection {
    pub(crate) fn direct(
        address: String,
        transport: Arc<dyn WireTransport>,
        policy: RetryPolicy,
        trace: Option<Arc<dyn TraceSink>>,
    ) -> Self {
        Self {
            worker: WorkerRef::direct(address.clone()),
            source: AddressSource::Direct(address),
            transport,
            policy,
            trace,
        }
    }

    pub(crate) fn from_directory(
        name: String,
        resolver: AddressResolver,
        transport: Arc<dyn WireTransport>,
        policy: RetryPolicy,
        trace: Option<Arc<dyn TraceSink>>,
    ) -> Self {
        Self {
            worker: WorkerRef::named(name),
            source: AddressSource::Directory(resolver),
            transport,
            policy,
            trace,
        }
    }

    /// The worker this connection talks to
    pub fn worker(&self) -> &WorkerRef {
        &self.worker
    }

    /// Whether each request re-resolves the worker through the directory
    pub fn is_indirect(&self) -> bool {
        matches!(self.source, AddressSource::Directory(_))
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Same worker, different retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn record(&self, event: TraceEvent) {
        if let Some(ref trace) = self.trace {
            trace.record(event);
        }
    }

    fn event(&self, kind: TraceKind) -> TraceEvent {
        TraceEvent::new(kind, self.worker.name())
    }

    /// Where the worker is right now
    async fn current_address(&self) -> Result<String> {
        match self.source {
            AddressSource::Direct(ref address) => Ok(address.clone()),
            AddressSource::Directory(ref resolver) => {
                let resolved = resolver.resolve(self.worker.name()).await;
                match resolved {
                    Ok(ref address) => self.record(self.event(TraceKind::Resolved).with_address(address)),
                    Err(ref e) => self.record(self.event(TraceKind::Failed).with_detail(e.to_string())),
                }
                resolved
            }
        }
    }

    /// Resolve the worker, giving up at `deadline`
    async fn address_before(&self, deadline: Instant) -> Option<Result<String>> {
        tokio::time::timeout_at(deadline, self.current_address()).await.ok()
    }

    fn gave_up(&self, attempts: u32, started: Instant, last: Option<GantryError>) -> GantryError {
        let last = last.unwrap_or_else(|| GantryError::DirectoryUnavailable {
            worker: self.worker.name().to_string(),
            source: anyhow::anyhow!("lookup still pending at deadline"),
        });

        warn!(
            worker = %self.worker.name(),
            attempts,
            error = %last,
            "Giving up on worker request"
        );
        self.record(
            self.event(TraceKind::Failed)
                .with_attempt(attempts)
                .with_detail(format!("timed out: {}", last)),
        );

        GantryError::Timeout {
            worker: self.worker.name().to_string(),
            attempts,
            elapsed: started.elapsed(),
            last: Box::new(last),
        }
    }

    /// The retry loop shared by buffered and streamed requests.
    ///
    /// Each attempt resolves the worker again and runs `dispatch` against the
    /// address; both are bounded by the policy's deadline. Only network
    /// failures are retried.
    async fn with_retries<T, F, Fut>(&self, request: &WorkerRequest, dispatch: F) -> Result<T>
    where
        F: Fn(String, WorkerRequest) -> Fut,
        Fut: Future<Output = Result<Answer<T>>>,
    {
        let started = Instant::now();
        let deadline = self.policy.deadline_from(started);
        let mut attempt: u32 = 1;
        let mut last_failure = None;

        loop {
            let address = match self.address_before(deadline).await {
                Some(resolved) => resolved?,
                None => return Err(self.gave_up(attempt - 1, started, last_failure)),
            };

            debug!(
                worker = %self.worker.name(),
                address = %address,
                attempt,
                method = %request.method,
                path = %request.path,
                "Sending worker request"
            );
            self.record(
                self.event(TraceKind::Dispatched)
                    .with_address(&address)
                    .with_attempt(attempt)
                    .with_detail(format!("{} {}", request.method, request.path)),
            );

            let outcome = match tokio::time::timeout_at(deadline, dispatch(address.clone(), request.clone())).await {
                Ok(outcome) => outcome,
                Err(_) => Err(GantryError::network(&address, "attempt abandoned at deadline")),
            };

            match outcome {
                Ok(Answer::Accepted(status, value)) => {
                    self.record(
                        self.event(TraceKind::Succeeded)
                            .with_address(&address)
                            .with_attempt(attempt)
                            .with_detail(status.to_string()),
                    );
                    return Ok(value);
                }
                Ok(Answer::Rejected(rejection)) => {
                    warn!(
                        worker = %self.worker.name(),
                        address = %address,
                        status = rejection.status,
                        message = %rejection.message,
                        "Worker rejected request"
                    );
                    self.record(
                        self.event(TraceKind::Failed)
                            .with_address(&address)
                            .with_attempt(attempt)
                            .with_detail(rejection.to_string()),
                    );
                    return Err(GantryError::Backend(rejection));
                }
                Err(err) if err.is_retriable() => {
                    let delay = self.policy.delay_for(attempt);
                    let now = Instant::now();
                    let out_of_budget = now >= deadline
                        || now.checked_add(delay).map_or(true, |resume| resume > deadline);

                    if out_of_budget {
                        return Err(self.gave_up(attempt, started, Some(err)));
                    }

                    warn!(
                        worker = %self.worker.name(),
                        address = %address,
                        attempt,
                        delay = ?delay,
                        error = %err,
                        "Worker request failed, retrying"
                    );
                    self.record(
                        self.event(TraceKind::AttemptFailed)
                            .with_address(&address)
                            .with_attempt(attempt)
                            .with_detail(err.to_string()),
                    );
                    self.record(
                        self.event(TraceKind::BackingOff)
                            .with_attempt(attempt)
                            .with_delay(delay),
                    );

                    tokio::time::sleep(delay).await;
                    last_failure = Some(err);
                    attempt += 1;
                }
                Err(err) => {
                    self.record(
                        self.event(TraceKind::Failed)
                            .with_address(&address)
                            .with_attempt(attempt)
                            .with_detail(err.to_string()),
                    );
                    return Err(err);
                }
            }
        }
    }

    /// Send a request, retrying network failures until the policy's budget
    /// runs out.
    ///
    /// Returns the response for a 2xx status. A non-2xx status is decoded into
    /// `GantryError::Backend` without retrying; so are directory failures.
    pub async fn send(&self, request: WorkerRequest) -> Result<WorkerResponse> {
        let transport = &self.transport;
        self.with_retries(&request, move |address, request| async move {
            let response = transport.round_trip(&address, request).await?;
            if response.is_success() {
                Ok(Answer::Accepted(response.status, response))
            } else {
                Ok(Answer::Rejected(BackendError::decode(response.status.as_u16(), &response.body)))
            }
        })
        .await
    }

    /// Build a request from the route table and send it
    pub async fn request(&self, spec: &RequestSpec) -> Result<WorkerResponse> {
        self.send(spec.generate()?).await
    }

    /// Like `request`, but returns as soon as a 2xx status line arrives and
    /// leaves the body to the caller (file streaming in and out of
    /// containers).
    ///
    /// Retries follow the same rules as `send`, up to the point the status is
    /// known. A non-2xx body is read in full and decoded into
    /// `GantryError::Backend`. Reading the returned body is never retried.
    pub async fn stream(&self, spec: &RequestSpec) -> Result<StreamedResponse> {
        let request = spec.generate()?;
        let transport = &self.transport;
        self.with_retries(&request, move |address, request| async move {
            let mut response = transport.open(&address, request).await?;
            if response.status.is_success() {
                return Ok(Answer::Accepted(response.status, response));
            }

            let mut body = Vec::new();
            if let Err(e) = response.body.read_to_end(&mut body).await {
                debug!(address = %address, status = %response.status, error = %e, "Rejection body cut short");
            }
            Ok(Answer::Rejected(BackendError::decode(response.status.as_u16(), &body)))
        })
        .await
    }

    /// Check the daemon answers at all
    pub async fn ping(&self) -> Result<()> {
        self.request(&RequestSpec::new(routes::PING)).await.map(|_| ())
    }

    /// Upgrade a request into a raw duplex stream (exec/attach).
    ///
    /// Resolves once, bounded by the policy's budget, and tries once.
    /// Failures are never retried, whatever the retry policy says.
    pub async fn hijack(&self, spec: &RequestSpec) -> Result<StreamHandle> {
        let request = spec.generate()?;
        let started = Instant::now();
        let address = match self.address_before(self.policy.deadline_from(started)).await {
            Some(resolved) => resolved?,
            None => return Err(self.gave_up(0, started, None)),
        };

        debug!(
            worker = %self.worker.name(),
            address = %address,
            path = %request.path,
            "Hijacking worker connection"
        );
        self.record(
            self.event(TraceKind::Dispatched)
                .with_address(&address)
                .with_detail(format!("{} {} (upgrade)", request.method, request.path)),
        );

        let outcome = self.transport.upgrade(&address, request).await;
        let rejection = match outcome {
            Ok(Upgrade::Switched(stream)) => {
                info!(worker = %self.worker.name(), address = %address, "Hijacked worker connection");
                self.record(self.event(TraceKind::Hijacked).with_address(&address));
                return Ok(StreamHandle::new(
                    self.worker.name().to_string(),
                    address,
                    stream,
                    self.trace.clone(),
                ));
            }
            Ok(Upgrade::Refused(response)) if !response.is_success() => {
                GantryError::Backend(BackendError::decode(response.status.as_u16(), &response.body))
            }
            Ok(Upgrade::Refused(response)) => GantryError::Backend(BackendError {
                status: response.status.as_u16(),
                message: "worker did not switch protocols".to_string(),
                raw: String::from_utf8_lossy(&response.body).into_owned(),
                ..Default::default()
            }),
            Err(err) => err,
        };

        warn!(
            worker = %self.worker.name(),
            address = %address,
            error = %rejection,
            "Hijack failed"
        );
        self.record(
            self.event(TraceKind::Failed)
                .with_address(&address)
                .with_detail(rejection.to_string()),
        );
        Err(rejection)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("worker", &self.worker)
            .field("indirect", &self.is_indirect())
            .field("policy", &self.policy)
            .finish()
    }
}
