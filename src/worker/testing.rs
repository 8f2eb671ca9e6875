//! Scripted wire transport for connection tests

use bytes::Bytes;
use hyper::StatusCode;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::transport::{
    DuplexStream, StreamedResponse, Upgrade, WireTransport, WorkerRequest, WorkerResponse,
};
use crate::types::{GantryError, Result};

/// What the transport does for the next call
pub(crate) enum Step {
    /// Complete the exchange with this status and body
    Respond(u16, Bytes),
    /// Fail at the network level
    Fail(&'static str),
    /// Never complete
    Hang,
    /// Switch protocols onto this stream (upgrade), or serve it as the
    /// body (open)
    Switch(Box<dyn DuplexStream>),
}

/// Plays back a script of steps; once the script runs out every call
/// answers `200 {}`.
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    dispatched: Mutex<Vec<(String, WorkerRequest)>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            dispatched: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn push(&self, step: Step) -> &Self {
        self.script.lock().unwrap().push_back(step);
        self
    }

    pub(crate) fn respond(&self, status: u16, body: &'static str) -> &Self {
        self.push(Step::Respond(status, Bytes::from_static(body.as_bytes())))
    }

    pub(crate) fn fail_times(&self, times: usize) -> &Self {
        for _ in 0..times {
            self.push(Step::Fail("connection refused"));
        }
        self
    }

    /// Addresses of every call that reached the transport, in order
    pub(crate) fn addresses(&self) -> Vec<String> {
        self.dispatched
            .lock()
            .unwrap()
            .iter()
            .map(|(address, _)| address.clone())
            .collect()
    }

    pub(crate) fn requests(&self) -> Vec<WorkerRequest> {
        self.dispatched
            .lock()
            .unwrap()
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }

    pub(crate) fn dispatch_count(&self) -> usize {
        self.dispatched.lock().unwrap().len()
    }

    fn next(&self, address: &str, request: WorkerRequest) -> Option<Step> {
        self.dispatched
            .lock()
            .unwrap()
            .push((address.to_string(), request));
        self.script.lock().unwrap().pop_front()
    }
}

fn response(status: u16, body: Bytes) -> WorkerResponse {
    WorkerResponse::new(StatusCode::from_u16(status).unwrap(), body)
}

#[async_trait::async_trait]
impl WireTransport for ScriptedTransport {
    async fn round_trip(&self, address: &str, request: WorkerRequest) -> Result<WorkerResponse> {
        match self.next(address, request) {
            None => Ok(response(200, Bytes::from_static(b"{}"))),
            Some(Step::Respond(status, body)) => Ok(response(status, body)),
            Some(Step::Fail(message)) => Err(GantryError::network(address, message)),
            Some(Step::Hang) => std::future::pending().await,
            Some(Step::Switch(_)) => panic!("scripted a stream for a plain round trip"),
        }
    }

    async fn open(&self, address: &str, request: WorkerRequest) -> Result<StreamedResponse> {
        let streamed = |status: u16, body: Box<dyn tokio::io::AsyncRead + Send + Unpin>| StreamedResponse {
            status: StatusCode::from_u16(status).unwrap(),
            headers: Default::default(),
            body,
        };

        match self.next(address, request) {
            None => Ok(streamed(200, Box::new(std::io::Cursor::new(Bytes::new())))),
            Some(Step::Respond(status, body)) => Ok(streamed(status, Box::new(std::io::Cursor::new(body)))),
            Some(Step::Fail(message)) => Err(GantryError::network(address, message)),
            Some(Step::Hang) => std::future::pending().await,
            Some(Step::Switch(stream)) => Ok(streamed(200, Box::new(stream))),
        }
    }

    async fn upgrade(&self, address: &str, request: WorkerRequest) -> Result<Upgrade> {
        match self.next(address, request) {
            None => Ok(Upgrade::Refused(response(200, Bytes::new()))),
            Some(Step::Respond(status, body)) => Ok(Upgrade::Refused(response(status, body))),
            Some(Step::Fail(message)) => Err(GantryError::network(address, message)),
            Some(Step::Hang) => std::future::pending().await,
            Some(Step::Switch(stream)) => Ok(Upgrade::Switched(stream)),
        }
    }
}
