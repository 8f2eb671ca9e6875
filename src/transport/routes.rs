//! Container daemon route table
//!
//! Callers name a daemon endpoint by handler id ("Run", "Attach", ...) and
//! supply path parameters, query parameters and an optional body. The table
//! below turns that into a concrete [`WorkerRequest`]; the address is filled
//! in later, per attempt, by the connection.

use bytes::Bytes;
use hyper::Method;

use super::WorkerRequest;
use crate::types::{GantryError, Result};

/// One daemon endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub handler: &'static str,
    pub method: Method,
    /// Path template with `:name` segments
    pub path: &'static str,
}

const fn route(handler: &'static str, method: Method, path: &'static str) -> Route {
    Route {
        handler,
        method,
        path,
    }
}

pub const PING: &str = "Ping";
pub const CAPACITY: &str = "Capacity";
pub const CREATE: &str = "Create";
pub const LIST: &str = "List";
pub const DESTROY: &str = "Destroy";
pub const INFO: &str = "Info";
pub const BULK_INFO: &str = "BulkInfo";
pub const STOP: &str = "Stop";
pub const STREAM_IN: &str = "StreamIn";
pub const STREAM_OUT: &str = "StreamOut";
pub const RUN: &str = "Run";
pub const ATTACH: &str = "Attach";
pub const PROPERTIES: &str = "Properties";
pub const PROPERTY: &str = "Property";
pub const SET_PROPERTY: &str = "SetProperty";
pub const REMOVE_PROPERTY: &str = "RemoveProperty";
pub const SET_GRACE_TIME: &str = "SetGraceTime";
pub const METRICS: &str = "Metrics";
pub const NET_IN: &str = "NetIn";
pub const NET_OUT: &str = "NetOut";

/// Every endpoint the container daemon exposes
pub static ROUTES: &[Route] = &[
    route(PING, Method::GET, "/ping"),
    route(CAPACITY, Method::GET, "/capacity"),
    route(CREATE, Method::POST, "/containers"),
    route(LIST, Method::GET, "/containers"),
    route(BULK_INFO, Method::GET, "/containers/bulk_info"),
    route(DESTROY, Method::DELETE, "/containers/:handle"),
    route(INFO, Method::GET, "/containers/:handle/info"),
    route(STOP, Method::PUT, "/containers/:handle/stop"),
    route(STREAM_IN, Method::PUT, "/containers/:handle/files"),
    route(STREAM_OUT, Method::GET, "/containers/:handle/files"),
    route(RUN, Method::POST, "/containers/:handle/processes"),
    route(ATTACH, Method::GET, "/containers/:handle/processes/:pid"),
    route(PROPERTIES, Method::GET, "/containers/:handle/properties"),
    route(PROPERTY, Method::GET, "/containers/:handle/properties/:key"),
    route(SET_PROPERTY, Method::PUT, "/containers/:handle/properties/:key"),
    route(REMOVE_PROPERTY, Method::DELETE, "/containers/:handle/properties/:key"),
    route(SET_GRACE_TIME, Method::PUT, "/containers/:handle/grace_time"),
    route(METRICS, Method::GET, "/containers/:handle/metrics"),
    route(NET_IN, Method::POST, "/containers/:handle/net/in"),
    route(NET_OUT, Method::POST, "/containers/:handle/net/out"),
];

impl Route {
    /// Look up a route by handler id
    pub fn find(handler: &str) -> Option<&'static Route> {
        ROUTES.iter().find(|r| r.handler == handler)
    }
}

/// What a caller wants from the daemon, before it becomes a request
#[derive(Debug, Clone, Default)]
pub struct RequestSpec {
    pub handler: String,
    pub params: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub content_type: Option<String>,
}

impl RequestSpec {
    pub fn new(handler: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            ..Default::default()
        }
    }

    /// Add a path parameter
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Add a query parameter
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Attach a body and its content type
    pub fn body(mut self, content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        self.content_type = Some(content_type.into());
        self.body = Some(body.into());
        self
    }

    /// Attach a JSON body
    pub fn json<T: serde::Serialize>(self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)
            .map_err(|e| GantryError::InvalidRequest(format!("JSON body: {}", e)))?;
        Ok(self.body("application/json", body))
    }

    fn param_value(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Build the request this spec describes
    pub fn generate(&self) -> Result<WorkerRequest> {
        let route = Route::find(&self.handler)
            .ok_or_else(|| GantryError::InvalidRequest(format!("unknown handler '{}'", self.handler)))?;

        let mut path = String::with_capacity(route.path.len() + 32);
        for segment in route.path.split('/').skip(1) {
            path.push('/');
            match segment.strip_prefix(':') {
                Some(name) => {
                    let value = self.param_value(name).ok_or_else(|| {
                        GantryError::InvalidRequest(format!(
                            "handler '{}' needs path parameter '{}'",
                            self.handler, name
                        ))
                    })?;
                    path.push_str(&urlencoding::encode(value));
                }
                None => path.push_str(segment),
            }
        }

        if !self.query.is_empty() {
            let encoded = serde_urlencoded::to_string(&self.query)
                .map_err(|e| GantryError::InvalidRequest(format!("query: {}", e)))?;
            path.push('?');
            path.push_str(&encoded);
        }

        let mut request = WorkerRequest::new(route.method.clone(), path);
        match (&self.content_type, &self.body) {
            (Some(content_type), body) => {
                request = request.with_body(content_type, body.clone().unwrap_or_default())?;
            }
            (None, Some(body)) => request.body = body.clone(),
            (None, None) => {}
        }

        Ok(request)
    }
}
