//! Probe service
//!
//! HTTP surface of the `gantry` binary: liveness, the latest probe result per
//! worker, and a text dump of the connection trace log.

pub mod http;
pub mod probe;

pub use http::{run, serve, AppState};
pub use probe::{probe_worker, spawn_probe_task, ProbeBoard, ProbeResult};
