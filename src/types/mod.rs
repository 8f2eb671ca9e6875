//! Shared types for Gantry

pub mod error;

pub use error::{BackendError, GantryError, Result};
