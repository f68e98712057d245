//! Core building blocks shared across the Riptide server crates.
//!
//! This crate provides the server-wide configuration, the common error
//! taxonomy, and the connection-identity record that requests hold a
//! non-owning reference to.

mod config;
mod conn_state;
mod error;

pub use config::{
    DEFAULT_BACKLOG, DEFAULT_DECOMPRESS_LIMIT, DEFAULT_SPILL_THRESHOLD, ServerConfig,
};
pub use conn_state::{ConnRef, ConnState};
pub use error::{CoreError, CoreResult};
