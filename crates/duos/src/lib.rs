//! duo relay server: rebroadcasts raw bytes to every connected peer.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// CLI argument parsing and server configuration.
pub mod config;
/// Per-connection read loop and broadcast fan-out.
pub mod connection;
/// Error types for relay server operations.
pub mod error;
/// Prometheus metric helpers.
pub mod metrics;
/// Set of connected peers.
pub mod registry;
/// Accept loop and shared server state.
pub mod server;
/// One-shot relay teardown.
pub mod shutdown;
/// HTTP status endpoint (peer count, health, metrics).
pub mod status;

pub use server::{run, ServerState};
