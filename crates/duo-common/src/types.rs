//! Protocol defaults for the duo relay.
//!
//! The wire protocol has no framing: whatever bytes a peer writes are what
//! every peer reads back. These constants are the only contract.

/// Default address of the relay's raw TCP listener.
pub const DEFAULT_RELAY_ADDR: &str = "127.0.0.1:7777";

/// Default address of the HTTP status listener.
pub const DEFAULT_STATUS_ADDR: &str = "0.0.0.0:9999";

/// Path that answers with the number of connected peers.
pub const COUNT_PATH: &str = "/count";

/// Token that shuts the relay down when sent as a whole payload.
pub const DEFAULT_CONTROL_PHRASE: &str = "CATASTROPHE";

/// Upper bound on a single read (1 MiB). Bigger messages are relayed in chunks.
pub const DEFAULT_READ_BUFFER: usize = 1024 * 1024;
