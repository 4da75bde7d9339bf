use clap::Parser;
use duo_common::types::{
    DEFAULT_CONTROL_PHRASE, DEFAULT_READ_BUFFER, DEFAULT_RELAY_ADDR, DEFAULT_STATUS_ADDR,
};
use duo_common::{ClassifyError, ControlPhrase, SniffingClassifier};
use std::net::SocketAddr;
use std::time::Duration;

/// Largest read buffer accepted on the command line (64 MiB).
const MAX_READ_BUFFER: usize = 64 * 1024 * 1024;

/// CLI arguments for the relay server.
#[derive(Parser, Debug, Clone)]
#[command(name = "duos")]
#[command(about = "duo relay server")]
#[command(version)]
pub struct Args {
    /// Socket address for the raw TCP relay.
    #[arg(long, default_value = DEFAULT_RELAY_ADDR, env = "DUOS_LISTEN")]
    pub listen: SocketAddr,
    /// Socket address for the HTTP status endpoint.
    #[arg(long, default_value = DEFAULT_STATUS_ADDR, env = "DUOS_STATUS")]
    pub status_addr: SocketAddr,
    /// Maximum number of concurrently connected peers.
    #[arg(long, default_value = "64", env = "DUOS_MAX_CONNS")]
    pub max_conns: usize,
    /// Size of the per-connection read buffer in bytes.
    #[arg(long, default_value_t = DEFAULT_READ_BUFFER, env = "DUOS_READ_BUFFER")]
    pub read_buffer: usize,
    /// Token that shuts the relay down when a peer sends it.
    #[arg(long, default_value = DEFAULT_CONTROL_PHRASE, env = "DUOS_CONTROL_PHRASE")]
    pub control_phrase: String,
    /// Seconds to wait for connection tasks to finish during shutdown.
    #[arg(long, default_value = "5", env = "DUOS_DRAIN_TIMEOUT")]
    pub drain_timeout: u64,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the raw TCP relay.
    pub listen: SocketAddr,
    /// Socket address for the HTTP status endpoint.
    pub status_addr: SocketAddr,
    /// Maximum number of concurrently connected peers.
    pub max_conns: usize,
    /// Size of the per-connection read buffer in bytes.
    pub read_buffer: usize,
    /// Token that shuts the relay down when a peer sends it.
    pub control_phrase: String,
    /// Seconds to wait for connection tasks to finish during shutdown.
    pub drain_timeout: u64,
}

impl ServerConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if self.listen == self.status_addr {
            return Err("listen and status_addr must differ".to_string());
        }

        if self.max_conns == 0 {
            return Err("max_conns must be greater than 0".to_string());
        }
        if self.max_conns > 10_000 {
            return Err("max_conns exceeds reasonable limit (10,000)".to_string());
        }

        if self.read_buffer == 0 {
            return Err("read_buffer must be greater than 0".to_string());
        }
        if self.read_buffer > MAX_READ_BUFFER {
            return Err(format!(
                "read_buffer exceeds maximum allowed ({} bytes)",
                MAX_READ_BUFFER
            ));
        }

        if let Err(e) = ControlPhrase::new(&self.control_phrase) {
            return Err(format!("control_phrase: {e}"));
        }

        if self.drain_timeout == 0 {
            return Err("drain_timeout must be greater than 0".to_string());
        }
        if self.drain_timeout > 300 {
            return Err("drain_timeout exceeds reasonable limit (300 seconds)".to_string());
        }
        Ok(())
    }

    /// Build the payload classifier for the configured control phrase.
    ///
    /// # Errors
    ///
    /// Returns an error if the control phrase is not a valid token.
    pub fn classifier(&self) -> Result<SniffingClassifier, ClassifyError> {
        ControlPhrase::new(&self.control_phrase).map(SniffingClassifier::new)
    }

    /// Drain timeout as a [`Duration`].
    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout)
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            listen: args.listen,
            status_addr: args.status_addr,
            max_conns: args.max_conns,
            read_buffer: args.read_buffer,
            control_phrase: args.control_phrase,
            drain_timeout: args.drain_timeout,
        }
    }
}
