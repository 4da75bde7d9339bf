use crate::config::ServerConfig;
use crate::connection::handle_connection;
use crate::error::DuosError;
use crate::metrics::counters;
use crate::registry::{PeerId, Registry};
use crate::shutdown::{ShutdownCoordinator, ShutdownReason};
use duo_common::Classifier;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// Shared state for the relay server.
pub struct ServerState {
    /// Connected peers.
    pub registry: Registry,
    /// Runtime server configuration.
    pub config: ServerConfig,
    /// Payload classifier consulted on every read.
    pub classifier: Box<dyn Classifier>,
    /// One-shot shutdown signal shared by every task.
    pub shutdown: ShutdownCoordinator,
    /// Connection tasks and detached fan-outs, drained on shutdown.
    pub tasks: TaskTracker,
    next_peer_id: AtomicU64,
    active_connections: AtomicUsize,
}

impl ServerState {
    /// Create state for a relay that has not accepted anything yet.
    pub fn new(config: ServerConfig, classifier: impl Classifier + 'static) -> Self {
        Self {
            registry: Registry::new(),
            config,
            classifier: Box::new(classifier),
            shutdown: ShutdownCoordinator::new(),
            tasks: TaskTracker::new(),
            next_peer_id: AtomicU64::new(1),
            active_connections: AtomicUsize::new(0),
        }
    }

    /// Allocate the id for the next accepted connection.
    pub fn next_peer_id(&self) -> PeerId {
        self.next_peer_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Connections holding a slot, whether or not they have registered yet.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    /// Claim one of `max_conns` slots for a freshly accepted socket.
    ///
    /// Returns `None` when the relay is full. The slot is released when the
    /// returned guard drops.
    pub fn try_reserve_slot(self: &Arc<Self>) -> Option<ConnectionSlot> {
        let max = self.config.max_conns;
        self.active_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()?;
        Some(ConnectionSlot {
            state: Arc::clone(self),
        })
    }
}

/// One reserved connection slot, held by the connection task.
pub struct ConnectionSlot {
    state: Arc<ServerState>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state
            .active_connections
            .fetch_sub(1, Ordering::AcqRel);
    }
}

/// Accept errors that concern one half-open socket rather than the listener.
fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
    )
}

/// Run the accept loop until shutdown.
///
/// Each accepted connection gets its own task. When the shutdown token fires
/// the loop stops accepting and waits up to the configured drain timeout for
/// connection tasks to finish.
///
/// # Errors
///
/// Returns [`DuosError::ControlPhrase`] if a peer shut the relay down, or
/// [`DuosError::Accept`] if the listener failed. Aborted or reset handshakes
/// are logged and skipped. An operator stop returns `Ok`.
pub async fn run(listener: TcpListener, state: Arc<ServerState>) -> Result<(), DuosError> {
    let local_addr = listener.local_addr()?;
    info!("relay listening on {}", local_addr);
    let token = state.shutdown.token();

    let result = loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break Ok(()),
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        // Reserved here, not at registration, which happens
                        // later inside the task.
                        let Some(slot) = state.try_reserve_slot() else {
                            warn!("max connections reached, rejecting {}", addr);
                            counters::connections_rejected_total();
                            drop(stream);
                            continue;
                        };
                        let conn_state = Arc::clone(&state);
                        state.tasks.spawn(async move {
                            let _slot = slot;
                            if let Err(e) = handle_connection(stream, addr, conn_state).await {
                                tracing::debug!("connection from {} closed: {}", addr, e);
                            }
                        });
                    }
                    Err(e) if is_transient_accept_error(&e) => {
                        warn!("dropped connection during accept: {}", e);
                    }
                    Err(e) => {
                        error!("failed to accept connection: {}", e);
                        state.shutdown.begin(ShutdownReason::ListenerFailed);
                        break Err(DuosError::Accept(e));
                    }
                }
            }
        }
    };
    drop(listener);

    state.tasks.close();
    info!("draining {} tasks", state.tasks.len());
    if tokio::time::timeout(state.config.drain_timeout(), state.tasks.wait())
        .await
        .is_err()
    {
        warn!(
            "drain timeout reached with {} tasks still active",
            state.tasks.len()
        );
    }

    result?;
    match state.shutdown.reason() {
        Some(ShutdownReason::ControlPhrase { initiator }) => {
            Err(DuosError::ControlPhrase { initiator })
        }
        _ => {
            info!("relay shut down gracefully");
            Ok(())
        }
    }
}
