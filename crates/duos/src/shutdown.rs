//! One-shot relay teardown.
//!
//! The coordinator owns the cancellation token every task races its blocking
//! I/O against. It moves from [`RelayState::Running`] to
//! [`RelayState::ShuttingDown`] exactly once; the first caller records the
//! [`ShutdownReason`], later callers are ignored.

use crate::metrics::counters;
use crate::registry::Registry;
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Lifecycle of the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Accepting and relaying.
    Running,
    /// Terminal. No further accepts, relays or status answers.
    ShuttingDown,
}

/// Why the relay stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Operator asked for a stop (Ctrl-C). Clean exit.
    Operator,
    /// A peer sent the control phrase. Abnormal exit.
    ControlPhrase {
        /// Address of the peer that sent it.
        initiator: SocketAddr,
    },
    /// The listener failed. Abnormal exit.
    ListenerFailed,
}

impl ShutdownReason {
    /// Whether the process should exit with a failure status.
    #[must_use]
    pub fn is_abnormal(self) -> bool {
        !matches!(self, Self::Operator)
    }

    fn label(self) -> &'static str {
        match self {
            Self::Operator => "operator",
            Self::ControlPhrase { .. } => "control_phrase",
            Self::ListenerFailed => "listener_failed",
        }
    }
}

/// Process-wide shutdown signal.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    reason: OnceLock<ShutdownReason>,
}

impl ShutdownCoordinator {
    /// Create a coordinator in the running state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled on the transition to [`RelayState::ShuttingDown`].
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> RelayState {
        if self.reason.get().is_some() {
            RelayState::ShuttingDown
        } else {
            RelayState::Running
        }
    }

    /// The reason recorded by the transition, if it happened.
    #[must_use]
    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().copied()
    }

    /// Record `reason` and cancel the token. Returns `false` if shutdown had
    /// already begun, in which case nothing changes.
    pub fn begin(&self, reason: ShutdownReason) -> bool {
        if self.reason.set(reason).is_err() {
            return false;
        }
        counters::shutdowns_total(reason.label());
        self.token.cancel();
        true
    }

    /// Graceful stop requested by the operator.
    pub fn request_stop(&self) -> bool {
        let started = self.begin(ShutdownReason::Operator);
        if started {
            info!("stop requested, draining connections");
        }
        started
    }

    /// Abnormal teardown after `initiator` sent the control phrase.
    ///
    /// Cancels every pending accept, read and write, then removes and closes
    /// every registered peer. Returns `false` if shutdown was already under way.
    pub async fn trigger(&self, initiator: SocketAddr, registry: &Registry) -> bool {
        if !self.begin(ShutdownReason::ControlPhrase { initiator }) {
            return false;
        }
        warn!(%initiator, peers = registry.count(), "control phrase received, tearing down relay");

        for peer in registry.snapshot() {
            registry.remove(peer.id());
            peer.close().await;
        }
        true
    }
}
