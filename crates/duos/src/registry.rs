use crate::error::DuosError;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Process-unique identifier assigned to each accepted connection.
pub type PeerId = u64;

/// Write side of one accepted TCP session, shared for fan-out.
///
/// The read half is owned by the connection's own task. Writes and
/// [`Peer::close`] serialize on the same mutex, so once `close` returns no
/// further bytes reach the socket.
#[derive(Debug)]
pub struct Peer {
    id: PeerId,
    addr: SocketAddr,
    writer: Mutex<Option<OwnedWriteHalf>>,
}

impl Peer {
    /// Wrap the write half of a freshly accepted connection.
    #[must_use]
    pub fn new(id: PeerId, addr: SocketAddr, writer: OwnedWriteHalf) -> Self {
        Self {
            id,
            addr,
            writer: Mutex::new(Some(writer)),
        }
    }

    /// Identifier assigned at accept time.
    #[must_use]
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Remote address of the peer.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Write `payload` and flush, giving up if `cancel` fires first.
    ///
    /// # Errors
    ///
    /// Returns [`DuosError::PeerClosed`] if the peer was already closed,
    /// [`DuosError::Cancelled`] on shutdown, or the underlying I/O error.
    pub async fn send(&self, payload: &[u8], cancel: &CancellationToken) -> Result<(), DuosError> {
        let mut guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DuosError::Cancelled),
            guard = self.writer.lock() => guard,
        };
        let writer = guard.as_mut().ok_or(DuosError::PeerClosed)?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DuosError::Cancelled),
            result = async {
                writer.write_all(payload).await?;
                writer.flush().await
            } => result.map_err(DuosError::Io),
        }
    }

    /// Shut down the write half. Idempotent.
    pub async fn close(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(peer = self.id, "shutdown on close failed: {}", e);
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn lock_writer(
        &self,
    ) -> tokio::sync::MutexGuard<'_, Option<OwnedWriteHalf>> {
        self.writer.lock().await
    }

    /// Returns `true` once [`Peer::close`] has completed.
    pub async fn is_closed(&self) -> bool {
        self.writer.lock().await.is_none()
    }
}

/// Concurrent set of connected peers.
#[derive(Debug, Default)]
pub struct Registry {
    peers: DashMap<PeerId, Arc<Peer>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly accepted peer.
    pub fn add(&self, peer: Arc<Peer>) {
        self.peers.insert(peer.id(), peer);
    }

    /// Deregister a peer. Removing an absent id is a no-op.
    pub fn remove(&self, id: PeerId) -> Option<Arc<Peer>> {
        self.peers.remove(&id).map(|(_, peer)| peer)
    }

    /// Current members, in no particular order.
    ///
    /// No lock is held once this returns, so callers may do I/O on the
    /// result without blocking `add`/`remove`.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Peer>> {
        self.peers.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Number of registered peers.
    #[must_use]
    pub fn count(&self) -> usize {
        self.peers.len()
    }

    /// Returns `true` if no peers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
