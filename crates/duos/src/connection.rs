use crate::error::DuosError;
use crate::metrics::{counters, gauges};
use crate::registry::Peer;
use crate::server::ServerState;
use duo_common::PayloadKind;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tracing::{debug, info, trace};

/// Outcome of writing one payload to every registered peer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOut {
    /// Peers that received the full payload.
    pub delivered: usize,
    /// Peers whose write failed.
    pub failed: usize,
}

/// Serve one accepted connection until it closes or the relay shuts down.
///
/// The peer is registered for fan-out before the first read and is always
/// deregistered and closed on the way out, whatever ended the loop.
///
/// # Errors
///
/// Returns the read error that ended the loop. Callers treat it as an
/// ordinary disconnect.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<ServerState>,
) -> Result<(), DuosError> {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%addr, "set_nodelay failed: {}", e);
    }
    let (mut reader, writer) = stream.into_split();
    let peer = Arc::new(Peer::new(state.next_peer_id(), addr, writer));

    state.registry.add(Arc::clone(&peer));
    gauges::inc_connections_active();
    info!(peer = peer.id(), %addr, "peer connected");

    let result = run_read_loop(&mut reader, &peer, &state).await;

    state.registry.remove(peer.id());
    peer.close().await;
    gauges::dec_connections_active();
    info!(peer = peer.id(), %addr, "peer disconnected");

    result
}

/// Read, classify and relay until EOF, error, control phrase or shutdown.
///
/// The control phrase is relayed like any other payload before teardown
/// starts, so every peer sees it right before its connection closes.
async fn run_read_loop(
    reader: &mut OwnedReadHalf,
    peer: &Arc<Peer>,
    state: &Arc<ServerState>,
) -> Result<(), DuosError> {
    let token = state.shutdown.token();
    let mut buf = vec![0u8; state.config.read_buffer];

    loop {
        let n = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),
            read = reader.read(&mut buf) => read?,
        };
        if n == 0 {
            debug!(peer = peer.id(), "peer closed connection");
            return Ok(());
        }

        // Each read is relayed on its own; chunks of one large message are
        // not reassembled.
        let payload = &buf[..n];
        counters::payload_bytes_total("in", n as u64);
        let kind = state.classifier.classify(payload);
        counters::payloads_total(kind.as_str());
        trace!(peer = peer.id(), %kind, bytes = n, "payload received");

        match kind {
            PayloadKind::Control => {
                fan_out(state, payload).await;
                state.shutdown.trigger(peer.addr(), &state.registry).await;
                return Ok(());
            }
            kind if kind.relays_detached() => {
                let payload = payload.to_vec();
                let task_state = Arc::clone(state);
                state.tasks.spawn(async move {
                    fan_out(&task_state, &payload).await;
                });
            }
            _ => {
                fan_out(state, payload).await;
            }
        }
    }
}

/// Write `payload` to every registered peer, the sender included.
///
/// A failed write is counted and skipped; the failing peer's own read loop
/// is left to notice the disconnect and deregister itself. Stops early if
/// the relay shuts down.
pub async fn fan_out(state: &ServerState, payload: &[u8]) -> FanOut {
    let token = state.shutdown.token();
    let mut report = FanOut::default();

    for peer in state.registry.snapshot() {
        match peer.send(payload, &token).await {
            Ok(()) => {
                report.delivered += 1;
                counters::payload_bytes_total("out", payload.len() as u64);
            }
            Err(DuosError::Cancelled) => break,
            Err(e) => {
                report.failed += 1;
                counters::fanout_failures_total();
                debug!(peer = peer.id(), addr = %peer.addr(), "fan-out write failed: {}", e);
            }
        }
    }
    report
}
