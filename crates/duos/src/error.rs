use std::net::SocketAddr;
use thiserror::Error;

/// Errors that can occur during relay server operation.
#[derive(Error, Debug)]
pub enum DuosError {
    /// Underlying I/O error on a peer socket.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The listener failed to accept; the relay cannot continue.
    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),
    /// Write attempted on a peer that has already been closed.
    #[error("peer closed")]
    PeerClosed,
    /// The operation was interrupted by shutdown.
    #[error("cancelled by shutdown")]
    Cancelled,
    /// A peer sent the control phrase and the relay tore itself down.
    #[error("control phrase received from {initiator}, relay shut down")]
    ControlPhrase {
        /// Address of the peer that sent the phrase.
        initiator: SocketAddr,
    },
    /// The payload classifier could not be built.
    #[error("classifier error: {0}")]
    Classifier(#[from] duo_common::ClassifyError),
}
