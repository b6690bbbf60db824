use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::protocol::{DataType, FrameError};

/// Peer session errors; every variant ends the session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("registration rejected: {0}")]
    RegistrationRejected(String),

    #[error("rendezvous connection failed: {0}")]
    Rendezvous(#[from] Box<tungstenite::Error>),

    #[error("rendezvous closed before pairing")]
    RendezvousClosed,

    #[error("unexpected rendezvous reply: {0}")]
    UnexpectedReply(String),

    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("peer disconnected")]
    PeerDisconnected,

    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] FrameError),

    #[error("session closed")]
    Closed,

    #[error("timed out waiting for {0}")]
    FetchTimeout(DataType),
}

impl From<tungstenite::Error> for SessionError {
    fn from(e: tungstenite::Error) -> Self {
        SessionError::Rendezvous(Box::new(e))
    }
}
