use nodewatch_common::PeerId;
use nodewatch_status::model::WireError;
use nodewatch_status::SessionError;
use std::time::Duration;

/// Errors from the TCP transport, the subscriber server and the client.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("network key mismatch")]
    NetworkMismatch,

    #[error("protocol {0} refused")]
    ProtocolRefused(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("no dialable address for {0}")]
    NoAddress(PeerId),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Session(#[from] SessionError),
}
