//! The transport abstraction the fetcher probes peers through.
//!
//! Implementations can be:
//! - in-memory transports for unit tests (no real I/O)
//! - `TcpTransport` from `nodewatch-net` for real deployment

use nodewatch_common::{PeerAddress, PeerId, ProbeError};
use tokio::io::AsyncRead;

/// A readable stream opened on an established connection.
pub type BoxedStream = Box<dyn AsyncRead + Send + Unpin>;

/// Already-authenticated connection primitives supplied by the network layer.
#[async_trait::async_trait]
pub trait StatusTransport: Send + Sync + 'static {
    /// Whether a live connection to `peer` exists.
    async fn is_connected(&self, peer: &PeerId) -> bool;

    /// Establish a connection to `address`.
    async fn connect(&self, address: &PeerAddress) -> Result<(), ProbeError>;

    /// Open a stream tagged with `protocol` on the connection to `address`.
    async fn open_stream(
        &self,
        address: &PeerAddress,
        protocol: &str,
    ) -> Result<BoxedStream, ProbeError>;
}
