//! TCP client implementing `StatusTransport`.
//!
//! `TcpTransport` treats a peer as connected once one of its addresses has
//! accepted a TCP connection, and remembers that socket address. Every
//! status stream is a fresh TCP connection that starts with the preamble
//! from [`crate::handshake`].

use crate::handshake;
use crate::NetError;
use nodewatch_common::{PeerAddress, PeerId, ProbeError};
use nodewatch_status::{BoxedStream, StatusTransport};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::RwLock;

/// A plain-TCP probe transport gated by the chain's network key.
#[derive(Debug)]
pub struct TcpTransport {
    network_key_hex: String,
    peers: Arc<RwLock<HashMap<PeerId, SocketAddr>>>,
}

impl TcpTransport {
    pub fn new(network_key_hex: impl Into<String>) -> Self {
        Self {
            network_key_hex: network_key_hex.into(),
            peers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Forget the cached address of `peer` (e.g., after a failed stream).
    pub async fn invalidate(&self, peer: &PeerId) {
        self.peers.write().await.remove(peer);
    }

    /// Try every address of the peer in order; the first that accepts wins.
    async fn reach(&self, address: &PeerAddress) -> Result<SocketAddr, NetError> {
        let mut last_err = None;
        for host in &address.addrs {
            let resolved = match tokio::net::lookup_host(host.to_dial_string()).await {
                Ok(resolved) => resolved,
                Err(e) => {
                    last_err = Some(e);
                    continue;
                }
            };
            for socket_addr in resolved {
                match TcpStream::connect(socket_addr).await {
                    Ok(_) => return Ok(socket_addr),
                    Err(e) => last_err = Some(e),
                }
            }
        }
        match last_err {
            Some(e) => Err(NetError::Io(e)),
            None => Err(NetError::NoAddress(address.id.clone())),
        }
    }

    async fn open(&self, socket_addr: SocketAddr, protocol: &str) -> Result<BoxedStream, NetError> {
        let stream = TcpStream::connect(socket_addr).await?;
        stream.set_nodelay(true)?;
        let stream = handshake::dial(stream, &self.network_key_hex, protocol).await?;
        Ok(Box::new(stream))
    }
}

#[async_trait::async_trait]
impl StatusTransport for TcpTransport {
    async fn is_connected(&self, peer: &PeerId) -> bool {
        self.peers.read().await.contains_key(peer)
    }

    async fn connect(&self, address: &PeerAddress) -> Result<(), ProbeError> {
        let socket_addr = self.reach(address).await.map_err(|e| ProbeError::Connect {
            peer: address.id.clone(),
            reason: e.to_string(),
        })?;
        tracing::debug!(peer = %address.id, %socket_addr, "peer reachable");
        self.peers
            .write()
            .await
            .insert(address.id.clone(), socket_addr);
        Ok(())
    }

    async fn open_stream(
        &self,
        address: &PeerAddress,
        protocol: &str,
    ) -> Result<BoxedStream, ProbeError> {
        let stream_err = |reason: String| ProbeError::StreamOpen {
            peer: address.id.clone(),
            protocol: protocol.to_string(),
            reason,
        };

        let cached = self.peers.read().await.get(&address.id).copied();
        let socket_addr = cached.ok_or_else(|| stream_err("not connected".into()))?;

        match self.open(socket_addr, protocol).await {
            Ok(stream) => Ok(stream),
            Err(e) => {
                self.invalidate(&address.id).await;
                Err(stream_err(e.to_string()))
            }
        }
    }
}
