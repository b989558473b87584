//! In-memory peer network for unit tests.

use crate::model::{PeerSummary, StatusDocument};
use crate::transport::{BoxedStream, StatusTransport};
use nodewatch_common::{PeerAddress, PeerId, ProbeError};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tokio::io::DuplexStream;

/// How a simulated peer reacts to a probe. Unknown peers are unreachable.
#[derive(Debug, Clone)]
pub(crate) enum PeerBehavior {
    Unreachable,
    RefuseStream,
    Respond(Vec<u8>),
    /// Accepts the stream and never writes.
    Hang,
}

#[derive(Debug, Default)]
pub(crate) struct SimTransport {
    peers: Mutex<HashMap<PeerId, PeerBehavior>>,
    connected: Mutex<HashSet<PeerId>>,
    probes: Mutex<HashMap<PeerId, usize>>,
    silent_writers: Mutex<Vec<DuplexStream>>,
}

impl SimTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set(&self, id: &str, behavior: PeerBehavior) {
        self.peers.lock().insert(PeerId::new(id).unwrap(), behavior);
    }

    pub(crate) fn respond_with(&self, id: &str, doc: &StatusDocument) {
        self.set(id, PeerBehavior::Respond(serde_json::to_vec(doc).unwrap()));
    }

    /// Reachable peer reporting `sync` and advertising `(host, id, port)` peers.
    pub(crate) fn peer(&self, id: &str, sync: &str, advertised: &[(&str, &str, i64)]) {
        let doc = StatusDocument {
            node_peer_id: id.to_string(),
            sync_status: sync.to_string(),
            peers: advertised
                .iter()
                .map(|(host, peer_id, port)| PeerSummary {
                    host: host.to_string(),
                    peer_id: peer_id.to_string(),
                    libp2p_port: *port,
                })
                .collect(),
            ..Default::default()
        };
        self.respond_with(id, &doc);
    }

    /// Number of probes that reached this transport for `id`.
    pub(crate) fn probe_count(&self, id: &str) -> usize {
        self.probes
            .lock()
            .get(&PeerId::new(id).unwrap())
            .copied()
            .unwrap_or(0)
    }

    fn behavior(&self, peer: &PeerId) -> PeerBehavior {
        self.peers
            .lock()
            .get(peer)
            .cloned()
            .unwrap_or(PeerBehavior::Unreachable)
    }
}

#[async_trait::async_trait]
impl StatusTransport for SimTransport {
    async fn is_connected(&self, peer: &PeerId) -> bool {
        *self.probes.lock().entry(peer.clone()).or_default() += 1;
        self.connected.lock().contains(peer)
    }

    async fn connect(&self, address: &PeerAddress) -> Result<(), ProbeError> {
        match self.behavior(&address.id) {
            PeerBehavior::Unreachable => Err(ProbeError::Connect {
                peer: address.id.clone(),
                reason: "connection refused".into(),
            }),
            _ => {
                self.connected.lock().insert(address.id.clone());
                Ok(())
            }
        }
    }

    async fn open_stream(
        &self,
        address: &PeerAddress,
        protocol: &str,
    ) -> Result<BoxedStream, ProbeError> {
        match self.behavior(&address.id) {
            PeerBehavior::Respond(body) => Ok(Box::new(std::io::Cursor::new(body))),
            PeerBehavior::Hang => {
                let (reader, writer) = tokio::io::duplex(64);
                self.silent_writers.lock().push(writer);
                Ok(Box::new(reader))
            }
            PeerBehavior::RefuseStream | PeerBehavior::Unreachable => {
                self.connected.lock().remove(&address.id);
                Err(ProbeError::StreamOpen {
                    peer: address.id.clone(),
                    protocol: protocol.to_string(),
                    reason: "protocol not supported".into(),
                })
            }
        }
    }
}
