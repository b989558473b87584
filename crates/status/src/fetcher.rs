//! Status fetcher: probes one peer and records the outcome in the store.
//!
//! A probe connects if needed, opens a `/mina/node-status` stream, drains
//! the response chunk by chunk under a hard size cap, and parses it. Every
//! outcome except cancellation is recorded with exactly one upsert. No retry
//! happens here; the discovery loop re-probes on a later tick.

use crate::model::StatusDocument;
use crate::store::StatusStore;
use crate::transport::StatusTransport;
use nodewatch_common::{PeerAddress, PeerId, ProbeError, NODE_STATUS_PROTOCOL, RESPONSE_CHUNK_SIZE};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Limits applied to a single probe.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Size of one response read.
    pub chunk_size: usize,
    /// Responses larger than this fail with `SizeExceeded`.
    pub max_response_bytes: usize,
    pub connect_timeout: Duration,
    pub stream_timeout: Duration,
    /// Wait for the first byte of a response.
    pub read_timeout: Duration,
    /// Quiet period that completes a partially filled chunk.
    pub read_idle_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            chunk_size: RESPONSE_CHUNK_SIZE,
            max_response_bytes: 32 * RESPONSE_CHUNK_SIZE,
            connect_timeout: Duration::from_secs(10),
            stream_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
            read_idle_timeout: Duration::from_millis(500),
        }
    }
}

/// Probes peers through a [`StatusTransport`] and updates the store.
pub struct StatusFetcher<T: StatusTransport> {
    transport: Arc<T>,
    store: Arc<StatusStore>,
    config: FetchConfig,
}

impl<T: StatusTransport> Clone for StatusFetcher<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            store: self.store.clone(),
            config: self.config.clone(),
        }
    }
}

impl<T: StatusTransport> std::fmt::Debug for StatusFetcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusFetcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T: StatusTransport> StatusFetcher<T> {
    pub fn new(transport: Arc<T>, store: Arc<StatusStore>, config: FetchConfig) -> Self {
        Self {
            transport,
            store,
            config,
        }
    }

    pub fn store(&self) -> &Arc<StatusStore> {
        &self.store
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Probe `address` and record the outcome.
    ///
    /// Connect, stream and read failures record `connected = false`. A
    /// response that does not parse records `connected = true` with no
    /// document and still returns `ProbeError::Parse`. Cancellation records
    /// nothing.
    pub async fn fetch(
        &self,
        address: &PeerAddress,
        cancel: &CancellationToken,
    ) -> Result<StatusDocument, ProbeError> {
        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProbeError::Cancelled(address.id.clone())),
            result = self.probe(address) => result,
        };

        let outcome = match &result {
            Ok(doc) => {
                tracing::debug!(
                    peer = %address.id,
                    sync_status = %doc.sync_status,
                    peers = doc.peers.len(),
                    "status probe succeeded"
                );
                self.store.upsert(address, true, Some(doc.clone()));
                "ok"
            }
            Err(ProbeError::Cancelled(_)) => {
                tracing::debug!(peer = %address.id, "status probe cancelled");
                "cancelled"
            }
            Err(e) if e.peer_responded() => {
                tracing::warn!(peer = %address.id, "status probe got unusable response: {}", e);
                self.store.upsert(address, true, None);
                e.kind()
            }
            Err(e) => {
                tracing::debug!(peer = %address.id, "status probe failed: {}", e);
                self.store.upsert(address, false, None);
                e.kind()
            }
        };
        nodewatch_metrics::observe_probe(outcome, started.elapsed().as_secs_f64());
        result
    }

    async fn probe(&self, address: &PeerAddress) -> Result<StatusDocument, ProbeError> {
        let peer = &address.id;

        if !self.transport.is_connected(peer).await {
            tokio::time::timeout(self.config.connect_timeout, self.transport.connect(address))
                .await
                .map_err(|_| ProbeError::Connect {
                    peer: peer.clone(),
                    reason: format!("timed out after {:?}", self.config.connect_timeout),
                })??;
        }

        let mut stream = tokio::time::timeout(
            self.config.stream_timeout,
            self.transport.open_stream(address, NODE_STATUS_PROTOCOL),
        )
        .await
        .map_err(|_| ProbeError::StreamOpen {
            peer: peer.clone(),
            protocol: NODE_STATUS_PROTOCOL.to_string(),
            reason: format!("timed out after {:?}", self.config.stream_timeout),
        })??;

        let data = read_response(&mut stream, peer, &self.config).await?;
        nodewatch_metrics::metrics()
            .response_bytes
            .observe(data.len() as f64);

        StatusDocument::from_slice(&data).map_err(|e| ProbeError::Parse {
            peer: peer.clone(),
            reason: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Response reading
// ---------------------------------------------------------------------------

enum ChunkError {
    Timeout,
    Io(std::io::Error),
}

/// Fill `chunk` until it is full, the stream ends, or it goes quiet.
///
/// The first byte may take up to `first_wait`; later bytes must follow
/// within `idle`.
async fn read_chunk<R: AsyncRead + Unpin + ?Sized>(
    stream: &mut R,
    chunk: &mut [u8],
    first_wait: Duration,
    idle: Duration,
) -> Result<usize, ChunkError> {
    let mut filled = 0;
    while filled < chunk.len() {
        let wait = if filled == 0 { first_wait } else { idle };
        match tokio::time::timeout(wait, stream.read(&mut chunk[filled..])).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => filled += n,
            Ok(Err(e)) => return Err(ChunkError::Io(e)),
            Err(_) if filled == 0 => return Err(ChunkError::Timeout),
            Err(_) => break,
        }
    }
    Ok(filled)
}

/// Drain one status response.
///
/// Reads fixed-size chunks; a completely filled chunk means more may
/// follow, anything shorter ends the message. The total is capped at
/// `max_response_bytes`.
pub async fn read_response<R: AsyncRead + Unpin + ?Sized>(
    stream: &mut R,
    peer: &PeerId,
    config: &FetchConfig,
) -> Result<Vec<u8>, ProbeError> {
    let mut data = Vec::new();
    let mut chunk = vec![0u8; config.chunk_size.max(1)];

    loop {
        let first_wait = if data.is_empty() {
            config.read_timeout
        } else {
            config.read_idle_timeout
        };
        let n = match read_chunk(stream, &mut chunk, first_wait, config.read_idle_timeout).await {
            Ok(n) => n,
            Err(ChunkError::Timeout) if !data.is_empty() => break,
            Err(ChunkError::Timeout) => {
                return Err(ProbeError::Read {
                    peer: peer.clone(),
                    reason: format!("no response within {:?}", config.read_timeout),
                })
            }
            Err(ChunkError::Io(e)) => {
                return Err(ProbeError::Read {
                    peer: peer.clone(),
                    reason: e.to_string(),
                })
            }
        };

        if data.len() + n > config.max_response_bytes {
            return Err(ProbeError::SizeExceeded {
                peer: peer.clone(),
                limit: config.max_response_bytes,
            });
        }
        data.extend_from_slice(&chunk[..n]);

        if n < chunk.len() {
            break;
        }
    }

    Ok(data)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
