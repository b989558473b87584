//! Fault injection for probe transports.
//!
//! [`ChaosTransport`] wraps any [`StatusTransport`] and adds random connect
//! and stream failures, latency, and per-peer isolation.

use crate::transport::{BoxedStream, StatusTransport};
use nodewatch_common::{PeerAddress, PeerId, ProbeError};
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Duration;

/// Configuration for chaos injection.
#[derive(Debug, Clone)]
pub struct ChaosConfig {
    /// Probability of failing a connect or stream open \[0.0, 1.0\].
    pub failure_rate: f64,
    /// Fixed latency injected before forwarding.
    pub latency: Duration,
    /// Random additional latency in \[0, jitter\].
    pub jitter: Duration,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            failure_rate: 0.0,
            latency: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }
}

/// A transport wrapper that injects latency, failures and isolation.
pub struct ChaosTransport<T: StatusTransport> {
    inner: Arc<T>,
    config: Arc<RwLock<ChaosConfig>>,
    isolated: Arc<RwLock<HashSet<PeerId>>>,
}

impl<T: StatusTransport> std::fmt::Debug for ChaosTransport<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaosTransport").finish_non_exhaustive()
    }
}

impl<T: StatusTransport> ChaosTransport<T> {
    pub fn new(inner: T, config: ChaosConfig) -> Self {
        Self {
            inner: Arc::new(inner),
            config: Arc::new(RwLock::new(config)),
            isolated: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    pub fn inner(&self) -> &Arc<T> {
        &self.inner
    }

    pub async fn set_failure_rate(&self, rate: f64) {
        self.config.write().await.failure_rate = rate;
    }

    pub async fn set_latency(&self, latency: Duration) {
        self.config.write().await.latency = latency;
    }

    /// Make `peer` unreachable.
    pub async fn isolate(&self, peer: PeerId) {
        self.isolated.write().await.insert(peer);
    }

    pub async fn heal(&self, peer: &PeerId) {
        self.isolated.write().await.remove(peer);
    }

    pub async fn heal_all(&self) {
        self.isolated.write().await.clear();
    }

    /// Apply latency, then decide whether this call fails.
    async fn disturb(&self, peer: &PeerId) -> Option<&'static str> {
        if self.isolated.read().await.contains(peer) {
            return Some("chaos: isolated");
        }

        let (delay, failure_rate) = {
            let config = self.config.read().await;
            let jitter_ms = if config.jitter.is_zero() {
                0
            } else {
                rand::thread_rng().gen_range(0..=config.jitter.as_millis() as u64)
            };
            (
                config.latency + Duration::from_millis(jitter_ms),
                config.failure_rate,
            )
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if failure_rate > 0.0 && rand::thread_rng().gen_bool(failure_rate.min(1.0)) {
            return Some("chaos: random failure");
        }
        None
    }
}

#[async_trait::async_trait]
impl<T: StatusTransport> StatusTransport for ChaosTransport<T> {
    async fn is_connected(&self, peer: &PeerId) -> bool {
        if self.isolated.read().await.contains(peer) {
            return false;
        }
        self.inner.is_connected(peer).await
    }

    async fn connect(&self, address: &PeerAddress) -> Result<(), ProbeError> {
        if let Some(reason) = self.disturb(&address.id).await {
            return Err(ProbeError::Connect {
                peer: address.id.clone(),
                reason: reason.into(),
            });
        }
        self.inner.connect(address).await
    }

    async fn open_stream(
        &self,
        address: &PeerAddress,
        protocol: &str,
    ) -> Result<BoxedStream, ProbeError> {
        if let Some(reason) = self.disturb(&address.id).await {
            return Err(ProbeError::StreamOpen {
                peer: address.id.clone(),
                protocol: protocol.to_string(),
                reason: reason.into(),
            });
        }
        self.inner.open_stream(address, protocol).await
    }
}

// ────────────────────────── Tests ──────────────────────────
