//! nodewatch-status: peer status cache, discovery loop and subscriber fan-out.
//!
//! The crate probes peers over a pluggable [`StatusTransport`], caches the
//! latest outcome per peer in a [`StatusStore`], walks the network through
//! the peer lists peers report about each other, and streams every change
//! to subscribers as newline-delimited base64 JSON records.

pub mod chaos;
pub mod discovery;
pub mod fetcher;
pub mod model;
pub mod notify;
pub mod store;
pub mod subscription;
pub mod transport;

#[cfg(test)]
pub(crate) mod sim;

pub use discovery::{Discovery, DiscoveryConfig, TickReport};
pub use fetcher::{FetchConfig, StatusFetcher};
pub use model::{NotificationView, PeerSummary, StatusDocument};
pub use notify::{NotifyPolicy, SubscribeError};
pub use store::{CacheEntry, StatusStore, Subscription};
pub use subscription::{SessionEnd, SessionError, SubscriberConfig};
pub use transport::{BoxedStream, StatusTransport};

use nodewatch_common::PeerAddress;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for every component of a [`NodeWatch`].
#[derive(Debug, Clone, Default)]
pub struct WatchConfig {
    pub fetch: FetchConfig,
    pub discovery: DiscoveryConfig,
    pub subscriber: SubscriberConfig,
    pub notify: NotifyPolicy,
}

// ---------------------------------------------------------------------------
// NodeWatch coordinator
// ---------------------------------------------------------------------------

/// Wires the store, fetcher, discovery loop and subscriber sessions together.
///
/// Generic over `T: StatusTransport` for testability.
pub struct NodeWatch<T: StatusTransport> {
    store: Arc<StatusStore>,
    discovery: Arc<Discovery<T>>,
    subscriber: SubscriberConfig,
}

impl<T: StatusTransport> std::fmt::Debug for NodeWatch<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeWatch")
            .field("peers", &self.store.len())
            .field("subscribers", &self.store.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl<T: StatusTransport> NodeWatch<T> {
    pub fn new(transport: T, config: WatchConfig) -> Self {
        let store = Arc::new(StatusStore::new(config.notify));
        let fetcher = StatusFetcher::new(Arc::new(transport), store.clone(), config.fetch);
        Self {
            store,
            discovery: Arc::new(Discovery::new(fetcher, config.discovery)),
            subscriber: config.subscriber,
        }
    }

    pub fn store(&self) -> &Arc<StatusStore> {
        &self.store
    }

    pub fn fetcher(&self) -> &StatusFetcher<T> {
        self.discovery.fetcher()
    }

    pub fn discovery(&self) -> &Arc<Discovery<T>> {
        &self.discovery
    }

    /// Probe the seeds once so the first tick has something to walk.
    pub async fn bootstrap(&self, seeds: &[PeerAddress], cancel: &CancellationToken) -> TickReport {
        self.discovery.bootstrap(seeds, cancel).await
    }

    /// Spawn the periodic discovery/refresh loop.
    pub fn spawn_discovery(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        self.discovery.clone().spawn(cancel)
    }

    /// Serve one subscriber connection until it ends.
    pub async fn serve_subscriber<W>(
        &self,
        writer: &mut W,
        cancel: &CancellationToken,
    ) -> Result<SessionEnd, SessionError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        subscription::serve_subscriber(writer, &self.store, &self.subscriber, cancel).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{PeerBehavior, SimTransport};
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::time::Duration;

    fn addr(s: &str) -> PeerAddress {
        PeerAddress::parse(s).unwrap()
    }

    fn network() -> SimTransport {
        let sim = SimTransport::new();
        sim.peer("A", "Synced", &[("10.0.0.2", "B", 8302), ("10.0.0.3", "C", 8302)]);
        sim.peer("B", "Catchup", &[("10.0.0.4", "D", 8302)]);
        sim.set("C", PeerBehavior::Unreachable);
        sim.peer("D", "Bootstrap", &[]);
        sim
    }

    #[tokio::test]
    async fn test_topology_walk_from_single_seed() {
        let watch = NodeWatch::new(network(), WatchConfig::default());
        let cancel = CancellationToken::new();

        watch.bootstrap(&[addr("A@10.0.0.1:8302")], &cancel).await;
        watch.discovery().tick(&cancel).await;
        watch.discovery().tick(&cancel).await;

        let snap = watch.store().snapshot();
        let ids: Vec<&str> = snap.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C", "D"]);
        let connected: Vec<bool> = snap.iter().map(|(_, e)| e.connected).collect();
        assert_eq!(connected, vec![true, true, false, true]);
    }

    #[tokio::test]
    async fn test_subscriber_sees_snapshot_then_discovery_updates() {
        tokio::time::pause();
        let watch = Arc::new(NodeWatch::new(network(), WatchConfig::default()));
        let cancel = CancellationToken::new();
        watch.bootstrap(&[addr("A@10.0.0.1:8302")], &cancel).await;

        let (mut server, client) = tokio::io::duplex(64 * 1024);
        let session = {
            let watch = watch.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { watch.serve_subscriber(&mut server, &cancel).await })
        };
        let mut lines = BufReader::new(client).lines();

        let first = lines.next_line().await.unwrap().unwrap();
        let a = NotificationView::from_wire_record(&first).unwrap().unwrap();
        assert_eq!(a.peer_id.as_str(), "A");
        assert_eq!(a.sync_status, "Synced");
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "");

        let discovery = watch.spawn_discovery(cancel.clone());
        let mut seen = Vec::new();
        while seen.len() < 2 {
            let line = lines.next_line().await.unwrap().unwrap();
            if let Some(view) = NotificationView::from_wire_record(&line).unwrap() {
                seen.push((view.peer_id.to_string(), view.connected));
            }
        }
        assert_eq!(
            seen,
            vec![("B".to_string(), true), ("C".to_string(), false)]
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        discovery.await.unwrap();
        assert_eq!(session.await.unwrap().unwrap(), SessionEnd::Cancelled);
        assert_eq!(watch.store().subscriber_count(), 0);
    }
}
