//! Peer status store: the single shared source of truth for peer health.
//!
//! Maps each `PeerId` to the outcome of its latest probe. Entries are
//! created on the first probe attempt (success or failure) and are never
//! deleted. Every upsert is fanned out to the registered subscribers as an
//! immutable [`NotificationView`] while the map lock is held, which makes a
//! subscriber's snapshot strictly precede its live updates. Fan-out only
//! uses `try_send`, so the lock is never held across subscriber I/O.

use crate::model::{NotificationView, PeerSummary, StatusDocument};
use crate::notify::{NotifyPolicy, SubscribeError, SubscriberId, SubscriberRegistry};
use indexmap::IndexMap;
use nodewatch_common::{PeerAddress, PeerId};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

/// Cached state of one peer.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Whether the last probe reached the peer.
    pub connected: bool,
    /// Parsed status from the last successful probe.
    pub last_document: Option<StatusDocument>,
    /// Address used for the last probe.
    pub last_address: PeerAddress,
    /// When the last probe completed. Never decreases.
    pub last_probe: Instant,
}

impl CacheEntry {
    /// Whether the entry is older than `threshold` at `now`.
    pub fn is_stale(&self, threshold: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_probe) > threshold
    }
}

#[derive(Debug)]
struct StoreInner {
    entries: IndexMap<PeerId, CacheEntry>,
    subscribers: SubscriberRegistry,
}

/// Concurrent peer status cache with a subscriber registry.
#[derive(Debug)]
pub struct StatusStore {
    inner: Mutex<StoreInner>,
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::new(NotifyPolicy::default())
    }
}

impl StatusStore {
    pub fn new(policy: NotifyPolicy) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                entries: IndexMap::new(),
                subscribers: SubscriberRegistry::new(policy),
            }),
        }
    }

    /// Record a probe outcome for `address.id` and notify subscribers.
    ///
    /// Last write wins. The first probe of an identity fixes its position
    /// in snapshot order.
    pub fn upsert(
        &self,
        address: &PeerAddress,
        connected: bool,
        document: Option<StatusDocument>,
    ) -> CacheEntry {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let last_probe = match inner.entries.get(&address.id) {
            Some(prev) if prev.last_probe > now => prev.last_probe,
            _ => now,
        };
        let entry = CacheEntry {
            connected,
            last_document: document,
            last_address: address.clone(),
            last_probe,
        };
        inner.entries.insert(address.id.clone(), entry.clone());

        let view = NotificationView::from_entry(&address.id, &entry);
        inner.subscribers.publish(&view);

        let m = nodewatch_metrics::metrics();
        m.peers_known.set(inner.entries.len() as i64);
        m.peers_connected
            .set(inner.entries.values().filter(|e| e.connected).count() as i64);

        entry
    }

    /// Point-in-time copy of all entries, in first-probe order.
    pub fn snapshot(&self) -> Vec<(PeerId, CacheEntry)> {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect()
    }

    pub fn get(&self, id: &PeerId) -> Option<CacheEntry> {
        self.inner.lock().entries.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Number of entries whose last probe reached the peer.
    pub fn connected_count(&self) -> usize {
        self.inner
            .lock()
            .entries
            .values()
            .filter(|e| e.connected)
            .count()
    }

    /// Addresses of every entry older than `threshold`.
    pub fn stale_addresses(&self, threshold: Duration) -> Vec<PeerAddress> {
        let now = Instant::now();
        self.inner
            .lock()
            .entries
            .values()
            .filter(|e| e.is_stale(threshold, now))
            .map(|e| e.last_address.clone())
            .collect()
    }

    /// Every peer advertised by any cached status document, in cache order.
    pub fn advertised_peers(&self) -> Vec<PeerSummary> {
        self.inner
            .lock()
            .entries
            .values()
            .filter_map(|e| e.last_document.as_ref())
            .flat_map(|doc| doc.peers.iter().cloned())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Notifiers
    // -----------------------------------------------------------------------

    /// Register a subscriber.
    ///
    /// The returned subscription carries the snapshot taken under the same
    /// lock as the registration, so every update delivered on its channel
    /// happened after the snapshot.
    pub fn register_notifier(self: &Arc<Self>) -> Result<Subscription, SubscribeError> {
        let mut inner = self.inner.lock();
        let (id, receiver) = inner.subscribers.register()?;
        let snapshot = inner
            .entries
            .iter()
            .map(|(peer_id, entry)| NotificationView::from_entry(peer_id, entry))
            .collect();
        tracing::debug!(subscriber = id, "registered notifier");
        Ok(Subscription {
            id,
            snapshot,
            receiver,
            store: Arc::clone(self),
        })
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    pub fn clear_notifier(&self, id: SubscriberId) -> bool {
        let removed = self.inner.lock().subscribers.remove(id);
        if removed {
            tracing::debug!(subscriber = id, "cleared notifier");
        }
        removed
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

/// A registered subscriber: its initial snapshot plus the live update queue.
///
/// Dropping the subscription clears its notifier.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    snapshot: Vec<NotificationView>,
    receiver: mpsc::Receiver<NotificationView>,
    store: Arc<StatusStore>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Take the snapshot views. Subsequent calls return an empty list.
    pub fn take_snapshot(&mut self) -> Vec<NotificationView> {
        std::mem::take(&mut self.snapshot)
    }

    /// Next live update. `None` once the subscriber has been evicted.
    pub async fn recv(&mut self) -> Option<NotificationView> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.store.clear_notifier(self.id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
