//! Discovery/refresh loop.
//!
//! Each tick re-probes every cache entry whose last probe is older than the
//! refresh threshold, and probes every peer advertised by a cached status
//! document regardless of staleness. The second path is what walks the
//! topology: a peer listed by anyone already in the cache gets an entry on
//! the next tick.

use crate::fetcher::StatusFetcher;
use crate::transport::StatusTransport;
use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use nodewatch_common::{PeerAddress, PeerId, ProbeError};
use std::sync::Arc;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Configuration for the discovery loop.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub tick_interval: Duration,
    /// Entries older than this are re-probed.
    pub refresh_threshold: Duration,
    /// Probes in flight at once within a tick.
    pub max_concurrent_probes: usize,
    /// Our own identity, which is never probed.
    pub local_peer_id: Option<PeerId>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
            refresh_threshold: Duration::from_secs(60),
            max_concurrent_probes: 1,
            local_peer_id: None,
        }
    }
}

/// Probe counts for one tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Stale entries re-probed.
    pub refreshed: usize,
    /// Advertised (or seed) addresses probed.
    pub discovered: usize,
    /// Probes that did not produce a status document.
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Stale,
    Advertised,
}

/// The refresh loop driving a [`StatusFetcher`].
pub struct Discovery<T: StatusTransport> {
    fetcher: StatusFetcher<T>,
    config: DiscoveryConfig,
}

impl<T: StatusTransport> std::fmt::Debug for Discovery<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discovery")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T: StatusTransport> Discovery<T> {
    pub fn new(fetcher: StatusFetcher<T>, config: DiscoveryConfig) -> Self {
        Self { fetcher, config }
    }

    pub fn fetcher(&self) -> &StatusFetcher<T> {
        &self.fetcher
    }

    /// Probe every seed once. Seeds count as discovered.
    pub async fn bootstrap(&self, seeds: &[PeerAddress], cancel: &CancellationToken) -> TickReport {
        let plan = seeds.iter().map(|s| (s.clone(), Origin::Advertised));
        let report = self.run(self.plan(plan), cancel).await;
        tracing::info!(
            seeds = seeds.len(),
            failed = report.failed,
            "bootstrap probes finished"
        );
        report
    }

    /// Run one refresh/discovery pass.
    pub async fn tick(&self, cancel: &CancellationToken) -> TickReport {
        if cancel.is_cancelled() {
            return TickReport::default();
        }
        let store = self.fetcher.store();

        let stale = store
            .stale_addresses(self.config.refresh_threshold)
            .into_iter()
            .map(|a| (a, Origin::Stale));
        let advertised = store
            .advertised_peers()
            .into_iter()
            .filter_map(|summary| match summary.to_peer_address() {
                Ok(address) => Some((address, Origin::Advertised)),
                Err(e) => {
                    tracing::debug!(
                        peer_id = %summary.peer_id,
                        host = %summary.host,
                        "skipping advertised peer: {}",
                        e
                    );
                    None
                }
            });

        let report = self.run(self.plan(stale.chain(advertised)), cancel).await;
        nodewatch_metrics::metrics().discovery_ticks.inc();
        report
    }

    /// Collapse duplicate identities (first occurrence wins) and drop ourselves.
    fn plan(
        &self,
        candidates: impl Iterator<Item = (PeerAddress, Origin)>,
    ) -> IndexMap<PeerId, (PeerAddress, Origin)> {
        let mut plan = IndexMap::new();
        for (address, origin) in candidates {
            if self.config.local_peer_id.as_ref() == Some(&address.id) {
                continue;
            }
            plan.entry(address.id.clone()).or_insert((address, origin));
        }
        plan
    }

    async fn run(
        &self,
        plan: IndexMap<PeerId, (PeerAddress, Origin)>,
        cancel: &CancellationToken,
    ) -> TickReport {
        let outcomes: Vec<(Origin, Result<(), ProbeError>)> = stream::iter(plan.into_values())
            .map(|(address, origin)| async move {
                let result = self.fetcher.fetch(&address, cancel).await.map(|_| ());
                (origin, result)
            })
            .buffer_unordered(self.config.max_concurrent_probes.max(1))
            .collect()
            .await;

        let mut report = TickReport::default();
        for (origin, result) in outcomes {
            if matches!(result, Err(ProbeError::Cancelled(_))) {
                continue;
            }
            match origin {
                Origin::Stale => report.refreshed += 1,
                Origin::Advertised => report.discovered += 1,
            }
            if result.is_err() {
                report.failed += 1;
            }
        }
        report
    }

    /// Spawn the loop. It stops when `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let report = self.tick(&cancel).await;
                let store = self.fetcher.store();
                tracing::info!(
                    known = store.len(),
                    connected = store.connected_count(),
                    refreshed = report.refreshed,
                    discovered = report.discovered,
                    failed = report.failed,
                    "discovery tick"
                );
            }
            tracing::debug!("discovery loop stopped");
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
