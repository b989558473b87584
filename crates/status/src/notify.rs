//! Subscriber registry: bounded, non-blocking fan-out of cache updates.
//!
//! The store pushes every update into each registered subscriber queue
//! with `try_send`, so a slow subscriber can never stall a probe. A full
//! queue drops the newest update; a subscriber that keeps its queue full
//! for `max_consecutive_drops` updates in a row is evicted, which ends its
//! stream once the already-queued updates are drained.

use crate::model::NotificationView;
use tokio::sync::mpsc;

/// Identifier of one registered subscriber.
pub type SubscriberId = u64;

/// Queueing policy applied to every subscriber.
#[derive(Debug, Clone)]
pub struct NotifyPolicy {
    pub queue_capacity: usize,
    pub max_consecutive_drops: u32,
    pub max_subscribers: usize,
}

impl Default for NotifyPolicy {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            max_consecutive_drops: 64,
            max_subscribers: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscribeError {
    #[error("subscriber limit reached ({0})")]
    TooManySubscribers(usize),
}

/// Result of publishing one update to all subscribers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
    pub evicted: usize,
}

#[derive(Debug)]
struct Slot {
    id: SubscriberId,
    tx: mpsc::Sender<NotificationView>,
    consecutive_drops: u32,
}

#[derive(Debug)]
pub(crate) struct SubscriberRegistry {
    policy: NotifyPolicy,
    next_id: SubscriberId,
    slots: Vec<Slot>,
}

impl SubscriberRegistry {
    pub(crate) fn new(policy: NotifyPolicy) -> Self {
        Self {
            policy,
            next_id: 1,
            slots: Vec::new(),
        }
    }

    pub(crate) fn register(
        &mut self,
    ) -> Result<(SubscriberId, mpsc::Receiver<NotificationView>), SubscribeError> {
        self.slots.retain(|s| !s.tx.is_closed());
        if self.slots.len() >= self.policy.max_subscribers {
            return Err(SubscribeError::TooManySubscribers(
                self.policy.max_subscribers,
            ));
        }
        let (tx, rx) = mpsc::channel(self.policy.queue_capacity.max(1));
        let id = self.next_id;
        self.next_id += 1;
        self.slots.push(Slot {
            id,
            tx,
            consecutive_drops: 0,
        });
        self.report_active();
        Ok((id, rx))
    }

    pub(crate) fn remove(&mut self, id: SubscriberId) -> bool {
        let before = self.slots.len();
        self.slots.retain(|s| s.id != id);
        let removed = self.slots.len() != before;
        if removed {
            self.report_active();
        }
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Offer `view` to every subscriber without waiting.
    pub(crate) fn publish(&mut self, view: &NotificationView) -> PublishReport {
        let mut report = PublishReport::default();
        if self.slots.is_empty() {
            return report;
        }
        let max_drops = self.policy.max_consecutive_drops;
        let before = self.slots.len();

        self.slots.retain_mut(|slot| match slot.tx.try_send(view.clone()) {
            Ok(()) => {
                slot.consecutive_drops = 0;
                report.delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                slot.consecutive_drops += 1;
                report.dropped += 1;
                if slot.consecutive_drops >= max_drops {
                    tracing::warn!(
                        subscriber = slot.id,
                        drops = slot.consecutive_drops,
                        "evicting subscriber that stopped draining its queue"
                    );
                    report.evicted += 1;
                    false
                } else {
                    true
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        let m = nodewatch_metrics::metrics();
        m.notifications_sent.inc_by(report.delivered as u64);
        m.notifications_dropped.inc_by(report.dropped as u64);
        m.subscribers_evicted.inc_by(report.evicted as u64);
        if self.slots.len() != before {
            self.report_active();
        }
        report
    }

    fn report_active(&self) {
        nodewatch_metrics::metrics()
            .subscribers_active
            .set(self.slots.len() as i64);
    }
}
