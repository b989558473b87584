//! Subscriber session: snapshot, then live updates and keep-alives.
//!
//! One task owns the writer for the whole session, so record writes are
//! serialized without a lock. The session ends on cancellation, eviction by
//! the store, or the first failed or timed-out write; in every case the
//! notifier is released when the [`Subscription`](crate::store::Subscription)
//! is dropped.

use crate::model::KEEPALIVE_RECORD;
use crate::notify::SubscribeError;
use crate::store::StatusStore;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    pub keepalive_interval: Duration,
    /// Bound on one record write plus flush.
    pub write_timeout: Duration,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
        }
    }
}

/// Why a session ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Cancelled,
    /// The store evicted the subscriber for not keeping up.
    Evicted,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Subscribe(#[from] SubscribeError),

    #[error("write failed: {0}")]
    Write(#[from] std::io::Error),

    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),
}

/// Stream the store to one subscriber until the session ends.
pub async fn serve_subscriber<W>(
    writer: &mut W,
    store: &Arc<StatusStore>,
    config: &SubscriberConfig,
    cancel: &CancellationToken,
) -> Result<SessionEnd, SessionError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut subscription = store.register_notifier()?;
    let id = subscription.id();
    tracing::debug!(subscriber = id, "subscriber session started");

    for view in subscription.take_snapshot() {
        if cancel.is_cancelled() {
            return Ok(SessionEnd::Cancelled);
        }
        write_record(writer, view.to_wire_record().as_bytes(), config).await?;
    }

    // First tick fires immediately, right after the snapshot.
    let mut keepalive = tokio::time::interval(config.keepalive_interval);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let end = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break SessionEnd::Cancelled,
            update = subscription.recv() => match update {
                Some(view) => {
                    write_record(writer, view.to_wire_record().as_bytes(), config).await?;
                }
                None => break SessionEnd::Evicted,
            },
            _ = keepalive.tick() => {
                write_record(writer, KEEPALIVE_RECORD.as_bytes(), config).await?;
            }
        }
    };
    tracing::debug!(subscriber = id, ?end, "subscriber session ended");
    Ok(end)
}

async fn write_record<W>(
    writer: &mut W,
    record: &[u8],
    config: &SubscriberConfig,
) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let write = async {
        writer.write_all(record).await?;
        writer.flush().await
    };
    tokio::time::timeout(config.write_timeout, write)
        .await
        .map_err(|_| SessionError::WriteTimeout(config.write_timeout))??;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NotificationView, StatusDocument};
    use crate::notify::NotifyPolicy;
    use nodewatch_common::PeerAddress;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream, Lines};

    fn addr(s: &str) -> PeerAddress {
        PeerAddress::parse(s).unwrap()
    }

    fn synced() -> Option<StatusDocument> {
        Some(StatusDocument {
            sync_status: "Synced".into(),
            ..Default::default()
        })
    }

    async fn next_view(lines: &mut Lines<BufReader<DuplexStream>>) -> Option<NotificationView> {
        let line = lines.next_line().await.unwrap().unwrap();
        NotificationView::from_wire_record(&line).unwrap()
    }

    fn start(
        store: &Arc<StatusStore>,
        cancel: &CancellationToken,
        buffer: usize,
    ) -> (
        tokio::task::JoinHandle<Result<SessionEnd, SessionError>>,
        DuplexStream,
    ) {
        let (mut server, client) = tokio::io::duplex(buffer);
        let store = store.clone();
        let cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            serve_subscriber(&mut server, &store, &SubscriberConfig::default(), &cancel).await
        });
        (handle, client)
    }

    #[tokio::test]
    async fn test_snapshot_then_keepalive_then_updates() {
        let store = Arc::new(StatusStore::default());
        store.upsert(&addr("A@127.0.0.1:7000"), true, synced());
        store.upsert(&addr("B@127.0.0.1:7001"), false, None);
        let cancel = CancellationToken::new();
        let (handle, client) = start(&store, &cancel, 4096);
        let mut lines = BufReader::new(client).lines();

        let a = next_view(&mut lines).await.unwrap();
        assert_eq!(a.peer_id.as_str(), "A");
        assert!(a.connected);
        assert_eq!(a.sync_status, "Synced");
        let b = next_view(&mut lines).await.unwrap();
        assert_eq!(b.peer_id.as_str(), "B");
        assert!(!b.connected);
        assert!(next_view(&mut lines).await.is_none(), "keep-alive");

        store.upsert(&addr("C@127.0.0.1:7002"), true, None);
        let c = next_view(&mut lines).await.unwrap();
        assert_eq!(c.peer_id.as_str(), "C");

        cancel.cancel();
        assert_eq!(handle.await.unwrap().unwrap(), SessionEnd::Cancelled);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_keepalive_repeats_on_interval() {
        tokio::time::pause();
        let store = Arc::new(StatusStore::default());
        let cancel = CancellationToken::new();
        let (handle, client) = start(&store, &cancel, 4096);
        let mut lines = BufReader::new(client).lines();

        let start = tokio::time::Instant::now();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "");
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "");
        assert!(start.elapsed() >= Duration::from_secs(10));

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_closed_connection_releases_notifier() {
        let store = Arc::new(StatusStore::default());
        let cancel = CancellationToken::new();
        let (handle, client) = start(&store, &cancel, 4096);
        drop(client);

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, SessionError::Write(_)));
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_stalled_reader_hits_write_timeout() {
        tokio::time::pause();
        let store = Arc::new(StatusStore::default());
        store.upsert(&addr("A@127.0.0.1:7000"), true, synced());
        let cancel = CancellationToken::new();
        let (handle, _client) = start(&store, &cancel, 8);

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, SessionError::WriteTimeout(_)));
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_evicted_subscriber_session_ends() {
        let store = Arc::new(StatusStore::new(NotifyPolicy {
            queue_capacity: 1,
            max_consecutive_drops: 2,
            max_subscribers: 4,
        }));
        let cancel = CancellationToken::new();
        let (handle, client) = start(&store, &cancel, 4096);
        let mut lines = BufReader::new(client).lines();
        assert!(next_view(&mut lines).await.is_none());

        // No await between upserts, so the session cannot drain the queue.
        store.upsert(&addr("A@127.0.0.1:7000"), true, None);
        store.upsert(&addr("B@127.0.0.1:7001"), true, None);
        store.upsert(&addr("C@127.0.0.1:7002"), true, None);
        assert_eq!(store.subscriber_count(), 0);

        assert_eq!(handle.await.unwrap().unwrap(), SessionEnd::Evicted);
        assert_eq!(next_view(&mut lines).await.unwrap().peer_id.as_str(), "A");
    }
}
