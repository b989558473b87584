//! Subscriber listener.
//!
//! Accepts TCP connections until cancelled, negotiates
//! `/mina-proxy/node-status`, and runs one subscriber session per
//! connection against the shared store.

use crate::handshake;
use crate::NetError;
use nodewatch_common::SUBSCRIBER_PROTOCOL;
use nodewatch_status::subscription::serve_subscriber;
use nodewatch_status::{SessionEnd, StatusStore, SubscriberConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub network_key_hex: String,
    /// Bound on reading the dialer's preamble.
    pub handshake_timeout: Duration,
    pub subscriber: SubscriberConfig,
}

impl ServerConfig {
    pub fn new(network_key_hex: impl Into<String>) -> Self {
        Self {
            network_key_hex: network_key_hex.into(),
            handshake_timeout: Duration::from_secs(10),
            subscriber: SubscriberConfig::default(),
        }
    }
}

/// Serves cache updates to subscribers over TCP.
pub struct ProxyServer {
    listener: TcpListener,
    store: Arc<StatusStore>,
    config: Arc<ServerConfig>,
}

impl std::fmt::Debug for ProxyServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyServer")
            .field("local_addr", &self.listener.local_addr().ok())
            .finish_non_exhaustive()
    }
}

impl ProxyServer {
    pub async fn bind(
        addr: SocketAddr,
        store: Arc<StatusStore>,
        config: ServerConfig,
    ) -> Result<Self, NetError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            store,
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept subscribers until `cancel` fires. Open sessions are cancelled too.
    pub async fn serve(self, cancel: CancellationToken) -> Result<(), NetError> {
        tracing::info!("subscriber listener on {}", self.local_addr()?);
        loop {
            let (stream, remote) = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!("accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
            };

            let store = self.store.clone();
            let config = self.config.clone();
            let cancel = cancel.child_token();
            tokio::spawn(async move {
                match serve_connection(stream, &store, &config, &cancel).await {
                    Ok(end) => tracing::info!(%remote, ?end, "subscriber disconnected"),
                    Err(e) => tracing::info!(%remote, "subscriber session ended: {}", e),
                }
            });
        }
        tracing::info!("subscriber listener stopped");
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    store: &Arc<StatusStore>,
    config: &ServerConfig,
    cancel: &CancellationToken,
) -> Result<SessionEnd, NetError> {
    stream.set_nodelay(true)?;
    let mut stream = BufReader::new(stream);
    tokio::time::timeout(
        config.handshake_timeout,
        handshake::accept(&mut stream, &config.network_key_hex, &[SUBSCRIBER_PROTOCOL]),
    )
    .await
    .map_err(|_| NetError::Timeout(config.handshake_timeout))??;

    Ok(serve_subscriber(stream.get_mut(), store, &config.subscriber, cancel).await?)
}
