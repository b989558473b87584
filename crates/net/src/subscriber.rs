//! Client side of the subscriber protocol.

use crate::handshake;
use crate::NetError;
use nodewatch_common::SUBSCRIBER_PROTOCOL;
use nodewatch_status::NotificationView;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::net::{TcpStream, ToSocketAddrs};

/// A connection to a proxy's subscriber stream.
#[derive(Debug)]
pub struct SubscriberClient {
    lines: Lines<BufReader<TcpStream>>,
}

impl SubscriberClient {
    pub async fn connect<A: ToSocketAddrs>(addr: A, network_key_hex: &str) -> Result<Self, NetError> {
        let stream = TcpStream::connect(addr).await?;
        let stream = handshake::dial(stream, network_key_hex, SUBSCRIBER_PROTOCOL).await?;
        Ok(Self {
            lines: stream.lines(),
        })
    }

    /// Next update, skipping keep-alives. `None` once the proxy closes the stream.
    pub async fn next_view(&mut self) -> Result<Option<NotificationView>, NetError> {
        while let Some(line) = self.lines.next_line().await? {
            if let Some(view) = NotificationView::from_wire_record(&line)? {
                return Ok(Some(view));
            }
        }
        Ok(None)
    }
}
