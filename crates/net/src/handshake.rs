//! Stream preamble for the TCP transport.
//!
//! The dialer writes `<network-key-hex>\n<protocol>\n`. The listener checks
//! the key, closing the connection on mismatch, then answers `<protocol>\n`
//! to accept or `na\n` to refuse.

use crate::NetError;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Reply sent for an unsupported protocol.
pub const REFUSED: &str = "na";

/// Longest accepted preamble line, newline included.
pub const MAX_LINE: u64 = 512;

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, NetError> {
    let mut line = String::new();
    let n = (&mut *reader).take(MAX_LINE).read_line(&mut line).await?;
    if n == 0 {
        return Err(NetError::Handshake("connection closed during handshake".into()));
    }
    if !line.ends_with('\n') {
        return Err(NetError::Handshake("preamble line too long or truncated".into()));
    }
    line.pop();
    if line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}

/// Negotiate `protocol` as the dialer.
///
/// Returns the buffered stream positioned at the first protocol byte.
pub async fn dial<S>(stream: S, network_key_hex: &str, protocol: &str) -> Result<BufReader<S>, NetError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);
    let preamble = format!("{}\n{}\n", network_key_hex, protocol);
    stream.get_mut().write_all(preamble.as_bytes()).await?;
    stream.get_mut().flush().await?;

    let reply = read_line(&mut stream).await?;
    if reply == protocol {
        Ok(stream)
    } else if reply == REFUSED {
        Err(NetError::ProtocolRefused(protocol.to_string()))
    } else {
        Err(NetError::Handshake(format!("unexpected reply {:?}", reply)))
    }
}

/// Answer a dialer's preamble as the listener. Returns the agreed protocol.
pub async fn accept<S>(
    stream: &mut BufReader<S>,
    network_key_hex: &str,
    supported: &[&str],
) -> Result<String, NetError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let key = read_line(stream).await?;
    if key != network_key_hex {
        return Err(NetError::NetworkMismatch);
    }

    let protocol = read_line(stream).await?;
    if supported.contains(&protocol.as_str()) {
        stream
            .get_mut()
            .write_all(format!("{}\n", protocol).as_bytes())
            .await?;
        stream.get_mut().flush().await?;
        Ok(protocol)
    } else {
        stream
            .get_mut()
            .write_all(format!("{}\n", REFUSED).as_bytes())
            .await?;
        stream.get_mut().flush().await?;
        Err(NetError::ProtocolRefused(protocol))
    }
}
