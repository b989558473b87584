//! nodewatch-common: shared types for the nodewatch project.
//!
//! Provides the opaque `PeerId`, the dialable `PeerAddress`, the protocol
//! identifiers spoken on the wire, and the error taxonomy of a single
//! status probe.

use blake2::{
    digest::{consts::U32, Digest},
    Blake2b,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Protocol identifier used to query a peer for its status document.
pub const NODE_STATUS_PROTOCOL: &str = "/mina/node-status";

/// Protocol identifier on which subscribers receive cache updates.
pub const SUBSCRIBER_PROTOCOL: &str = "/mina-proxy/node-status";

/// Size of one read chunk when draining a status response (1 MiB).
pub const RESPONSE_CHUNK_SIZE: usize = 1024 * 1024;

// ---------------------------------------------------------------------------
// PeerId
// ---------------------------------------------------------------------------

/// Opaque, globally unique identifier of a network participant.
///
/// The transport derives it from the peer's public key; this crate only
/// treats it as a non-empty token that can be embedded in an address.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerId(String);

impl PeerId {
    /// Validate and wrap a peer identifier.
    pub fn new(raw: impl Into<String>) -> Result<Self, AddressError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(AddressError::EmptyPeerId);
        }
        if raw
            .chars()
            .any(|c| c.is_whitespace() || c == '/' || c == '@')
        {
            return Err(AddressError::InvalidPeerId(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PeerId {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PeerId> for String {
    fn from(id: PeerId) -> Self {
        id.0
    }
}

impl FromStr for PeerId {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// HostAddr / PeerAddress
// ---------------------------------------------------------------------------

/// Host part of a physical address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Host {
    Ip(IpAddr),
    Dns(String),
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Ip(ip) => write!(f, "{}", ip),
            Host::Dns(name) => f.write_str(name),
        }
    }
}

/// One physical, TCP-reachable address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostAddr {
    pub host: Host,
    pub port: u16,
}

impl HostAddr {
    pub fn new(host: Host, port: u16) -> Self {
        Self { host, port }
    }

    /// Build from a textual host, which may be an IP literal or a DNS name.
    pub fn from_host_str(host: &str, port: u16) -> Result<Self, AddressError> {
        let host = host.trim();
        if host.is_empty() {
            return Err(AddressError::Malformed("empty host".into()));
        }
        if port == 0 {
            return Err(AddressError::Malformed(format!("port 0 for host {}", host)));
        }
        let host = match host.parse::<IpAddr>() {
            Ok(ip) => Host::Ip(ip),
            Err(_) => Host::Dns(host.to_string()),
        };
        Ok(Self { host, port })
    }

    /// `host:port` form suitable for `tokio::net::lookup_host`.
    pub fn to_dial_string(&self) -> String {
        match &self.host {
            Host::Ip(IpAddr::V6(ip)) => format!("[{}]:{}", ip, self.port),
            host => format!("{}:{}", host, self.port),
        }
    }

    fn protocol_prefix(&self) -> &'static str {
        match &self.host {
            Host::Ip(IpAddr::V4(_)) => "ip4",
            Host::Ip(IpAddr::V6(_)) => "ip6",
            Host::Dns(_) => "dns4",
        }
    }
}

/// A peer identity plus the physical addresses it claims to be reachable on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddress {
    pub id: PeerId,
    pub addrs: Vec<HostAddr>,
}

impl PeerAddress {
    pub fn new(id: PeerId, addr: HostAddr) -> Self {
        Self {
            id,
            addrs: vec![addr],
        }
    }

    /// Parse a peer address.
    ///
    /// Accepts the multiaddr form `/ip4/<ip>/tcp/<port>/p2p/<id>` (also
    /// `ip6`, `dns`, `dns4`, `dns6`) and the short form `<id>@<host>:<port>`.
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let s = s.trim();
        if s.starts_with('/') {
            parse_multiaddr(s)
        } else {
            parse_short(s)
        }
    }
}

impl FromStr for PeerAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addrs.first() {
            Some(addr) => write!(
                f,
                "/{}/{}/tcp/{}/p2p/{}",
                addr.protocol_prefix(),
                addr.host,
                addr.port,
                self.id
            ),
            None => write!(f, "/p2p/{}", self.id),
        }
    }
}

fn parse_multiaddr(s: &str) -> Result<PeerAddress, AddressError> {
    let parts: Vec<&str> = s.split('/').skip(1).collect();
    // proto, host, "tcp", port, "p2p", id
    if parts.len() != 6 {
        return Err(AddressError::Malformed(s.to_string()));
    }
    let host = match parts[0] {
        "ip4" | "ip6" => {
            let ip: IpAddr = parts[1]
                .parse()
                .map_err(|_| AddressError::Malformed(format!("bad ip in {}", s)))?;
            if (parts[0] == "ip4") != ip.is_ipv4() {
                return Err(AddressError::Malformed(format!("ip family mismatch in {}", s)));
            }
            Host::Ip(ip)
        }
        "dns" | "dns4" | "dns6" => Host::Dns(parts[1].to_string()),
        other => return Err(AddressError::UnsupportedProtocol(other.to_string())),
    };
    if parts[2] != "tcp" {
        return Err(AddressError::UnsupportedProtocol(parts[2].to_string()));
    }
    let port: u16 = parts[3]
        .parse()
        .map_err(|_| AddressError::Malformed(format!("bad port in {}", s)))?;
    if port == 0 {
        return Err(AddressError::Malformed(format!("port 0 in {}", s)));
    }
    if parts[4] != "p2p" && parts[4] != "ipfs" {
        return Err(AddressError::MissingPeerId(s.to_string()));
    }
    let id = PeerId::new(parts[5])?;
    Ok(PeerAddress::new(id, HostAddr { host, port }))
}

fn parse_short(s: &str) -> Result<PeerAddress, AddressError> {
    let (id, rest) = s
        .split_once('@')
        .ok_or_else(|| AddressError::MissingPeerId(s.to_string()))?;
    let id = PeerId::new(id)?;
    let (host, port) = rest
        .rsplit_once(':')
        .ok_or_else(|| AddressError::Malformed(format!("missing port in {}", s)))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let port: u16 = port
        .parse()
        .map_err(|_| AddressError::Malformed(format!("bad port in {}", s)))?;
    Ok(PeerAddress::new(id, HostAddr::from_host_str(host, port)?))
}

// ---------------------------------------------------------------------------
// Network isolation key
// ---------------------------------------------------------------------------

type Blake2b256 = Blake2b<U32>;

/// Rendezvous string that scopes peers to one chain.
pub fn rendezvous_string(chain_id: &str) -> String {
    format!("/coda/0.0.1/{}", chain_id)
}

/// Private-network key: BLAKE2b-256 of the rendezvous string.
pub fn network_key(chain_id: &str) -> [u8; 32] {
    let digest = Blake2b256::digest(rendezvous_string(chain_id).as_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

/// Hex form of [`network_key`], as exchanged in stream preambles.
pub fn network_key_hex(chain_id: &str) -> String {
    hex::encode(network_key(chain_id))
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("empty peer id")]
    EmptyPeerId,

    #[error("invalid peer id: {0:?}")]
    InvalidPeerId(String),

    #[error("address has no peer id: {0}")]
    MissingPeerId(String),

    #[error("unsupported address protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("malformed address: {0}")]
    Malformed(String),
}

/// Failure of a single status probe. None of these is fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("connect to {peer} failed: {reason}")]
    Connect { peer: PeerId, reason: String },

    #[error("opening {protocol} stream to {peer} failed: {reason}")]
    StreamOpen {
        peer: PeerId,
        protocol: String,
        reason: String,
    },

    #[error("reading status from {peer} failed: {reason}")]
    Read { peer: PeerId, reason: String },

    #[error("status response from {peer} exceeded {limit} bytes")]
    SizeExceeded { peer: PeerId, limit: usize },

    #[error("status document from {peer} is malformed: {reason}")]
    Parse { peer: PeerId, reason: String },

    #[error("probe of {0} cancelled")]
    Cancelled(PeerId),
}

impl ProbeError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProbeError::Connect { .. } => "connect",
            ProbeError::StreamOpen { .. } => "stream_open",
            ProbeError::Read { .. } => "read",
            ProbeError::SizeExceeded { .. } => "size_exceeded",
            ProbeError::Parse { .. } => "parse",
            ProbeError::Cancelled(_) => "cancelled",
        }
    }

    /// Whether the remote peer answered at all.
    ///
    /// Only a parse failure implies a live peer.
    pub fn peer_responded(&self) -> bool {
        matches!(self, ProbeError::Parse { .. })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "12D3KooWSxxCtzRLfUzoxgRYW9fTKWPUujdvStuwCPSPUN3629mb";

    #[test]
    fn test_parse_ip4_multiaddr() {
        let s = format!("/ip4/95.217.106.189/tcp/8302/p2p/{}", ID);
        let addr = PeerAddress::parse(&s).unwrap();
        assert_eq!(addr.id.as_str(), ID);
        assert_eq!(addr.addrs.len(), 1);
        assert_eq!(addr.addrs[0].port, 8302);
        assert_eq!(addr.addrs[0].to_dial_string(), "95.217.106.189:8302");
        assert_eq!(addr.to_string(), s);
    }

    #[test]
    fn test_parse_dns_multiaddr() {
        let addr = PeerAddress::parse(&format!(
            "/dns4/seed-1.mainnet.o1test.net/tcp/10000/p2p/{}",
            ID
        ))
        .unwrap();
        assert_eq!(
            addr.addrs[0].host,
            Host::Dns("seed-1.mainnet.o1test.net".into())
        );
        assert_eq!(addr.addrs[0].to_dial_string(), "seed-1.mainnet.o1test.net:10000");
    }

    #[test]
    fn test_parse_short_form() {
        let addr = PeerAddress::parse("A@127.0.0.1:7000").unwrap();
        assert_eq!(addr.id.as_str(), "A");
        assert_eq!(addr.addrs[0].to_dial_string(), "127.0.0.1:7000");

        let v6 = PeerAddress::parse("B@[::1]:7001").unwrap();
        assert_eq!(v6.addrs[0].to_dial_string(), "[::1]:7001");
    }

    #[test]
    fn test_rejects_bad_addresses() {
        assert!(PeerAddress::parse("/ip4/1.2.3.4/tcp/80").is_err());
        assert!(PeerAddress::parse("/ip4/1.2.3.4/udp/80/p2p/X").is_err());
        assert!(PeerAddress::parse("/ip4/::1/tcp/80/p2p/X").is_err());
        assert!(PeerAddress::parse("/ip4/1.2.3.4/tcp/0/p2p/X").is_err());
        assert!(PeerAddress::parse("127.0.0.1:7000").is_err());
        assert!(PeerAddress::parse("@127.0.0.1:7000").is_err());
        assert!(PeerAddress::parse("A@127.0.0.1").is_err());
    }

    #[test]
    fn test_peer_id_validation() {
        assert!(PeerId::new("").is_err());
        assert!(PeerId::new("has space").is_err());
        assert!(PeerId::new("a/b").is_err());
        assert!(PeerId::new(ID).is_ok());
    }

    #[test]
    fn test_peer_id_serde_is_transparent() {
        let id = PeerId::new(ID).unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", ID));
        let back: PeerId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<PeerId>("\"\"").is_err());
    }

    #[test]
    fn test_network_key_is_deterministic() {
        let a = network_key("abc");
        assert_eq!(a, network_key("abc"));
        assert_ne!(a, network_key("abd"));
        assert_eq!(network_key_hex("abc").len(), 64);
        assert_eq!(rendezvous_string("abc"), "/coda/0.0.1/abc");
    }

    #[test]
    fn test_probe_error_kinds() {
        let peer = PeerId::new("A").unwrap();
        let e = ProbeError::SizeExceeded {
            peer: peer.clone(),
            limit: 10,
        };
        assert_eq!(e.kind(), "size_exceeded");
        assert!(!e.peer_responded());
        let e = ProbeError::Parse {
            peer,
            reason: "eof".into(),
        };
        assert!(e.peer_responded());
        assert!(e.to_string().contains("malformed"));
    }
}
