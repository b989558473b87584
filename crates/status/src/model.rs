//! Status document model and the redacted view broadcast to subscribers.

use crate::store::CacheEntry;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use nodewatch_common::{AddressError, HostAddr, PeerAddress, PeerId};
use serde::{Deserialize, Deserializer, Serialize};

/// Record written to subscribers to keep an idle connection alive.
pub const KEEPALIVE_RECORD: &str = "\n";

/// Self-reported health snapshot returned by a peer.
///
/// Every field defaults when absent or `null`; unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusDocument {
    #[serde(default, deserialize_with = "nullable")]
    pub node_ip_addr: String,
    #[serde(default, deserialize_with = "nullable")]
    pub node_peer_id: String,
    /// Opaque sync state reported by the remote side.
    #[serde(default, deserialize_with = "nullable")]
    pub sync_status: String,
    #[serde(default, deserialize_with = "nullable")]
    pub protocol_state_hash: String,
    #[serde(default, deserialize_with = "nullable")]
    pub git_commit: String,
    #[serde(default, deserialize_with = "nullable")]
    pub uptime_minutes: i64,
    /// Peers this node knows of, in the order it reported them.
    #[serde(default, deserialize_with = "peers_skipping_nulls")]
    pub peers: Vec<PeerSummary>,
    #[serde(default, deserialize_with = "nullable")]
    pub k_block_hashes_and_timestamps: Vec<(String, String)>,
}

impl StatusDocument {
    /// Parse a raw status response.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Advertisement of another peer, used only to seed discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSummary {
    #[serde(default, deserialize_with = "nullable")]
    pub host: String,
    #[serde(default, deserialize_with = "nullable")]
    pub peer_id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub libp2p_port: i64,
}

impl PeerSummary {
    /// Synthesize a dialable address from the advertisement.
    pub fn to_peer_address(&self) -> Result<PeerAddress, AddressError> {
        let id = PeerId::new(self.peer_id.clone())?;
        let port = u16::try_from(self.libp2p_port).map_err(|_| {
            AddressError::Malformed(format!("port {} out of range", self.libp2p_port))
        })?;
        let addr = HostAddr::from_host_str(&self.host, port)?;
        Ok(PeerAddress::new(id, addr))
    }
}

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn peers_skipping_nulls<'de, D>(deserializer: D) -> Result<Vec<PeerSummary>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<Option<PeerSummary>>> = Option::deserialize(deserializer)?;
    Ok(raw.unwrap_or_default().into_iter().flatten().collect())
}

// ---------------------------------------------------------------------------
// NotificationView
// ---------------------------------------------------------------------------

/// Redacted projection of a cache entry that is safe to broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationView {
    pub connected: bool,
    pub peer_id: PeerId,
    pub sync_status: String,
    pub protocol_state_hash: String,
    pub git_commit: String,
    pub uptime_minutes: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("invalid base64 record: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid JSON record: {0}")]
    Json(#[from] serde_json::Error),
}

impl NotificationView {
    /// Derive the view of one cache entry.
    pub fn from_entry(peer_id: &PeerId, entry: &CacheEntry) -> Self {
        let mut view = Self {
            connected: entry.connected,
            peer_id: peer_id.clone(),
            sync_status: String::new(),
            protocol_state_hash: String::new(),
            git_commit: String::new(),
            uptime_minutes: 0,
        };
        if let Some(doc) = &entry.last_document {
            view.sync_status = doc.sync_status.clone();
            view.protocol_state_hash = doc.protocol_state_hash.clone();
            view.git_commit = doc.git_commit.clone();
            view.uptime_minutes = doc.uptime_minutes;
        }
        view
    }

    /// Encode as one newline-terminated subscriber record.
    pub fn to_wire_record(&self) -> String {
        let json = serde_json::to_vec(self).expect("NotificationView serializes to JSON");
        let mut record = STANDARD_NO_PAD.encode(json);
        record.push('\n');
        record
    }

    /// Decode one subscriber record. An empty line is a keep-alive and
    /// yields `Ok(None)`.
    pub fn from_wire_record(line: &str) -> Result<Option<Self>, WireError> {
        let line = line.trim_end_matches(['\n', '\r']);
        if line.is_empty() {
            return Ok(None);
        }
        let json = STANDARD_NO_PAD.decode(line)?;
        Ok(Some(serde_json::from_slice(&json)?))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    const SAMPLE: &str = r#"{
        "node_ip_addr": "95.217.106.189",
        "node_peer_id": "12D3KooWSxxCtzRLfUzoxgRYW9fTKWPUujdvStuwCPSPUN3629mb",
        "sync_status": "Synced",
        "protocol_state_hash": "3NKxyz",
        "git_commit": "abc123",
        "uptime_minutes": 1440,
        "peers": [
            {"host": "10.0.0.2", "peer_id": "B", "libp2p_port": 8302},
            null,
            {"host": "seed.example.org", "peer_id": "C", "libp2p_port": 10001}
        ],
        "k_block_hashes_and_timestamps": [["3NLhash", "2021-03-17T00:00:00Z"]],
        "ban_statuses": []
    }"#;

    #[test]
    fn test_parse_status_document() {
        let doc = StatusDocument::from_slice(SAMPLE.as_bytes()).unwrap();
        assert_eq!(doc.sync_status, "Synced");
        assert_eq!(doc.uptime_minutes, 1440);
        assert_eq!(doc.peers.len(), 2, "null peer entries are skipped");
        assert_eq!(doc.peers[1].peer_id, "C");
        assert_eq!(
            doc.k_block_hashes_and_timestamps,
            vec![("3NLhash".to_string(), "2021-03-17T00:00:00Z".to_string())]
        );
    }

    #[test]
    fn test_missing_and_null_fields_default() {
        let doc = StatusDocument::from_slice(br#"{"sync_status": null, "peers": null}"#).unwrap();
        assert_eq!(doc, StatusDocument::default());
    }

    #[test]
    fn test_malformed_document_is_an_error() {
        assert!(StatusDocument::from_slice(b"").is_err());
        assert!(StatusDocument::from_slice(br#"{"sync_status": "Syn"#).is_err());
        assert!(StatusDocument::from_slice(br#"{"uptime_minutes": "ten"}"#).is_err());
    }

    #[test]
    fn test_peer_summary_to_address() {
        let summary = PeerSummary {
            host: "10.0.0.2".into(),
            peer_id: "B".into(),
            libp2p_port: 8302,
        };
        let addr = summary.to_peer_address().unwrap();
        assert_eq!(addr.id.as_str(), "B");
        assert_eq!(addr.to_string(), "/ip4/10.0.0.2/tcp/8302/p2p/B");

        let bad_port = PeerSummary {
            libp2p_port: 70_000,
            ..summary.clone()
        };
        assert!(bad_port.to_peer_address().is_err());

        let no_id = PeerSummary {
            peer_id: String::new(),
            ..summary
        };
        assert!(no_id.to_peer_address().is_err());
    }

    fn entry(connected: bool, doc: Option<StatusDocument>) -> CacheEntry {
        CacheEntry {
            connected,
            last_document: doc,
            last_address: PeerAddress::parse("A@127.0.0.1:7000").unwrap(),
            last_probe: Instant::now(),
        }
    }

    #[test]
    fn test_view_projects_entry() {
        let id = PeerId::new("A").unwrap();
        let doc = StatusDocument::from_slice(SAMPLE.as_bytes()).unwrap();
        let view = NotificationView::from_entry(&id, &entry(true, Some(doc)));
        assert!(view.connected);
        assert_eq!(view.sync_status, "Synced");
        assert_eq!(view.git_commit, "abc123");

        let offline = NotificationView::from_entry(&id, &entry(false, None));
        assert!(!offline.connected);
        assert_eq!(offline.sync_status, "");
        assert_eq!(offline.uptime_minutes, 0);
    }

    #[test]
    fn test_wire_record_round_trip() {
        let id = PeerId::new("A").unwrap();
        let doc = StatusDocument::from_slice(SAMPLE.as_bytes()).unwrap();
        let view = NotificationView::from_entry(&id, &entry(true, Some(doc)));

        let record = view.to_wire_record();
        assert!(record.ends_with('\n'));
        assert!(!record.trim_end().contains('='), "records carry no padding");

        let decoded = NotificationView::from_wire_record(&record).unwrap().unwrap();
        assert_eq!(decoded, view);
    }

    #[test]
    fn test_wire_record_json_layout() {
        let view = NotificationView {
            connected: false,
            peer_id: PeerId::new("A").unwrap(),
            sync_status: String::new(),
            protocol_state_hash: String::new(),
            git_commit: String::new(),
            uptime_minutes: 0,
        };
        let record = view.to_wire_record();
        let json = STANDARD_NO_PAD.decode(record.trim_end()).unwrap();
        assert_eq!(
            String::from_utf8(json).unwrap(),
            r#"{"connected":false,"peer_id":"A","sync_status":"","protocol_state_hash":"","git_commit":"","uptime_minutes":0}"#
        );
    }

    #[test]
    fn test_keepalive_and_invalid_records() {
        assert!(NotificationView::from_wire_record(KEEPALIVE_RECORD)
            .unwrap()
            .is_none());
        assert!(NotificationView::from_wire_record("").unwrap().is_none());
        assert!(matches!(
            NotificationView::from_wire_record("e30="),
            Err(WireError::Base64(_))
        ));
        // "{}" is valid base64 but lacks required fields.
        assert!(matches!(
            NotificationView::from_wire_record("e30"),
            Err(WireError::Json(_))
        ));
    }
}
