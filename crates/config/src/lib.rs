//! Configuration schema and loader for nodewatch proxies.

use nodewatch_common::{PeerAddress, PeerId, RESPONSE_CHUNK_SIZE};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Chain identifier of Mina mainnet.
pub const MAINNET_CHAIN_ID: &str =
    "5f704cc0c82e0ed70e873f0893d7e06f148524e3f0bdae2afb02e7819a0c24d1";

/// Top-level proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Address the subscriber listener binds to.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Identity this proxy announces. Peers advertising it are never probed.
    #[serde(default)]
    pub peer_id: Option<String>,

    /// Chain the proxy joins; the network key is derived from it.
    #[serde(default = "default_chain_id")]
    pub chain_id: String,

    /// Seed peer addresses probed before the first discovery tick.
    #[serde(default = "default_seeds")]
    pub seeds: Vec<String>,

    #[serde(default)]
    pub discovery: DiscoverySettings,

    #[serde(default)]
    pub fetch: FetchSettings,

    #[serde(default)]
    pub subscriber: SubscriberSettings,

    /// Optional Prometheus metrics HTTP port.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySettings {
    /// Period of the refresh loop, in seconds.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// Age after which a cached entry is re-probed, in seconds.
    #[serde(default = "default_refresh_threshold_secs")]
    pub refresh_threshold_secs: u64,

    /// Probes run concurrently within one tick.
    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            refresh_threshold_secs: default_refresh_threshold_secs(),
            max_concurrent_probes: default_max_concurrent_probes(),
        }
    }
}

impl DiscoverySettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn refresh_threshold(&self) -> Duration {
        Duration::from_secs(self.refresh_threshold_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSettings {
    /// Size of one response read, in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Hard cap on a status response, in bytes.
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,

    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub stream_timeout_ms: u64,

    /// Bound on the wait for the first byte of each response chunk.
    #[serde(default = "default_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Quiet period after which a partially filled chunk is considered complete.
    #[serde(default = "default_read_idle_timeout_ms")]
    pub read_idle_timeout_ms: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_response_bytes: default_max_response_bytes(),
            connect_timeout_ms: default_timeout_ms(),
            stream_timeout_ms: default_timeout_ms(),
            read_timeout_ms: default_timeout_ms(),
            read_idle_timeout_ms: default_read_idle_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberSettings {
    /// Keep-alive period, in seconds.
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,

    /// Bounded queue length per subscriber.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Consecutive dropped updates after which a subscriber is evicted.
    #[serde(default = "default_max_consecutive_drops")]
    pub max_consecutive_drops: u32,

    /// Bound on one write + flush to a subscriber.
    #[serde(default = "default_timeout_ms")]
    pub write_timeout_ms: u64,

    #[serde(default = "default_max_subscribers")]
    pub max_subscribers: usize,
}

impl Default for SubscriberSettings {
    fn default() -> Self {
        Self {
            keepalive_interval_secs: default_keepalive_interval_secs(),
            queue_capacity: default_queue_capacity(),
            max_consecutive_drops: default_max_consecutive_drops(),
            write_timeout_ms: default_timeout_ms(),
            max_subscribers: default_max_subscribers(),
        }
    }
}

// --- Defaults ---

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 23333))
}
fn default_chain_id() -> String {
    MAINNET_CHAIN_ID.to_string()
}
fn default_tick_interval_secs() -> u64 {
    10
}
fn default_refresh_threshold_secs() -> u64 {
    60
}
fn default_max_concurrent_probes() -> usize {
    1
}
fn default_chunk_size() -> usize {
    RESPONSE_CHUNK_SIZE
}
fn default_max_response_bytes() -> usize {
    32 * RESPONSE_CHUNK_SIZE
}
fn default_timeout_ms() -> u64 {
    10_000
}
fn default_read_idle_timeout_ms() -> u64 {
    500
}
fn default_keepalive_interval_secs() -> u64 {
    10
}
fn default_queue_capacity() -> usize {
    256
}
fn default_max_consecutive_drops() -> u32 {
    64
}
fn default_max_subscribers() -> usize {
    16
}

/// Mainnet seed peers.
pub fn default_seeds() -> Vec<String> {
    [
        "/dns4/seed-1.mainnet.o1test.net/tcp/10000/p2p/12D3KooWCa1d7G3SkRxy846qTvdAFX69NnoYZ32orWVLqJcDVGHW",
        "/dns4/seed-2.mainnet.o1test.net/tcp/10001/p2p/12D3KooWK4NfthViCTyLgVQa1WvqDC1NccVxGruCXCZUt3GqvFvn",
        "/dns4/seed-3.mainnet.o1test.net/tcp/10002/p2p/12D3KooWNofeYVAJXA3WGg2qCDhs3GEe71kTmKpFQXRbZmCz1Vr7",
        "/dns4/mina-seed.bitcat365.com/tcp/10001/p2p/12D3KooWQzozNTDKL7MqUh6Nh11GMA4pQhRCAsNTRWxCAzAi4VbE",
        "/dns4/mina-seed-1.zkvalidator.com/tcp/8302/p2p/12D3KooWSR7LMBSfEk3LQUudmsX27yuRHe9NUxwLumurGF5P1MNS",
        "/dns4/mina-1.figment.io/tcp/8302/p2p/12D3KooWSkfwArLtqGMht1a9w3z3QiiqA2E6seBRAk378rvanGRZ",
        "/dns4/mina-seed.staker.space/tcp/8302/p2p/12D3KooWCE97fGwuDCicVNK3ZWF8fVzfNezp3uGjmSc8VrRFem6a",
        "/dns4/mina-seed.genesislab.net/tcp/8302/p2p/12D3KooWRcHiFQsbYgjPSxtMg4Y9ifrvmCFtJQ8Qztqd3z4L9buU",
        "/dns4/mina-seed.hashquark.io/tcp/8302/p2p/12D3KooWRqdbJszoX6AB2E47KR45Kex1RptichA2MDkNSCqX5eb4",
        "/ip4/95.217.106.189/tcp/8302/p2p/12D3KooWSxxCtzRLfUzoxgRYW9fTKWPUujdvStuwCPSPUN3629mb",
        "/dns4/mina.cloud.p2pvalidator.org/tcp/8302/p2p/12D3KooW9qa8CcihmpPbKjN1e8da1RsBS67bExgpVDD9sCjzbHfh",
        "/dns4/mina-seed.dsrvlabs.net/tcp/8302/p2p/12D3KooWFTrtiuscobTsJwvShNzBWH56Jt6hWoZTtYqFFyQWFA7c",
        "/dns4/mina-seed-1.nodeasy.com/tcp/10001/p2p/12D3KooWRMXtoYktAqkNFd9LkT1XpAJWryqje88owWf9v9SpaayN",
        "/dns4/earth.mina.kelepool.pro/tcp/8302/p2p/12D3KooWSBRhKVd9r1JXkRTD4qc9SkNd9ACrRCeW9e6GcDakqHjh",
        "/dns4/seed.minaprotocol.fish/tcp/8302/p2p/12D3KooWQHTEXCbS1xxEMFHdALBTA1uLbFPr3okXvUos57d5seHW",
        "/ip4/159.89.96.164/tcp/8302/p2p/12D3KooWCCZkMjQxsBsSLPmAvFC9RGLz4XjKtdvpKmBdr5zpYz6x",
        "/dns4/seed.mina-staked.cloud/tcp/8302/p2p/12D3KooWNbeghjwB9MKgVniTv4pqtCbtHxjWpidiaoRiMhow3Mr1",
        "/ip4/47.242.110.4/tcp/8302/p2p/12D3KooWKsgKQRNsptXF7MDJ37FzJ9sz6uACuzow6zTJkyog3bWq",
        "/dns4/seed.minaexplorer.com/tcp/8302/p2p/12D3KooWR7coZtrMHvsgsfiWq2GESYypac3i29LFGp6EpbtjxBiJ",
        "/ip4/135.181.63.89/tcp/8302/p2p/12D3KooWNtvMGAvzrDEPBAHhiB7YoSWjPgmLcMmEeLCeoomWT8bT",
        "/ip4/135.181.132.212/tcp/8302/p2p/12D3KooWDGUWGrbHWrzft9iASSeytvbU9QmzxMavxAqqDfz8e7xE",
        "/dns4/seed.piconbello.com/tcp/10001/p2p/12D3KooWRFac2AztcTeen2DYNwnTrmVBvwNDsRiFpDVdTkwdFAHP",
        "/dns4/mina-seed.w3m.one/tcp/10001/p2p/12D3KooWFVvahnR3ofaSNX5XZaUQJ1zbrySjNCJP8K1vjBhHWURB",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            peer_id: None,
            chain_id: default_chain_id(),
            seeds: default_seeds(),
            discovery: DiscoverySettings::default(),
            fetch: FetchSettings::default(),
            subscriber: SubscriberSettings::default(),
            metrics_port: None,
        }
    }
}

// --- Loading ---

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ProxyConfig {
    /// Validate that configuration values are consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discovery.tick_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "discovery.tick_interval_secs must be > 0".into(),
            ));
        }
        if self.discovery.max_concurrent_probes == 0 {
            return Err(ConfigError::Invalid(
                "discovery.max_concurrent_probes must be > 0".into(),
            ));
        }
        if self.fetch.chunk_size == 0 {
            return Err(ConfigError::Invalid("fetch.chunk_size must be > 0".into()));
        }
        if self.fetch.chunk_size > self.fetch.max_response_bytes {
            return Err(ConfigError::Invalid(format!(
                "fetch.chunk_size ({}) must be <= fetch.max_response_bytes ({})",
                self.fetch.chunk_size, self.fetch.max_response_bytes
            )));
        }
        if self.subscriber.keepalive_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "subscriber.keepalive_interval_secs must be > 0".into(),
            ));
        }
        if self.subscriber.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "subscriber.queue_capacity must be > 0".into(),
            ));
        }
        if self.subscriber.max_consecutive_drops == 0 {
            return Err(ConfigError::Invalid(
                "subscriber.max_consecutive_drops must be > 0".into(),
            ));
        }
        if self.chain_id.is_empty() {
            return Err(ConfigError::Invalid("chain_id must not be empty".into()));
        }
        if let Some(id) = &self.peer_id {
            PeerId::new(id.clone())
                .map_err(|e| ConfigError::Invalid(format!("peer_id: {}", e)))?;
        }
        for seed in &self.seeds {
            PeerAddress::parse(seed)
                .map_err(|e| ConfigError::Invalid(format!("seed {:?}: {}", seed, e)))?;
        }
        Ok(())
    }

    /// Parsed seed addresses. Call after [`ProxyConfig::validate`].
    pub fn seed_addresses(&self) -> Vec<PeerAddress> {
        self.seeds
            .iter()
            .filter_map(|s| PeerAddress::parse(s).ok())
            .collect()
    }

    /// The local identity, if one is configured.
    pub fn local_peer_id(&self) -> Option<PeerId> {
        self.peer_id.as_deref().and_then(|s| PeerId::new(s).ok())
    }

    /// Rendezvous string for this chain.
    pub fn rendezvous_string(&self) -> String {
        nodewatch_common::rendezvous_string(&self.chain_id)
    }

    /// Hex-encoded private network key for this chain.
    pub fn network_key_hex(&self) -> String {
        nodewatch_common::network_key_hex(&self.chain_id)
    }
}

/// Load a `ProxyConfig` from a YAML file path.
pub fn load_from_file(path: &std::path::Path) -> Result<ProxyConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    load_from_str(&contents)
}

/// Load a `ProxyConfig` from a YAML string.
pub fn load_from_str(yaml: &str) -> Result<ProxyConfig, ConfigError> {
    let config: ProxyConfig = serde_yaml::from_str(yaml)?;
    config.validate()?;
    Ok(config)
}
