//! nodewatch: entry point for a peer-status proxy.
//!
//! `nodewatch [config.yaml]` loads config, probes the seed peers, runs the
//! discovery loop over the TCP transport, and serves the subscriber stream
//! on the configured listen address.
//!
//! `nodewatch watch <proxy-addr> [config.yaml]` subscribes to a running
//! proxy and prints every update as a JSON line.

use nodewatch_config::ProxyConfig;
use nodewatch_net::{ProxyServer, ServerConfig, SubscriberClient, TcpTransport};
use nodewatch_status::{
    DiscoveryConfig, FetchConfig, NodeWatch, NotifyPolicy, SubscriberConfig, WatchConfig,
};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    nodewatch_metrics::init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("watch") => {
            let proxy = args
                .get(1)
                .ok_or("usage: nodewatch watch <proxy-addr> [config.yaml]")?;
            let config = load_config(args.get(2).map(String::as_str));
            watch(proxy, &config).await
        }
        path => run_proxy(load_config(path)).await,
    }
}

fn load_config(path: Option<&str>) -> ProxyConfig {
    let config_path = path.unwrap_or("config.yaml");
    nodewatch_config::load_from_file(std::path::Path::new(config_path)).unwrap_or_else(|e| {
        tracing::warn!(
            "failed to load config from {}: {}, using defaults",
            config_path,
            e
        );
        ProxyConfig::default()
    })
}

fn watch_config(config: &ProxyConfig) -> WatchConfig {
    WatchConfig {
        fetch: FetchConfig {
            chunk_size: config.fetch.chunk_size,
            max_response_bytes: config.fetch.max_response_bytes,
            connect_timeout: Duration::from_millis(config.fetch.connect_timeout_ms),
            stream_timeout: Duration::from_millis(config.fetch.stream_timeout_ms),
            read_timeout: Duration::from_millis(config.fetch.read_timeout_ms),
            read_idle_timeout: Duration::from_millis(config.fetch.read_idle_timeout_ms),
        },
        discovery: DiscoveryConfig {
            tick_interval: config.discovery.tick_interval(),
            refresh_threshold: config.discovery.refresh_threshold(),
            max_concurrent_probes: config.discovery.max_concurrent_probes,
            local_peer_id: config.local_peer_id(),
        },
        subscriber: subscriber_config(config),
        notify: NotifyPolicy {
            queue_capacity: config.subscriber.queue_capacity,
            max_consecutive_drops: config.subscriber.max_consecutive_drops,
            max_subscribers: config.subscriber.max_subscribers,
        },
    }
}

fn subscriber_config(config: &ProxyConfig) -> SubscriberConfig {
    SubscriberConfig {
        keepalive_interval: Duration::from_secs(config.subscriber.keepalive_interval_secs),
        write_timeout: Duration::from_millis(config.subscriber.write_timeout_ms),
    }
}

async fn run_proxy(config: ProxyConfig) -> Result<(), Box<dyn std::error::Error>> {
    let network_key = config.network_key_hex();
    tracing::info!(
        rendezvous = %config.rendezvous_string(),
        seeds = config.seeds.len(),
        "starting nodewatch proxy"
    );

    let transport = TcpTransport::new(network_key.clone());
    let watch = NodeWatch::new(transport, watch_config(&config));
    let cancel = CancellationToken::new();

    // Spawn metrics HTTP server if configured
    if let Some(metrics_port) = config.metrics_port {
        let metrics_addr = std::net::SocketAddr::from(([0, 0, 0, 0], metrics_port));
        tokio::spawn(async move {
            if let Err(e) = nodewatch_metrics::serve_metrics(metrics_addr).await {
                tracing::warn!("metrics server failed: {}", e);
            }
        });
    }

    let server_config = ServerConfig {
        subscriber: subscriber_config(&config),
        ..ServerConfig::new(network_key)
    };
    let server = ProxyServer::bind(config.listen, watch.store().clone(), server_config).await?;
    let server_task = tokio::spawn(server.serve(cancel.clone()));

    let seeds = config.seed_addresses();
    if seeds.is_empty() {
        tracing::info!("no seeds configured, serving an empty cache");
    }
    let report = watch.bootstrap(&seeds, &cancel).await;
    tracing::info!(
        "bootstrap complete, {} of {} seed(s) answered",
        report.discovered - report.failed,
        seeds.len()
    );
    let discovery_task = watch.spawn_discovery(cancel.clone());

    tokio::signal::ctrl_c().await?;
    tracing::info!("received Ctrl+C, shutting down");
    cancel.cancel();

    discovery_task.await?;
    server_task.await??;
    Ok(())
}

async fn watch(proxy: &str, config: &ProxyConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = SubscriberClient::connect(proxy, &config.network_key_hex()).await?;
    tracing::info!("subscribed to {}", proxy);

    loop {
        tokio::select! {
            update = client.next_view() => match update? {
                Some(view) => println!("{}", serde_json::to_string(&view)?),
                None => {
                    tracing::info!("proxy closed the stream");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}
