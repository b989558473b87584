//! Metrics and tracing setup for nodewatch.
//!
//! Provides a global [`ProxyMetrics`] singleton backed by the `prometheus`
//! crate, plus an optional lightweight HTTP server for Prometheus scraping.

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::OnceLock;

// ────────────────────────── Tracing ──────────────────────────

/// Initialize the tracing subscriber with env-filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

// ────────────────────────── Prometheus metrics ──────────────────────────

static METRICS: OnceLock<ProxyMetrics> = OnceLock::new();

/// Retrieve (or lazily create) the global metrics singleton.
pub fn metrics() -> &'static ProxyMetrics {
    METRICS.get_or_init(ProxyMetrics::new)
}

/// All Prometheus metrics for a nodewatch proxy.
pub struct ProxyMetrics {
    pub registry: Registry,

    // ── Probes ──
    pub probes_by_outcome: IntCounterVec,
    pub probe_latency_secs: HistogramVec,
    pub response_bytes: Histogram,

    // ── Cache ──
    pub peers_known: IntGauge,
    pub peers_connected: IntGauge,
    pub discovery_ticks: IntCounter,

    // ── Subscribers ──
    pub subscribers_active: IntGauge,
    pub notifications_sent: IntCounter,
    pub notifications_dropped: IntCounter,
    pub subscribers_evicted: IntCounter,
}

// Manual Debug impl because prometheus types don't derive Debug.
impl std::fmt::Debug for ProxyMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyMetrics").finish_non_exhaustive()
    }
}

/// Histogram buckets (seconds) for probe latency.
const LATENCY_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Histogram buckets (bytes) for status response sizes.
const SIZE_BUCKETS: &[f64] = &[
    256.0,
    1024.0,
    4096.0,
    16384.0,
    65536.0,
    262144.0,
    1048576.0,
    4194304.0,
];

impl ProxyMetrics {
    fn new() -> Self {
        let registry = Registry::new();

        let probes_by_outcome = IntCounterVec::new(
            Opts::new(
                "nodewatch_probes_total",
                "Status probes, by outcome (ok or error kind)",
            ),
            &["outcome"],
        )
        .expect("probes_by_outcome counter vec");

        let probe_latency_secs = HistogramVec::new(
            HistogramOpts::new(
                "nodewatch_probe_latency_seconds",
                "Status probe latency in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["outcome"],
        )
        .expect("probe_latency_secs histogram");

        let response_bytes = Histogram::with_opts(
            HistogramOpts::new(
                "nodewatch_status_response_bytes",
                "Size of status responses read from peers",
            )
            .buckets(SIZE_BUCKETS.to_vec()),
        )
        .expect("response_bytes histogram");

        let peers_known = IntGauge::with_opts(Opts::new(
            "nodewatch_peers_known",
            "Peers present in the status cache",
        ))
        .expect("peers_known gauge");
        let peers_connected = IntGauge::with_opts(Opts::new(
            "nodewatch_peers_connected",
            "Cached peers whose last probe reached them",
        ))
        .expect("peers_connected gauge");
        let discovery_ticks = IntCounter::with_opts(Opts::new(
            "nodewatch_discovery_ticks_total",
            "Completed discovery loop ticks",
        ))
        .expect("discovery_ticks counter");

        let subscribers_active = IntGauge::with_opts(Opts::new(
            "nodewatch_subscribers_active",
            "Registered subscriber streams",
        ))
        .expect("subscribers_active gauge");
        let notifications_sent = IntCounter::with_opts(Opts::new(
            "nodewatch_notifications_sent_total",
            "Updates queued to subscribers",
        ))
        .expect("notifications_sent counter");
        let notifications_dropped = IntCounter::with_opts(Opts::new(
            "nodewatch_notifications_dropped_total",
            "Updates dropped because a subscriber queue was full",
        ))
        .expect("notifications_dropped counter");
        let subscribers_evicted = IntCounter::with_opts(Opts::new(
            "nodewatch_subscribers_evicted_total",
            "Subscribers evicted for falling behind",
        ))
        .expect("subscribers_evicted counter");

        registry
            .register(Box::new(probes_by_outcome.clone()))
            .expect("register probes_by_outcome");
        registry
            .register(Box::new(probe_latency_secs.clone()))
            .expect("register probe_latency_secs");
        registry
            .register(Box::new(response_bytes.clone()))
            .expect("register response_bytes");
        registry
            .register(Box::new(peers_known.clone()))
            .expect("register peers_known");
        registry
            .register(Box::new(peers_connected.clone()))
            .expect("register peers_connected");
        registry
            .register(Box::new(discovery_ticks.clone()))
            .expect("register discovery_ticks");
        registry
            .register(Box::new(subscribers_active.clone()))
            .expect("register subscribers_active");
        registry
            .register(Box::new(notifications_sent.clone()))
            .expect("register notifications_sent");
        registry
            .register(Box::new(notifications_dropped.clone()))
            .expect("register notifications_dropped");
        registry
            .register(Box::new(subscribers_evicted.clone()))
            .expect("register subscribers_evicted");

        Self {
            registry,
            probes_by_outcome,
            probe_latency_secs,
            response_bytes,
            peers_known,
            peers_connected,
            discovery_ticks,
            subscribers_active,
            notifications_sent,
            notifications_dropped,
            subscribers_evicted,
        }
    }
}

/// Encode all registered metrics in Prometheus text exposition format.
pub fn encode_metrics() -> String {
    let m = metrics();
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder
        .encode(&m.registry.gather(), &mut buf)
        .expect("prometheus text encoding");
    String::from_utf8(buf).expect("prometheus output is valid UTF-8")
}

/// Record the outcome and latency of one probe.
pub fn observe_probe(outcome: &str, elapsed_secs: f64) {
    let m = metrics();
    m.probes_by_outcome.with_label_values(&[outcome]).inc();
    m.probe_latency_secs
        .with_label_values(&[outcome])
        .observe(elapsed_secs);
}

// ────────────────────────── Metrics HTTP server ──────────────────────────

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

async fn metrics_handler(
    _req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    let body = encode_metrics();
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
        .body(Full::new(Bytes::from(body)))
        .expect("valid HTTP response"))
}

/// Serve Prometheus metrics on the given address (`GET /metrics`).
///
/// Call from a `tokio::spawn`.
pub async fn serve_metrics(
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on http://{}/metrics", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(metrics_handler))
                .await
            {
                tracing::debug!("metrics connection error: {}", e);
            }
        });
    }
}

// ────────────────────────── Tests ──────────────────────────
