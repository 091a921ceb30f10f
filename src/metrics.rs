//! Prometheus metrics surface.
//!
//! All collectors live in one [`Registry`] owned by [`Metrics`]. The scan
//! loop writes through the collector handles; the HTTP responder only reads
//! by gathering the registry, which is internally synchronized.

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use log::info;
use prometheus::{Gauge, GaugeVec, IntCounter, IntCounterVec, Opts, Registry, TEXT_FORMAT};
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpListener;

/// Prefix shared by every exported metric.
pub const NAMESPACE: &str = "btle_exporter";

/// Labels of the per-device series.
pub const DEVICE_LABELS: [&str; 3] = ["mac", "name", "model"];

const INDEX_PAGE: &str = "<html><body><a href=/metrics>metrics</a></body></html>";

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("metrics registry error: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("failed to start metrics listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("metrics listener failed: {0}")]
    Serve(#[source] io::Error),
}

/// Handles to every collector the exporter publishes.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub advertisement_count: IntCounter,
    pub advertisement_supported_count: IntCounter,
    pub device_count: IntCounter,
    pub device_supported_count: IntCounter,
    pub device_temperature: GaugeVec,
    pub device_humidity: GaugeVec,
    pub device_battery: GaugeVec,
    pub device_signal: GaugeVec,
    pub device_advertisement_count: IntCounterVec,
    pub device_last_seen: GaugeVec,
}

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(NAMESPACE)
}

impl Metrics {
    /// Create all collectors and register them in a fresh registry.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> Result<IntCounter, MetricsError> {
            let c = IntCounter::with_opts(opts(name, help))?;
            registry.register(Box::new(c.clone()))?;
            Ok(c)
        };
        let gauge_vec = |name: &str, help: &str| -> Result<GaugeVec, MetricsError> {
            let g = GaugeVec::new(opts(name, help), &DEVICE_LABELS)?;
            registry.register(Box::new(g.clone()))?;
            Ok(g)
        };

        let advertisement_count = counter(
            "advertisement_count",
            "The total number of btle advertisements counted",
        )?;
        let advertisement_supported_count = counter(
            "advertisement_supported_count",
            "The total number of supported btle advertisements counted",
        )?;
        let device_count = counter("device_count", "The total number of btle devices detected")?;
        let device_supported_count = counter(
            "device_supported_count",
            "The total number of supported btle devices detected",
        )?;

        let device_temperature = gauge_vec(
            "device_temperature_celcius",
            "Current temperature reading in celcius",
        )?;
        let device_humidity = gauge_vec(
            "device_humidity_percent",
            "Current humidity reading in percent",
        )?;
        let device_battery =
            gauge_vec("device_battery_percent", "Current battery reading in percent")?;
        let device_signal = gauge_vec("device_signal_rssi", "Current signal strength RSSI")?;
        let device_last_seen = gauge_vec(
            "device_advertisement_lastseen_seconds",
            "Unix timestamp of the last advertisement seen",
        )?;

        let device_advertisement_count = IntCounterVec::new(
            opts(
                "device_advertisement_count",
                "Total number of advertisements detected",
            ),
            &DEVICE_LABELS,
        )?;
        registry.register(Box::new(device_advertisement_count.clone()))?;

        let build_info = Gauge::with_opts(
            opts("build_info", "Shows the build info/version")
                .const_label("version", env!("CARGO_PKG_VERSION")),
        )?;
        registry.register(Box::new(build_info.clone()))?;
        build_info.set(1.0);

        Ok(Self {
            registry,
            advertisement_count,
            advertisement_supported_count,
            device_count,
            device_supported_count,
            device_temperature,
            device_humidity,
            device_battery,
            device_signal,
            device_advertisement_count,
            device_last_seen,
        })
    }

    /// Render every registered family in the Prometheus text format.
    pub fn render(&self) -> Result<String, MetricsError> {
        let encoder = prometheus::TextEncoder::new();
        Ok(encoder.encode_to_string(&self.registry.gather())?)
    }
}

async fn metrics_handler(State(metrics): State<Metrics>) -> Response {
    match metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_PAGE)
}

/// Routes served by the metrics responder.
pub fn router(metrics: Metrics) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

/// Bind the metrics listener. Failing here is fatal for the process.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, MetricsError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| MetricsError::Bind { addr, source })
}

/// Serve `/metrics` on an already bound listener until the task is dropped.
pub async fn serve(listener: TcpListener, metrics: Metrics) -> Result<(), MetricsError> {
    if let Ok(addr) = listener.local_addr() {
        info!("{NAMESPACE} metrics engine listening on {addr}");
    }
    axum::serve(listener, router(metrics))
        .await
        .map_err(MetricsError::Serve)
}
