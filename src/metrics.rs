// ===============================
// src/metrics.rs
// ===============================
use std::convert::Infallible;
use std::net::SocketAddr;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use tracing::{error, info};

use crate::shutdown::Shutdown;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Mirror pipeline --------
pub static FILLS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("fills_total", "terminal fills seen on the source stream"), &["market"])
        .unwrap()
});

pub static DUPLICATES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("fills_duplicate_total", "fills dropped by the dedup ledger"),
        &["market"],
    )
    .unwrap()
});

pub static MALFORMED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("stream_malformed_total", "undecodable stream payloads"),
        &["market"],
    )
    .unwrap()
});

pub static OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mirror_outcomes_total", "mirror results (labels: outcome, market)"),
        &["outcome", "market"],
    )
    .unwrap()
});

// Latency fill event -> mirror finished (milliseconds)
pub static LAT_MIRROR: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(HistogramOpts::new(
        "latency_mirror_ms",
        "Latency from mirror start to outcome (ms)",
    ))
    .unwrap()
});

pub static LEDGER_SIZE: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("ledger_entries", "fill ids in the dedup ledger").unwrap());

// -------- User-data stream health --------
pub static WS_CONNECTED: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("userstream_connected", "1 if user-data WS connected, 0 otherwise"),
        &["market"],
    )
    .unwrap()
});

pub static WS_RECONNECTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("userstream_reconnects_total", "Number of reconnects to the user-data WS"),
        &["market"],
    )
    .unwrap()
});

pub static WS_LAST_EVENT_TS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("userstream_last_event_ts", "Unix seconds of the last received WS event"),
        &["market"],
    )
    .unwrap()
});

pub static KEEPALIVE_OK: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("listenkey_keepalive_ok_total", "Successful listenKey keepalive calls"),
        &["market"],
    )
    .unwrap()
});

pub static KEEPALIVE_ERR: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("listenkey_keepalive_err_total", "Failed listenKey keepalive calls"),
        &["market"],
    )
    .unwrap()
});

// ---- Config visibility ----
pub static CONFIG_STREAM: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_stream", "1 if the watched stream is mirrored, 0 if only logged"),
        &["market"],
    )
    .unwrap()
});

pub static CONFIG_DEMO: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("config_demo", "1 when running against testnet/demo").unwrap());

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(FILLS.clone())),
        REGISTRY.register(Box::new(DUPLICATES.clone())),
        REGISTRY.register(Box::new(MALFORMED.clone())),
        REGISTRY.register(Box::new(OUTCOMES.clone())),
        REGISTRY.register(Box::new(LAT_MIRROR.clone())),
        REGISTRY.register(Box::new(LEDGER_SIZE.clone())),
        REGISTRY.register(Box::new(WS_CONNECTED.clone())),
        REGISTRY.register(Box::new(WS_RECONNECTS.clone())),
        REGISTRY.register(Box::new(WS_LAST_EVENT_TS.clone())),
        REGISTRY.register(Box::new(KEEPALIVE_OK.clone())),
        REGISTRY.register(Box::new(KEEPALIVE_ERR.clone())),
        REGISTRY.register(Box::new(CONFIG_STREAM.clone())),
        REGISTRY.register(Box::new(CONFIG_DEMO.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

async fn handle(req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let rsp = match req.uri().path() {
        "/" | "/metrics" => Response::builder()
            .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
            .body(Body::from(encode_metrics())),
        _ => Response::builder().status(StatusCode::NOT_FOUND).body(Body::empty()),
    };
    Ok(rsp.unwrap_or_else(|_| Response::new(Body::empty())))
}

/// Serve GET / and /metrics until shutdown.
pub async fn serve_metrics(port: u16, shutdown: Shutdown) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let builder = match Server::try_bind(&addr) {
        Ok(b) => b,
        Err(e) => {
            error!(?e, %addr, "metrics bind failed, metrics disabled");
            return;
        }
    };
    let make_svc = make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(handle)) });
    info!(%addr, "metrics listening on / and /metrics");
    let server = builder
        .serve(make_svc)
        .with_graceful_shutdown(async move { shutdown.cancelled().await });
    if let Err(e) = server.await {
        error!(?e, "metrics server error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn metrics_endpoint_renders_registry() {
        init();
        OUTCOMES.with_label_values(&["success", "spot"]).inc();
        let rsp = handle(Request::get("/metrics").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(rsp.status(), StatusCode::OK);
        let body = hyper::body::to_bytes(rsp.into_body()).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("mirror_outcomes_total"));

        let missing = handle(Request::get("/nope").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
