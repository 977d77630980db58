// ===============================
// src/main.rs
// ===============================
/*
 # mode yang aktif + kesehatan stream
curl -s localhost:9898/metrics | egrep '^(config_stream|config_demo|userstream_connected)'

# hasil mirror per market
curl -s localhost:9898/metrics | grep '^mirror_outcomes_total'
*/
/*
=============================================================================
Project : fill_mirror — Binance -> Bitget trade mirroring engine in Rust
Module  : main.rs
Version : 0.5.0
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
Email   : kukuhtw@gmail.com
WhatsApp: https://wa.me/628129893706
LinkedIn: https://id.linkedin.com/in/kukuhtw
License : MIT (see LICENSE)

Summary : Watches Binance spot / USD-M / COIN-M user-data streams, dedups
          every fill against a durable ledger, and mirrors it exactly once
          as an equivalent Bitget order. Exposes Prometheus metrics and
          records JSONL events.

(c) 2025 Kukuh TW. All rights reserved where applicable.
=============================================================================
*/
mod binance;
mod bitget;
mod config;
mod domain;
mod error;
mod executor;
mod ledger;
mod metrics;
mod normalizer;
mod orchestrator;
mod recorder;
mod session;
mod shutdown;
mod symbols;
mod venue;

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::binance::BinanceUserStream;
use crate::bitget::BitgetClient;
use crate::orchestrator::{Orchestrator, OrchestratorConfig};

#[tokio::main]
async fn main() -> ExitCode {
    // ---- Logging ----
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // ---- Config (satu-satunya error yang fatal) ----
    let settings = match config::load() {
        Ok(s) => s,
        Err(e) => {
            error!(%e, "configuration error");
            return ExitCode::FAILURE;
        }
    };

    // ---- Metrics ----
    metrics::init();
    metrics::CONFIG_DEMO.set(settings.demo as i64);

    let streams: Vec<&'static str> = settings.streams.iter().map(|k| k.tag()).collect();
    info!(
        streams = ?streams,
        demo = settings.demo,
        mirror_coin_futures = settings.mirror_coin_futures,
        ledger = %settings.ledger_file.display(),
        record_file = ?settings.record_file,
        bitget_rest = %settings.bitget_rest_url,
        keepalive = ?settings.keepalive_interval,
        "startup config"
    );

    // ---- Venues ----
    let source = match BinanceUserStream::new(
        settings.binance_api_key.clone(),
        settings.binance.clone(),
        settings.http_timeout,
    ) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(%e, "binance client init failed");
            return ExitCode::FAILURE;
        }
    };
    let dest = match BitgetClient::new(
        settings.bitget.clone(),
        settings.bitget_rest_url.clone(),
        settings.demo,
        settings.http_timeout,
    ) {
        Ok(d) => Arc::new(d),
        Err(e) => {
            error!(%e, "bitget client init failed");
            return ExitCode::FAILURE;
        }
    };

    let orch = Orchestrator::new(source, dest, OrchestratorConfig::from(&settings));
    match orch.run(stop_signal()).await {
        Ok(()) => {
            info!("bye");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(%e, "startup failed");
            ExitCode::FAILURE
        }
    }
}

/// Ctrl-C or SIGTERM.
async fn stop_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!(?e, "SIGTERM handler unavailable, ctrl-c only"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(?e, "ctrl-c handler failed");
    }
}
