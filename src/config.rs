// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : fill_mirror — Binance -> Bitget trade mirroring engine in Rust
Module  : config.rs
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
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use dotenvy::dotenv;
use url::Url;

use crate::domain::MarketKind;
use crate::error::ConfigError;

/// Stream mana yang diikuti (TRADING_MODE).
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TradingMode {
    Spot,
    Futures,
    Both,
}

impl TradingMode {
    pub fn stream_kinds(&self) -> Vec<MarketKind> {
        match self {
            TradingMode::Spot => vec![MarketKind::Spot],
            TradingMode::Futures => vec![MarketKind::UsdFutures, MarketKind::CoinFutures],
            TradingMode::Both => MarketKind::ALL.to_vec(),
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(name = "fill_mirror", version, about = "Mirror Binance fills onto Bitget")]
pub struct Args {
    // credentials
    #[arg(long, env = "BINANCE_API_KEY", hide_env_values = true)]
    pub binance_api_key: Option<String>,
    #[arg(long, env = "BITGET_API_KEY", hide_env_values = true)]
    pub bitget_api_key: Option<String>,
    #[arg(long, env = "BITGET_API_SECRET", hide_env_values = true)]
    pub bitget_api_secret: Option<String>,
    #[arg(long, env = "BITGET_PASSPHRASE", hide_env_values = true)]
    pub bitget_passphrase: Option<String>,

    // mode
    #[arg(long, env = "TRADING_MODE", value_enum, default_value_t = TradingMode::Both)]
    pub trading_mode: TradingMode,
    /// COIN-M fills are only logged unless this is set.
    #[arg(long, env = "MIRROR_COIN_FUTURES", default_value_t = false)]
    pub mirror_coin_futures: bool,
    /// Binance testnet + Bitget demo trading.
    #[arg(long, env = "DEMO", default_value_t = false)]
    pub demo: bool,

    // files/metrics
    #[arg(long, env = "PROCESSED_TRADES_FILE", default_value = "processed_trades.txt")]
    pub ledger_file: PathBuf,
    #[arg(long, env = "RECORD_FILE")]
    pub record_file: Option<String>,
    #[arg(long, env = "METRICS_PORT", default_value_t = 9898)]
    pub metrics_port: u16,

    // timings (detik)
    #[arg(long, env = "KEEPALIVE_SECS", default_value_t = 30 * 60)]
    pub keepalive_secs: u64,
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = 10)]
    pub http_timeout_secs: u64,
    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value_t = 10)]
    pub shutdown_grace_secs: u64,

    // endpoint overrides
    #[arg(long, env = "BINANCE_SPOT_REST_URL")]
    pub binance_spot_rest_url: Option<String>,
    #[arg(long, env = "BINANCE_SPOT_WS_URL")]
    pub binance_spot_ws_url: Option<String>,
    #[arg(long, env = "BINANCE_USDM_REST_URL")]
    pub binance_usdm_rest_url: Option<String>,
    #[arg(long, env = "BINANCE_USDM_WS_URL")]
    pub binance_usdm_ws_url: Option<String>,
    #[arg(long, env = "BINANCE_COINM_REST_URL")]
    pub binance_coinm_rest_url: Option<String>,
    #[arg(long, env = "BINANCE_COINM_WS_URL")]
    pub binance_coinm_ws_url: Option<String>,
    #[arg(long, env = "BITGET_REST_URL")]
    pub bitget_rest_url: Option<String>,
}

/// REST + WS base per stream kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamEndpoint {
    pub rest: String,
    pub ws: String,
}

#[derive(Clone, Debug)]
pub struct BinanceEndpoints {
    pub spot: StreamEndpoint,
    pub usdm: StreamEndpoint,
    pub coinm: StreamEndpoint,
}

impl BinanceEndpoints {
    // Endpoint default per mode
    pub fn defaults(demo: bool) -> Self {
        if demo {
            Self {
                spot: ep("https://testnet.binance.vision", "wss://testnet.binance.vision/ws"),
                usdm: ep("https://testnet.binancefuture.com", "wss://stream.binancefuture.com/ws"),
                coinm: ep("https://testnet.binancefuture.com", "wss://dstream.binancefuture.com/ws"),
            }
        } else {
            Self {
                spot: ep("https://api.binance.com", "wss://stream.binance.com:9443/ws"),
                usdm: ep("https://fapi.binance.com", "wss://fstream.binance.com/ws"),
                coinm: ep("https://dapi.binance.com", "wss://dstream.binance.com/ws"),
            }
        }
    }

    pub fn for_kind(&self, kind: MarketKind) -> &StreamEndpoint {
        match kind {
            MarketKind::Spot => &self.spot,
            MarketKind::UsdFutures => &self.usdm,
            MarketKind::CoinFutures => &self.coinm,
        }
    }
}

fn ep(rest: &str, ws: &str) -> StreamEndpoint {
    StreamEndpoint { rest: rest.to_string(), ws: ws.to_string() }
}

#[derive(Clone, Debug)]
pub struct BitgetCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: String,
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub binance_api_key: String,
    pub bitget: BitgetCredentials,
    pub binance: BinanceEndpoints,
    pub bitget_rest_url: String,
    pub streams: Vec<MarketKind>,
    pub mirror_coin_futures: bool,
    pub demo: bool,
    pub ledger_file: PathBuf,
    pub record_file: Option<String>,
    pub metrics_port: u16,
    pub keepalive_interval: Duration,
    pub http_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Settings {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let binance_api_key = required(args.binance_api_key, "BINANCE_API_KEY")?;
        let bitget = BitgetCredentials {
            api_key: required(args.bitget_api_key, "BITGET_API_KEY")?,
            api_secret: required(args.bitget_api_secret, "BITGET_API_SECRET")?,
            passphrase: required(args.bitget_passphrase, "BITGET_PASSPHRASE")?,
        };

        let mut binance = BinanceEndpoints::defaults(args.demo);
        override_url(&mut binance.spot.rest, args.binance_spot_rest_url)?;
        override_url(&mut binance.spot.ws, args.binance_spot_ws_url)?;
        override_url(&mut binance.usdm.rest, args.binance_usdm_rest_url)?;
        override_url(&mut binance.usdm.ws, args.binance_usdm_ws_url)?;
        override_url(&mut binance.coinm.rest, args.binance_coinm_rest_url)?;
        override_url(&mut binance.coinm.ws, args.binance_coinm_ws_url)?;

        // Bitget demo trading memakai host yang sama + header paptrading
        let mut bitget_rest_url = "https://api.bitget.com".to_string();
        override_url(&mut bitget_rest_url, args.bitget_rest_url)?;

        let streams = args.trading_mode.stream_kinds();
        if streams.is_empty() {
            return Err(ConfigError::NoStreams);
        }

        Ok(Self {
            binance_api_key,
            bitget,
            binance,
            bitget_rest_url,
            streams,
            mirror_coin_futures: args.mirror_coin_futures,
            demo: args.demo,
            ledger_file: args.ledger_file,
            record_file: args.record_file,
            metrics_port: args.metrics_port,
            // keepalive must stay well under the 60 minute listen-key ttl
            keepalive_interval: Duration::from_secs(args.keepalive_secs.clamp(1, 30 * 60)),
            http_timeout: Duration::from_secs(args.http_timeout_secs.max(1)),
            shutdown_grace: Duration::from_secs(args.shutdown_grace_secs),
        })
    }
}

fn required(v: Option<String>, key: &'static str) -> Result<String, ConfigError> {
    match v {
        Some(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => Err(ConfigError::MissingCredential(key)),
    }
}

fn override_url(slot: &mut String, v: Option<String>) -> Result<(), ConfigError> {
    if let Some(raw) = v.filter(|s| !s.trim().is_empty()) {
        let raw = raw.trim().trim_end_matches('/').to_string();
        Url::parse(&raw).map_err(|e| ConfigError::BadUrl(raw.clone(), e.to_string()))?;
        *slot = raw;
    }
    Ok(())
}

pub fn load() -> Result<Settings, ConfigError> {
    // Pastikan .env dibaca sebelum clap membaca ENV
    let _ = dotenv();
    Settings::from_args(Args::parse())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Vec<&'static str> {
        vec![
            "fill_mirror",
            "--binance-api-key",
            "bk",
            "--bitget-api-key",
            "gk",
            "--bitget-api-secret",
            "gs",
            "--bitget-passphrase",
            "gp",
        ]
    }

    #[test]
    fn trading_mode_selects_streams() {
        assert_eq!(TradingMode::Spot.stream_kinds(), vec![MarketKind::Spot]);
        assert_eq!(
            TradingMode::Futures.stream_kinds(),
            vec![MarketKind::UsdFutures, MarketKind::CoinFutures]
        );
        assert_eq!(TradingMode::Both.stream_kinds().len(), 3);
    }

    #[test]
    fn missing_credentials_is_fatal() {
        let args = Args::try_parse_from(["fill_mirror", "--binance-api-key", "bk"]).unwrap();
        let err = Settings::from_args(args).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential("BITGET_API_KEY")));
    }

    #[test]
    fn demo_switches_binance_endpoints_and_overrides_apply() {
        let mut argv = base_args();
        argv.extend(["--demo", "--trading-mode", "spot", "--binance-usdm-ws-url", "ws://127.0.0.1:9000/ws/"]);
        let s = Settings::from_args(Args::try_parse_from(argv).unwrap()).unwrap();
        assert!(s.demo);
        assert_eq!(s.streams, vec![MarketKind::Spot]);
        assert_eq!(s.binance.spot.rest, "https://testnet.binance.vision");
        assert_eq!(s.binance.usdm.ws, "ws://127.0.0.1:9000/ws");
        assert_eq!(s.keepalive_interval, Duration::from_secs(1800));
    }

    #[test]
    fn bad_override_url_is_rejected() {
        let mut argv = base_args();
        argv.extend(["--bitget-rest-url", "not a url"]);
        let err = Settings::from_args(Args::try_parse_from(argv).unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::BadUrl(_, _)));
    }
}
