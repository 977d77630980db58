// ===============================
// src/binance.rs
// ===============================
//
// Source venue adapter: Binance user-data streams.
// - listenKey REST pair (create = POST, keepalive = PUT), API-key header only
// - WS connection: {ws_base}/{listenKey}
// - raw payload models (dipakai normalizer.rs)
//
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info};
use url::Url;

use crate::config::BinanceEndpoints;
use crate::domain::{MarketKind, Subscription};
use crate::error::{VenueError, VenueResult};
use crate::venue::{MessageStream, SourceVenue};

/// Binance invalidates a listenKey 60 minutes after the last keepalive.
pub const LISTEN_KEY_TTL: Duration = Duration::from_secs(60 * 60);

/// COIN-M contract face value in USD: 100 for BTC, 10 for every other coin.
pub fn coinm_contract_usd(symbol: &str) -> Decimal {
    if symbol.to_ascii_uppercase().starts_with("BTCUSD") {
        Decimal::ONE_HUNDRED
    } else {
        Decimal::TEN
    }
}

pub fn listen_key_path(kind: MarketKind) -> &'static str {
    match kind {
        MarketKind::Spot => "/api/v3/userDataStream",
        MarketKind::UsdFutures => "/fapi/v1/listenKey",
        MarketKind::CoinFutures => "/dapi/v1/listenKey",
    }
}

pub struct BinanceUserStream {
    http: reqwest::Client,
    api_key: String,
    endpoints: BinanceEndpoints,
    call_timeout: Duration,
}

impl BinanceUserStream {
    pub fn new(api_key: String, endpoints: BinanceEndpoints, call_timeout: Duration) -> VenueResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .map_err(|e| VenueError::Transient(e.to_string()))?;
        Ok(Self { http, api_key, endpoints, call_timeout })
    }

    fn listen_key_url(&self, kind: MarketKind) -> String {
        format!(
            "{}{}",
            self.endpoints.for_kind(kind).rest.trim_end_matches('/'),
            listen_key_path(kind)
        )
    }
}

#[derive(Debug, Deserialize)]
struct ListenKeyResponse {
    #[serde(rename = "listenKey")]
    listen_key: String,
}

#[derive(Debug, Deserialize)]
struct BinanceErrorBody {
    code: i64,
    msg: String,
}

/// Map a non-2xx Binance reply onto the error taxonomy.
pub fn classify_error(status: reqwest::StatusCode, body: &str) -> VenueError {
    if let Ok(err) = serde_json::from_str::<BinanceErrorBody>(body) {
        return match err.code {
            // -2014 bad API-key format, -2015 invalid key/IP/permissions
            -2014 | -2015 | -1022 => VenueError::Auth(err.msg),
            -1003 | -1001 => VenueError::Transient(err.msg),
            code => {
                if status.is_server_error() {
                    VenueError::Transient(err.msg)
                } else {
                    VenueError::Business { code: code.to_string(), msg: err.msg }
                }
            }
        };
    }
    VenueError::from_status(status, body.to_string())
}

#[async_trait]
impl SourceVenue for BinanceUserStream {
    async fn subscribe(&self, kind: MarketKind) -> VenueResult<Subscription> {
        let url = self.listen_key_url(kind);
        let rsp = self.http.post(&url).header("X-MBX-APIKEY", &self.api_key).send().await?;
        let status = rsp.status();
        let body = rsp.text().await?;
        if !status.is_success() {
            return Err(classify_error(status, &body));
        }
        let lk: ListenKeyResponse = serde_json::from_str(&body)?;
        debug!(market = %kind, "listenKey issued");
        Ok(Subscription::new(lk.listen_key, LISTEN_KEY_TTL))
    }

    async fn keepalive(&self, kind: MarketKind, sub: &Subscription) -> VenueResult<()> {
        let url = self.listen_key_url(kind);
        let rsp = self
            .http
            .put(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .query(&[("listenKey", sub.token.as_str())])
            .send()
            .await?;
        let status = rsp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = rsp.text().await.unwrap_or_default();
        Err(classify_error(status, &body))
    }

    async fn connect(&self, kind: MarketKind, sub: &Subscription) -> VenueResult<MessageStream> {
        let ws_url = format!(
            "{}/{}",
            self.endpoints.for_kind(kind).ws.trim_end_matches('/'),
            sub.token
        );
        let url = Url::parse(&ws_url).map_err(|e| VenueError::Malformed(format!("bad ws url: {e}")))?;
        info!(market = %kind, "connecting userDataStream");
        let (ws, _resp) = timeout(self.call_timeout, connect_async(url))
            .await?
            .map_err(|e| VenueError::Transient(e.to_string()))?;

        let stream = ws.filter_map(|frame| async move {
            match frame {
                Ok(Message::Text(txt)) => Some(Ok(txt)),
                Ok(Message::Binary(bytes)) => String::from_utf8(bytes).ok().map(Ok),
                Ok(Message::Close(reason)) => {
                    debug!(?reason, "userDataStream close frame");
                    None
                }
                // ping/pong dijawab otomatis oleh tungstenite
                Ok(_) => None,
                Err(e) => Some(Err(VenueError::Transient(e.to_string()))),
            }
        });
        Ok(stream.boxed())
    }
}

// ---- Raw user-data stream models ----

/// Spot `executionReport`.
#[derive(Debug, Deserialize)]
pub struct SpotExecutionReport {
    #[serde(rename = "E", default)]
    pub event_time: u64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "S")]
    pub side: String,
    #[serde(rename = "q")]
    pub order_qty: String,
    #[serde(rename = "X")]
    pub status: String, // NEW, PARTIALLY_FILLED, FILLED, CANCELED, REJECTED, EXPIRED
    #[serde(rename = "x")]
    pub exec_type: String, // NEW, TRADE, CANCELED, ...
    #[serde(rename = "l", default)]
    pub last_qty: Option<String>,
    #[serde(rename = "z", default)]
    pub cum_qty: Option<String>,
    #[serde(rename = "L", default)]
    pub last_price: Option<String>,
    #[serde(rename = "t", default)]
    pub trade_id: i64,
    #[serde(rename = "T", default)]
    pub trade_time: Option<u64>,
}

/// Futures `ORDER_TRADE_UPDATE` envelope (USD-M and COIN-M share the shape).
#[derive(Debug, Deserialize)]
pub struct FuturesOrderEnvelope {
    #[serde(rename = "E", default)]
    pub event_time: u64,
    #[serde(rename = "o")]
    pub order: OrderTradeUpdate,
}

#[derive(Debug, Deserialize)]
pub struct OrderTradeUpdate {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "S")]
    pub side: String,
    #[serde(rename = "q")]
    pub order_qty: String,
    #[serde(rename = "X")]
    pub status: String,
    #[serde(rename = "x")]
    pub exec_type: String,
    #[serde(rename = "l", default)]
    pub last_qty: Option<String>,
    #[serde(rename = "z", default)]
    pub cum_qty: Option<String>,
    #[serde(rename = "L", default)]
    pub last_price: Option<String>,
    #[serde(rename = "ap", default)]
    pub avg_price: Option<String>,
    #[serde(rename = "t", default)]
    pub trade_id: i64,
    #[serde(rename = "T", default)]
    pub trade_time: Option<u64>,
    #[serde(rename = "R", default)]
    pub reduce_only: bool,
    #[serde(rename = "ps", default)]
    pub position_side: Option<String>, // LONG, SHORT, BOTH
}

/// Spot `outboundAccountPosition`.
#[derive(Debug, Deserialize)]
pub struct SpotAccountPosition {
    #[serde(rename = "B", default)]
    pub balances: Vec<SpotBalance>,
}

#[derive(Debug, Deserialize)]
pub struct SpotBalance {
    #[serde(rename = "a")]
    pub asset: String,
    #[serde(rename = "f")]
    pub free: String,
}

/// Futures `ACCOUNT_UPDATE`.
#[derive(Debug, Deserialize)]
pub struct FuturesAccountEnvelope {
    #[serde(rename = "a")]
    pub account: FuturesAccount,
}

#[derive(Debug, Deserialize)]
pub struct FuturesAccount {
    #[serde(rename = "B", default)]
    pub balances: Vec<FuturesBalance>,
    #[serde(rename = "P", default)]
    pub positions: Vec<FuturesPosition>,
}

#[derive(Debug, Deserialize)]
pub struct FuturesBalance {
    #[serde(rename = "a")]
    pub asset: String,
    #[serde(rename = "wb")]
    pub wallet_balance: String,
}

#[derive(Debug, Deserialize)]
pub struct FuturesPosition {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "pa")]
    pub amount: String,
    #[serde(rename = "ps", default)]
    pub position_side: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_key_paths_per_market() {
        assert_eq!(listen_key_path(MarketKind::Spot), "/api/v3/userDataStream");
        assert_eq!(listen_key_path(MarketKind::UsdFutures), "/fapi/v1/listenKey");
        assert_eq!(listen_key_path(MarketKind::CoinFutures), "/dapi/v1/listenKey");
    }

    #[test]
    fn coin_margined_contract_face_values() {
        assert_eq!(coinm_contract_usd("BTCUSD_PERP"), Decimal::ONE_HUNDRED);
        assert_eq!(coinm_contract_usd("btcusd_250328"), Decimal::ONE_HUNDRED);
        assert_eq!(coinm_contract_usd("ETHUSD_PERP"), Decimal::TEN);
    }

    #[test]
    fn classifies_binance_errors() {
        let auth = classify_error(
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"code":-2015,"msg":"Invalid API-key, IP, or permissions for action."}"#,
        );
        assert!(matches!(auth, VenueError::Auth(_)));

        let busy = classify_error(reqwest::StatusCode::SERVICE_UNAVAILABLE, "upstream down");
        assert!(busy.is_transient());

        let biz = classify_error(reqwest::StatusCode::BAD_REQUEST, r#"{"code":-1102,"msg":"param"}"#);
        assert!(matches!(biz, VenueError::Business { ref code, .. } if code == "-1102"));
    }

    #[test]
    fn client_builds_urls_from_endpoints() {
        let client = BinanceUserStream::new(
            "k".into(),
            BinanceEndpoints::defaults(false),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            client.listen_key_url(MarketKind::UsdFutures),
            "https://fapi.binance.com/fapi/v1/listenKey"
        );
    }
}
