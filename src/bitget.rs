// ===============================
// src/bitget.rs
// ===============================
//
// Destination venue adapter: Bitget v2 REST (spot + mix).
// - Signature: base64(HMAC_SHA256(secret, ts + METHOD + path[?query] + body))
// - Envelope {code, msg, data}; code != "00000" berarti gagal walau HTTP 200
// - Demo trading: header `paptrading: 1` + product type S-prefix
//
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::prelude::{RoundingStrategy, ToPrimitive};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{debug, warn};

use crate::config::BitgetCredentials;
use crate::domain::{
    DestInstrument, LeverageSettings, MarginMode, MarketKind, MirrorOrder, OrderReport, OrderType,
    PositionSide, Side, TradeSide,
};
use crate::error::{VenueError, VenueResult};
use crate::venue::DestinationVenue;

pub const SUCCESS_CODE: &str = "00000";

// 43012: spot insufficient balance, 40762: order amount exceeds balance (mix)
const INSUFFICIENT_BALANCE_CODES: [&str; 2] = ["43012", "40762"];
// 40006 invalid key, 40009 bad sign, 40012 bad passphrase, 40037 key not found
const AUTH_CODES: [&str; 4] = ["40006", "40009", "40012", "40037"];

pub fn sign(secret: &str, timestamp: &str, method: &str, request_path: &str, body: &str) -> VenueResult<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| VenueError::Auth(format!("hmac key: {e}")))?;
    mac.update(timestamp.as_bytes());
    mac.update(method.to_ascii_uppercase().as_bytes());
    mac.update(request_path.as_bytes());
    mac.update(body.as_bytes());
    Ok(B64.encode(mac.finalize().into_bytes()))
}

pub fn product_type(kind: MarketKind, demo: bool) -> Option<&'static str> {
    match (kind, demo) {
        (MarketKind::Spot, _) => None,
        (MarketKind::UsdFutures, false) => Some("USDT-FUTURES"),
        (MarketKind::UsdFutures, true) => Some("SUSDT-FUTURES"),
        (MarketKind::CoinFutures, false) => Some("COIN-FUTURES"),
        (MarketKind::CoinFutures, true) => Some("SCOIN-FUTURES"),
    }
}

fn query_string(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Value,
}

pub fn classify_code(status: reqwest::StatusCode, code: &str, msg: &str) -> VenueError {
    if AUTH_CODES.contains(&code) {
        VenueError::Auth(format!("[{code}] {msg}"))
    } else if INSUFFICIENT_BALANCE_CODES.contains(&code) {
        VenueError::InsufficientBalance(format!("[{code}] {msg}"))
    } else if code == "429" || status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        VenueError::Transient(format!("[{code}] {msg}"))
    } else {
        VenueError::Business { code: code.to_string(), msg: msg.to_string() }
    }
}

/// Unwrap a Bitget reply. Business errors embedded in an HTTP 200 are errors.
pub fn parse_envelope<T: DeserializeOwned>(status: reqwest::StatusCode, body: &str) -> VenueResult<T> {
    let env: Envelope = match serde_json::from_str(body) {
        Ok(env) => env,
        Err(e) if status.is_success() => return Err(VenueError::Malformed(e.to_string())),
        Err(_) => return Err(VenueError::from_status(status, body.to_string())),
    };
    if env.code != SUCCESS_CODE {
        return Err(classify_code(status, &env.code, &env.msg));
    }
    Ok(serde_json::from_value(env.data)?)
}

// ---- Raw response models ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpotSymbol {
    symbol: String,
    base_coin: String,
    quote_coin: String,
    #[serde(default)]
    quantity_precision: Value,
    #[serde(default)]
    quote_precision: Value,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MixContract {
    symbol: String,
    base_coin: String,
    quote_coin: String,
    #[serde(default)]
    support_margin_coins: Vec<String>,
    #[serde(default)]
    volume_place: Value,
    #[serde(default)]
    symbol_status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker {
    last_pr: String,
}

#[derive(Debug, Deserialize)]
struct SpotAsset {
    #[serde(default)]
    available: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MixAccount {
    margin_mode: String,
    #[serde(default)]
    crossed_margin_leverage: Value,
    #[serde(default)]
    isolated_long_lever: Value,
    #[serde(default)]
    isolated_short_lever: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaceOrderData {
    order_id: String,
    #[serde(default)]
    client_oid: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderDetail {
    order_id: String,
    #[serde(default)]
    client_oid: Option<String>,
    symbol: String,
    // spot: status, mix: state
    #[serde(default, alias = "state")]
    status: Option<String>,
    #[serde(default)]
    base_volume: Option<String>,
    #[serde(default)]
    price_avg: Option<String>,
}

impl OrderDetail {
    fn into_report(self) -> OrderReport {
        OrderReport {
            order_id: self.order_id,
            client_oid: self.client_oid.filter(|s| !s.is_empty()),
            symbol: self.symbol,
            status: self.status,
            filled_qty: self.base_volume.as_deref().and_then(|s| Decimal::from_str(s).ok()),
            avg_price: self.price_avg.as_deref().and_then(|s| Decimal::from_str(s).ok()),
            detailed: true,
        }
    }
}

/// Numbers arrive as JSON strings or numbers depending on endpoint.
fn value_decimal(v: &Value) -> Option<Decimal> {
    match v {
        Value::String(s) => Decimal::from_str(s).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

fn value_u32(v: &Value) -> Option<u32> {
    value_decimal(v).and_then(|d| d.trunc().to_u32())
}

fn parse_dec(s: &str, what: &str) -> VenueResult<Decimal> {
    Decimal::from_str(s).map_err(|e| VenueError::Malformed(format!("{what}={s:?}: {e}")))
}

fn fmt_dec(d: Decimal) -> String {
    d.normalize().to_string()
}

/// Demo coins carry an `S` prefix (SBTC/SUSDT); strip it so the symbol map
/// lines up with Binance names.
pub fn demo_coin_alias(demo: bool, base: &str, quote: &str) -> (String, String) {
    let demo_quote = demo
        && quote.len() > 1
        && quote.starts_with('S')
        && matches!(&quote[1..], "USDT" | "USD" | "USDC");
    if demo_quote && base.len() > 1 && base.starts_with('S') {
        (base[1..].to_string(), quote[1..].to_string())
    } else {
        (base.to_string(), quote.to_string())
    }
}

/// Spot market buys are sized in quote coin: qty x price, rounded down.
pub fn spot_buy_quote_size(order: &MirrorOrder, quote_scale: Option<u32>) -> VenueResult<Decimal> {
    let hint = order
        .price_hint
        .or(order.price)
        .ok_or_else(|| VenueError::Malformed("spot market buy needs a price hint".into()))?;
    let notional = order.quantity * hint;
    Ok(match quote_scale {
        Some(dp) => notional.round_dp_with_strategy(dp, RoundingStrategy::ToZero),
        None => notional,
    })
}

/// JSON body for the place-order endpoint of the order's market.
pub fn order_body(order: &MirrorOrder, demo: bool, quote_scale: Option<u32>) -> VenueResult<Value> {
    let order_type = match order.order_type {
        OrderType::Market => "market",
        OrderType::Limit => "limit",
    };
    match product_type(order.market, demo) {
        None => {
            let size = match (order.side, order.order_type) {
                (Side::Buy, OrderType::Market) => spot_buy_quote_size(order, quote_scale)?,
                _ => order.quantity,
            };
            let mut body = json!({
                "symbol": order.dest_symbol,
                "side": order.side.as_str(),
                "orderType": order_type,
                "force": "gtc",
                "size": fmt_dec(size),
                "clientOid": order.client_oid,
            });
            if let (OrderType::Limit, Some(px)) = (order.order_type, order.price) {
                body["price"] = json!(fmt_dec(px));
            }
            Ok(body)
        }
        Some(product) => {
            let margin_coin = order
                .margin_coin
                .as_deref()
                .ok_or_else(|| VenueError::Malformed("futures order without margin coin".into()))?;
            let mut body = json!({
                "symbol": order.dest_symbol,
                "productType": product,
                "marginMode": order.margin_mode.unwrap_or(MarginMode::Cross).as_str(),
                "marginCoin": margin_coin,
                "size": fmt_dec(order.quantity),
                "side": order.side.as_str(),
                "orderType": order_type,
                "clientOid": order.client_oid,
            });
            match order.trade_side {
                TradeSide::Open => body["tradeSide"] = json!("open"),
                TradeSide::Close => body["tradeSide"] = json!("close"),
                // one-way mode
                TradeSide::None if order.reduce_only => body["reduceOnly"] = json!("YES"),
                TradeSide::None => {}
            }
            if let (OrderType::Limit, Some(px)) = (order.order_type, order.price) {
                body["price"] = json!(fmt_dec(px));
                body["force"] = json!("gtc");
            }
            Ok(body)
        }
    }
}

pub struct BitgetClient {
    http: reqwest::Client,
    creds: BitgetCredentials,
    base_url: String,
    demo: bool,
    /// quote precision per spot symbol (dipakai untuk market buy)
    quote_scales: std::sync::RwLock<ahash::AHashMap<String, u32>>,
}

impl BitgetClient {
    pub fn new(creds: BitgetCredentials, base_url: String, demo: bool, call_timeout: Duration) -> VenueResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .map_err(|e| VenueError::Transient(e.to_string()))?;
        Ok(Self {
            http,
            creds,
            base_url: base_url.trim_end_matches('/').to_string(),
            demo,
            quote_scales: Default::default(),
        })
    }

    fn product(&self, kind: MarketKind) -> VenueResult<&'static str> {
        product_type(kind, self.demo)
            .ok_or_else(|| VenueError::Malformed(format!("{kind} has no product type")))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<&Value>,
    ) -> VenueResult<T> {
        let query = query_string(params);
        let request_path = if query.is_empty() { path.to_string() } else { format!("{path}?{query}") };
        let body_str = match body {
            Some(b) => serde_json::to_string(b)?,
            None => String::new(),
        };
        let ts = Utc::now().timestamp_millis().to_string();
        let signature = sign(&self.creds.api_secret, &ts, method.as_str(), &request_path, &body_str)?;

        let mut req = self
            .http
            .request(method, format!("{}{}", self.base_url, request_path))
            .header("ACCESS-KEY", &self.creds.api_key)
            .header("ACCESS-SIGN", signature)
            .header("ACCESS-TIMESTAMP", &ts)
            .header("ACCESS-PASSPHRASE", &self.creds.passphrase)
            .header("Content-Type", "application/json")
            .header("locale", "en-US");
        if self.demo {
            req = req.header("paptrading", "1");
        }
        if body.is_some() {
            req = req.body(body_str);
        }

        let rsp = req.send().await?;
        let status = rsp.status();
        let text = rsp.text().await?;
        debug!(%path, %status, "bitget response");
        parse_envelope(status, &text)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> VenueResult<T> {
        self.send(reqwest::Method::GET, path, params, None).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> VenueResult<T> {
        self.send(reqwest::Method::POST, path, &[], Some(body)).await
    }

    fn quote_scale(&self, symbol: &str) -> Option<u32> {
        self.quote_scales.read().ok().and_then(|m| m.get(symbol).copied())
    }
}

#[async_trait]
impl DestinationVenue for BitgetClient {
    async fn list_instruments(&self, kind: MarketKind) -> VenueResult<Vec<DestInstrument>> {
        match kind {
            MarketKind::Spot => {
                let rows: Vec<SpotSymbol> = self.get("/api/v2/spot/public/symbols", &[]).await?;
                let list: Vec<DestInstrument> = rows
                    .into_iter()
                    .filter(|r| r.status.as_deref().map_or(true, |s| s == "online"))
                    .map(|r| {
                        let (base, quote) = demo_coin_alias(self.demo, &r.base_coin, &r.quote_coin);
                        DestInstrument {
                            symbol: r.symbol,
                            margin_coin: quote.clone(),
                            base_coin: base,
                            quote_coin: quote,
                            qty_scale: value_u32(&r.quantity_precision),
                            quote_scale: value_u32(&r.quote_precision),
                        }
                    })
                    .collect();
                if let Ok(mut scales) = self.quote_scales.write() {
                    for inst in &list {
                        if let Some(dp) = inst.quote_scale {
                            scales.insert(inst.symbol.clone(), dp);
                        }
                    }
                }
                Ok(list)
            }
            MarketKind::UsdFutures | MarketKind::CoinFutures => {
                let product = self.product(kind)?;
                let rows: Vec<MixContract> = self
                    .get("/api/v2/mix/market/contracts", &[("productType", product.to_string())])
                    .await?;
                Ok(rows
                    .into_iter()
                    .filter(|r| r.symbol_status.as_deref().map_or(true, |s| s == "normal"))
                    .map(|r| {
                        // COIN-M margins in the base coin, USDT-M in the quote
                        let margin_coin = match kind {
                            MarketKind::CoinFutures => r.base_coin.clone(),
                            _ => r
                                .support_margin_coins
                                .first()
                                .cloned()
                                .unwrap_or_else(|| r.quote_coin.clone()),
                        };
                        let (base, quote) = demo_coin_alias(self.demo, &r.base_coin, &r.quote_coin);
                        DestInstrument {
                            symbol: r.symbol,
                            base_coin: base,
                            quote_coin: quote,
                            margin_coin,
                            qty_scale: value_u32(&r.volume_place),
                            quote_scale: None,
                        }
                    })
                    .collect())
            }
        }
    }

    async fn ticker_last(&self, kind: MarketKind, symbol: &str) -> VenueResult<Decimal> {
        let rows: Vec<Ticker> = match kind {
            MarketKind::Spot => {
                self.get("/api/v2/spot/market/tickers", &[("symbol", symbol.to_string())])
                    .await?
            }
            _ => {
                let product = self.product(kind)?;
                self.get(
                    "/api/v2/mix/market/ticker",
                    &[("symbol", symbol.to_string()), ("productType", product.to_string())],
                )
                .await?
            }
        };
        let t = rows
            .first()
            .ok_or_else(|| VenueError::Malformed(format!("empty ticker for {symbol}")))?;
        parse_dec(&t.last_pr, "lastPr")
    }

    async fn available_balance(&self, coin: &str) -> VenueResult<Decimal> {
        let rows: Vec<SpotAsset> = self
            .get("/api/v2/spot/account/assets", &[("coin", coin.to_string())])
            .await?;
        match rows.first() {
            Some(a) if !a.available.is_empty() => parse_dec(&a.available, "available"),
            _ => Ok(Decimal::ZERO),
        }
    }

    async fn position_settings(
        &self,
        kind: MarketKind,
        inst: &DestInstrument,
        position_side: PositionSide,
    ) -> VenueResult<LeverageSettings> {
        let product = self.product(kind)?;
        let acct: MixAccount = self
            .get(
                "/api/v2/mix/account/account",
                &[
                    ("symbol", inst.symbol.to_ascii_lowercase()),
                    ("productType", product.to_string()),
                    ("marginCoin", inst.margin_coin.clone()),
                ],
            )
            .await?;
        let (margin_mode, lever) = if acct.margin_mode == "isolated" {
            let lever = match position_side {
                PositionSide::Short => &acct.isolated_short_lever,
                PositionSide::Long | PositionSide::None => &acct.isolated_long_lever,
            };
            (MarginMode::Isolated, lever)
        } else {
            (MarginMode::Cross, &acct.crossed_margin_leverage)
        };
        let leverage = value_u32(lever)
            .filter(|l| *l > 0)
            .ok_or_else(|| VenueError::Malformed(format!("leverage {lever} for {}", inst.symbol)))?;
        Ok(LeverageSettings { leverage, margin_mode })
    }

    async fn set_leverage(
        &self,
        kind: MarketKind,
        inst: &DestInstrument,
        position_side: PositionSide,
        settings: LeverageSettings,
    ) -> VenueResult<()> {
        let product = self.product(kind)?;
        let mut body = json!({
            "symbol": inst.symbol,
            "productType": product,
            "marginCoin": inst.margin_coin,
            "leverage": settings.leverage.to_string(),
        });
        if settings.margin_mode == MarginMode::Isolated {
            match position_side {
                PositionSide::Long => body["holdSide"] = json!("long"),
                PositionSide::Short => body["holdSide"] = json!("short"),
                PositionSide::None => {}
            }
        }
        let _: Value = self.post("/api/v2/mix/account/set-leverage", &body).await?;
        Ok(())
    }

    async fn place_order(&self, order: &MirrorOrder) -> VenueResult<OrderReport> {
        let path = match order.market {
            MarketKind::Spot => "/api/v2/spot/trade/place-order",
            _ => "/api/v2/mix/order/place-order",
        };
        let body = order_body(order, self.demo, self.quote_scale(&order.dest_symbol))?;
        let data: PlaceOrderData = self.post(path, &body).await?;
        Ok(OrderReport::echo(order, data.order_id, data.client_oid))
    }

    async fn fetch_order(&self, kind: MarketKind, symbol: &str, order_id: &str) -> VenueResult<OrderReport> {
        self.order_detail(kind, symbol, ("orderId", order_id)).await
    }

    async fn find_order(&self, kind: MarketKind, symbol: &str, client_oid: &str) -> VenueResult<OrderReport> {
        self.order_detail(kind, symbol, ("clientOid", client_oid)).await
    }
}

impl BitgetClient {
    /// `key` is either ("orderId", id) or ("clientOid", oid); both endpoints take either.
    async fn order_detail(&self, kind: MarketKind, symbol: &str, key: (&str, &str)) -> VenueResult<OrderReport> {
        let (key_name, key_value) = key;
        match kind {
            MarketKind::Spot => {
                let rows: Vec<OrderDetail> = self
                    .get("/api/v2/spot/trade/orderInfo", &[(key_name, key_value.to_string())])
                    .await?;
                rows.into_iter()
                    .next()
                    .map(OrderDetail::into_report)
                    .ok_or_else(|| {
                        warn!(%key_name, %key_value, "orderInfo returned no rows");
                        VenueError::Malformed(format!("no order {key_name}={key_value}"))
                    })
            }
            _ => {
                let product = self.product(kind)?;
                let detail: OrderDetail = self
                    .get(
                        "/api/v2/mix/order/detail",
                        &[
                            ("symbol", symbol.to_string()),
                            ("productType", product.to_string()),
                            (key_name, key_value.to_string()),
                        ],
                    )
                    .await?;
                Ok(detail.into_report())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use rust_decimal_macros::dec;

    fn order(market: MarketKind, side: Side, trade_side: TradeSide) -> MirrorOrder {
        MirrorOrder {
            market,
            dest_symbol: "BTCUSDT".into(),
            side,
            order_type: OrderType::Market,
            quantity: dec!(0.0150),
            price: None,
            price_hint: Some(dec!(40000)),
            leverage: Some(10),
            margin_mode: Some(MarginMode::Isolated),
            margin_coin: Some("USDT".into()),
            trade_side,
            reduce_only: false,
            client_oid: "fm-usdm-BTCUSDT-1".into(),
        }
    }

    #[test]
    fn signature_is_stable_base64_sha256() {
        let sig = sign("secret", "1700000000000", "get", "/api/v2/spot/account/assets?coin=USDT", "").unwrap();
        let again = sign("secret", "1700000000000", "GET", "/api/v2/spot/account/assets?coin=USDT", "").unwrap();
        assert_eq!(sig, again);
        assert_eq!(B64.decode(&sig).unwrap().len(), 32);
        let other = sign("secret", "1700000000001", "GET", "/api/v2/spot/account/assets?coin=USDT", "").unwrap();
        assert_ne!(sig, other);
    }

    #[test]
    fn business_error_inside_http_200_is_detected() {
        let body = r#"{"code":"40034","msg":"Parameter does not exist","requestTime":1,"data":null}"#;
        let err = parse_envelope::<Value>(StatusCode::OK, body).unwrap_err();
        assert!(matches!(err, VenueError::Business { ref code, .. } if code == "40034"));

        let ok = r#"{"code":"00000","msg":"success","data":{"orderId":"1","clientOid":"c"}}"#;
        let data: PlaceOrderData = parse_envelope(StatusCode::OK, ok).unwrap();
        assert_eq!(data.order_id, "1");
    }

    #[test]
    fn codes_are_classified() {
        let auth = r#"{"code":"40009","msg":"sign signature error","data":null}"#;
        assert!(matches!(parse_envelope::<Value>(StatusCode::BAD_REQUEST, auth), Err(VenueError::Auth(_))));
        let bal = r#"{"code":"43012","msg":"Insufficient balance","data":null}"#;
        assert!(matches!(
            parse_envelope::<Value>(StatusCode::OK, bal),
            Err(VenueError::InsufficientBalance(_))
        ));
        assert!(matches!(
            parse_envelope::<Value>(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>"),
            Err(VenueError::Transient(_))
        ));
        assert!(matches!(parse_envelope::<Value>(StatusCode::OK, "not json"), Err(VenueError::Malformed(_))));
    }

    #[test]
    fn hedge_mode_futures_body() {
        let body = order_body(&order(MarketKind::UsdFutures, Side::Buy, TradeSide::Close), false, None).unwrap();
        assert_eq!(body["productType"], "USDT-FUTURES");
        assert_eq!(body["marginMode"], "isolated");
        assert_eq!(body["marginCoin"], "USDT");
        assert_eq!(body["side"], "buy");
        assert_eq!(body["tradeSide"], "close");
        assert_eq!(body["size"], "0.015");
        assert!(body.get("reduceOnly").is_none());

        let demo = order_body(&order(MarketKind::UsdFutures, Side::Sell, TradeSide::Open), true, None).unwrap();
        assert_eq!(demo["productType"], "SUSDT-FUTURES");
    }

    #[test]
    fn one_way_futures_body_carries_reduce_only() {
        let mut o = order(MarketKind::UsdFutures, Side::Sell, TradeSide::None);
        o.reduce_only = true;
        let body = order_body(&o, false, None).unwrap();
        assert!(body.get("tradeSide").is_none());
        assert_eq!(body["reduceOnly"], "YES");
    }

    #[test]
    fn spot_market_buy_is_sized_in_quote() {
        let o = order(MarketKind::Spot, Side::Buy, TradeSide::None);
        let body = order_body(&o, false, Some(2)).unwrap();
        assert_eq!(body["size"], "600");
        assert!(body.get("productType").is_none());

        let mut o = order(MarketKind::Spot, Side::Buy, TradeSide::None);
        o.quantity = dec!(0.00123);
        assert_eq!(spot_buy_quote_size(&o, Some(2)).unwrap(), dec!(49.2));

        let sell = order_body(&order(MarketKind::Spot, Side::Sell, TradeSide::None), false, Some(2)).unwrap();
        assert_eq!(sell["size"], "0.015");

        let mut no_hint = order(MarketKind::Spot, Side::Buy, TradeSide::None);
        no_hint.price_hint = None;
        assert!(order_body(&no_hint, false, None).is_err());
    }

    #[test]
    fn demo_coins_are_aliased() {
        assert_eq!(demo_coin_alias(true, "SBTC", "SUSDT"), ("BTC".to_string(), "USDT".to_string()));
        assert_eq!(demo_coin_alias(true, "SSOL", "SUSDT"), ("SOL".to_string(), "USDT".to_string()));
        assert_eq!(demo_coin_alias(true, "SOL", "USDT"), ("SOL".to_string(), "USDT".to_string()));
        assert_eq!(demo_coin_alias(false, "SBTC", "SUSDT"), ("SBTC".to_string(), "SUSDT".to_string()));
    }

    #[test]
    fn leverage_values_accept_strings_and_numbers() {
        assert_eq!(value_u32(&json!("20")), Some(20));
        assert_eq!(value_u32(&json!(15)), Some(15));
        assert_eq!(value_u32(&Value::Null), None);
    }
}
