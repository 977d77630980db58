// ===============================
// src/normalizer.rs
// ===============================
//
// Raw user-data frame -> UserEvent (decode) -> Fill (normalize).
//
// Only terminal fills are mirrored: order status FILLED and execution
// type TRADE. Everything else (NEW acks, partial steps, cancels, account
// snapshots) is not a fill.
//
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::binance::{
    coinm_contract_usd, FuturesAccountEnvelope, FuturesOrderEnvelope, SpotAccountPosition,
    SpotExecutionReport,
};
use crate::domain::{Fill, MarketKind, PositionSide, Side};
use crate::error::{VenueError, VenueResult};

/// Venue-neutral view of an order execution event.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub symbol: String,
    pub side: String,
    pub position_side: Option<String>,
    pub status: String,
    pub exec_type: String,
    pub order_qty: Decimal,
    pub last_qty: Decimal,
    pub cum_qty: Decimal,
    pub last_price: Decimal,
    pub avg_price: Decimal,
    pub trade_id: i64,
    pub event_time_ms: u64,
    pub reduce_only: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountUpdate {
    /// (asset, amount) with amount > 0
    pub balances: Vec<(String, Decimal)>,
    /// (symbol, position amount, position side) with amount != 0
    pub positions: Vec<(String, Decimal, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UserEvent {
    ExecutionReport(ExecutionReport),
    AccountUpdate(AccountUpdate),
    /// Venue invalidated the listen key; the connection is about to die.
    ListenKeyExpired,
    Unknown(String),
}

pub fn decode(raw: &str) -> VenueResult<UserEvent> {
    let mut v: Value = serde_json::from_str(raw)?;
    // WS-API style wrapper: {"subscriptionId":0,"event":{...}}
    let inner = v.get_mut("event").filter(|e| e.is_object()).map(Value::take);
    if let Some(inner) = inner {
        v = inner;
    }
    let event_type = v.get("e").and_then(Value::as_str).unwrap_or_default().to_string();

    match event_type.as_str() {
        "executionReport" => {
            let r: SpotExecutionReport = serde_json::from_value(v)?;
            Ok(UserEvent::ExecutionReport(ExecutionReport {
                order_qty: dec(&r.order_qty)?,
                last_qty: dec_opt(r.last_qty.as_deref())?,
                cum_qty: dec_opt(r.cum_qty.as_deref())?,
                last_price: dec_opt(r.last_price.as_deref())?,
                avg_price: Decimal::ZERO,
                event_time_ms: r.trade_time.unwrap_or(r.event_time),
                symbol: r.symbol,
                side: r.side,
                position_side: None,
                status: r.status,
                exec_type: r.exec_type,
                trade_id: r.trade_id,
                reduce_only: false,
            }))
        }
        "ORDER_TRADE_UPDATE" => {
            let env: FuturesOrderEnvelope = serde_json::from_value(v)?;
            let o = env.order;
            Ok(UserEvent::ExecutionReport(ExecutionReport {
                order_qty: dec(&o.order_qty)?,
                last_qty: dec_opt(o.last_qty.as_deref())?,
                cum_qty: dec_opt(o.cum_qty.as_deref())?,
                last_price: dec_opt(o.last_price.as_deref())?,
                avg_price: dec_opt(o.avg_price.as_deref())?,
                event_time_ms: o.trade_time.unwrap_or(env.event_time),
                symbol: o.symbol,
                side: o.side,
                position_side: o.position_side,
                status: o.status,
                exec_type: o.exec_type,
                trade_id: o.trade_id,
                reduce_only: o.reduce_only,
            }))
        }
        "outboundAccountPosition" => {
            let acc: SpotAccountPosition = serde_json::from_value(v)?;
            let mut balances = Vec::new();
            for b in acc.balances {
                let free = dec(&b.free)?;
                if free > Decimal::ZERO {
                    balances.push((b.asset, free));
                }
            }
            Ok(UserEvent::AccountUpdate(AccountUpdate { balances, positions: Vec::new() }))
        }
        "ACCOUNT_UPDATE" => {
            let env: FuturesAccountEnvelope = serde_json::from_value(v)?;
            let mut balances = Vec::new();
            for b in env.account.balances {
                let wb = dec(&b.wallet_balance)?;
                if wb > Decimal::ZERO {
                    balances.push((b.asset, wb));
                }
            }
            let mut positions = Vec::new();
            for p in env.account.positions {
                let amt = dec(&p.amount)?;
                if !amt.is_zero() {
                    positions.push((p.symbol, amt, p.position_side.unwrap_or_else(|| "BOTH".into())));
                }
            }
            Ok(UserEvent::AccountUpdate(AccountUpdate { balances, positions }))
        }
        "listenKeyExpired" => Ok(UserEvent::ListenKeyExpired),
        other => Ok(UserEvent::Unknown(other.to_string())),
    }
}

/// Returns `None` for anything that is not a terminal trade fill.
pub fn normalize(event: &UserEvent, kind: MarketKind) -> Option<Fill> {
    let UserEvent::ExecutionReport(r) = event else {
        return None;
    };
    if r.status != "FILLED" || r.exec_type != "TRADE" {
        return None;
    }
    let side = match r.side.as_str() {
        "BUY" => Side::Buy,
        "SELL" => Side::Sell,
        _ => return None,
    };
    let position_side = match (kind, r.position_side.as_deref()) {
        (MarketKind::Spot, _) => PositionSide::None,
        (_, Some("LONG")) => PositionSide::Long,
        (_, Some("SHORT")) => PositionSide::Short,
        _ => PositionSide::None,
    };

    // whole order once: cumulative qty equals order qty on FILLED
    let quantity = [r.cum_qty, r.last_qty, r.order_qty]
        .into_iter()
        .find(|q| *q > Decimal::ZERO)?;
    let price = if r.last_price > Decimal::ZERO { r.last_price } else { r.avg_price };

    Some(Fill {
        market: kind,
        venue_symbol: r.symbol.clone(),
        side,
        position_side,
        quantity,
        price,
        fill_id: format!("{}:{}:{}", kind.tag(), r.symbol, r.trade_id),
        event_time: event_time(r.event_time_ms),
        reduce_only: r.reduce_only,
        is_final: true,
        // COIN-M q/z count contracts, not coins
        contract_value: (kind == MarketKind::CoinFutures).then(|| coinm_contract_usd(&r.symbol)),
    })
}

fn event_time(ms: u64) -> DateTime<Utc> {
    i64::try_from(ms)
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}

fn dec(s: &str) -> VenueResult<Decimal> {
    Decimal::from_str(s.trim()).map_err(|e| VenueError::Malformed(format!("decimal {s:?}: {e}")))
}

fn dec_opt(s: Option<&str>) -> VenueResult<Decimal> {
    match s {
        Some(s) if !s.trim().is_empty() => dec(s),
        _ => Ok(Decimal::ZERO),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SPOT_FILLED: &str = r#"{"e":"executionReport","E":1700000000100,"s":"ETHUSDT","c":"web_1","S":"SELL","o":"MARKET","f":"GTC","q":"0.50000000","p":"0.00000000","X":"FILLED","x":"TRADE","i":42,"l":"0.20000000","z":"0.50000000","L":"2001.50000000","t":777,"T":1700000000099}"#;

    const FUT_FILLED: &str = r#"{"e":"ORDER_TRADE_UPDATE","E":1700000000500,"T":1700000000499,"o":{"s":"BTCUSDT","c":"x1","S":"SELL","o":"MARKET","q":"0.010","p":"0","ap":"43000.10","X":"FILLED","x":"TRADE","i":9,"l":"0.010","z":"0.010","L":"43000.10","t":5551,"T":1700000000498,"R":true,"ps":"LONG"}}"#;

    #[test]
    fn spot_terminal_fill_normalizes() {
        let ev = decode(SPOT_FILLED).unwrap();
        let fill = normalize(&ev, MarketKind::Spot).expect("fill");
        assert_eq!(fill.venue_symbol, "ETHUSDT");
        assert_eq!(fill.side, Side::Sell);
        assert_eq!(fill.position_side, PositionSide::None);
        assert_eq!(fill.quantity, dec!(0.5));
        assert_eq!(fill.price, dec!(2001.5));
        assert_eq!(fill.fill_id, "spot:ETHUSDT:777");
        assert_eq!(fill.event_time.timestamp_millis(), 1700000000099);
        assert!(fill.is_final);
    }

    #[test]
    fn futures_fill_carries_position_side_and_reduce_only() {
        let ev = decode(FUT_FILLED).unwrap();
        let fill = normalize(&ev, MarketKind::UsdFutures).expect("fill");
        assert_eq!(fill.position_side, PositionSide::Long);
        assert_eq!(fill.side, Side::Sell);
        assert!(fill.reduce_only);
        assert_eq!(fill.quantity, dec!(0.010));
        assert_eq!(fill.fill_id, "usdm:BTCUSDT:5551");
        assert_eq!(fill.contract_value, None);
    }

    #[test]
    fn coin_margined_fill_counts_contracts() {
        let raw = FUT_FILLED
            .replace(r#""s":"BTCUSDT""#, r#""s":"BTCUSD_PERP""#)
            .replace(r#""z":"0.010""#, r#""z":"3""#);
        let fill = normalize(&decode(&raw).unwrap(), MarketKind::CoinFutures).expect("fill");
        assert_eq!(fill.quantity, dec!(3));
        assert_eq!(fill.contract_value, Some(dec!(100)));
        assert_eq!(fill.fill_id, "coinm:BTCUSD_PERP:5551");

        let eth = raw.replace("BTCUSD_PERP", "ETHUSD_PERP");
        let fill = normalize(&decode(&eth).unwrap(), MarketKind::CoinFutures).expect("fill");
        assert_eq!(fill.contract_value, Some(dec!(10)));
    }

    #[test]
    fn one_way_mode_maps_to_no_position_side() {
        let raw = FUT_FILLED.replace(r#""ps":"LONG""#, r#""ps":"BOTH""#);
        let fill = normalize(&decode(&raw).unwrap(), MarketKind::UsdFutures).unwrap();
        assert_eq!(fill.position_side, PositionSide::None);
    }

    #[test]
    fn partial_and_non_trade_events_are_not_fills() {
        let partial = SPOT_FILLED.replace(r#""X":"FILLED""#, r#""X":"PARTIALLY_FILLED""#);
        assert!(normalize(&decode(&partial).unwrap(), MarketKind::Spot).is_none());

        let ack = SPOT_FILLED.replace(r#""x":"TRADE""#, r#""x":"NEW""#);
        assert!(normalize(&decode(&ack).unwrap(), MarketKind::Spot).is_none());
    }

    #[test]
    fn account_updates_and_unknown_events_decode() {
        let spot = r#"{"e":"outboundAccountPosition","E":1,"u":1,"B":[{"a":"BTC","f":"0.1","l":"0"},{"a":"ETH","f":"0.0","l":"0"}]}"#;
        match decode(spot).unwrap() {
            UserEvent::AccountUpdate(acc) => assert_eq!(acc.balances, vec![("BTC".to_string(), dec!(0.1))]),
            other => panic!("unexpected {other:?}"),
        }

        let fut = r#"{"e":"ACCOUNT_UPDATE","E":1,"T":1,"a":{"m":"ORDER","B":[{"a":"USDT","wb":"100.5","cw":"100.5"}],"P":[{"s":"BTCUSDT","pa":"0.01","ep":"43000","ps":"LONG"},{"s":"ETHUSDT","pa":"0","ep":"0","ps":"SHORT"}]}}"#;
        match decode(fut).unwrap() {
            UserEvent::AccountUpdate(acc) => {
                assert_eq!(acc.balances.len(), 1);
                assert_eq!(acc.positions, vec![("BTCUSDT".to_string(), dec!(0.01), "LONG".to_string())]);
            }
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(decode(r#"{"e":"balanceUpdate","a":"BTC"}"#).unwrap(), UserEvent::Unknown("balanceUpdate".into()));
        assert_eq!(decode(r#"{"e":"listenKeyExpired","E":1}"#).unwrap(), UserEvent::ListenKeyExpired);
        assert!(normalize(&UserEvent::ListenKeyExpired, MarketKind::Spot).is_none());
    }

    #[test]
    fn wrapped_ws_api_event_is_unwrapped() {
        let wrapped = format!(r#"{{"subscriptionId":0,"event":{SPOT_FILLED}}}"#);
        assert!(normalize(&decode(&wrapped).unwrap(), MarketKind::Spot).is_some());
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(decode("not json"), Err(VenueError::Malformed(_))));
        let bad_qty = SPOT_FILLED.replace(r#""q":"0.50000000""#, r#""q":"abc""#);
        assert!(matches!(decode(&bad_qty), Err(VenueError::Malformed(_))));
    }
}
