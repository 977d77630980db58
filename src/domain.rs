// ===============================
// src/domain.rs
// ===============================
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Jenis user-data stream di venue sumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketKind {
    Spot,
    UsdFutures,
    CoinFutures,
}

impl MarketKind {
    pub const ALL: [MarketKind; 3] = [MarketKind::Spot, MarketKind::UsdFutures, MarketKind::CoinFutures];

    /// Short tag used in fill ids, metric labels and log fields.
    pub fn tag(&self) -> &'static str {
        match self {
            MarketKind::Spot => "spot",
            MarketKind::UsdFutures => "usdm",
            MarketKind::CoinFutures => "coinm",
        }
    }
}

impl fmt::Display for MarketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
    /// Spot, or a futures account in one-way mode (`BOTH`).
    None,
}

/// Canonical fill, independent of the venue that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub market: MarketKind,
    pub venue_symbol: String,
    pub side: Side,
    pub position_side: PositionSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fill_id: String,
    pub event_time: DateTime<Utc>,
    pub reduce_only: bool,
    pub is_final: bool,
    /// Quote value of one contract when `quantity` counts contracts (COIN-M).
    pub contract_value: Option<Decimal>,
}

/// Listen-key session credential. Lives only as long as its session.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl Subscription {
    pub fn new(token: String, ttl: Duration) -> Self {
        Self { token, issued_at: Utc::now(), ttl }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarginMode {
    Isolated,
    Cross,
}

impl MarginMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarginMode::Isolated => "isolated",
            MarginMode::Cross => "crossed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Open,
    Close,
    None,
}

/// Leverage & margin mode currently configured on the destination for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeverageSettings {
    pub leverage: u32,
    pub margin_mode: MarginMode,
}

/// Tradable instrument on the destination venue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestInstrument {
    pub symbol: String,
    pub base_coin: String,
    pub quote_coin: String,
    pub margin_coin: String,
    /// decimals allowed in the order size
    pub qty_scale: Option<u32>,
    /// decimals allowed for quote-denominated sizes (spot market buy)
    pub quote_scale: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorOrder {
    pub market: MarketKind,
    pub dest_symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    /// Reference price for venues that size market buys in quote coin.
    pub price_hint: Option<Decimal>,
    pub leverage: Option<u32>,
    pub margin_mode: Option<MarginMode>,
    pub margin_coin: Option<String>,
    pub trade_side: TradeSide,
    pub reduce_only: bool,
    pub client_oid: String,
}

/// What the destination tells us about an order (placement echo or full detail).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReport {
    pub order_id: String,
    pub client_oid: Option<String>,
    pub symbol: String,
    pub status: Option<String>,
    pub filled_qty: Option<Decimal>,
    pub avg_price: Option<Decimal>,
    /// false when only the placement echo is available.
    pub detailed: bool,
}

impl OrderReport {
    pub fn echo(order: &MirrorOrder, order_id: String, client_oid: Option<String>) -> Self {
        Self {
            order_id,
            client_oid: client_oid.or_else(|| Some(order.client_oid.clone())),
            symbol: order.dest_symbol.clone(),
            status: None,
            filled_qty: None,
            avg_price: None,
            detailed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SkipReason {
    NoMapping,
    NoBalance,
    InsufficientBalance(String),
    MarketDisabled,
    /// rounds to zero at the destination's size precision
    BelowMinSize,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoMapping => f.write_str("no mapping"),
            SkipReason::NoBalance => f.write_str("no balance"),
            SkipReason::InsufficientBalance(msg) => write!(f, "insufficient balance: {msg}"),
            SkipReason::MarketDisabled => f.write_str("market not mirrored"),
            SkipReason::BelowMinSize => f.write_str("below minimum order size"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FailReason {
    Auth(String),
    Transient(String),
    Business { code: String, msg: String },
    Malformed(String),
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailReason::Auth(m) => write!(f, "auth rejected: {m}"),
            FailReason::Transient(m) => write!(f, "network: {m}"),
            FailReason::Business { code, msg } => write!(f, "venue rejected [{code}]: {msg}"),
            FailReason::Malformed(m) => write!(f, "malformed response: {m}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    Success(OrderReport),
    Skipped(SkipReason),
    Failed(FailReason),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::Skipped(_) => "skipped",
            Outcome::Failed(_) => "failed",
        }
    }
}

/// Journal entries (lihat recorder.rs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Fill(Fill),
    Duplicate { fill_id: String },
    Outcome { fill_id: String, symbol: String, quantity: Decimal, outcome: Outcome },
    Note(String),
}
