// ===============================
// src/venue.rs
// ===============================
//
// Capability seams for the two venues. The core (session, executor,
// orchestrator) only talks to these traits; binance.rs and bitget.rs are
// the real adapters, tests use in-memory fakes.
//
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use rust_decimal::Decimal;

use crate::domain::{
    DestInstrument, LeverageSettings, MarketKind, MirrorOrder, OrderReport, PositionSide,
    Subscription,
};
use crate::error::VenueResult;

/// Lazy sequence of raw text frames from one user-data connection.
pub type MessageStream = BoxStream<'static, VenueResult<String>>;

/// Source venue: listen-key REST pair + private stream.
#[async_trait]
pub trait SourceVenue: Send + Sync + 'static {
    async fn subscribe(&self, kind: MarketKind) -> VenueResult<Subscription>;

    async fn keepalive(&self, kind: MarketKind, sub: &Subscription) -> VenueResult<()>;

    async fn connect(&self, kind: MarketKind, sub: &Subscription) -> VenueResult<MessageStream>;
}

/// Destination venue: signed execution API.
#[async_trait]
pub trait DestinationVenue: Send + Sync + 'static {
    async fn list_instruments(&self, kind: MarketKind) -> VenueResult<Vec<DestInstrument>>;

    async fn ticker_last(&self, kind: MarketKind, symbol: &str) -> VenueResult<Decimal>;

    /// Free balance of `coin` in the spot account.
    async fn available_balance(&self, coin: &str) -> VenueResult<Decimal>;

    async fn position_settings(
        &self,
        kind: MarketKind,
        inst: &DestInstrument,
        position_side: PositionSide,
    ) -> VenueResult<LeverageSettings>;

    async fn set_leverage(
        &self,
        kind: MarketKind,
        inst: &DestInstrument,
        position_side: PositionSide,
        settings: LeverageSettings,
    ) -> VenueResult<()>;

    async fn place_order(&self, order: &MirrorOrder) -> VenueResult<OrderReport>;

    async fn fetch_order(&self, kind: MarketKind, symbol: &str, order_id: &str) -> VenueResult<OrderReport>;

    /// Look an order up by our own client order id.
    async fn find_order(&self, kind: MarketKind, symbol: &str, client_oid: &str) -> VenueResult<OrderReport>;
}
