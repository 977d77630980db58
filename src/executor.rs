// ===============================
// src/executor.rs
// ===============================
//
// Mirror Executor: canonical Fill -> destination order.
//
// Side / intent table (jangan "diperbaiki", ini perilaku yang diharapkan):
//
//   position_side | source side | dest side | intent
//   LONG          | BUY         | buy       | OPEN
//   LONG          | SELL        | buy       | CLOSE
//   SHORT         | SELL        | sell      | OPEN
//   SHORT         | BUY         | sell      | CLOSE
//   NONE          | BUY / SELL  | unchanged | -
//
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::prelude::RoundingStrategy;
use rust_decimal::Decimal;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::domain::{
    DestInstrument, FailReason, Fill, MarginMode, MarketKind, MirrorOrder, OrderReport, OrderType,
    Outcome, PositionSide, Side, SkipReason, TradeSide,
};
use crate::error::{VenueError, VenueResult};
use crate::metrics::{LAT_MIRROR, OUTCOMES};
use crate::symbols::SymbolMap;
use crate::venue::DestinationVenue;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// COIN-M fills are only mirrored when enabled.
    pub mirror_coin_futures: bool,
    pub call_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { mirror_coin_futures: false, call_timeout: Duration::from_secs(10) }
    }
}

pub fn plan_side(side: Side, position_side: PositionSide) -> (Side, TradeSide) {
    match (position_side, side) {
        (PositionSide::Long, Side::Buy) => (Side::Buy, TradeSide::Open),
        (PositionSide::Long, Side::Sell) => (Side::Buy, TradeSide::Close),
        (PositionSide::Short, Side::Sell) => (Side::Sell, TradeSide::Open),
        (PositionSide::Short, Side::Buy) => (Side::Sell, TradeSide::Close),
        (PositionSide::None, s) => (s, TradeSide::None),
    }
}

/// Venue-safe client order id derived from the fill id, so a retried
/// placement cannot open a second order.
pub fn client_oid(fill_id: &str) -> String {
    let cleaned: String = fill_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '-' })
        .collect();
    let mut oid = format!("fm-{cleaned}");
    oid.truncate(50);
    oid
}

fn truncate_scale(v: Decimal, scale: Option<u32>) -> Decimal {
    match scale {
        Some(dp) => v.round_dp_with_strategy(dp, RoundingStrategy::ToZero),
        None => v,
    }
}

pub struct MirrorExecutor<D: DestinationVenue> {
    dest: Arc<D>,
    symbols: Arc<SymbolMap>,
    cfg: ExecutorConfig,
}

impl<D: DestinationVenue> MirrorExecutor<D> {
    pub fn new(dest: Arc<D>, symbols: Arc<SymbolMap>, cfg: ExecutorConfig) -> Self {
        Self { dest, symbols, cfg }
    }

    async fn call<T, F>(&self, fut: F) -> VenueResult<T>
    where
        F: Future<Output = VenueResult<T>>,
    {
        timeout(self.cfg.call_timeout, fut).await?
    }

    /// Mirror one fill. Never panics, never returns an error: every path
    /// ends in an Outcome the caller logs and records.
    pub async fn mirror(&self, fill: &Fill) -> Outcome {
        let started = Instant::now();
        let outcome = self.mirror_inner(fill).await;
        LAT_MIRROR.observe(started.elapsed().as_secs_f64() * 1000.0);
        OUTCOMES.with_label_values(&[outcome.label(), fill.market.tag()]).inc();
        outcome
    }

    async fn mirror_inner(&self, fill: &Fill) -> Outcome {
        if fill.market == MarketKind::CoinFutures && !self.cfg.mirror_coin_futures {
            return Outcome::Skipped(SkipReason::MarketDisabled);
        }
        let Some(inst) = self.symbols.translate(fill.market, &fill.venue_symbol) else {
            return Outcome::Skipped(SkipReason::NoMapping);
        };

        let order = match fill.market {
            MarketKind::Spot => self.spot_order(fill, inst).await,
            MarketKind::UsdFutures | MarketKind::CoinFutures => self.futures_order(fill, inst).await,
        };
        let order = match order {
            Ok(o) => o,
            Err(outcome) => return outcome,
        };

        info!(
            market = %fill.market,
            symbol = %order.dest_symbol,
            side = order.side.as_str(),
            trade_side = ?order.trade_side,
            qty = %order.quantity,
            leverage = ?order.leverage,
            margin_mode = ?order.margin_mode,
            client_oid = %order.client_oid,
            "placing mirror order"
        );

        let placed = match self.call(self.dest.place_order(&order)).await {
            Err(e) if e.is_transient() => {
                warn!(?e, client_oid = %order.client_oid, "order call failed transiently, retrying once");
                match self.call(self.dest.place_order(&order)).await {
                    // the first attempt may have landed; the client oid tells
                    Err(e @ (VenueError::Transient(_) | VenueError::Business { .. })) => {
                        self.find_after_retry(&order, e).await
                    }
                    other => other,
                }
            }
            other => other,
        };
        let echo = match placed {
            Ok(echo) => echo,
            Err(e) => return outcome_for_error(e),
        };
        if echo.detailed {
            return Outcome::Success(echo);
        }

        match self
            .call(self.dest.fetch_order(fill.market, &order.dest_symbol, &echo.order_id))
            .await
        {
            Ok(detail) => Outcome::Success(detail),
            Err(e) => {
                warn!(?e, order_id = %echo.order_id, "order placed, but failed to fetch full details");
                Outcome::Success(echo)
            }
        }
    }

    /// Look the order up by client oid after a failed retry. Found means the
    /// earlier attempt went through; otherwise the retry error stands.
    async fn find_after_retry(&self, order: &MirrorOrder, err: VenueError) -> VenueResult<OrderReport> {
        match self
            .call(self.dest.find_order(order.market, &order.dest_symbol, &order.client_oid))
            .await
        {
            Ok(found) => {
                warn!(
                    error = %err,
                    order_id = %found.order_id,
                    client_oid = %order.client_oid,
                    "retry rejected, but an order with this client oid already exists"
                );
                Ok(found)
            }
            Err(lookup) => {
                debug!(?lookup, client_oid = %order.client_oid, "no order under client oid");
                Err(err)
            }
        }
    }

    /// Fill price, or the destination's last price when the fill has none.
    async fn reference_price(&self, fill: &Fill, inst: &DestInstrument) -> Result<Decimal, Outcome> {
        if fill.price > Decimal::ZERO {
            return Ok(fill.price);
        }
        let last = self
            .call(self.dest.ticker_last(fill.market, &inst.symbol))
            .await
            .map_err(outcome_for_error)?;
        warn!(symbol = %inst.symbol, %last, "no fill price, using latest destination price");
        if last <= Decimal::ZERO {
            return Err(Outcome::Failed(FailReason::Malformed(format!(
                "no usable price for {}: last={last}",
                inst.symbol
            ))));
        }
        Ok(last)
    }

    async fn spot_order(&self, fill: &Fill, inst: &DestInstrument) -> Result<MirrorOrder, Outcome> {
        let (side, trade_side) = plan_side(fill.side, PositionSide::None);
        let mut quantity = fill.quantity;
        let mut price_hint = None;

        match side {
            Side::Sell => {
                // hanya jual sebanyak saldo yang tersedia
                let available = self
                    .call(self.dest.available_balance(&inst.base_coin))
                    .await
                    .map_err(outcome_for_error)?;
                if available <= Decimal::ZERO {
                    warn!(symbol = %inst.symbol, coin = %inst.base_coin, "no balance available to sell");
                    return Err(Outcome::Skipped(SkipReason::NoBalance));
                }
                quantity = truncate_scale(quantity.min(available), inst.qty_scale);
                if quantity <= Decimal::ZERO {
                    warn!(symbol = %inst.symbol, %available, "sellable amount rounds to zero");
                    return Err(Outcome::Skipped(SkipReason::BelowMinSize));
                }
                if quantity < fill.quantity {
                    info!(symbol = %inst.symbol, wanted = %fill.quantity, clamped = %quantity, "sell clamped to balance");
                }
            }
            Side::Buy => {
                price_hint = Some(self.reference_price(fill, inst).await?);
                quantity = truncate_scale(quantity, inst.qty_scale);
                if quantity <= Decimal::ZERO {
                    warn!(symbol = %inst.symbol, qty = %fill.quantity, "buy amount rounds to zero");
                    return Err(Outcome::Skipped(SkipReason::BelowMinSize));
                }
            }
        }

        Ok(MirrorOrder {
            market: fill.market,
            dest_symbol: inst.symbol.clone(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            price_hint,
            leverage: None,
            margin_mode: None,
            margin_coin: None,
            trade_side,
            reduce_only: false,
            client_oid: client_oid(&fill.fill_id),
        })
    }

    async fn futures_order(&self, fill: &Fill, inst: &DestInstrument) -> Result<MirrorOrder, Outcome> {
        let (side, trade_side) = plan_side(fill.side, fill.position_side);

        // COIN-M counts contracts; Bitget sizes coin-margined orders in base coin
        let base_qty = match fill.contract_value {
            Some(face) => {
                let price = self.reference_price(fill, inst).await?;
                let base = fill
                    .quantity
                    .checked_mul(face)
                    .and_then(|notional| notional.checked_div(price))
                    .ok_or_else(|| {
                        Outcome::Failed(FailReason::Malformed(format!(
                            "cannot convert {} contracts at {price}",
                            fill.quantity
                        )))
                    })?;
                debug!(contracts = %fill.quantity, %face, %price, %base, "contracts converted to base coin");
                base
            }
            None => fill.quantity,
        };
        let quantity = truncate_scale(base_qty, inst.qty_scale);
        if quantity <= Decimal::ZERO {
            warn!(symbol = %inst.symbol, qty = %base_qty, scale = ?inst.qty_scale, "order size rounds to zero");
            return Err(Outcome::Skipped(SkipReason::BelowMinSize));
        }

        let settings = match self
            .call(self.dest.position_settings(fill.market, inst, fill.position_side))
            .await
        {
            Ok(s) => Some(s),
            Err(e @ VenueError::Auth(_)) => return Err(outcome_for_error(e)),
            Err(e) => {
                warn!(?e, symbol = %inst.symbol, "could not read destination leverage, using account defaults");
                None
            }
        };

        if let Some(s) = settings {
            // pass-through: re-assert the destination's own values
            if let Err(e) = self
                .call(self.dest.set_leverage(fill.market, inst, fill.position_side, s))
                .await
            {
                warn!(?e, symbol = %inst.symbol, leverage = s.leverage, "set leverage failed, continuing");
            }
        }

        Ok(MirrorOrder {
            market: fill.market,
            dest_symbol: inst.symbol.clone(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            price_hint: None,
            leverage: settings.map(|s| s.leverage),
            margin_mode: Some(settings.map(|s| s.margin_mode).unwrap_or(MarginMode::Cross)),
            margin_coin: Some(inst.margin_coin.clone()),
            trade_side,
            // one-way accounts carry the close intent in reduce-only
            reduce_only: fill.reduce_only && trade_side == TradeSide::None,
            client_oid: client_oid(&fill.fill_id),
        })
    }
}

fn outcome_for_error(e: VenueError) -> Outcome {
    match e {
        VenueError::InsufficientBalance(msg) => {
            warn!(%msg, "destination reports insufficient balance");
            Outcome::Skipped(SkipReason::InsufficientBalance(msg))
        }
        other => {
            error!(error = %other, "mirror order failed");
            Outcome::Failed(other.into_fail_reason())
        }
    }
}
