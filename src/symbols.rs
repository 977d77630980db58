// ===============================
// src/symbols.rs
// ===============================
//
// SymbolMap: Binance symbol -> Bitget instrument, per market kind.
// Dibangun sekali saat startup dari daftar instrumen Bitget, read-only
// setelah itu (dibagi lewat Arc).
//
use ahash::AHashMap as HashMap;
use tracing::{info, warn};

use crate::domain::{DestInstrument, MarketKind};
use crate::error::VenueResult;
use crate::venue::DestinationVenue;

#[derive(Debug, Default, Clone)]
pub struct SymbolMap {
    table: HashMap<(MarketKind, String), DestInstrument>,
}

/// Binance naming for a destination instrument on the given market.
pub fn source_symbol(kind: MarketKind, inst: &DestInstrument) -> String {
    let pair = format!("{}{}", inst.base_coin, inst.quote_coin).to_ascii_uppercase();
    match kind {
        MarketKind::Spot | MarketKind::UsdFutures => pair,
        // COIN-M perpetuals: BTCUSD_PERP
        MarketKind::CoinFutures => format!("{pair}_PERP"),
    }
}

impl SymbolMap {
    pub fn from_instruments<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (MarketKind, DestInstrument)>,
    {
        let mut table = HashMap::new();
        for (kind, inst) in entries {
            table.insert((kind, source_symbol(kind, &inst)), inst);
        }
        Self { table }
    }

    /// Pulls the tradable-instrument list for every market in `kinds`.
    pub async fn load<D: DestinationVenue + ?Sized>(dest: &D, kinds: &[MarketKind]) -> VenueResult<Self> {
        let mut entries = Vec::new();
        for kind in kinds {
            let list = dest.list_instruments(*kind).await?;
            if list.is_empty() {
                warn!(market = %kind, "destination returned no instruments");
            }
            info!(market = %kind, instruments = list.len(), "symbol map loaded");
            entries.extend(list.into_iter().map(|inst| (*kind, inst)));
        }
        Ok(Self::from_instruments(entries))
    }

    pub fn translate(&self, kind: MarketKind, source_symbol: &str) -> Option<&DestInstrument> {
        self.table.get(&(kind, source_symbol.to_ascii_uppercase()))
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
