use super::combine;
use async_trait::async_trait;
use confluence::{
    EngineConfig, Family, FamilyOutput, FamilyProvider, Level, MarketSnapshot, OrderBookSnapshot,
    ProviderError, Score, Timeframe,
};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use smol_str::SmolStr;
use std::collections::BTreeMap;

/// Order-book family: top-of-book quantity imbalance and notional depth near the mid price.
#[derive(Debug, Clone)]
pub struct OrderBookProvider {
    /// Levels per side used for the quantity imbalance.
    levels: usize,
    /// Distance from mid, as a fraction, bounding the depth ratio.
    band: Decimal,
}

impl Default for OrderBookProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderBookProvider {
    pub fn new() -> Self {
        Self {
            levels: 10,
            band: Decimal::new(1, 2),
        }
    }

    pub fn with_levels(mut self, levels: usize) -> Self {
        self.levels = levels.max(1);
        self
    }

    pub fn with_band(mut self, band: Decimal) -> Self {
        self.band = band;
        self
    }

    fn sub_scores(&self, book: &OrderBookSnapshot) -> BTreeMap<SmolStr, Score> {
        let mut scores = BTreeMap::new();

        if let Some(imbalance) = book.imbalance(self.levels) {
            scores.insert(SmolStr::new_static("imbalance"), Score::from_signed(imbalance));
        }

        if let Some(ratio) = self.depth_ratio(book) {
            scores.insert(SmolStr::new_static("depth_ratio"), Score::from_signed(ratio));
        }

        scores
    }

    /// `(bid - ask) / (bid + ask)` of resting notional within `band` of the mid price.
    ///
    /// `None` if the notional overflows.
    fn depth_ratio(&self, book: &OrderBookSnapshot) -> Option<f64> {
        let mid = book.mid_price()?;
        let floor = mid.checked_mul(Decimal::ONE.checked_sub(self.band)?)?;
        let ceiling = mid.checked_mul(Decimal::ONE.checked_add(self.band)?)?;

        let bid = total_notional(book.bids.iter().filter(|level| level.price >= floor))?;
        let ask = total_notional(book.asks.iter().filter(|level| level.price <= ceiling))?;

        let total = bid.checked_add(ask)?;
        if total > Decimal::ZERO {
            bid.checked_sub(ask)?.checked_div(total)?.to_f64()
        } else {
            None
        }
    }
}

fn total_notional<'a>(mut levels: impl Iterator<Item = &'a Level>) -> Option<Decimal> {
    levels.try_fold(Decimal::ZERO, |total, level| total.checked_add(level.notional()?))
}

#[async_trait]
impl FamilyProvider for OrderBookProvider {
    fn family(&self) -> Family {
        Family::Orderbook
    }

    async fn score(
        &self,
        _: &str,
        snapshot: &MarketSnapshot,
        config: &EngineConfig,
    ) -> Result<FamilyOutput, ProviderError> {
        let book = snapshot
            .order_book
            .as_ref()
            .filter(|book| !book.bids.is_empty() && !book.asks.is_empty())
            .ok_or_else(|| {
                let available = snapshot
                    .order_book
                    .as_ref()
                    .map(|book| book.bids.len().min(book.asks.len()))
                    .unwrap_or(0);
                ProviderError::insufficient(Family::Orderbook, 1, available)
            })?;

        let weights = config.weights.sub_components(Family::Orderbook);

        let component = combine(
            Family::Orderbook,
            Timeframe::Base,
            &weights,
            self.sub_scores(book),
        )
        .ok_or_else(|| ProviderError::Malformed {
            family: Family::Orderbook,
            message: "order book without positive quantity".to_string(),
        })?;

        Ok(FamilyOutput::new(BTreeMap::from([(Timeframe::Base, component)])))
    }
}
