use super::combine;
use crate::primitives::buy_pressure;
use async_trait::async_trait;
use confluence::{
    Candle, EngineConfig, Family, FamilyOutput, FamilyProvider, MarketSnapshot, ProviderError,
    Score, Timeframe, Trade,
};
use itertools::Itertools;
use smol_str::SmolStr;
use std::collections::BTreeMap;

/// Order-flow family: aggressor buy pressure and cumulative volume delta (CVD) trend.
///
/// Trades are not bucketed per timeframe; the family reports on the `base` timeframe and the
/// synchroniser fills the rest. The divergence indicator series is CVD sampled at each candle
/// close of the divergence price timeframe.
#[derive(Debug, Clone)]
pub struct OrderFlowProvider {
    min_trades: usize,
    /// Most recent trades considered for buy pressure.
    pressure_window: usize,
}

impl Default for OrderFlowProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderFlowProvider {
    pub fn new() -> Self {
        Self {
            min_trades: 10,
            pressure_window: 500,
        }
    }

    pub fn with_min_trades(mut self, min_trades: usize) -> Self {
        self.min_trades = min_trades.max(2);
        self
    }

    fn sub_scores(&self, trades: &[&Trade]) -> BTreeMap<SmolStr, Score> {
        let mut scores = BTreeMap::new();

        let recent = &trades[trades.len().saturating_sub(self.pressure_window)..];
        if let Some(pressure) = buy_pressure(recent.iter().map(|trade| trade.signed_quote())) {
            scores.insert(SmolStr::new_static("buy_pressure"), Score::new(pressure));
        }

        if let Some(acceleration) = cvd_acceleration(trades) {
            scores.insert(
                SmolStr::new_static("cvd_trend"),
                Score::from_signed(acceleration),
            );
        }

        scores
    }
}

/// Net delta of the later half of `trades` minus that of the earlier half, over gross volume.
fn cvd_acceleration(trades: &[&Trade]) -> Option<f64> {
    let (earlier, later) = trades.split_at(trades.len() / 2);
    let net = |half: &[&Trade]| half.iter().map(|trade| trade.signed_quote()).sum::<f64>();
    let gross = trades.iter().map(|trade| trade.signed_quote().abs()).sum::<f64>();

    (gross > 0.0).then(|| ((net(later) - net(earlier)) / gross).clamp(-1.0, 1.0))
}

/// Cumulative volume delta at each candle time, from `trades` sorted by time.
pub fn cvd_at_candles(trades: &[&Trade], candles: &[Candle]) -> Vec<f64> {
    let mut remaining = trades.iter().peekable();
    let mut cvd = 0.0;

    candles
        .iter()
        .map(|candle| {
            while let Some(trade) = remaining.next_if(|trade| trade.time <= candle.time) {
                cvd += trade.signed_quote();
            }
            cvd
        })
        .collect()
}

#[async_trait]
impl FamilyProvider for OrderFlowProvider {
    fn family(&self) -> Family {
        Family::Orderflow
    }

    async fn score(
        &self,
        _: &str,
        snapshot: &MarketSnapshot,
        config: &EngineConfig,
    ) -> Result<FamilyOutput, ProviderError> {
        if snapshot.trades.len() < self.min_trades {
            return Err(ProviderError::insufficient(
                Family::Orderflow,
                self.min_trades,
                snapshot.trades.len(),
            ));
        }

        let weights = config.weights.sub_components(Family::Orderflow);

        let trades = snapshot
            .trades
            .iter()
            .sorted_by(|a, b| a.time.cmp(&b.time).then_with(|| a.id.cmp(&b.id)))
            .collect::<Vec<_>>();

        let component = combine(
            Family::Orderflow,
            Timeframe::Base,
            &weights,
            self.sub_scores(&trades),
        )
        .ok_or_else(|| ProviderError::internal(Family::Orderflow, "no order-flow sub-score"))?;

        let series = snapshot
            .timeframe(config.divergence.price_timeframe)
            .map(|data| cvd_at_candles(&trades, &data.candles))
            .unwrap_or_default();

        Ok(FamilyOutput::new(BTreeMap::from([(Timeframe::Base, component)]))
            .with_indicator_series(series))
    }
}
