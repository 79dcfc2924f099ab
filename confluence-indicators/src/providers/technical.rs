use super::{relative, score_timeframes};
use crate::primitives::{Ema, rsi, rsi_series};
use async_trait::async_trait;
use confluence::{
    EngineConfig, Family, FamilyOutput, FamilyProvider, MarketSnapshot, ProviderError, Score,
};
use smol_str::SmolStr;
use std::collections::BTreeMap;

/// Technical family: RSI level, fast/slow EMA trend, and rate-of-change momentum per timeframe.
///
/// The divergence indicator series is the RSI of the divergence price timeframe.
#[derive(Debug, Clone)]
pub struct TechnicalProvider {
    rsi_period: usize,
    fast_period: usize,
    slow_period: usize,
    momentum_period: usize,
    /// EMA gap (fraction of price) mapping to a full-strength score.
    trend_scale: f64,
    /// Rate of change mapping to a full-strength score.
    momentum_scale: f64,
}

impl Default for TechnicalProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl TechnicalProvider {
    pub fn new() -> Self {
        Self {
            rsi_period: 14,
            fast_period: 9,
            slow_period: 21,
            momentum_period: 10,
            trend_scale: 0.02,
            momentum_scale: 0.05,
        }
    }

    pub fn with_rsi_period(mut self, period: usize) -> Self {
        self.rsi_period = period.max(1);
        self
    }

    pub fn with_ema_periods(mut self, fast: usize, slow: usize) -> Self {
        self.fast_period = fast.max(1);
        self.slow_period = slow.max(self.fast_period + 1);
        self
    }

    fn min_bars(&self) -> usize {
        self.rsi_period + 1
    }

    fn sub_scores(&self, closes: &[f64]) -> BTreeMap<SmolStr, Score> {
        let mut scores = BTreeMap::new();

        if let Some(value) = rsi(closes, self.rsi_period) {
            scores.insert(SmolStr::new_static("rsi"), Score::new(value));
        }

        if closes.len() >= self.slow_period {
            let fast = Ema::from_series(self.fast_period, closes).value();
            let slow = Ema::from_series(self.slow_period, closes).value();
            if let Some(gap) = fast.zip(slow).and_then(|(fast, slow)| relative(slow, fast)) {
                scores.insert(
                    SmolStr::new_static("ema_trend"),
                    Score::from_signed(gap / self.trend_scale),
                );
            }
        }

        if let Some(change) = closes
            .len()
            .checked_sub(self.momentum_period + 1)
            .and_then(|start| relative(closes[start], closes[closes.len() - 1]))
        {
            scores.insert(
                SmolStr::new_static("momentum"),
                Score::from_signed(change / self.momentum_scale),
            );
        }

        scores
    }
}

#[async_trait]
impl FamilyProvider for TechnicalProvider {
    fn family(&self) -> Family {
        Family::Technical
    }

    async fn score(
        &self,
        _: &str,
        snapshot: &MarketSnapshot,
        config: &EngineConfig,
    ) -> Result<FamilyOutput, ProviderError> {
        let weights = config.weights.sub_components(Family::Technical);

        let timeframes = score_timeframes(
            Family::Technical,
            snapshot,
            self.min_bars(),
            &weights,
            |data| self.sub_scores(&data.closes()),
        )?;

        let price = snapshot.closes(config.divergence.price_timeframe);

        Ok(FamilyOutput::new(timeframes).with_indicator_series(rsi_series(&price, self.rsi_period)))
    }
}
