use super::{relative, score_timeframes};
use crate::primitives::VolumeWindow;
use async_trait::async_trait;
use confluence::{
    Candle, EngineConfig, Family, FamilyOutput, FamilyProvider, MarketSnapshot, ProviderError,
    Score,
};
use smol_str::SmolStr;
use std::collections::BTreeMap;

/// Volume family: close relative to VWAP and directional relative volume of the last bar.
///
/// The divergence indicator series is on-balance volume of the divergence price timeframe.
#[derive(Debug, Clone)]
pub struct VolumeProvider {
    min_bars: usize,
    /// Window (bars) for VWAP and average volume.
    window: usize,
    /// Distance from VWAP (fraction of price) mapping to a full-strength score.
    vwap_scale: f64,
}

impl Default for VolumeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeProvider {
    pub fn new() -> Self {
        Self {
            min_bars: 10,
            window: 20,
            vwap_scale: 0.01,
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(2);
        self
    }

    fn sub_scores(&self, candles: &[Candle]) -> BTreeMap<SmolStr, Score> {
        let mut scores = BTreeMap::new();
        let Some(last) = candles.last() else {
            return scores;
        };

        let mut window = VolumeWindow::new(self.window);
        for candle in candles {
            window.add((candle.high + candle.low + candle.close) / 3.0, candle.volume);
        }

        if let Some(distance) = window.vwap().and_then(|vwap| relative(vwap, last.close)) {
            scores.insert(
                SmolStr::new_static("vwap_position"),
                Score::from_signed(distance / self.vwap_scale),
            );
        }

        let mut prior = VolumeWindow::new(self.window);
        for candle in &candles[..candles.len() - 1] {
            prior.add(candle.close, candle.volume);
        }

        if let Some(average) = prior.avg_volume().filter(|average| *average > 0.0) {
            let direction = if last.close > last.open {
                1.0
            } else if last.close < last.open {
                -1.0
            } else {
                0.0
            };
            let surge = (last.volume / average - 1.0).clamp(0.0, 1.0);
            scores.insert(
                SmolStr::new_static("relative_volume"),
                Score::from_signed(direction * surge),
            );
        }

        scores
    }
}

/// On-balance volume: running sum of volume signed by the close-to-close direction.
pub fn on_balance_volume(candles: &[Candle]) -> Vec<f64> {
    let Some(first) = candles.first() else {
        return Vec::new();
    };

    let mut previous_close = first.close;
    candles
        .iter()
        .scan(0.0, |obv, candle| {
            let change = candle.close - previous_close;
            if change > 0.0 {
                *obv += candle.volume;
            } else if change < 0.0 {
                *obv -= candle.volume;
            }
            previous_close = candle.close;
            Some(*obv)
        })
        .collect()
}

#[async_trait]
impl FamilyProvider for VolumeProvider {
    fn family(&self) -> Family {
        Family::Volume
    }

    async fn score(
        &self,
        _: &str,
        snapshot: &MarketSnapshot,
        config: &EngineConfig,
    ) -> Result<FamilyOutput, ProviderError> {
        let weights = config.weights.sub_components(Family::Volume);

        let timeframes = score_timeframes(
            Family::Volume,
            snapshot,
            self.min_bars,
            &weights,
            |data| self.sub_scores(&data.candles),
        )?;

        let series = snapshot
            .timeframe(config.divergence.price_timeframe)
            .map(|data| on_balance_volume(&data.candles))
            .unwrap_or_default();

        Ok(FamilyOutput::new(timeframes).with_indicator_series(series))
    }
}
