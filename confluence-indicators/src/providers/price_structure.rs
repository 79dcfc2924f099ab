use super::score_timeframes;
use async_trait::async_trait;
use confluence::{
    Candle, EngineConfig, Family, FamilyOutput, FamilyProvider, MarketSnapshot, ProviderError,
    Score,
};
use itertools::Itertools;
use smol_str::SmolStr;
use std::{cmp::Ordering, collections::BTreeMap};

/// Price-structure family: position of the close within the recent range, and swing bias from
/// the two most recent swing highs and swing lows of the close.
#[derive(Debug, Clone)]
pub struct PriceStructureProvider {
    min_bars: usize,
    /// Bars defining the recent high/low range.
    range_window: usize,
}

impl Default for PriceStructureProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceStructureProvider {
    pub fn new() -> Self {
        Self {
            min_bars: 10,
            range_window: 20,
        }
    }

    pub fn with_range_window(mut self, window: usize) -> Self {
        self.range_window = window.max(2);
        self
    }

    fn sub_scores(&self, candles: &[Candle]) -> BTreeMap<SmolStr, Score> {
        let mut scores = BTreeMap::new();

        let recent = &candles[candles.len().saturating_sub(self.range_window)..];
        if let Some(position) = range_position(recent) {
            scores.insert(
                SmolStr::new_static("range_position"),
                Score::new(position * 100.0),
            );
        }

        if let Some(bias) = swing_bias(candles) {
            scores.insert(SmolStr::new_static("swing_bias"), Score::from_signed(bias));
        }

        scores
    }
}

/// Last close within the `[low, high]` range of `candles`, as a fraction in `[0, 1]`.
///
/// `None` for an empty or flat range.
pub fn range_position(candles: &[Candle]) -> Option<f64> {
    let last = candles.last()?;
    let high = candles.iter().map(|candle| candle.high).reduce(f64::max)?;
    let low = candles.iter().map(|candle| candle.low).reduce(f64::min)?;

    let range = high - low;
    (range > 0.0).then(|| ((last.close - low) / range).clamp(0.0, 1.0))
}

/// Higher highs and higher lows score `1`, lower highs and lower lows `-1`, mixed structure
/// lands in between.
///
/// `None` until there are two swing highs and two swing lows.
pub fn swing_bias(candles: &[Candle]) -> Option<f64> {
    let highs = swings(candles, Ordering::Greater);
    let lows = swings(candles, Ordering::Less);

    Some((direction(&highs)? + direction(&lows)?) / 2.0)
}

/// Sign of the change between the last two `points`.
fn direction(points: &[f64]) -> Option<f64> {
    let [.., previous, last] = points else {
        return None;
    };

    Some(match last.partial_cmp(previous) {
        Some(Ordering::Greater) => 1.0,
        Some(Ordering::Less) => -1.0,
        _ => 0.0,
    })
}

/// Closes of interior swing points, oldest first: bars closing strictly `side` of the previous
/// close and not beaten by the next.
fn swings(candles: &[Candle], side: Ordering) -> Vec<f64> {
    candles
        .iter()
        .map(|candle| candle.close)
        .tuple_windows()
        .filter(|(previous, current, next)| {
            current.partial_cmp(previous) == Some(side)
                && next.partial_cmp(current) != Some(side)
        })
        .map(|(_, current, _)| current)
        .collect()
}

#[async_trait]
impl FamilyProvider for PriceStructureProvider {
    fn family(&self) -> Family {
        Family::PriceStructure
    }

    async fn score(
        &self,
        _: &str,
        snapshot: &MarketSnapshot,
        config: &EngineConfig,
    ) -> Result<FamilyOutput, ProviderError> {
        let weights = config.weights.sub_components(Family::PriceStructure);

        let timeframes = score_timeframes(
            Family::PriceStructure,
            snapshot,
            self.min_bars,
            &weights,
            |data| self.sub_scores(&data.candles),
        )?;

        Ok(FamilyOutput::new(timeframes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_utils::{candles, snapshot};
    use confluence::Timeframe;

    fn provider() -> PriceStructureProvider {
        PriceStructureProvider::new()
    }

    #[test]
    fn test_swing_bias() {
        struct TestCase {
            closes: Vec<f64>,
            expected: Option<f64>,
        }

        let tests = vec![
            TestCase {
                // TC0: higher highs and higher lows
                closes: vec![10.0, 12.0, 11.0, 13.0, 12.0, 14.0, 13.0],
                expected: Some(1.0),
            },
            TestCase {
                // TC1: lower highs and lower lows
                closes: vec![14.0, 12.0, 13.0, 11.0, 12.0, 10.0, 11.0],
                expected: Some(-1.0),
            },
            TestCase {
                // TC2: monotonic series has no swings
                closes: vec![10.0, 11.0, 12.0, 13.0, 14.0],
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(
                swing_bias(&candles(&test.closes, 1.0)),
                test.expected,
                "TC{} failed",
                index
            );
        }
    }

    #[test]
    fn test_range_position() {
        // Range 10..20 from the bracketing highs and lows, last close 15
        let series = candles(&[10.0, 20.0, 15.0], 1.0);
        assert_eq!(range_position(&series), Some(0.5));

        assert_eq!(range_position(&candles(&[10.0; 5], 1.0)), None);
        assert_eq!(range_position(&[]), None);
    }

    #[tokio::test]
    async fn test_rising_structure_is_bullish() {
        let closes = (0..24)
            .map(|index| 100.0 + index as f64 + if index % 2 == 0 { 0.0 } else { 3.0 })
            .collect::<Vec<_>>();
        let snapshot = snapshot().with_candles(Timeframe::Mtf, candles(&closes, 1.0));

        let output = provider()
            .score("SOLUSDT", &snapshot, &EngineConfig::default())
            .await
            .unwrap();
        let mtf = &output.timeframes[&Timeframe::Mtf];

        assert_eq!(mtf.sub_components["swing_bias"].value(), 100.0);
        assert!(mtf.score.value() > 75.0, "{}", mtf.score);
        assert!(output.indicator_series.is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_data() {
        let snapshot = snapshot().with_candles(Timeframe::Base, candles(&[100.0; 6], 1.0));

        let error = provider()
            .score("SOLUSDT", &snapshot, &EngineConfig::default())
            .await
            .unwrap_err();
        assert_eq!(error, ProviderError::insufficient(Family::PriceStructure, 10, 6));
    }
}
