use crate::primitives::{Ema, calc_correlation, returns, std_dev};
use confluence::{MarketSnapshot, Regime, RegimeClassification, RegimeDetector, Timeframe};
use tracing::debug;

/// Timeframes consulted for classification, in order of preference.
const SOURCE_TIMEFRAMES: [Timeframe; 2] = [Timeframe::Htf, Timeframe::Base];

/// Classifies a snapshot by fast/slow EMA trend, then by volatility of returns.
///
/// A gap between the EMAs of at least `trend_threshold` (fraction of price) is a trend, with
/// confidence taken from how linear the closes are. Otherwise the market is ranging, split into
/// high and low volatility at `volatility_threshold` (standard deviation of simple returns).
#[derive(Debug, Clone)]
pub struct TrendVolatilityDetector {
    fast_period: usize,
    slow_period: usize,
    trend_threshold: f64,
    volatility_threshold: f64,
}

impl Default for TrendVolatilityDetector {
    fn default() -> Self {
        Self {
            fast_period: 9,
            slow_period: 21,
            trend_threshold: 0.01,
            volatility_threshold: 0.02,
        }
    }
}

impl TrendVolatilityDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ema_periods(mut self, fast: usize, slow: usize) -> Self {
        self.fast_period = fast.max(1);
        self.slow_period = slow.max(self.fast_period + 1);
        self
    }

    pub fn with_trend_threshold(mut self, threshold: f64) -> Self {
        self.trend_threshold = threshold;
        self
    }

    pub fn with_volatility_threshold(mut self, threshold: f64) -> Self {
        self.volatility_threshold = threshold;
        self
    }

    fn classify_closes(&self, closes: &[f64]) -> Option<RegimeClassification> {
        if closes.len() < self.slow_period {
            return None;
        }

        let fast = Ema::from_series(self.fast_period, closes).value()?;
        let slow = Ema::from_series(self.slow_period, closes).value()?;
        if slow <= 0.0 {
            return None;
        }
        let trend = fast / slow - 1.0;

        if trend.abs() >= self.trend_threshold {
            let index = (0..closes.len()).map(|i| i as f64).collect::<Vec<_>>();
            let linearity = calc_correlation(&index, closes).map_or(0.0, f64::abs);
            let regime = if trend > 0.0 {
                Regime::TrendUp
            } else {
                Regime::TrendDown
            };
            return Some(RegimeClassification::new(regime, linearity));
        }

        let volatility = std_dev(&returns(closes))?;
        let regime = if volatility >= self.volatility_threshold {
            Regime::RangeHighVol
        } else {
            Regime::RangeLowVol
        };
        let confidence = if self.trend_threshold > 0.0 {
            1.0 - trend.abs() / self.trend_threshold
        } else {
            1.0
        };

        Some(RegimeClassification::new(regime, confidence))
    }
}

impl RegimeDetector for TrendVolatilityDetector {
    fn classify(&self, snapshot: &MarketSnapshot) -> Option<RegimeClassification> {
        let (timeframe, closes) = SOURCE_TIMEFRAMES
            .into_iter()
            .map(|timeframe| (timeframe, snapshot.closes(timeframe)))
            .find(|(_, closes)| closes.len() >= self.slow_period)?;

        let classification = self.classify_closes(&closes)?;
        debug!(
            symbol = %snapshot.symbol,
            %timeframe,
            regime = %classification.regime,
            confidence = classification.confidence,
            "classified market regime"
        );

        Some(classification)
    }
}
