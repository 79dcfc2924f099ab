use crate::snapshot::Side;
use chrono::{DateTime, Utc};
use derive_more::{Constructor, Display};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::{collections::BTreeMap, str::FromStr};

/// Neutral [`Score`] value used whenever a computation cannot produce a result.
pub const NEUTRAL_SCORE: f64 = 50.0;

/// Lower bound of the [`Score`] range.
pub const MIN_SCORE: f64 = 0.0;

/// Upper bound of the [`Score`] range.
pub const MAX_SCORE: f64 = 100.0;

/// Bounded score in `[0, 100]`, where 50 is neutral, above is bullish and below is bearish.
#[derive(Copy, Clone, PartialEq, PartialOrd, Debug, Display, Deserialize, Serialize)]
#[serde(transparent)]
#[display("{_0:.2}")]
pub struct Score(f64);

impl Score {
    pub const NEUTRAL: Score = Score(NEUTRAL_SCORE);

    /// Construct a [`Score`], clamping into `[0, 100]`. Non-finite input maps to neutral.
    pub fn new(value: f64) -> Self {
        if value.is_finite() {
            Self(value.clamp(MIN_SCORE, MAX_SCORE))
        } else {
            Self::NEUTRAL
        }
    }

    /// Map a signed strength in `[-1, 1]` onto the score range (-1 → 0, 0 → 50, 1 → 100).
    pub fn from_signed(strength: f64) -> Self {
        Self::new(NEUTRAL_SCORE + strength.clamp(-1.0, 1.0) * NEUTRAL_SCORE)
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn is_neutral(&self) -> bool {
        self.0 == NEUTRAL_SCORE
    }
}

impl Default for Score {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

impl From<f64> for Score {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

/// Analytical family contributing to the confluence score.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    #[display("technical")]
    Technical,
    #[display("volume")]
    Volume,
    #[display("orderflow")]
    Orderflow,
    #[display("orderbook")]
    Orderbook,
    #[display("sentiment")]
    Sentiment,
    #[display("price_structure")]
    PriceStructure,
}

impl Family {
    pub const ALL: [Family; 6] = [
        Family::Technical,
        Family::Volume,
        Family::Orderflow,
        Family::Orderbook,
        Family::Sentiment,
        Family::PriceStructure,
    ];
}

impl FromStr for Family {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Family::ALL
            .into_iter()
            .find(|family| family.to_string() == s)
            .ok_or_else(|| format!("unknown family: {s}"))
    }
}

/// Analysis granularity. Declaration order is the adjacency order used when substituting a
/// missing timeframe.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    #[display("base")]
    Base,
    #[display("ltf")]
    Ltf,
    #[display("mtf")]
    Mtf,
    #[display("htf")]
    Htf,
}

impl Timeframe {
    pub const ALL: [Timeframe; 4] = [
        Timeframe::Base,
        Timeframe::Ltf,
        Timeframe::Mtf,
        Timeframe::Htf,
    ];

    /// Position in the adjacency order `base → ltf → mtf → htf`.
    pub fn index(&self) -> usize {
        match self {
            Timeframe::Base => 0,
            Timeframe::Ltf => 1,
            Timeframe::Mtf => 2,
            Timeframe::Htf => 3,
        }
    }

    /// Adjacency distance between two timeframes.
    pub fn distance(&self, other: Timeframe) -> usize {
        self.index().abs_diff(other.index())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::ALL
            .into_iter()
            .find(|timeframe| timeframe.to_string() == s)
            .ok_or_else(|| format!("unknown timeframe: {s}"))
    }
}

/// Score produced by a family provider for one timeframe.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize, Constructor)]
pub struct ComponentScore {
    pub family: Family,
    pub timeframe: Timeframe,
    pub score: Score,
    #[serde(default)]
    pub sub_components: BTreeMap<SmolStr, Score>,
}

impl ComponentScore {
    /// [`ComponentScore`] without sub-components.
    pub fn bare(family: Family, timeframe: Timeframe, score: impl Into<Score>) -> Self {
        Self::new(family, timeframe, score.into(), BTreeMap::new())
    }
}

/// Direction of a price/indicator divergence.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Display, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceKind {
    /// Price lower low while the indicator makes a higher low.
    #[display("bullish")]
    Bullish,
    /// Price higher high while the indicator makes a lower high.
    #[display("bearish")]
    Bearish,
    #[default]
    #[display("none")]
    None,
}

/// Signed, advisory score adjustment derived from a divergence.
///
/// `magnitude` lies in `[-1, 1]`: positive for bullish, negative for bearish.
#[derive(Copy, Clone, PartialEq, Debug, Deserialize, Serialize, Constructor)]
pub struct DivergenceAdjustment {
    pub family: Family,
    pub magnitude: f64,
    pub kind: DivergenceKind,
}

impl DivergenceAdjustment {
    pub fn none(family: Family) -> Self {
        Self::new(family, 0.0, DivergenceKind::None)
    }

    pub fn is_none(&self) -> bool {
        self.kind == DivergenceKind::None
    }
}

/// Coarse market-condition classification.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Display, Deserialize,
    Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    #[display("trend_up")]
    TrendUp,
    #[display("trend_down")]
    TrendDown,
    #[default]
    #[display("range_low_vol")]
    RangeLowVol,
    #[display("range_high_vol")]
    RangeHighVol,
}

impl Regime {
    pub const ALL: [Regime; 4] = [
        Regime::TrendUp,
        Regime::TrendDown,
        Regime::RangeLowVol,
        Regime::RangeHighVol,
    ];
}

impl FromStr for Regime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Regime::ALL
            .into_iter()
            .find(|regime| regime.to_string() == s)
            .ok_or_else(|| format!("unknown regime: {s}"))
    }
}

/// [`Regime`] with the detector's confidence in `[0, 1]`.
#[derive(Copy, Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct RegimeClassification {
    pub regime: Regime,
    pub confidence: f64,
}

impl RegimeClassification {
    /// Construct a [`RegimeClassification`], clamping confidence into `[0, 1]`.
    pub fn new(regime: Regime, confidence: f64) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self { regime, confidence }
    }
}

/// Discrete signal derived from the final score and the active thresholds.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Display, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    #[display("BUY")]
    Buy,
    #[display("SELL")]
    Sell,
    #[default]
    #[display("NEUTRAL")]
    Neutral,
}

impl Signal {
    /// Map a score onto a signal: `score >= buy` → Buy, `score <= sell` → Sell.
    pub fn from_score(score: Score, thresholds: &Thresholds) -> Self {
        if score.value() >= thresholds.buy {
            Signal::Buy
        } else if score.value() <= thresholds.sell {
            Signal::Sell
        } else {
            Signal::Neutral
        }
    }

    /// Equivalent order [`Side`], if the signal is actionable.
    pub fn side(&self) -> Option<Side> {
        match self {
            Signal::Buy => Some(Side::Buy),
            Signal::Sell => Some(Side::Sell),
            Signal::Neutral => None,
        }
    }
}

/// Buy/sell threshold band.
#[derive(Copy, Clone, PartialEq, Debug, Deserialize, Serialize, Constructor)]
pub struct Thresholds {
    pub buy: f64,
    pub sell: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            buy: 60.0,
            sell: 40.0,
        }
    }
}

/// Why a family contributed the neutral value instead of its own score.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    #[display("timeout")]
    Timeout,
    #[display("provider_error")]
    ProviderError,
    #[display("insufficient_data")]
    InsufficientData,
    #[display("no_timeframes")]
    NoTimeframes,
    /// No provider is registered for the family.
    #[display("unregistered")]
    Unregistered,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize, Serialize, Constructor)]
pub struct Fallback {
    pub family: Family,
    pub reason: FallbackReason,
}

/// Diagnostics describing how a [`ConfluenceResult`] was assembled.
#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct ResultMetadata {
    /// Families that produced a usable score this cycle.
    pub present: Vec<Family>,
    /// Families that contributed the neutral value, with the reason.
    pub fallbacks: Vec<Fallback>,
    /// Timeframes filled in by the synchroniser, per family.
    pub synthesized: BTreeMap<Family, Vec<Timeframe>>,
    /// Effective family weights used for the final sum.
    pub weights: BTreeMap<Family, f64>,
    /// Family scores before divergence adjustment.
    pub raw_components: BTreeMap<Family, Score>,
}

impl ResultMetadata {
    pub fn fallback_count(&self) -> usize {
        self.fallbacks.len()
    }
}

/// Output of one analysis call.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct ConfluenceResult {
    pub symbol: SmolStr,
    pub score: Score,
    pub signal: Signal,
    pub components: BTreeMap<Family, Score>,
    pub sub_components: BTreeMap<Family, BTreeMap<SmolStr, Score>>,
    pub divergences: Vec<DivergenceAdjustment>,
    pub regime: RegimeClassification,
    pub thresholds: Thresholds,
    pub metadata: ResultMetadata,
    pub timestamp: DateTime<Utc>,
}

impl ConfluenceResult {
    /// Result with every family and the final score at neutral.
    pub fn neutral(
        symbol: impl Into<SmolStr>,
        timestamp: DateTime<Utc>,
        thresholds: Thresholds,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            score: Score::NEUTRAL,
            signal: Signal::Neutral,
            components: Family::ALL
                .into_iter()
                .map(|family| (family, Score::NEUTRAL))
                .collect(),
            sub_components: BTreeMap::new(),
            divergences: Vec::new(),
            regime: RegimeClassification::default(),
            thresholds,
            metadata: ResultMetadata::default(),
            timestamp,
        }
    }

    /// `true` if no family produced a usable score.
    pub fn is_fully_neutral(&self) -> bool {
        self.metadata.present.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_new() {
        struct TestCase {
            input: f64,
            expected: f64,
        }

        let tests = vec![
            TestCase {
                // TC0: in range
                input: 71.5,
                expected: 71.5,
            },
            TestCase {
                // TC1: above range clamps
                input: 140.0,
                expected: 100.0,
            },
            TestCase {
                // TC2: below range clamps
                input: -3.0,
                expected: 0.0,
            },
            TestCase {
                // TC3: NaN is neutral
                input: f64::NAN,
                expected: 50.0,
            },
            TestCase {
                // TC4: infinity is neutral
                input: f64::INFINITY,
                expected: 50.0,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = Score::new(test.input).value();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_score_from_signed() {
        assert_eq!(Score::from_signed(-1.0).value(), 0.0);
        assert_eq!(Score::from_signed(0.0).value(), 50.0);
        assert_eq!(Score::from_signed(0.5).value(), 75.0);
        assert_eq!(Score::from_signed(3.0).value(), 100.0);
    }

    #[test]
    fn test_timeframe_distance() {
        assert_eq!(Timeframe::Base.distance(Timeframe::Htf), 3);
        assert_eq!(Timeframe::Mtf.distance(Timeframe::Ltf), 1);
        assert_eq!(Timeframe::Ltf.distance(Timeframe::Ltf), 0);
    }

    #[test]
    fn test_signal_from_score() {
        let thresholds = Thresholds::new(60.0, 40.0);

        assert_eq!(Signal::from_score(Score::new(60.0), &thresholds), Signal::Buy);
        assert_eq!(Signal::from_score(Score::new(40.0), &thresholds), Signal::Sell);
        assert_eq!(Signal::from_score(Score::new(50.0), &thresholds), Signal::Neutral);
        assert_eq!(Signal::Buy.side(), Some(Side::Buy));
        assert_eq!(Signal::Neutral.side(), None);
    }

    #[test]
    fn test_regime_classification_clamps_confidence() {
        assert_eq!(
            RegimeClassification::new(Regime::TrendUp, 1.7).confidence,
            1.0
        );
        assert_eq!(
            RegimeClassification::new(Regime::TrendUp, f64::NAN).confidence,
            0.0
        );
        assert_eq!(RegimeClassification::default().regime, Regime::RangeLowVol);
    }

    #[test]
    fn test_from_str() {
        assert_eq!("orderbook".parse::<Family>(), Ok(Family::Orderbook));
        assert_eq!("mtf".parse::<Timeframe>(), Ok(Timeframe::Mtf));
        assert_eq!("range_high_vol".parse::<Regime>(), Ok(Regime::RangeHighVol));
        assert!("macro".parse::<Family>().is_err());
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_string(&Family::PriceStructure).unwrap(),
            "\"price_structure\""
        );
        assert_eq!(serde_json::to_string(&Signal::Neutral).unwrap(), "\"NEUTRAL\"");
        assert_eq!(
            serde_json::from_str::<Timeframe>("\"htf\"").unwrap(),
            Timeframe::Htf
        );
    }
}
