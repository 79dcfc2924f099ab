//! Price/indicator divergence detection.
//!
//! A bearish divergence is a price higher-high paired with an indicator lower-high; a bullish
//! divergence is a price lower-low paired with an indicator higher-low. Only the trailing
//! `lookback` bars of each series are considered, aligned at their most recent value.

use crate::model::{DivergenceAdjustment, DivergenceKind, Family, Score};
use itertools::Itertools;

/// Denominator floor below which relative changes fall back to absolute changes.
const RELATIVE_EPSILON: f64 = 1e-12;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum ExtremumKind {
    Peak,
    Trough,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
struct Extremum {
    index: usize,
    kind: ExtremumKind,
}

/// Detects divergences over a fixed lookback window.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct DivergenceDetector {
    lookback: usize,
    scale: f64,
}

impl DivergenceDetector {
    /// `scale` is the relative-change gap mapping to a full magnitude of 1.
    pub fn new(lookback: usize, scale: f64) -> Self {
        Self { lookback, scale }
    }

    pub fn lookback(&self) -> usize {
        self.lookback
    }

    /// Compare the two most recent same-kind price extrema against the indicator at the same bars.
    pub fn detect(&self, family: Family, price: &[f64], indicator: &[f64]) -> DivergenceAdjustment {
        let lookback = self.lookback;
        if lookback < 3 || price.len() < lookback || indicator.len() < lookback {
            return DivergenceAdjustment::none(family);
        }

        let price = &price[price.len() - lookback..];
        let indicator = &indicator[indicator.len() - lookback..];

        if price.iter().chain(indicator).any(|value| !value.is_finite()) {
            return DivergenceAdjustment::none(family);
        }

        let extrema = local_extrema(price);
        let Some(latest) = extrema.last() else {
            return DivergenceAdjustment::none(family);
        };
        let Some(previous) = extrema
            .iter()
            .rev()
            .skip(1)
            .find(|extremum| extremum.kind == latest.kind)
        else {
            return DivergenceAdjustment::none(family);
        };

        let (first, last) = (previous.index, latest.index);
        let kind = match latest.kind {
            ExtremumKind::Peak
                if price[last] > price[first] && indicator[last] < indicator[first] =>
            {
                DivergenceKind::Bearish
            }
            ExtremumKind::Trough
                if price[last] < price[first] && indicator[last] > indicator[first] =>
            {
                DivergenceKind::Bullish
            }
            _ => return DivergenceAdjustment::none(family),
        };

        let price_change = relative_change(price[first], price[last]);
        let indicator_change = relative_change(indicator[first], indicator[last]);
        let strength = ((price_change - indicator_change).abs() / self.scale).min(1.0);

        let magnitude = match kind {
            DivergenceKind::Bullish => strength,
            DivergenceKind::Bearish => -strength,
            DivergenceKind::None => 0.0,
        };

        DivergenceAdjustment::new(family, magnitude.clamp(-1.0, 1.0), kind)
    }
}

/// `adjusted = base + magnitude · weight`, re-clamped into `[0, 100]`.
///
/// An unbounded adjustment saturates by its sign. An undefined one (`0 · ∞`) leaves `base`.
pub fn apply(base: Score, adjustment: &DivergenceAdjustment, weight: f64) -> Score {
    let adjusted = base.value() + adjustment.magnitude * weight;
    if adjusted.is_nan() {
        base
    } else {
        Score::new(adjusted.clamp(0.0, 100.0))
    }
}

/// Interior peaks (`x[i] > x[i-1] && x[i] >= x[i+1]`) and troughs (mirrored), oldest first.
///
/// The one-sided strict comparison registers a plateau once, at its first bar.
fn local_extrema(series: &[f64]) -> Vec<Extremum> {
    series
        .iter()
        .tuple_windows()
        .enumerate()
        .filter_map(|(offset, (previous, current, next))| {
            let index = offset + 1;
            if current > previous && current >= next {
                Some(Extremum {
                    index,
                    kind: ExtremumKind::Peak,
                })
            } else if current < previous && current <= next {
                Some(Extremum {
                    index,
                    kind: ExtremumKind::Trough,
                })
            } else {
                None
            }
        })
        .collect()
}

fn relative_change(from: f64, to: f64) -> f64 {
    if from.abs() > RELATIVE_EPSILON {
        (to - from) / from.abs()
    } else {
        to - from
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BEARISH_PRICE: [f64; 10] = [
        100.0, 102.0, 104.0, 105.0, 103.0, 101.0, 104.0, 108.0, 110.0, 107.0,
    ];
    const BEARISH_INDICATOR: [f64; 10] =
        [50.0, 60.0, 65.0, 70.0, 62.0, 55.0, 58.0, 61.0, 60.0, 52.0];

    const BULLISH_PRICE: [f64; 10] = [100.0, 98.0, 96.0, 95.0, 97.0, 99.0, 96.0, 92.0, 90.0, 93.0];
    const BULLISH_INDICATOR: [f64; 10] =
        [50.0, 40.0, 35.0, 30.0, 38.0, 45.0, 42.0, 39.0, 40.0, 48.0];

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_bearish_divergence() {
        let detector = DivergenceDetector::new(10, 0.5);
        let adjustment = detector.detect(Family::Technical, &BEARISH_PRICE, &BEARISH_INDICATOR);

        assert_eq!(adjustment.kind, DivergenceKind::Bearish);
        // price +5/105, indicator -10/70
        let expected = ((5.0 / 105.0) + (10.0 / 70.0)) / 0.5;
        assert_close(adjustment.magnitude, -expected);
    }

    #[test]
    fn test_bullish_divergence() {
        let detector = DivergenceDetector::new(10, 0.5);
        let adjustment = detector.detect(Family::Orderflow, &BULLISH_PRICE, &BULLISH_INDICATOR);

        assert_eq!(adjustment.kind, DivergenceKind::Bullish);
        assert_eq!(adjustment.family, Family::Orderflow);
        // price -5/95, indicator +10/30
        let expected = ((5.0 / 95.0) + (10.0 / 30.0)) / 0.5;
        assert_close(adjustment.magnitude, expected);
    }

    #[test]
    fn test_magnitude_is_clipped() {
        let detector = DivergenceDetector::new(10, 0.01);
        let adjustment = detector.detect(Family::Technical, &BEARISH_PRICE, &BEARISH_INDICATOR);
        assert_eq!(adjustment.magnitude, -1.0);
    }

    #[test]
    fn test_no_divergence_cases() {
        struct TestCase {
            price: Vec<f64>,
            indicator: Vec<f64>,
            lookback: usize,
        }

        let tests = vec![
            TestCase {
                // TC0: price series shorter than lookback
                price: vec![1.0, 2.0, 1.0],
                indicator: BEARISH_INDICATOR.to_vec(),
                lookback: 10,
            },
            TestCase {
                // TC1: indicator series shorter than lookback
                price: BEARISH_PRICE.to_vec(),
                indicator: vec![1.0, 2.0],
                lookback: 10,
            },
            TestCase {
                // TC2: flat price has no extremum
                price: vec![100.0; 10],
                indicator: BEARISH_INDICATOR.to_vec(),
                lookback: 10,
            },
            TestCase {
                // TC3: indicator confirms the higher high
                price: BEARISH_PRICE.to_vec(),
                indicator: BEARISH_PRICE.to_vec(),
                lookback: 10,
            },
            TestCase {
                // TC4: a single peak has nothing to compare against
                price: vec![1.0, 2.0, 3.0, 4.0, 3.0, 2.0],
                indicator: vec![6.0, 5.0, 4.0, 3.0, 2.0, 1.0],
                lookback: 6,
            },
            TestCase {
                // TC5: non-finite values
                price: vec![1.0, f64::NAN, 1.0, 2.0, 1.0],
                indicator: vec![1.0, 2.0, 1.0, 2.0, 1.0],
                lookback: 5,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let detector = DivergenceDetector::new(test.lookback, 0.1);
            let actual = detector.detect(Family::Technical, &test.price, &test.indicator);
            assert!(actual.is_none(), "TC{} failed: {:?}", index, actual);
            assert_eq!(actual.magnitude, 0.0, "TC{} failed", index);
        }
    }

    #[test]
    fn test_only_trailing_window_is_considered() {
        // A bullish setup followed by the bearish window: only the trailing bars count.
        let price = BULLISH_PRICE.iter().chain(&BEARISH_PRICE).copied().collect::<Vec<_>>();
        let indicator = BULLISH_INDICATOR
            .iter()
            .chain(&BEARISH_INDICATOR)
            .copied()
            .collect::<Vec<_>>();

        let detector = DivergenceDetector::new(10, 0.5);
        let adjustment = detector.detect(Family::Technical, &price, &indicator);
        assert_eq!(adjustment.kind, DivergenceKind::Bearish);
    }

    #[test]
    fn test_apply_clamps() {
        struct TestCase {
            base: f64,
            magnitude: f64,
            weight: f64,
            expected: f64,
        }

        let tests = vec![
            TestCase {
                // TC0: in range
                base: 60.0,
                magnitude: -0.5,
                weight: 10.0,
                expected: 55.0,
            },
            TestCase {
                // TC1: overshoots above
                base: 97.0,
                magnitude: 1.0,
                weight: 10.0,
                expected: 100.0,
            },
            TestCase {
                // TC2: overshoots below
                base: 3.0,
                magnitude: -1.0,
                weight: 50.0,
                expected: 0.0,
            },
            TestCase {
                // TC3: infinite weight saturates upwards
                base: 42.0,
                magnitude: 1.0,
                weight: f64::INFINITY,
                expected: 100.0,
            },
            TestCase {
                // TC4: infinite weight saturates downwards
                base: 42.0,
                magnitude: -0.25,
                weight: f64::INFINITY,
                expected: 0.0,
            },
            TestCase {
                // TC5: no divergence under an infinite weight
                base: 42.0,
                magnitude: 0.0,
                weight: f64::INFINITY,
                expected: 42.0,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let adjustment =
                DivergenceAdjustment::new(Family::Volume, test.magnitude, DivergenceKind::Bullish);
            let actual = apply(Score::new(test.base), &adjustment, test.weight).value();
            assert_eq!(actual, test.expected, "TC{} failed", index);
            assert!((0.0..=100.0).contains(&actual), "TC{} failed", index);
        }
    }
}
