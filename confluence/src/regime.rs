//! Regime-adaptive thresholds and family-weight multipliers.

use crate::{
    config::RegimeConfig,
    model::{Family, RegimeClassification, Thresholds},
    snapshot::MarketSnapshot,
};
use std::collections::BTreeMap;

/// Classifies market conditions for a snapshot. Implementations must be deterministic.
pub trait RegimeDetector: Send + Sync {
    /// `None` if the snapshot carries too little data to classify.
    fn classify(&self, snapshot: &MarketSnapshot) -> Option<RegimeClassification>;
}

/// Outcome of applying the regime table.
#[derive(Clone, PartialEq, Debug)]
pub struct RegimeAdjustment {
    pub regime: RegimeClassification,
    /// `false` if the classification fell below the confidence floor and the neutral table was
    /// used instead.
    pub applied: bool,
    pub thresholds: Thresholds,
    /// Multiplier for every family, applied to family weights before renormalisation.
    pub weight_multipliers: BTreeMap<Family, f64>,
}

/// Resolve the regime for `snapshot`: an explicit classification on the snapshot wins, then the
/// detector, then the default (`range_low_vol` with zero confidence).
pub fn resolve(
    snapshot: &MarketSnapshot,
    detector: Option<&dyn RegimeDetector>,
) -> RegimeClassification {
    snapshot
        .regime
        .map(|regime| RegimeClassification::new(regime.regime, regime.confidence))
        .or_else(|| detector.and_then(|detector| detector.classify(snapshot)))
        .unwrap_or_default()
}

/// Map `regime` to thresholds and multipliers.
///
/// Classifications below `config.min_confidence`, or regimes without a profile, leave the base
/// thresholds in place with all multipliers at 1.
pub fn adjust(
    base: &Thresholds,
    config: &RegimeConfig,
    regime: &RegimeClassification,
) -> RegimeAdjustment {
    let profile = (regime.confidence >= config.min_confidence)
        .then(|| config.profiles.get(&regime.regime))
        .flatten();

    let (applied, thresholds, weight_multipliers) = match profile {
        Some(profile) => (
            true,
            profile.thresholds,
            Family::ALL
                .into_iter()
                .map(|family| {
                    let multiplier = profile.multipliers.get(&family).copied().unwrap_or(1.0);
                    (family, multiplier)
                })
                .collect(),
        ),
        None => (
            false,
            *base,
            Family::ALL.into_iter().map(|family| (family, 1.0)).collect(),
        ),
    };

    RegimeAdjustment {
        regime: *regime,
        applied,
        thresholds,
        weight_multipliers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::EngineConfig,
        model::{Family, Regime},
        weights::WEIGHT_SUM_TOLERANCE,
    };
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeSet;

    struct FixedDetector(Option<RegimeClassification>);

    impl RegimeDetector for FixedDetector {
        fn classify(&self, _: &MarketSnapshot) -> Option<RegimeClassification> {
            self.0
        }
    }

    fn snapshot() -> MarketSnapshot {
        MarketSnapshot::new("ETHUSDT", Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_resolve_order() {
        let detector = FixedDetector(Some(RegimeClassification::new(Regime::TrendDown, 0.8)));

        // TC0: no detector, no snapshot regime → default
        assert_eq!(resolve(&snapshot(), None), RegimeClassification::default());

        // TC1: detector used when the snapshot carries nothing
        assert_eq!(resolve(&snapshot(), Some(&detector)).regime, Regime::TrendDown);

        // TC2: snapshot classification wins over the detector
        let tagged = snapshot().with_regime(RegimeClassification::new(Regime::TrendUp, 0.6));
        assert_eq!(resolve(&tagged, Some(&detector)).regime, Regime::TrendUp);

        // TC3: detector declining falls back to default
        let declining = FixedDetector(None);
        assert_eq!(
            resolve(&snapshot(), Some(&declining)),
            RegimeClassification::default()
        );
    }

    #[test]
    fn test_adjust_applies_profile_above_confidence_floor() {
        let config = EngineConfig::default();
        let regime = RegimeClassification::new(Regime::RangeHighVol, 0.9);

        let adjustment = adjust(&config.thresholds, &config.regime, &regime);
        let profile = &config.regime.profiles[&Regime::RangeHighVol];

        assert!(adjustment.applied);
        assert_eq!(adjustment.thresholds, profile.thresholds);
        assert_eq!(adjustment.weight_multipliers[&Family::Orderflow], 1.4);
        assert_eq!(adjustment.weight_multipliers[&Family::Sentiment], 1.0);
        assert_eq!(adjustment.weight_multipliers.len(), Family::ALL.len());
    }

    #[test]
    fn test_adjust_low_confidence_is_neutral() {
        let config = EngineConfig::default();

        for confidence in [0.0, 0.1, 0.29] {
            let regime = RegimeClassification::new(Regime::TrendUp, confidence);
            let adjustment = adjust(&config.thresholds, &config.regime, &regime);

            assert!(!adjustment.applied, "confidence {confidence}");
            assert_eq!(adjustment.thresholds, config.thresholds);
            assert!(adjustment.weight_multipliers.values().all(|multiplier| *multiplier == 1.0));
        }
    }

    #[test]
    fn test_multipliers_preserve_sum_to_one_after_renormalisation() {
        let config = EngineConfig::default();

        for regime in Regime::ALL {
            let adjustment = adjust(
                &config.thresholds,
                &config.regime,
                &RegimeClassification::new(regime, 1.0),
            );

            let present: BTreeSet<Family> = Family::ALL.into_iter().collect();
            let normalized = config
                .weights
                .families
                .scaled(&adjustment.weight_multipliers)
                .normalized(&present);

            assert!(
                (normalized.total() - 1.0).abs() <= WEIGHT_SUM_TOLERANCE,
                "{regime}"
            );
        }
    }
}
