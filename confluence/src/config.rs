//! Strongly typed engine configuration.
//!
//! Loaded once at process start (TOML or JSON), validated in full, and then treated as
//! read-only by the scoring pipeline. Every section has defaults, so a partial file only needs
//! to name what it overrides.

use crate::{
    error::ConfigError,
    model::{Family, Regime, Thresholds, Timeframe},
    weights::WeightTable,
};
use serde::{Deserialize, Deserializer, Serialize};
use smol_str::SmolStr;
use std::{collections::BTreeMap, fmt::Display, path::Path, str::FromStr, time::Duration};

/// Default minimum regime confidence below which the regime-neutral table is used.
pub const DEFAULT_MIN_REGIME_CONFIDENCE: f64 = 0.3;

/// Complete configuration of the confluence engine.
#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub weights: WeightsConfig,
    pub thresholds: Thresholds,
    pub divergence: DivergenceConfig,
    pub regime: RegimeConfig,
    pub collection: CollectionConfig,
}

impl EngineConfig {
    /// Load and validate a configuration file. The format is chosen by extension
    /// (`.toml` or `.json`).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
            path: path.display().to_string(),
            message: error.to_string(),
        })?;

        match path.extension().and_then(|extension| extension.to_str()) {
            Some("toml") => Self::from_toml_str(&contents),
            Some("json") => Self::from_json_str(&contents),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or_default().to_string(),
            )),
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(contents).map_err(|error| ConfigError::Parse(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(contents)
            .map_err(|error| ConfigError::Parse(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every invariant the scoring pipeline assumes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.weights.validate()?;
        validate_thresholds("base thresholds", &self.thresholds)?;
        self.divergence.validate()?;
        self.regime.validate()?;
        self.collection.validate()
    }

    pub fn with_family_weights(mut self, weights: WeightTable<Family>) -> Self {
        self.weights.families = weights;
        self
    }

    pub fn with_timeframe_weights(mut self, weights: WeightTable<Timeframe>) -> Self {
        self.weights.timeframes = weights;
        self
    }

    pub fn with_thresholds(mut self, buy: f64, sell: f64) -> Self {
        self.thresholds = Thresholds::new(buy, sell);
        self
    }

    pub fn with_divergence(mut self, divergence: DivergenceConfig) -> Self {
        self.divergence = divergence;
        self
    }

    pub fn with_regime(mut self, regime: RegimeConfig) -> Self {
        self.regime = regime;
        self
    }

    /// Millisecond timeouts saturate at `u64::MAX`.
    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.collection.provider_timeout_ms = saturating_millis(timeout);
        self
    }

    pub fn with_symbol_timeout(mut self, timeout: Duration) -> Self {
        self.collection.symbol_timeout_ms = saturating_millis(timeout);
        self
    }

    pub fn with_max_concurrent_symbols(mut self, max: usize) -> Self {
        self.collection.max_concurrent_symbols = max;
        self
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Family, timeframe and sub-component weight tables.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct WeightsConfig {
    pub families: WeightTable<Family>,
    pub timeframes: WeightTable<Timeframe>,
    /// Per-family sub-component weights, used by providers to combine their sub-indicators.
    #[serde(deserialize_with = "de_keyed")]
    pub sub_components: BTreeMap<Family, WeightTable<SmolStr>>,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        let families = [
            (Family::Technical, 0.20),
            (Family::Volume, 0.10),
            (Family::Orderflow, 0.25),
            (Family::Orderbook, 0.20),
            (Family::Sentiment, 0.10),
            (Family::PriceStructure, 0.15),
        ];

        let timeframes = [
            (Timeframe::Base, 0.4),
            (Timeframe::Ltf, 0.3),
            (Timeframe::Mtf, 0.2),
            (Timeframe::Htf, 0.1),
        ];

        let sub_components = [
            (
                Family::Technical,
                vec![("rsi", 0.4), ("ema_trend", 0.35), ("momentum", 0.25)],
            ),
            (
                Family::Volume,
                vec![("vwap_position", 0.6), ("relative_volume", 0.4)],
            ),
            (
                Family::Orderflow,
                vec![("buy_pressure", 0.5), ("cvd_trend", 0.5)],
            ),
            (
                Family::Orderbook,
                vec![("imbalance", 0.6), ("depth_ratio", 0.4)],
            ),
            (
                Family::Sentiment,
                vec![("funding", 0.5), ("long_short", 0.5)],
            ),
            (
                Family::PriceStructure,
                vec![("range_position", 0.5), ("swing_bias", 0.5)],
            ),
        ]
        .into_iter()
        .map(|(family, entries)| {
            let table = entries
                .into_iter()
                .map(|(name, weight)| (SmolStr::new_static(name), weight))
                .collect();
            (family, table)
        })
        .collect();

        Self {
            families: families.into_iter().collect(),
            timeframes: timeframes.into_iter().collect(),
            sub_components,
        }
    }
}

impl WeightsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.families.validate_complete("families")?;
        self.timeframes.validate_complete("timeframes")?;
        for (family, table) in &self.sub_components {
            if !table.is_empty() {
                table.validate(&format!("sub_components.{family}"))?;
            }
        }
        Ok(())
    }

    /// Sub-component weights for `family`, empty if none are configured.
    pub fn sub_components(&self, family: Family) -> WeightTable<SmolStr> {
        self.sub_components.get(&family).cloned().unwrap_or_default()
    }
}

/// Price/indicator divergence settings.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct DivergenceConfig {
    pub enabled: bool,
    /// Number of trailing bars searched for extrema.
    pub lookback: usize,
    /// Score points added per unit of divergence magnitude.
    pub weight: f64,
    /// Relative-change gap that maps to a full magnitude of 1.
    pub scale: f64,
    /// Timeframe whose closes form the price series.
    pub price_timeframe: Timeframe,
}

impl Default for DivergenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lookback: 20,
            weight: 10.0,
            scale: 0.1,
            price_timeframe: Timeframe::Base,
        }
    }
}

impl DivergenceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.lookback < 3 {
            return Err(ConfigError::InvalidDivergence(format!(
                "lookback {} must be at least 3",
                self.lookback
            )));
        }
        if !self.weight.is_finite() || self.weight < 0.0 {
            return Err(ConfigError::InvalidDivergence(format!(
                "weight {} must be finite and non-negative",
                self.weight
            )));
        }
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(ConfigError::InvalidDivergence(format!(
                "scale {} must be finite and positive",
                self.scale
            )));
        }
        Ok(())
    }
}

/// Threshold band and family-weight multipliers applied in one [`Regime`].
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct RegimeProfile {
    pub thresholds: Thresholds,
    /// Families without an entry use a multiplier of 1.
    #[serde(default, deserialize_with = "de_keyed")]
    pub multipliers: BTreeMap<Family, f64>,
}

impl RegimeProfile {
    pub fn new(buy: f64, sell: f64, multipliers: impl IntoIterator<Item = (Family, f64)>) -> Self {
        Self {
            thresholds: Thresholds::new(buy, sell),
            multipliers: multipliers.into_iter().collect(),
        }
    }
}

/// Regime → thresholds/multipliers table.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct RegimeConfig {
    /// Classifications below this confidence fall back to the regime-neutral table.
    pub min_confidence: f64,
    #[serde(deserialize_with = "de_keyed")]
    pub profiles: BTreeMap<Regime, RegimeProfile>,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        use Family::*;

        let profiles = BTreeMap::from([
            (
                Regime::TrendUp,
                RegimeProfile::new(
                    57.0,
                    38.0,
                    [
                        (Technical, 1.3),
                        (PriceStructure, 1.2),
                        (Volume, 1.1),
                        (Orderbook, 0.8),
                        (Sentiment, 0.8),
                    ],
                ),
            ),
            (
                Regime::TrendDown,
                RegimeProfile::new(
                    62.0,
                    43.0,
                    [
                        (Technical, 1.3),
                        (PriceStructure, 1.2),
                        (Volume, 1.1),
                        (Orderbook, 0.8),
                        (Sentiment, 0.8),
                    ],
                ),
            ),
            (
                Regime::RangeLowVol,
                RegimeProfile::new(
                    62.0,
                    38.0,
                    [
                        (Orderbook, 1.2),
                        (PriceStructure, 1.2),
                        (Sentiment, 1.1),
                        (Technical, 0.8),
                    ],
                ),
            ),
            (
                Regime::RangeHighVol,
                RegimeProfile::new(
                    65.0,
                    35.0,
                    [
                        (Orderflow, 1.4),
                        (Orderbook, 1.2),
                        (Volume, 1.1),
                        (Technical, 0.7),
                    ],
                ),
            ),
        ]);

        Self {
            min_confidence: DEFAULT_MIN_REGIME_CONFIDENCE,
            profiles,
        }
    }
}

impl RegimeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::InvalidConfidence(self.min_confidence.to_string()));
        }

        for regime in Regime::ALL {
            let table = format!("regime.profiles.{regime}");
            let profile = self
                .profiles
                .get(&regime)
                .ok_or_else(|| ConfigError::MissingWeight {
                    table: "regime.profiles".to_string(),
                    key: regime.to_string(),
                })?;

            validate_thresholds(&table, &profile.thresholds)?;

            for (family, multiplier) in &profile.multipliers {
                if !multiplier.is_finite() || *multiplier < 0.0 {
                    return Err(ConfigError::invalid_weight(&table, family, *multiplier));
                }
            }
        }

        Ok(())
    }
}

/// Provider collection and orchestration limits.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Upper bound for a single family provider call.
    pub provider_timeout_ms: u64,
    /// Budget for collecting all providers of one symbol.
    pub symbol_timeout_ms: u64,
    /// Symbols scored in parallel by the orchestrator.
    pub max_concurrent_symbols: usize,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            provider_timeout_ms: 5_000,
            symbol_timeout_ms: 15_000,
            max_concurrent_symbols: 8,
        }
    }
}

impl CollectionConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn symbol_timeout(&self) -> Duration {
        Duration::from_millis(self.symbol_timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.provider_timeout_ms == 0 || self.symbol_timeout_ms == 0 {
            return Err(ConfigError::InvalidCollection(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        if self.max_concurrent_symbols == 0 {
            return Err(ConfigError::InvalidCollection(
                "max_concurrent_symbols must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn validate_thresholds(context: &str, thresholds: &Thresholds) -> Result<(), ConfigError> {
    let Thresholds { buy, sell } = *thresholds;
    let in_range = |value: f64| (0.0..=100.0).contains(&value);

    if in_range(buy) && in_range(sell) && buy > sell {
        Ok(())
    } else {
        Err(ConfigError::InvalidThresholds {
            context: context.to_string(),
            buy: buy.to_string(),
            sell: sell.to_string(),
        })
    }
}

/// Deserialise a string-keyed map into a map keyed by `K`, rejecting unknown keys.
pub(crate) fn de_keyed<'de, D, K, V>(deserializer: D) -> Result<BTreeMap<K, V>, D::Error>
where
    D: Deserializer<'de>,
    K: Ord + FromStr,
    K::Err: Display,
    V: Deserialize<'de>,
{
    BTreeMap::<String, V>::deserialize(deserializer)?
        .into_iter()
        .map(|(key, value)| {
            key.parse::<K>()
                .map(|key| (key, value))
                .map_err(serde::de::Error::custom)
        })
        .collect()
}
