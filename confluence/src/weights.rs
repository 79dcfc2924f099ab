//! Weight tables, the renormaliser, and the process-wide weight registry.
//!
//! The renormaliser owns the central invariant of the engine: whenever at least one key is
//! present, the weights it hands out sum to one.

use crate::{config::EngineConfig, error::ConfigError};
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
    path::Path,
    str::FromStr,
    sync::Arc,
};
use tracing::info;

/// Tolerance used when asserting that normalised weights sum to one.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Renormalise `weights` over the `present` keys.
///
/// - `present` empty: the original table is returned unmodified. Callers must treat the aggregate
///   as neutral in that case.
/// - otherwise: `w_i / Σ_{j ∈ present} w_j` for present keys and `0` for absent keys.
///
/// If every present key carries zero weight the present keys share the mass equally.
pub fn normalize<K>(weights: &BTreeMap<K, f64>, present: &BTreeSet<K>) -> BTreeMap<K, f64>
where
    K: Ord + Clone,
{
    if present.is_empty() {
        return weights.clone();
    }

    let present_total: f64 = present
        .iter()
        .map(|key| usable(weights.get(key).copied().unwrap_or(0.0)))
        .sum();

    let mut normalized: BTreeMap<K, f64> =
        weights.keys().map(|key| (key.clone(), 0.0)).collect();

    if present_total > 0.0 && present_total.is_finite() {
        for key in present {
            let weight = usable(weights.get(key).copied().unwrap_or(0.0));
            normalized.insert(key.clone(), weight / present_total);
        }
    } else {
        let share = 1.0 / present.len() as f64;
        for key in present {
            normalized.insert(key.clone(), share);
        }
    }

    normalized
}

fn usable(weight: f64) -> f64 {
    if weight.is_finite() && weight > 0.0 {
        weight
    } else {
        0.0
    }
}

/// Key type of a [`WeightTable`] whose complete key set is known at compile time.
pub trait WeightKey: Copy + Ord + Display + 'static {
    const KEYS: &'static [Self];
}

impl WeightKey for crate::model::Family {
    const KEYS: &'static [Self] = &crate::model::Family::ALL;
}

impl WeightKey for crate::model::Timeframe {
    const KEYS: &'static [Self] = &crate::model::Timeframe::ALL;
}

/// Table of non-negative weights keyed by family, timeframe, or sub-component name.
///
/// Entries are not required to sum to one; [`WeightTable::normalized`] produces tables that do.
#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(transparent)]
pub struct WeightTable<K: Ord> {
    entries: BTreeMap<K, f64>,
}

impl<K: Ord> Default for WeightTable<K> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<K> WeightTable<K>
where
    K: Ord + Clone,
{
    pub fn new(entries: BTreeMap<K, f64>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &BTreeMap<K, f64> {
        &self.entries
    }

    /// Weight for `key`, `0` if absent.
    pub fn get(&self, key: &K) -> f64 {
        self.entries.get(key).copied().unwrap_or(0.0)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn total(&self) -> f64 {
        self.entries.values().sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    /// Renormalise over `present`. See [`normalize`].
    pub fn normalized(&self, present: &BTreeSet<K>) -> Self {
        Self::new(normalize(&self.entries, present))
    }

    /// Multiply each weight by its multiplier; keys without a multiplier keep their weight.
    pub fn scaled(&self, multipliers: &BTreeMap<K, f64>) -> Self {
        Self::new(
            self.entries
                .iter()
                .map(|(key, weight)| {
                    let multiplier = multipliers.get(key).copied().unwrap_or(1.0);
                    (key.clone(), weight * multiplier)
                })
                .collect(),
        )
    }

    /// `Σ w_k · v_k` over keys present in both the table and `values`.
    pub fn weighted_sum(&self, values: &BTreeMap<K, f64>) -> f64 {
        self.entries
            .iter()
            .filter_map(|(key, weight)| values.get(key).map(|value| weight * value))
            .sum()
    }

    /// `true` if the weights sum to one within [`WEIGHT_SUM_TOLERANCE`].
    pub fn is_normalized(&self) -> bool {
        (self.total() - 1.0).abs() <= WEIGHT_SUM_TOLERANCE
    }

    /// Check every weight is finite and non-negative and the total is positive.
    pub fn validate(&self, table: &str) -> Result<(), ConfigError>
    where
        K: Display,
    {
        for (key, weight) in &self.entries {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(ConfigError::invalid_weight(table, key, *weight));
            }
        }

        if self.total() <= 0.0 {
            return Err(ConfigError::ZeroWeightTotal {
                table: table.to_string(),
            });
        }

        Ok(())
    }
}

impl<K> WeightTable<K>
where
    K: WeightKey,
{
    /// Like [`WeightTable::validate`], additionally requiring an entry for every key.
    pub fn validate_complete(&self, table: &str) -> Result<(), ConfigError> {
        if let Some(missing) = K::KEYS.iter().find(|key| !self.entries.contains_key(key)) {
            return Err(ConfigError::MissingWeight {
                table: table.to_string(),
                key: missing.to_string(),
            });
        }

        self.validate(table)
    }
}

impl<K> FromIterator<(K, f64)> for WeightTable<K>
where
    K: Ord,
{
    fn from_iter<T: IntoIterator<Item = (K, f64)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'de, K> Deserialize<'de> for WeightTable<K>
where
    K: Ord + FromStr,
    K::Err: Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        crate::config::de_keyed(deserializer).map(|entries| Self { entries })
    }
}

/// Process-wide, read-mostly holder of the active [`EngineConfig`].
///
/// Scoring calls take a read lock just long enough to clone the current `Arc`, so every call sees
/// one consistent configuration. Reloads validate first and then swap under the write lock,
/// blocking new scoring starts until the swap completes.
#[derive(Debug, Clone)]
pub struct WeightRegistry {
    inner: Arc<RwLock<RegistryState>>,
}

#[derive(Debug)]
struct RegistryState {
    generation: u64,
    config: Arc<EngineConfig>,
}

impl WeightRegistry {
    /// Validate `config` and wrap it in a new registry.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(RwLock::new(RegistryState {
                generation: 0,
                config: Arc::new(config),
            })),
        })
    }

    /// Load, validate, and wrap the configuration at `path`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::new(EngineConfig::load(path)?)
    }

    /// Consistent view of the active configuration.
    pub fn snapshot(&self) -> Arc<EngineConfig> {
        Arc::clone(&self.inner.read().config)
    }

    /// Number of successful reloads since construction.
    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// Replace the active configuration. An invalid `config` leaves the active one untouched.
    pub fn reload(&self, config: EngineConfig) -> Result<(), ConfigError> {
        config.validate()?;

        let mut state = self.inner.write();
        state.config = Arc::new(config);
        state.generation += 1;

        info!(generation = state.generation, "confluence configuration reloaded");
        Ok(())
    }

    /// Load the configuration at `path` and [`reload`](Self::reload) it.
    pub fn reload_from_path(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        self.reload(EngineConfig::load(path)?)
    }
}
