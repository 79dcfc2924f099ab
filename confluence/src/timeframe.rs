//! Timeframe synchroniser.
//!
//! Aligns one family's per-timeframe scores onto the full `base → ltf → mtf → htf` ladder.
//! Missing rungs are filled from their nearest available neighbours (inverse-distance blend);
//! filled rungs are reported as synthesized and never count as present for weighting.

use crate::{
    model::{ComponentScore, Family, Score, Timeframe},
    weights::{WeightTable, normalize},
};
use smol_str::SmolStr;
use std::collections::{BTreeMap, BTreeSet};

/// One family's scores after synchronisation.
#[derive(Clone, PartialEq, Debug)]
pub struct SynchronizedScores {
    pub family: Family,
    /// A score for every required timeframe.
    pub scores: BTreeMap<Timeframe, ComponentScore>,
    /// Timeframes the provider actually produced.
    pub present: BTreeSet<Timeframe>,
    /// Timeframes filled in from neighbours (or neutral when nothing was available).
    pub synthesized: BTreeSet<Timeframe>,
}

impl SynchronizedScores {
    /// `true` if the provider produced no timeframe at all.
    pub fn is_empty(&self) -> bool {
        self.present.is_empty()
    }

    /// Family score over the present timeframes with renormalised timeframe weights.
    ///
    /// Returns `None` when no timeframe is present; the caller treats the family as neutral.
    pub fn weighted_score(&self, weights: &WeightTable<Timeframe>) -> Option<Score> {
        if self.present.is_empty() {
            return None;
        }

        let normalized = weights.normalized(&self.present);
        let score = self
            .present
            .iter()
            .filter_map(|timeframe| {
                self.scores
                    .get(timeframe)
                    .map(|component| normalized.get(timeframe) * component.score.value())
            })
            .sum::<f64>();

        Some(Score::new(score))
    }

    /// Roll each sub-component up across the present timeframes reporting it.
    pub fn sub_components(&self, weights: &WeightTable<Timeframe>) -> BTreeMap<SmolStr, Score> {
        let present_components = self
            .present
            .iter()
            .filter_map(|timeframe| self.scores.get(timeframe).map(|score| (*timeframe, score)))
            .collect::<Vec<_>>();

        blend_sub_components(weights.entries(), &present_components)
    }
}

/// Synchronise one family's per-timeframe `scores` onto every timeframe of `required_weights`.
///
/// Never fails: with nothing available every required timeframe maps to the neutral score.
pub fn synchronize(
    family: Family,
    scores: &BTreeMap<Timeframe, ComponentScore>,
    required_weights: &WeightTable<Timeframe>,
) -> SynchronizedScores {
    let present: BTreeSet<Timeframe> = scores.keys().copied().collect();

    let mut synchronized: BTreeMap<Timeframe, ComponentScore> = scores
        .iter()
        .map(|(timeframe, component)| {
            let mut component = component.clone();
            component.family = family;
            component.timeframe = *timeframe;
            (*timeframe, component)
        })
        .collect();

    let mut synthesized = BTreeSet::new();

    for timeframe in required_weights.keys().copied() {
        if present.contains(&timeframe) {
            continue;
        }

        let sources = nearest_sources(timeframe, &present);
        let filled = if sources.is_empty() {
            ComponentScore::bare(family, timeframe, Score::NEUTRAL)
        } else {
            substitute(family, timeframe, &sources, &synchronized)
        };

        synchronized.insert(timeframe, filled);
        synthesized.insert(timeframe);
    }

    SynchronizedScores {
        family,
        scores: synchronized,
        present,
        synthesized,
    }
}

/// Nearest present timeframe below and above `missing`, weighted by inverse distance.
fn nearest_sources(missing: Timeframe, present: &BTreeSet<Timeframe>) -> BTreeMap<Timeframe, f64> {
    let below = present.range(..missing).next_back();
    let above = present.range(missing..).next();

    [below, above]
        .into_iter()
        .flatten()
        .map(|source| (*source, 1.0 / missing.distance(*source) as f64))
        .collect()
}

fn substitute(
    family: Family,
    timeframe: Timeframe,
    sources: &BTreeMap<Timeframe, f64>,
    scores: &BTreeMap<Timeframe, ComponentScore>,
) -> ComponentScore {
    let components = sources
        .keys()
        .filter_map(|source| scores.get(source).map(|score| (*source, score)))
        .collect::<Vec<_>>();

    let present: BTreeSet<Timeframe> = components.iter().map(|(source, _)| *source).collect();
    let weights = normalize(sources, &present);

    let score = components
        .iter()
        .map(|(source, component)| weights[source] * component.score.value())
        .sum::<f64>();

    ComponentScore::new(
        family,
        timeframe,
        Score::new(score),
        blend_sub_components(sources, &components),
    )
}

/// Weighted blend of sub-components; each key is renormalised over the timeframes reporting it.
fn blend_sub_components(
    weights: &BTreeMap<Timeframe, f64>,
    components: &[(Timeframe, &ComponentScore)],
) -> BTreeMap<SmolStr, Score> {
    let keys: BTreeSet<&SmolStr> = components
        .iter()
        .flat_map(|(_, component)| component.sub_components.keys())
        .collect();

    keys.into_iter()
        .map(|key| {
            let reporting: BTreeSet<Timeframe> = components
                .iter()
                .filter(|(_, component)| component.sub_components.contains_key(key))
                .map(|(timeframe, _)| *timeframe)
                .collect();

            let normalized = normalize(weights, &reporting);

            let value = components
                .iter()
                .filter_map(|(timeframe, component)| {
                    component
                        .sub_components
                        .get(key)
                        .map(|score| {
                            normalized.get(timeframe).copied().unwrap_or(0.0) * score.value()
                        })
                })
                .sum::<f64>();

            (key.clone(), Score::new(value))
        })
        .collect()
}
