use confluence::{
    ComponentScore, Family, FamilyProvider, MarketSnapshot, ProviderError, Score, Timeframe,
    WeightTable, snapshot::TimeframeData,
};
use smol_str::SmolStr;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

pub mod orderbook;
pub mod orderflow;
pub mod price_structure;
pub mod sentiment;
pub mod technical;
pub mod volume;

pub use orderbook::OrderBookProvider;
pub use orderflow::OrderFlowProvider;
pub use price_structure::PriceStructureProvider;
pub use sentiment::SentimentProvider;
pub use technical::TechnicalProvider;
pub use volume::VolumeProvider;

/// One reference provider per [`Family`], with default parameters.
pub fn reference_providers() -> Vec<Arc<dyn FamilyProvider>> {
    vec![
        Arc::new(TechnicalProvider::new()),
        Arc::new(VolumeProvider::new()),
        Arc::new(OrderFlowProvider::new()),
        Arc::new(OrderBookProvider::new()),
        Arc::new(SentimentProvider::new()),
        Arc::new(PriceStructureProvider::new()),
    ]
}

/// Combine `sub_scores` using `weights`, renormalised over the sub-scores actually produced.
///
/// Returns `None` when no sub-score was produced.
pub(crate) fn combine(
    family: Family,
    timeframe: Timeframe,
    weights: &WeightTable<SmolStr>,
    sub_scores: BTreeMap<SmolStr, Score>,
) -> Option<ComponentScore> {
    if sub_scores.is_empty() {
        return None;
    }

    let present: BTreeSet<SmolStr> = sub_scores.keys().cloned().collect();
    let mut entries = weights.entries().clone();
    for key in &present {
        entries.entry(key.clone()).or_insert(0.0);
    }

    let values = sub_scores
        .iter()
        .map(|(key, score)| (key.clone(), score.value()))
        .collect();
    let score = WeightTable::new(entries)
        .normalized(&present)
        .weighted_sum(&values);

    Some(ComponentScore::new(
        family,
        timeframe,
        Score::new(score),
        sub_scores,
    ))
}

/// Score every candle timeframe with at least `min_bars` bars using `score`.
///
/// Timeframes below the minimum are skipped. Fails with [`ProviderError::InsufficientData`] if
/// none qualifies.
pub(crate) fn score_timeframes<F>(
    family: Family,
    snapshot: &MarketSnapshot,
    min_bars: usize,
    weights: &WeightTable<SmolStr>,
    mut score: F,
) -> Result<BTreeMap<Timeframe, ComponentScore>, ProviderError>
where
    F: FnMut(&TimeframeData) -> BTreeMap<SmolStr, Score>,
{
    let scores = snapshot
        .timeframes
        .iter()
        .filter(|(_, data)| data.len() >= min_bars)
        .filter_map(|(timeframe, data)| {
            combine(family, *timeframe, weights, score(data))
                .map(|component| (*timeframe, component))
        })
        .collect::<BTreeMap<_, _>>();

    if scores.is_empty() {
        let available = snapshot
            .timeframes
            .values()
            .map(TimeframeData::len)
            .max()
            .unwrap_or(0);
        return Err(ProviderError::insufficient(family, min_bars, available));
    }

    Ok(scores)
}

/// Fractional change `to / from - 1`, `None` for non-positive `from`.
pub(crate) fn relative(from: f64, to: f64) -> Option<f64> {
    (from > 0.0 && to.is_finite()).then(|| to / from - 1.0)
}

#[cfg(test)]
pub(crate) mod test_utils {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use confluence::{Candle, MarketSnapshot};

    pub fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap()
    }

    /// Candles with the given closes; open is the previous close, high/low bracket both.
    pub fn candles(closes: &[f64], volume: f64) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(index, close)| {
                let open = if index == 0 { *close } else { closes[index - 1] };
                Candle {
                    time: start() + Duration::minutes(index as i64),
                    open,
                    high: open.max(*close),
                    low: open.min(*close),
                    close: *close,
                    volume,
                }
            })
            .collect()
    }

    pub fn snapshot() -> MarketSnapshot {
        MarketSnapshot::new("BTCUSDT", start())
    }
}
