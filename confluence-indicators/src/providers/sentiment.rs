use super::combine;
use async_trait::async_trait;
use confluence::{
    EngineConfig, Family, FamilyOutput, FamilyProvider, MarketSnapshot, ProviderError, Score,
    SentimentInputs, Timeframe,
};
use smol_str::SmolStr;
use std::collections::BTreeMap;

/// Sentiment family: contrarian reading of funding rate and long/short account ratio.
///
/// Crowded longs (positive funding, ratio above 1) score bearish and vice versa.
#[derive(Debug, Clone)]
pub struct SentimentProvider {
    /// Funding rate magnitude mapping to a full-strength score.
    funding_scale: f64,
}

impl Default for SentimentProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SentimentProvider {
    pub fn new() -> Self {
        Self {
            funding_scale: 0.001,
        }
    }

    pub fn with_funding_scale(mut self, scale: f64) -> Self {
        if scale > 0.0 {
            self.funding_scale = scale;
        }
        self
    }

    fn sub_scores(&self, inputs: &SentimentInputs) -> BTreeMap<SmolStr, Score> {
        let mut scores = BTreeMap::new();

        if let Some(funding) = inputs.funding_rate.filter(|rate| rate.is_finite()) {
            scores.insert(
                SmolStr::new_static("funding"),
                Score::from_signed(-funding / self.funding_scale),
            );
        }

        if let Some(ratio) = inputs
            .long_short_ratio
            .filter(|ratio| ratio.is_finite() && *ratio > 0.0)
        {
            scores.insert(
                SmolStr::new_static("long_short"),
                Score::from_signed(1.0 - ratio),
            );
        }

        scores
    }
}

#[async_trait]
impl FamilyProvider for SentimentProvider {
    fn family(&self) -> Family {
        Family::Sentiment
    }

    async fn score(
        &self,
        _: &str,
        snapshot: &MarketSnapshot,
        config: &EngineConfig,
    ) -> Result<FamilyOutput, ProviderError> {
        let sub_scores = snapshot
            .sentiment
            .as_ref()
            .map(|inputs| self.sub_scores(inputs))
            .unwrap_or_default();

        let available = sub_scores.len();
        let weights = config.weights.sub_components(Family::Sentiment);

        let component = combine(Family::Sentiment, Timeframe::Base, &weights, sub_scores)
            .ok_or_else(|| ProviderError::insufficient(Family::Sentiment, 1, available))?;

        Ok(FamilyOutput::new(BTreeMap::from([(Timeframe::Base, component)])))
    }
}
