//! Per-symbol scoring pipeline.
//!
//! One call walks `Idle → Collecting → Normalizing → Adjusting → Done`. Provider failures and
//! missing data never abort a call; they degrade the affected family to the neutral score.

use crate::{
    config::EngineConfig,
    divergence::{self, DivergenceDetector},
    error::{ProviderError, ScoringError},
    model::{
        ConfluenceResult, Fallback, FallbackReason, Family, RegimeClassification, ResultMetadata,
        Score, Signal, Timeframe,
    },
    provider::{self, FamilyOutput, FamilyProvider},
    regime::{self, RegimeDetector},
    snapshot::MarketSnapshot,
    timeframe::synchronize,
    weights::WeightRegistry,
};
use derive_more::Display;
use smol_str::SmolStr;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};
use tracing::{debug, error, warn};

/// Phase of a single scoring call.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display)]
pub enum ScoringPhase {
    #[display("idle")]
    Idle,
    #[display("collecting")]
    Collecting,
    #[display("normalizing")]
    Normalizing,
    #[display("adjusting")]
    Adjusting,
    #[display("done")]
    Done,
    #[display("failed")]
    Failed,
}

impl ScoringPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScoringPhase::Done | ScoringPhase::Failed)
    }

    fn can_advance_to(&self, next: ScoringPhase) -> bool {
        use ScoringPhase::*;
        matches!(
            (*self, next),
            (Idle, Collecting)
                | (Collecting, Normalizing)
                | (Normalizing, Adjusting)
                | (Adjusting, Done)
        ) || (!self.is_terminal() && next == Failed)
    }
}

/// State carried through one scoring call. Holds the configuration snapshot taken at the start
/// of the call, so a concurrent reload never mixes two configurations within one result.
#[derive(Debug)]
pub struct ScoringContext {
    symbol: SmolStr,
    phase: ScoringPhase,
    config: Arc<EngineConfig>,
}

impl ScoringContext {
    pub fn new(symbol: impl Into<SmolStr>, config: Arc<EngineConfig>) -> Self {
        Self {
            symbol: symbol.into(),
            phase: ScoringPhase::Idle,
            config,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn phase(&self) -> ScoringPhase {
        self.phase
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Move to `next`, rejecting transitions outside the pipeline order.
    pub fn advance(&mut self, next: ScoringPhase) -> Result<(), ScoringError> {
        if !self.phase.can_advance_to(next) {
            return Err(ScoringError::InvalidTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }

        debug!(symbol = %self.symbol, from = %self.phase, to = %next, "scoring phase transition");
        self.phase = next;
        Ok(())
    }

    /// Abandon the call. A terminal phase is kept as is.
    pub fn fail(&mut self) {
        if self.phase.is_terminal() {
            return;
        }

        debug!(symbol = %self.symbol, from = %self.phase, "scoring call failed");
        self.phase = ScoringPhase::Failed;
    }
}

/// Public entry point for scoring one [`MarketSnapshot`].
pub struct Aggregator {
    registry: WeightRegistry,
    providers: BTreeMap<Family, Arc<dyn FamilyProvider>>,
    detector: Option<Arc<dyn RegimeDetector>>,
}

impl Aggregator {
    /// [`Aggregator`] without providers. Unregistered families contribute the neutral score.
    pub fn new(registry: WeightRegistry) -> Self {
        Self {
            registry,
            providers: BTreeMap::new(),
            detector: None,
        }
    }

    /// Validate `config` and construct an [`Aggregator`] around a new [`WeightRegistry`].
    pub fn from_config(config: EngineConfig) -> Result<Self, ScoringError> {
        Ok(Self::new(WeightRegistry::new(config)?))
    }

    /// Register `provider` for its family, replacing any previous provider of that family.
    pub fn with_provider(mut self, provider: Arc<dyn FamilyProvider>) -> Self {
        self.providers.insert(provider.family(), provider);
        self
    }

    pub fn with_providers(
        self,
        providers: impl IntoIterator<Item = Arc<dyn FamilyProvider>>,
    ) -> Self {
        providers
            .into_iter()
            .fold(self, |aggregator, provider| aggregator.with_provider(provider))
    }

    pub fn with_detector(mut self, detector: Arc<dyn RegimeDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn registry(&self) -> &WeightRegistry {
        &self.registry
    }

    /// Score `snapshot` within the configured per-symbol budget.
    pub async fn score(&self, snapshot: &MarketSnapshot) -> ConfluenceResult {
        let config = self.registry.snapshot();
        let budget = config.collection.symbol_timeout();
        self.score_with(config, snapshot, budget).await
    }

    /// Score `snapshot`, bounding every provider call by `budget` as well as the provider timeout.
    pub async fn score_with_budget(
        &self,
        snapshot: &MarketSnapshot,
        budget: Duration,
    ) -> ConfluenceResult {
        self.score_with(self.registry.snapshot(), snapshot, budget)
            .await
    }

    async fn score_with(
        &self,
        config: Arc<EngineConfig>,
        snapshot: &MarketSnapshot,
        budget: Duration,
    ) -> ConfluenceResult {
        let mut context = ScoringContext::new(snapshot.symbol.clone(), config);

        match self.run(&mut context, snapshot, budget).await {
            Ok(result) => result,
            Err(error) => {
                error!(symbol = %snapshot.symbol, %error, "scoring pipeline failed");
                context.fail();
                ConfluenceResult::neutral(
                    snapshot.symbol.clone(),
                    snapshot.time,
                    context.config().thresholds,
                )
            }
        }
    }

    async fn run(
        &self,
        context: &mut ScoringContext,
        snapshot: &MarketSnapshot,
        budget: Duration,
    ) -> Result<ConfluenceResult, ScoringError> {
        context.advance(ScoringPhase::Collecting)?;

        let config = Arc::clone(&context.config);
        let timeout = config.collection.provider_timeout().min(budget);
        let providers = self.providers.values().cloned().collect::<Vec<_>>();
        let outputs = provider::collect(&providers, snapshot, &config, timeout)
            .await
            .into_iter()
            .collect::<BTreeMap<_, _>>();

        context.advance(ScoringPhase::Normalizing)?;

        let regime = regime::resolve(snapshot, self.detector.as_deref());
        assemble(context, snapshot, outputs, regime)
    }
}

/// Combine collected provider outputs into a [`ConfluenceResult`].
///
/// Expects `context` in [`ScoringPhase::Normalizing`] and leaves it in [`ScoringPhase::Done`].
/// Synchronous and free of I/O: identical inputs produce identical results.
pub fn assemble(
    context: &mut ScoringContext,
    snapshot: &MarketSnapshot,
    mut outputs: BTreeMap<Family, Result<FamilyOutput, ProviderError>>,
    regime: RegimeClassification,
) -> Result<ConfluenceResult, ScoringError> {
    let config = Arc::clone(&context.config);
    let timeframe_weights = &config.weights.timeframes;

    let mut present = BTreeSet::new();
    let mut metadata = ResultMetadata::default();
    let mut components = BTreeMap::new();
    let mut sub_components = BTreeMap::new();
    let mut indicator_series = BTreeMap::new();

    for family in Family::ALL {
        let output = match outputs.remove(&family) {
            Some(Ok(output)) => output,
            Some(Err(error)) => {
                warn!(symbol = %context.symbol, %family, %error, "family falling back to neutral");
                metadata
                    .fallbacks
                    .push(Fallback::new(family, error.fallback_reason()));
                components.insert(family, Score::NEUTRAL);
                continue;
            }
            None => {
                metadata
                    .fallbacks
                    .push(Fallback::new(family, FallbackReason::Unregistered));
                components.insert(family, Score::NEUTRAL);
                continue;
            }
        };

        let synchronized = synchronize(family, &output.timeframes, timeframe_weights);
        let Some(score) = synchronized.weighted_score(timeframe_weights) else {
            warn!(
                symbol = %context.symbol,
                %family,
                "family produced no timeframe, falling back to neutral"
            );
            metadata
                .fallbacks
                .push(Fallback::new(family, FallbackReason::NoTimeframes));
            components.insert(family, Score::NEUTRAL);
            continue;
        };

        present.insert(family);
        components.insert(family, score);
        metadata.raw_components.insert(family, score);
        sub_components.insert(family, synchronized.sub_components(timeframe_weights));

        if !synchronized.synthesized.is_empty() {
            metadata.synthesized.insert(
                family,
                synchronized.synthesized.iter().copied().collect::<Vec<Timeframe>>(),
            );
        }
        if !output.indicator_series.is_empty() {
            indicator_series.insert(family, output.indicator_series);
        }
    }

    context.advance(ScoringPhase::Adjusting)?;

    let mut divergences = Vec::new();
    if config.divergence.enabled {
        let detector = DivergenceDetector::new(config.divergence.lookback, config.divergence.scale);
        let price = snapshot.closes(config.divergence.price_timeframe);

        for (family, series) in &indicator_series {
            let adjustment = detector.detect(*family, &price, series);
            if let Some(component) = components.get_mut(family) {
                *component = divergence::apply(*component, &adjustment, config.divergence.weight);
            }
            divergences.push(adjustment);
        }
    }

    let adjustment = regime::adjust(&config.thresholds, &config.regime, &regime);
    let weights = config
        .weights
        .families
        .scaled(&adjustment.weight_multipliers)
        .normalized(&present);

    let (score, signal) = if present.is_empty() {
        metadata.weights = Family::ALL.into_iter().map(|family| (family, 0.0)).collect();
        (Score::NEUTRAL, Signal::Neutral)
    } else {
        let values = components
            .iter()
            .filter(|(family, _)| present.contains(family))
            .map(|(family, score)| (*family, score.value()))
            .collect();
        let score = Score::new(weights.weighted_sum(&values));
        metadata.weights = weights.entries().clone();
        (score, Signal::from_score(score, &adjustment.thresholds))
    };

    metadata.present = present.into_iter().collect();

    context.advance(ScoringPhase::Done)?;

    Ok(ConfluenceResult {
        symbol: snapshot.symbol.clone(),
        score,
        signal,
        components,
        sub_components,
        divergences,
        regime: adjustment.regime,
        thresholds: adjustment.thresholds,
        metadata,
        timestamp: snapshot.time,
    })
}
