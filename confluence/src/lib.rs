/// Confluence - Multi-Family Scoring Engine
///
/// Combines per-family, per-timeframe scores (technical, volume, order flow, order book,
/// sentiment, price structure) into one bounded score in `[0, 100]` and a BUY / SELL / NEUTRAL
/// signal. Missing families and timeframes degrade gracefully to the neutral score; the remaining
/// weights are renormalised so they always sum to one.
///
/// The library includes:
/// - Score, family, timeframe, and result types
/// - Market snapshot input types
/// - Validated, reloadable configuration behind a readers-writer registry
/// - Timeframe synchronisation, divergence detection, and regime adjustments
/// - The per-symbol aggregator and the multi-symbol orchestrator
pub mod aggregator;
pub mod config;
pub mod divergence;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod provider;
pub mod regime;
pub mod snapshot;
pub mod timeframe;
pub mod weights;

// Re-export commonly used types for convenience
pub use aggregator::{Aggregator, ScoringContext, ScoringPhase};
pub use config::{CollectionConfig, DivergenceConfig, EngineConfig, RegimeConfig, RegimeProfile};
pub use error::{ConfigError, ProviderError, ScoringError};
pub use model::{
    ComponentScore, ConfluenceResult, DivergenceAdjustment, DivergenceKind, Family, Regime,
    RegimeClassification, Score, Signal, Thresholds, Timeframe,
};
pub use orchestrator::Orchestrator;
pub use provider::{FamilyOutput, FamilyProvider};
pub use regime::RegimeDetector;
pub use snapshot::{Candle, Level, MarketSnapshot, OrderBookSnapshot, SentimentInputs, Side, Trade};
pub use weights::{WeightRegistry, WeightTable, normalize};
