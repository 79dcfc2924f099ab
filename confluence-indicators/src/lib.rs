/// Confluence Indicators - Reference Family Providers
///
/// Concrete [`FamilyProvider`](confluence::FamilyProvider) implementations for every family the
/// confluence engine weighs, plus a [`RegimeDetector`](confluence::RegimeDetector) driven by
/// trend and volatility.
///
/// The library includes:
/// - Streaming primitives (VWAP windows, EMA, buy/sell pressure, RSI, correlation)
/// - One provider per family, reading sub-component weights from the config of each call
/// - A trend/volatility regime detector
pub mod primitives;
pub mod providers;
pub mod regime;

// Re-export commonly used types for convenience
pub use providers::{
    OrderBookProvider, OrderFlowProvider, PriceStructureProvider, SentimentProvider,
    TechnicalProvider, VolumeProvider, reference_providers,
};
pub use regime::TrendVolatilityDetector;
