//! Boundary between the engine and the per-family score providers.

use crate::{
    config::EngineConfig,
    error::ProviderError,
    model::{ComponentScore, Family, Timeframe},
    snapshot::MarketSnapshot,
};
use async_trait::async_trait;
use futures::{FutureExt, future::join_all};
use std::{any::Any, collections::BTreeMap, panic::AssertUnwindSafe, sync::Arc, time::Duration};
use tracing::{debug, warn};

/// Scores produced by one family provider for one snapshot.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct FamilyOutput {
    pub timeframes: BTreeMap<Timeframe, ComponentScore>,
    /// Indicator values aligned with the price series, oldest first. Empty opts the family out of
    /// divergence detection.
    pub indicator_series: Vec<f64>,
}

impl FamilyOutput {
    pub fn new(timeframes: BTreeMap<Timeframe, ComponentScore>) -> Self {
        Self {
            timeframes,
            indicator_series: Vec::new(),
        }
    }

    pub fn with_indicator_series(mut self, series: Vec<f64>) -> Self {
        self.indicator_series = series;
        self
    }

    /// Check every score is keyed by its own timeframe and belongs to `family`.
    pub fn validate(&self, family: Family) -> Result<(), ProviderError> {
        for (timeframe, component) in &self.timeframes {
            if component.family != family {
                return Err(ProviderError::Malformed {
                    family,
                    message: format!("{timeframe} score tagged as {}", component.family),
                });
            }
            if component.timeframe != *timeframe {
                return Err(ProviderError::Malformed {
                    family,
                    message: format!("{timeframe} score tagged as {}", component.timeframe),
                });
            }
        }
        Ok(())
    }
}

/// Computes one family's per-timeframe scores from a [`MarketSnapshot`].
///
/// Implementations must be deterministic for a given snapshot and configuration. `config` is
/// the configuration snapshot of the scoring call and the only source of sub-component weights.
/// Any error makes the family contribute the neutral score for that call.
#[async_trait]
pub trait FamilyProvider: Send + Sync {
    fn family(&self) -> Family;

    async fn score(
        &self,
        symbol: &str,
        snapshot: &MarketSnapshot,
        config: &EngineConfig,
    ) -> Result<FamilyOutput, ProviderError>;
}

/// Call every provider concurrently, each bounded by `timeout`.
///
/// Results are returned in `providers` order. Outputs failing [`FamilyOutput::validate`] are
/// converted into [`ProviderError::Malformed`], and a panicking provider into
/// [`ProviderError::Internal`].
pub async fn collect(
    providers: &[Arc<dyn FamilyProvider>],
    snapshot: &MarketSnapshot,
    config: &EngineConfig,
    timeout: Duration,
) -> Vec<(Family, Result<FamilyOutput, ProviderError>)> {
    let calls = providers.iter().map(|provider| async move {
        let family = provider.family();
        let call =
            AssertUnwindSafe(provider.score(&snapshot.symbol, snapshot, config)).catch_unwind();

        let result = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(Ok(output))) => output.validate(family).map(|_| output),
            Ok(Ok(Err(error))) => Err(error),
            Ok(Err(payload)) => {
                let message = panic_message(payload.as_ref());
                warn!(symbol = %snapshot.symbol, %family, %message, "family provider panicked");
                Err(ProviderError::internal(family, format!("panicked: {message}")))
            }
            Err(_) => Err(ProviderError::Timeout {
                family,
                elapsed_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };

        debug!(
            symbol = %snapshot.symbol,
            %family,
            ok = result.is_ok(),
            "family provider finished"
        );

        (family, result)
    });

    join_all(calls).await
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FallbackReason, Score};
    use chrono::{TimeZone, Utc};

    struct StaticProvider {
        family: Family,
        output: FamilyOutput,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl FamilyProvider for StaticProvider {
        fn family(&self) -> Family {
            self.family
        }

        async fn score(
            &self,
            _: &str,
            _: &MarketSnapshot,
            _: &EngineConfig,
        ) -> Result<FamilyOutput, ProviderError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.output.clone())
        }
    }

    struct PanickingProvider;

    #[async_trait]
    impl FamilyProvider for PanickingProvider {
        fn family(&self) -> Family {
            Family::Orderbook
        }

        async fn score(
            &self,
            _: &str,
            _: &MarketSnapshot,
            _: &EngineConfig,
        ) -> Result<FamilyOutput, ProviderError> {
            panic!("depth overflow")
        }
    }

    fn output(family: Family, timeframe: Timeframe, score: f64) -> FamilyOutput {
        FamilyOutput::new(BTreeMap::from([(
            timeframe,
            ComponentScore::bare(family, timeframe, score),
        )]))
    }

    fn snapshot() -> MarketSnapshot {
        MarketSnapshot::new("BTCUSDT", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_validate() {
        struct TestCase {
            output: FamilyOutput,
            expected_ok: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: consistent output
                output: output(Family::Volume, Timeframe::Ltf, 61.0),
                expected_ok: true,
            },
            TestCase {
                // TC1: score tagged with a different family
                output: output(Family::Technical, Timeframe::Ltf, 61.0),
                expected_ok: false,
            },
            TestCase {
                // TC2: score keyed under the wrong timeframe
                output: FamilyOutput::new(BTreeMap::from([(
                    Timeframe::Htf,
                    ComponentScore::bare(Family::Volume, Timeframe::Base, Score::NEUTRAL),
                )])),
                expected_ok: false,
            },
            TestCase {
                // TC3: empty output is well-formed
                output: FamilyOutput::default(),
                expected_ok: true,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.output.validate(Family::Volume);
            assert_eq!(actual.is_ok(), test.expected_ok, "TC{} failed: {:?}", index, actual);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_times_out_slow_provider() {
        let providers: Vec<Arc<dyn FamilyProvider>> = vec![
            Arc::new(StaticProvider {
                family: Family::Technical,
                output: output(Family::Technical, Timeframe::Base, 70.0),
                delay: None,
            }),
            Arc::new(StaticProvider {
                family: Family::Orderflow,
                output: output(Family::Orderflow, Timeframe::Base, 30.0),
                delay: Some(Duration::from_secs(10)),
            }),
        ];

        let config = EngineConfig::default();
        let results = collect(&providers, &snapshot(), &config, Duration::from_millis(250)).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, Family::Technical);
        assert!(results[0].1.is_ok());
        assert_eq!(results[1].0, Family::Orderflow);
        assert_eq!(
            results[1].1,
            Err(ProviderError::Timeout {
                family: Family::Orderflow,
                elapsed_ms: 250,
            })
        );
    }

    #[tokio::test]
    async fn test_collect_rejects_mismatched_family() {
        let providers: Vec<Arc<dyn FamilyProvider>> = vec![Arc::new(StaticProvider {
            family: Family::Sentiment,
            output: output(Family::Orderbook, Timeframe::Mtf, 80.0),
            delay: None,
        })];

        let config = EngineConfig::default();
        let results = collect(&providers, &snapshot(), &config, Duration::from_secs(1)).await;
        assert!(matches!(
            results[0].1,
            Err(ProviderError::Malformed {
                family: Family::Sentiment,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_collect_contains_provider_panic() {
        let providers: Vec<Arc<dyn FamilyProvider>> = vec![
            Arc::new(PanickingProvider),
            Arc::new(StaticProvider {
                family: Family::Volume,
                output: output(Family::Volume, Timeframe::Base, 55.0),
                delay: None,
            }),
        ];

        let config = EngineConfig::default();
        let results = collect(&providers, &snapshot(), &config, Duration::from_secs(1)).await;

        assert_eq!(results.len(), 2);
        assert_eq!(
            results[0].1,
            Err(ProviderError::internal(Family::Orderbook, "panicked: depth overflow"))
        );
        assert_eq!(
            results[0].1.as_ref().unwrap_err().fallback_reason(),
            FallbackReason::ProviderError
        );
        assert!(results[1].1.is_ok());
    }
}
