//! Concurrent multi-symbol scoring with a latest-result-per-symbol store.

use crate::{aggregator::Aggregator, model::ConfluenceResult, snapshot::MarketSnapshot};
use parking_lot::RwLock;
use smol_str::SmolStr;
use std::{collections::BTreeMap, sync::Arc};
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, info, warn};

/// Runs one [`Aggregator`] pipeline per symbol, at most `max_concurrent_symbols` at a time.
#[derive(Clone)]
pub struct Orchestrator {
    aggregator: Arc<Aggregator>,
    latest: Arc<RwLock<BTreeMap<SmolStr, ConfluenceResult>>>,
}

impl Orchestrator {
    pub fn new(aggregator: Arc<Aggregator>) -> Self {
        Self {
            aggregator,
            latest: Arc::default(),
        }
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Score every snapshot concurrently and publish the results.
    ///
    /// Results are returned in `snapshots` order, including results that lost the publish race
    /// against an already stored, later result for the same symbol. A symbol whose scoring task
    /// aborts yields the neutral result.
    pub async fn run_cycle(&self, snapshots: Vec<MarketSnapshot>) -> Vec<ConfluenceResult> {
        let config = self.aggregator.registry().snapshot();
        let max_concurrent = config.collection.max_concurrent_symbols;
        let semaphore = Arc::new(Semaphore::new(max_concurrent));

        info!(
            symbols = snapshots.len(),
            max_concurrent, "starting confluence scoring cycle"
        );

        let keys = snapshots
            .iter()
            .map(|snapshot| (snapshot.symbol.clone(), snapshot.time))
            .collect::<Vec<_>>();

        let mut tasks = JoinSet::new();
        for (index, snapshot) in snapshots.into_iter().enumerate() {
            let aggregator = Arc::clone(&self.aggregator);
            let semaphore = Arc::clone(&semaphore);

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (index, aggregator.score(&snapshot).await)
            });
        }

        let mut slots = vec![None; keys.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(error) => warn!(%error, "symbol scoring task aborted"),
            }
        }

        slots
            .into_iter()
            .zip(keys)
            .map(|(slot, (symbol, time))| {
                let result = slot.unwrap_or_else(|| {
                    warn!(%symbol, "no result for symbol, publishing neutral");
                    ConfluenceResult::neutral(symbol, time, config.thresholds)
                });
                self.publish(result.clone());
                result
            })
            .collect()
    }

    /// Store `result` as the latest for its symbol if its timestamp is strictly later than the
    /// stored one. Returns `true` if stored.
    pub fn publish(&self, result: ConfluenceResult) -> bool {
        let mut latest = self.latest.write();

        if let Some(current) = latest.get(&result.symbol) {
            if result.timestamp <= current.timestamp {
                debug!(
                    symbol = %result.symbol,
                    stored = %current.timestamp,
                    received = %result.timestamp,
                    "discarding stale confluence result"
                );
                return false;
            }
        }

        latest.insert(result.symbol.clone(), result);
        true
    }

    pub fn latest(&self, symbol: &str) -> Option<ConfluenceResult> {
        self.latest.read().get(symbol).cloned()
    }

    /// Latest result of every symbol, ordered by symbol.
    pub fn latest_all(&self) -> Vec<ConfluenceResult> {
        self.latest.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::EngineConfig,
        error::ProviderError,
        model::{ComponentScore, Family, RegimeClassification, Score, Signal, Timeframe},
        provider::{FamilyOutput, FamilyProvider},
        regime::RegimeDetector,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    /// Scores each symbol by its length and records peak concurrency.
    struct CountingProvider {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl FamilyProvider for CountingProvider {
        fn family(&self) -> Family {
            Family::Technical
        }

        async fn score(
            &self,
            symbol: &str,
            _: &MarketSnapshot,
            _: &EngineConfig,
        ) -> Result<FamilyOutput, ProviderError> {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            let score = 10.0 * symbol.len() as f64;
            Ok(FamilyOutput::new(
                [(
                    Timeframe::Base,
                    ComponentScore::bare(Family::Technical, Timeframe::Base, score),
                )]
                .into_iter()
                .collect(),
            ))
        }
    }

    /// Panics on one symbol, outside any provider call.
    struct PanickingDetector(&'static str);

    impl RegimeDetector for PanickingDetector {
        fn classify(&self, snapshot: &MarketSnapshot) -> Option<RegimeClassification> {
            if snapshot.symbol == self.0 {
                panic!("regime detector failed for {}", snapshot.symbol);
            }
            None
        }
    }

    fn time(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + ChronoDuration::minutes(minute)
    }

    fn orchestrator(max_concurrent: usize) -> (Orchestrator, Arc<CountingProvider>) {
        let provider = Arc::new(CountingProvider {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let aggregator = Aggregator::from_config(
            EngineConfig::default().with_max_concurrent_symbols(max_concurrent),
        )
        .unwrap()
        .with_provider(provider.clone());

        (Orchestrator::new(Arc::new(aggregator)), provider)
    }

    fn result(symbol: &str, minute: i64, score: f64) -> ConfluenceResult {
        let mut result = ConfluenceResult::neutral(symbol, time(minute), Default::default());
        result.score = Score::new(score);
        result
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_cycle_scores_every_symbol_in_order() {
        let (orchestrator, _) = orchestrator(4);
        let snapshots = ["BTC", "ETHUSDT", "SOLUSD"]
            .into_iter()
            .map(|symbol| MarketSnapshot::new(symbol, time(0)))
            .collect();

        let results = orchestrator.run_cycle(snapshots).await;

        let symbols = results.iter().map(|result| result.symbol.as_str()).collect::<Vec<_>>();
        assert_eq!(symbols, vec!["BTC", "ETHUSDT", "SOLUSD"]);
        assert_eq!(results[0].score.value(), 30.0);
        assert_eq!(results[1].score.value(), 70.0);
        assert_eq!(orchestrator.latest("SOLUSD").unwrap().score.value(), 60.0);
        assert_eq!(orchestrator.latest_all().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_cycle_bounds_concurrency() {
        let (orchestrator, provider) = orchestrator(2);
        let snapshots = (0..6)
            .map(|index| MarketSnapshot::new(format!("SYM{index}"), time(0)))
            .collect();

        let results = orchestrator.run_cycle(snapshots).await;

        assert_eq!(results.len(), 6);
        assert_eq!(provider.peak.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_publish_keeps_latest_timestamp() {
        struct TestCase {
            minute: i64,
            score: f64,
            expected_stored: bool,
            expected_score: f64,
        }

        let tests = vec![
            TestCase {
                // TC0: first result is stored
                minute: 5,
                score: 55.0,
                expected_stored: true,
                expected_score: 55.0,
            },
            TestCase {
                // TC1: older result is discarded
                minute: 4,
                score: 70.0,
                expected_stored: false,
                expected_score: 55.0,
            },
            TestCase {
                // TC2: equal timestamp is discarded
                minute: 5,
                score: 80.0,
                expected_stored: false,
                expected_score: 55.0,
            },
            TestCase {
                // TC3: strictly later result replaces
                minute: 6,
                score: 35.0,
                expected_stored: true,
                expected_score: 35.0,
            },
        ];

        let (orchestrator, _) = orchestrator(1);
        for (index, test) in tests.into_iter().enumerate() {
            let stored = orchestrator.publish(result("XRPUSDT", test.minute, test.score));
            assert_eq!(stored, test.expected_stored, "TC{} failed", index);

            let latest = orchestrator.latest("XRPUSDT").unwrap();
            assert_eq!(latest.score.value(), test.expected_score, "TC{} failed", index);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_symbol_task_yields_neutral_result() {
        let provider = Arc::new(CountingProvider {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let aggregator = Aggregator::from_config(EngineConfig::default())
            .unwrap()
            .with_provider(provider)
            .with_detector(Arc::new(PanickingDetector("ETHUSDT")));
        let orchestrator = Orchestrator::new(Arc::new(aggregator));

        let snapshots = ["BTCUSDT", "ETHUSDT", "SOLUSDT"]
            .into_iter()
            .map(|symbol| MarketSnapshot::new(symbol, time(1)))
            .collect();

        let results = orchestrator.run_cycle(snapshots).await;

        let symbols = results.iter().map(|result| result.symbol.as_str()).collect::<Vec<_>>();
        assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT", "SOLUSDT"]);

        assert_eq!(results[0].score.value(), 70.0);
        assert!(results[1].is_fully_neutral());
        assert_eq!(results[1].signal, Signal::Neutral);
        assert_eq!(results[1].timestamp, time(1));
        assert_eq!(results[2].score.value(), 70.0);

        assert!(orchestrator.latest("ETHUSDT").unwrap().is_fully_neutral());
    }
}
