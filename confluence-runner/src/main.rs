use confluence::{Aggregator, EngineConfig, MarketSnapshot, Orchestrator, WeightRegistry};
use confluence_indicators::{TrendVolatilityDetector, reference_providers};
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};
use tracing::{error, info, warn};

/// Snapshot files hold either one snapshot or an array of them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SnapshotFile {
    Many(Vec<MarketSnapshot>),
    One(Box<MarketSnapshot>),
}

impl SnapshotFile {
    fn into_snapshots(self) -> Vec<MarketSnapshot> {
        match self {
            SnapshotFile::Many(snapshots) => snapshots,
            SnapshotFile::One(snapshot) => vec![*snapshot],
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    init_logging();

    info!("Starting confluence runner");

    let config = match std::env::var("CONFLUENCE_CONFIG") {
        Ok(path) => {
            info!(%path, "loading confluence configuration");
            EngineConfig::load(&path)
        }
        Err(_) => {
            info!("CONFLUENCE_CONFIG unset, using default configuration");
            Ok(EngineConfig::default())
        }
    };

    let registry = match config.and_then(WeightRegistry::new) {
        Ok(registry) => registry,
        Err(error) => {
            error!(%error, "invalid confluence configuration");
            return ExitCode::FAILURE;
        }
    };

    let aggregator = Aggregator::new(registry)
        .with_providers(reference_providers())
        .with_detector(Arc::new(TrendVolatilityDetector::new()));
    let orchestrator = Orchestrator::new(Arc::new(aggregator));

    let directory = std::env::var("CONFLUENCE_SNAPSHOTS")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./snapshots"));
    let snapshots = load_snapshots(&directory);

    info!(
        directory = %directory.display(),
        snapshots = snapshots.len(),
        "loaded market snapshots"
    );

    for result in orchestrator.run_cycle(snapshots).await {
        match serde_json::to_string(&result) {
            Ok(line) => println!("{line}"),
            Err(error) => error!(symbol = %result.symbol, %error, "failed to serialise result"),
        }
    }

    info!("Confluence runner finished");
    ExitCode::SUCCESS
}

/// Every snapshot in the `*.json` files of `directory`, in file name order.
///
/// Unreadable or malformed files are logged and skipped.
fn load_snapshots(directory: &Path) -> Vec<MarketSnapshot> {
    let entries = match std::fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(error) => {
            warn!(directory = %directory.display(), %error, "cannot read snapshot directory");
            return Vec::new();
        }
    };

    let mut paths = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.extension().is_some_and(|extension| extension == "json"))
        .collect::<Vec<_>>();
    paths.sort();

    paths
        .iter()
        .flat_map(|path| match read_snapshot_file(path) {
            Ok(snapshots) => snapshots,
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping snapshot file");
                Vec::new()
            }
        })
        .collect()
}

fn read_snapshot_file(path: &Path) -> Result<Vec<MarketSnapshot>, String> {
    let contents = std::fs::read_to_string(path).map_err(|error| error.to_string())?;
    serde_json::from_str::<SnapshotFile>(&contents)
        .map(SnapshotFile::into_snapshots)
        .map_err(|error| error.to_string())
}

/// Initialize logging on stderr, keeping stdout for results.
fn init_logging() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
