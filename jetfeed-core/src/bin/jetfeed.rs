//! Pipeline driver binary
//!
//! Registers every configured class, streams merged batches through the
//! prefetcher and prints pipeline metrics.

use std::path::PathBuf;
use std::sync::Arc;

use jetfeed_core::adversarial::ReversalRegistry;
use jetfeed_core::data::{ClassCollection, MergedStream, Prefetcher, PrefetcherConfig};
use jetfeed_core::metrics::PipelineMetrics;
use jetfeed_core::{JetfeedError, PipelineConfig, CONFIG_ENV_VAR, DEFAULT_PREFETCH_BUFFER_SIZE};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_BATCHES: u64 = 10;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting jetfeed");

    let config = match std::env::var(CONFIG_ENV_VAR) {
        Ok(path) => {
            info!("Loading configuration from {}", path);
            PipelineConfig::from_file(&PathBuf::from(path))?
        }
        Err(_) => {
            warn!("{} not set, using default configuration", CONFIG_ENV_VAR);
            PipelineConfig::default()
        }
    };
    let batches: u64 = std::env::var("JETFEED_BATCHES")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_BATCHES);

    let metrics = Arc::new(PipelineMetrics::new());
    let mut collections = Vec::with_capacity(config.classes.len());
    for spec in &config.classes {
        let (collection, report) = ClassCollection::from_config(&config, spec, metrics.clone())?;
        info!(
            "Registered class {}: {} shards accepted, {} excluded",
            spec.name, report.accepted, report.excluded
        );
        collections.push(collection);
    }

    let options = &config.generator;
    let reversals = ReversalRegistry::new();
    for (enabled, target) in [(options.decorr_mass, "mass"), (options.decorr_pt, "pt")] {
        if enabled {
            let op = reversals.register(1.0);
            info!("Adversary for {} behind {}", target, op.name());
        }
    }

    let stream = MergedStream::open(collections, &config)?;
    let mut prefetcher = Prefetcher::spawn(
        stream,
        PrefetcherConfig {
            capacity: DEFAULT_PREFETCH_BUFFER_SIZE,
            limit: Some(batches),
        },
    );

    loop {
        match prefetcher.next_batch().await {
            Ok(batch) => {
                let inputs: Vec<_> = batch.inputs.iter().map(|x| x.dim()).collect();
                let outputs: Vec<_> = batch.outputs.iter().map(|y| y.dim()).collect();
                info!(
                    "Batch {}: {} events, inputs {:?}, outputs {:?}",
                    prefetcher.batches_received(),
                    batch.len(),
                    inputs,
                    outputs
                );
            }
            Err(JetfeedError::DataExhausted) => break,
            Err(e) => {
                error!("Pipeline failed: {}", e);
                prefetcher.shutdown().await;
                return Err(e.into());
            }
        }
    }

    prefetcher.shutdown().await;
    print!("{}", metrics.to_prometheus());
    Ok(())
}
