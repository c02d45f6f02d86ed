//! Prefetching a merged stream on a background task

use std::path::Path;
use std::sync::Arc;

use ndarray::Array2;
use ndarray_npy::write_npy;
use tempfile::TempDir;

use jetfeed_core::config::PipelineConfig;
use jetfeed_core::data::{ClassCollection, MergedStream, Prefetcher, PrefetcherConfig};
use jetfeed_core::metrics::PipelineMetrics;
use jetfeed_core::JetfeedError;

fn write_class(dir: &Path, class: &str, shards: usize, rows: usize) {
    for shard in 0..shards {
        let singletons = Array2::from_shape_fn((rows, 10), |(i, j)| match j {
            0 => 250.0 + 10.0 * i as f64,
            3 => 90.0,
            9 => 2.0,
            _ => 0.0,
        });
        write_npy(dir.join(format!("{class}_singletons_{shard}.npy")), &singletons).unwrap();
    }
}

fn open_stream(dir: &Path, metrics: &Arc<PipelineMetrics>, decorrelate: bool) -> MergedStream {
    let mut config = PipelineConfig::default();
    config.train_frac = 0.5;
    config.test_frac = 0.5;
    config.seed = Some(9);
    config.generator.batch = 6;
    config.generator.decorr_mass = decorrelate;

    let collections = ["hbb", "qcd"]
        .iter()
        .map(|name| {
            let mut c = ClassCollection::new(*name)
                .with_fractions(config.train_frac, config.test_frac)
                .with_seed(9)
                .with_metrics(metrics.clone());
            let pattern = format!("{}/{}_XXXX_*.npy", dir.display(), name);
            c.register::<&str>(&[], &pattern, "XXXX").unwrap();
            c
        })
        .collect();
    MergedStream::open(collections, &config).unwrap()
}

#[tokio::test]
async fn test_prefetch_respects_limit() {
    let dir = TempDir::new().unwrap();
    write_class(dir.path(), "hbb", 4, 7);
    write_class(dir.path(), "qcd", 4, 5);
    let metrics = Arc::new(PipelineMetrics::new());

    let stream = open_stream(dir.path(), &metrics, false);
    let mut prefetcher = Prefetcher::spawn(
        stream,
        PrefetcherConfig {
            capacity: 2,
            limit: Some(6),
        },
    );

    let mut received = 0;
    loop {
        match prefetcher.next_batch().await {
            Ok(batch) => {
                assert!(batch.len() <= 6);
                assert_eq!(batch.weights.len(), 2);
                received += 1;
            }
            Err(JetfeedError::DataExhausted) => break,
            Err(e) => panic!("unexpected error {e}"),
        }
    }

    assert_eq!(received, 6);
    assert_eq!(prefetcher.shutdown().await, 6);
    assert_eq!(metrics.batches_yielded.get(), 6);
    assert!(metrics.shards_loaded.get() > 0);
    assert!(metrics.to_prometheus().contains("jetfeed_batches_yielded_total 6"));
}

#[tokio::test]
async fn test_prefetch_decorrelated_stream() {
    let dir = TempDir::new().unwrap();
    write_class(dir.path(), "hbb", 2, 4);
    write_class(dir.path(), "qcd", 2, 4);
    let metrics = Arc::new(PipelineMetrics::new());

    let stream = open_stream(dir.path(), &metrics, true);
    let mut prefetcher = Prefetcher::spawn(
        stream,
        PrefetcherConfig {
            capacity: 1,
            limit: Some(3),
        },
    );

    let batch = prefetcher.next_batch().await.unwrap();
    assert_eq!(batch.inputs.len(), 1);
    assert_eq!(batch.outputs.len(), 2);
    assert_eq!(batch.weights.len(), 2);
    // nProngs 2 is outside the default adversary mask
    assert!(batch.weights[1].iter().all(|&w| w == 0.0));

    prefetcher.shutdown().await;
}

#[tokio::test]
async fn test_prefetch_forwards_source_error() {
    let dir = TempDir::new().unwrap();
    let metrics = Arc::new(PipelineMetrics::new());
    // classes registered against an empty directory have no shards
    let stream = open_stream(dir.path(), &metrics, false);
    let mut prefetcher = Prefetcher::spawn(stream, PrefetcherConfig::default());

    let first = prefetcher.next_batch().await;
    assert!(first.is_err());
    assert!(!matches!(first, Err(JetfeedError::DataExhausted)));
    assert!(matches!(
        prefetcher.next_batch().await,
        Err(JetfeedError::DataExhausted)
    ));
    assert_eq!(prefetcher.batches_received(), 0);
}
