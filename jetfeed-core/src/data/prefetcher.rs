//! Background batch prefetcher
//!
//! Drives a batch source on a blocking task, buffering batches ahead of the
//! training loop in a bounded channel.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::batch::Batch;
use crate::error::{JetfeedError, Result};

/// Configuration for the prefetcher
#[derive(Debug, Clone)]
pub struct PrefetcherConfig {
    /// Batches buffered ahead of the consumer
    pub capacity: usize,
    /// Stop after this many batches; unbounded when unset
    pub limit: Option<u64>,
}

impl Default for PrefetcherConfig {
    fn default() -> Self {
        Self {
            capacity: crate::DEFAULT_PREFETCH_BUFFER_SIZE,
            limit: None,
        }
    }
}

/// Async consumer side of a batch source running on a blocking task.
///
/// A source error is delivered once, after which the channel closes.
pub struct Prefetcher {
    receiver: mpsc::Receiver<Result<Batch>>,
    handle: Option<JoinHandle<u64>>,
    batches_received: u64,
}

impl Prefetcher {
    /// Start pulling from `source`. Must be called within a tokio runtime.
    pub fn spawn<I>(source: I, config: PrefetcherConfig) -> Self
    where
        I: Iterator<Item = Result<Batch>> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        let limit = config.limit;

        let handle = tokio::task::spawn_blocking(move || {
            let mut source = source;
            let mut produced = 0u64;
            while limit.map_or(true, |limit| produced < limit) {
                let Some(item) = source.next() else {
                    break;
                };
                let failed = item.is_err();
                if let Err(e) = &item {
                    error!("Batch source failed after {} batches: {}", produced, e);
                }
                if sender.blocking_send(item).is_err() {
                    debug!("Prefetcher: consumer dropped, stopping");
                    break;
                }
                if failed {
                    break;
                }
                produced += 1;
            }
            debug!("Prefetcher finished after {} batches", produced);
            produced
        });

        Self {
            receiver,
            handle: Some(handle),
            batches_received: 0,
        }
    }

    /// Wait for the next batch. Returns `DataExhausted` once the source ends.
    pub async fn next_batch(&mut self) -> Result<Batch> {
        match self.receiver.recv().await {
            Some(item) => {
                let batch = item?;
                self.batches_received += 1;
                Ok(batch)
            }
            None => Err(JetfeedError::DataExhausted),
        }
    }

    /// Take a buffered batch without waiting
    pub fn try_next_batch(&mut self) -> Option<Result<Batch>> {
        let item = self.receiver.try_recv().ok()?;
        if item.is_ok() {
            self.batches_received += 1;
        }
        Some(item)
    }

    pub fn batches_received(&self) -> u64 {
        self.batches_received
    }

    /// Stop the source and wait for the task. Returns the number of batches
    /// the source produced.
    pub async fn shutdown(mut self) -> u64 {
        // Closing the receiver fails the producer's next send
        self.receiver.close();
        while self.receiver.try_recv().is_ok() {}

        let produced = match self.handle.take() {
            Some(handle) => handle.await.unwrap_or_else(|e| {
                error!("Prefetch task panicked: {}", e);
                0
            }),
            None => 0,
        };
        debug!(
            "Prefetcher shutdown complete, received {} batches",
            self.batches_received
        );
        produced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    fn batch(rows: usize) -> Batch {
        Batch {
            inputs: vec![Array2::zeros((rows, 2))],
            outputs: vec![Array2::zeros((rows, 5))],
            weights: vec![Array1::ones(rows)],
        }
    }

    #[tokio::test]
    async fn test_drains_finite_source() {
        let source = (1..=3).map(|n| Ok(batch(n)));
        let mut prefetcher = Prefetcher::spawn(source, PrefetcherConfig::default());

        for n in 1..=3 {
            assert_eq!(prefetcher.next_batch().await.unwrap().len(), n);
        }
        assert!(matches!(
            prefetcher.next_batch().await,
            Err(JetfeedError::DataExhausted)
        ));
        assert_eq!(prefetcher.batches_received(), 3);
        assert_eq!(prefetcher.shutdown().await, 3);
    }

    #[tokio::test]
    async fn test_limit_caps_endless_source() {
        let source = std::iter::repeat_with(|| Ok(batch(2)));
        let config = PrefetcherConfig {
            capacity: 2,
            limit: Some(5),
        };
        let mut prefetcher = Prefetcher::spawn(source, config);

        let mut received = 0;
        while prefetcher.next_batch().await.is_ok() {
            received += 1;
        }
        assert_eq!(received, 5);
    }

    #[tokio::test]
    async fn test_error_ends_stream() {
        let source = vec![Ok(batch(1)), Err(JetfeedError::NoCollections), Ok(batch(1))].into_iter();
        let mut prefetcher = Prefetcher::spawn(source, PrefetcherConfig::default());

        assert!(prefetcher.next_batch().await.is_ok());
        assert!(matches!(
            prefetcher.next_batch().await,
            Err(JetfeedError::NoCollections)
        ));
        assert!(matches!(
            prefetcher.next_batch().await,
            Err(JetfeedError::DataExhausted)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_stops_endless_source() {
        let source = std::iter::repeat_with(|| Ok(batch(1)));
        let mut prefetcher = Prefetcher::spawn(source, PrefetcherConfig::default());

        prefetcher.next_batch().await.unwrap();
        let produced = prefetcher.shutdown().await;
        assert!(produced >= 1);
    }
}
