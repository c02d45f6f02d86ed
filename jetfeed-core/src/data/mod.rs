//! Data loading pipeline
//!
//! Shard sources, class collections with partitions and pt weights, class
//! generators, multi-class mergers and background prefetch.

pub mod batch;
pub mod collection;
pub mod manifest;
pub mod merger;
pub mod partition;
pub mod prefetcher;
pub mod shard;

pub use batch::{Batch, ClassBatch};
pub use collection::{ClassCollection, ClassGenerator, RegisterReport, ShardArrays};
pub use manifest::FeatureManifest;
pub use merger::{DecorrelatedMerger, MergedStream, Merger};
pub use partition::{Partition, PartitionAssignment};
pub use prefetcher::{Prefetcher, PrefetcherConfig};
pub use shard::ShardSource;
