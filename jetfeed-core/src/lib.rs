//! Jetfeed Core - sharded jet-feature feeding for classifier training
//!
//! This crate provides:
//! - Per-group `.npy` shard sources with visitation tracking
//! - Train/test/validate partitioning of shard indices
//! - Pt reweighting from a histogram over all reference shards
//! - Per-class batch generators and multi-class merging
//! - Decorrelation targets and gradient-reversal operators
//! - Background prefetch onto a tokio blocking task

pub mod adversarial;
pub mod config;
pub mod data;
pub mod error;
pub mod histogram;
pub mod metrics;

pub use config::PipelineConfig;
pub use error::{JetfeedError, Result};

/// Environment variable naming the JSON configuration file
pub const CONFIG_ENV_VAR: &str = "JETFEED_CONFIG";

/// Default prefetch buffer size
pub const DEFAULT_PREFETCH_BUFFER_SIZE: usize = 4;
