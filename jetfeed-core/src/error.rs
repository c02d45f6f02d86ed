//! Error types for the jet feeding pipeline
//!
//! Covers shard I/O, shard state, cross-group consistency, partitioning
//! and configuration errors.

use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for all pipeline operations
#[derive(Debug, Error)]
pub enum JetfeedError {
    // ========== I/O Errors ==========

    /// Reading a shard file failed at the OS level
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Shard file exists but its payload is not a usable 2-D array
    #[error("Failed to decode shard {path}: {reason}")]
    ShardDecode { path: PathBuf, reason: String },

    /// Glob pattern could not be parsed or walked
    #[error("Invalid shard pattern {pattern}: {reason}")]
    Pattern { pattern: String, reason: String },

    // ========== Shard State Errors ==========

    /// Array requested before any shard was loaded
    #[error("No shard loaded yet for group {group}")]
    UnsetState { group: String },

    /// Shard position outside the source's path list
    #[error("Shard index {index} out of range for group {group} ({len} shards)")]
    ShardIndexOutOfRange {
        group: String,
        index: usize,
        len: usize,
    },

    /// Row index outside the currently loaded shard
    #[error("Row index {index} out of range for group {group} ({rows} rows loaded)")]
    RowIndexOutOfRange {
        group: String,
        index: usize,
        rows: usize,
    },

    /// Source has no shard paths at all
    #[error("Group {group} has no shards")]
    NoShards { group: String },

    // ========== Consistency Errors ==========

    /// Feature groups of one class disagree on loaded row count
    #[error("Row count mismatch across feature groups: {counts:?}")]
    RowCountMismatch { counts: Vec<(String, usize)> },

    /// Field name missing from the feature-group manifest
    #[error("Unknown field {field}")]
    UnknownField { field: String },

    /// Column lookup past the width of a loaded shard
    #[error("Column {column} ({field}) outside shard of width {width}")]
    ColumnOutOfRange {
        field: String,
        column: usize,
        width: usize,
    },

    /// Feature group was never registered on the class
    #[error("Unknown feature group {group}")]
    UnknownGroup { group: String },

    // ========== Partition Errors ==========

    /// Partition holds no shard indices, so nothing can be drawn
    #[error("Partition {partition} is empty")]
    EmptyPartition { partition: String },

    /// Unrecognized partition name
    #[error("Unknown partition {name}, expected train, test or validate")]
    UnknownPartition { name: String },

    // ========== Pipeline Errors ==========

    /// Batch arrays requested before the pt-weight histogram was built
    #[error("Pt weights not computed for this class")]
    WeightsNotComputed,

    /// Merger opened without any class collections
    #[error("No class collections to merge")]
    NoCollections,

    /// Prefetch channel closed
    #[error("Batch stream exhausted")]
    DataExhausted,

    /// Configuration rejected during validation
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl JetfeedError {
    /// Returns true if this error signals a broken cross-group invariant
    pub fn is_consistency(&self) -> bool {
        matches!(
            self,
            JetfeedError::RowCountMismatch { .. }
                | JetfeedError::ColumnOutOfRange { .. }
        )
    }

    /// Returns true if this error came from reading shard files
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            JetfeedError::Io { .. } | JetfeedError::ShardDecode { .. }
        )
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        JetfeedError::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, JetfeedError>;
