//! Train/test/validate partitioning of shard indices
//!
//! The assignment is shuffled once and frozen. Each partition also keeps a
//! consumable queue that is refilled from the frozen lists when drained.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{JetfeedError, Result};

/// Default fraction of shards assigned to training
pub const DEFAULT_TRAIN_FRAC: f64 = 0.33;

/// Default fraction of shards assigned to testing
pub const DEFAULT_TEST_FRAC: f64 = 0.33;

/// One of the three disjoint shard splits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    #[default]
    Train,
    Test,
    Validate,
}

impl Partition {
    pub const ALL: [Partition; 3] = [Partition::Train, Partition::Test, Partition::Validate];

    pub fn as_str(self) -> &'static str {
        match self {
            Partition::Train => "train",
            Partition::Test => "test",
            Partition::Validate => "validate",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Partition {
    type Err = JetfeedError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Partition::Train),
            "test" => Ok(Partition::Test),
            "validate" => Ok(Partition::Validate),
            other => Err(JetfeedError::UnknownPartition {
                name: other.to_string(),
            }),
        }
    }
}

/// Check a pair of split fractions
pub fn validate_fractions(train_frac: f64, test_frac: f64) -> Result<()> {
    let in_unit = |x: f64| (0.0..=1.0).contains(&x);
    if !in_unit(train_frac) || !in_unit(test_frac) || train_frac + test_frac > 1.0 + 1e-9 {
        return Err(JetfeedError::config(format!(
            "partition fractions train={train_frac} test={test_frac} must lie in [0, 1] and sum to at most 1"
        )));
    }
    Ok(())
}

/// Frozen shard-index split plus per-partition draw queues
#[derive(Debug, Clone)]
pub struct PartitionAssignment {
    cached: [Vec<usize>; 3],
    queues: [VecDeque<usize>; 3],
}

impl PartitionAssignment {
    /// Shuffle `0..n` and split it by position.
    ///
    /// Position `p` goes to train if `p < train_frac * n`, to test if
    /// `p < (train_frac + test_frac) * n`, else to validate.
    pub fn build<R: Rng + ?Sized>(
        n: usize,
        train_frac: f64,
        test_frac: f64,
        rng: &mut R,
    ) -> Result<Self> {
        validate_fractions(train_frac, test_frac)?;

        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(rng);

        let train_cut = train_frac * n as f64;
        let test_cut = (train_frac + test_frac) * n as f64;
        let mut cached: [Vec<usize>; 3] = Default::default();
        for (position, index) in order.into_iter().enumerate() {
            let position = position as f64;
            let partition = if position < train_cut {
                Partition::Train
            } else if position < test_cut {
                Partition::Test
            } else {
                Partition::Validate
            };
            cached[partition.slot()].push(index);
        }

        debug!(
            "Partitioned {} shard indices: {} train, {} test, {} validate",
            n,
            cached[0].len(),
            cached[1].len(),
            cached[2].len()
        );

        let queues = cached.clone().map(VecDeque::from);
        Ok(Self { cached, queues })
    }

    /// Frozen indices of a partition
    pub fn indices(&self, partition: Partition) -> &[usize] {
        &self.cached[partition.slot()]
    }

    /// Pop the next index, refilling from the frozen list when drained
    pub fn next_index(&mut self, partition: Partition) -> Result<usize> {
        let slot = partition.slot();
        if self.queues[slot].is_empty() {
            if self.cached[slot].is_empty() {
                return Err(JetfeedError::EmptyPartition {
                    partition: partition.to_string(),
                });
            }
            debug!("Partition {} queue drained, refilling", partition);
            self.queues[slot].extend(self.cached[slot].iter().copied());
        }
        self.queues[slot]
            .pop_front()
            .ok_or_else(|| JetfeedError::EmptyPartition {
                partition: partition.to_string(),
            })
    }

    /// Total number of shard indices across all partitions
    pub fn total(&self) -> usize {
        self.cached.iter().map(Vec::len).sum()
    }
}
