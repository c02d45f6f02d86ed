//! Shard source for one feature group of one class
//!
//! Holds the ordered shard paths and at most one decoded shard in memory,
//! tracking which shards the current pass has already visited.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::{Array2, ArrayView2, Axis};
use ndarray_npy::read_npy;
use tracing::debug;

use crate::error::{JetfeedError, Result};
use crate::metrics::PipelineMetrics;

/// Decode a `.npy` shard into a 2-D `f64` array.
///
/// `float32` payloads are widened; anything else that is not a 2-D float
/// array is a decode error.
pub fn read_shard_file(path: &Path) -> Result<Array2<f64>> {
    if !path.is_file() {
        return Err(JetfeedError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "shard file not found"),
        });
    }

    match read_npy::<_, Array2<f64>>(path) {
        Ok(array) => Ok(array),
        Err(wide_err) => match read_npy::<_, Array2<f32>>(path) {
            Ok(narrow) => Ok(narrow.mapv(f64::from)),
            Err(_) => Err(JetfeedError::ShardDecode {
                path: path.to_path_buf(),
                reason: wide_err.to_string(),
            }),
        },
    }
}

/// The shard currently held in memory
#[derive(Debug)]
struct LoadedShard {
    index: usize,
    array: Array2<f64>,
}

/// Lazily loading view over the shards of one feature group
pub struct ShardSource {
    group: String,
    paths: Vec<PathBuf>,
    visited: BTreeSet<usize>,
    current: Option<LoadedShard>,
    metrics: Arc<PipelineMetrics>,
}

impl ShardSource {
    /// Create a source over `paths` in discovery order
    pub fn new(group: impl Into<String>, paths: Vec<PathBuf>) -> Self {
        Self::with_metrics(group, paths, Arc::new(PipelineMetrics::new()))
    }

    pub fn with_metrics(
        group: impl Into<String>,
        paths: Vec<PathBuf>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            group: group.into(),
            paths,
            visited: BTreeSet::new(),
            current: None,
            metrics,
        }
    }

    /// Load a shard, returning its position.
    ///
    /// `Some(index)` loads that shard even if already visited. `None` loads
    /// the first unvisited shard, starting a new pass once every shard has
    /// been visited. With `remember`, the loaded shard is marked visited.
    pub fn load(&mut self, index: Option<usize>, remember: bool) -> Result<usize> {
        if self.paths.is_empty() {
            return Err(JetfeedError::NoShards {
                group: self.group.clone(),
            });
        }

        let index = match index {
            Some(index) if index >= self.paths.len() => {
                return Err(JetfeedError::ShardIndexOutOfRange {
                    group: self.group.clone(),
                    index,
                    len: self.paths.len(),
                });
            }
            Some(index) => index,
            None => {
                if self.pass_complete() {
                    debug!("Group {}: all shards visited, starting new pass", self.group);
                    self.visited.clear();
                }
                (0..self.paths.len())
                    .find(|i| !self.visited.contains(i))
                    .unwrap_or(0)
            }
        };

        let path = &self.paths[index];
        let array = self
            .metrics
            .shard_load_seconds
            .time(|| read_shard_file(path))?;

        debug!(
            "Group {}: loaded shard {} ({}) with {} rows",
            self.group,
            index,
            path.display(),
            array.nrows()
        );

        let previous = self.n_available().unwrap_or(0);
        self.metrics.shards_loaded.inc();
        self.metrics
            .resident_rows
            .add(array.nrows() as i64 - previous as i64);
        if remember {
            self.visited.insert(index);
        }
        self.current = Some(LoadedShard { index, array });
        Ok(index)
    }

    /// Full array of the loaded shard
    pub fn read(&self) -> Result<ArrayView2<'_, f64>> {
        Ok(self.loaded()?.array.view())
    }

    /// Row subset of the loaded shard, in the order given
    pub fn read_rows(&self, indices: &[usize]) -> Result<Array2<f64>> {
        let array = &self.loaded()?.array;
        let rows = array.nrows();
        if let Some(&index) = indices.iter().find(|&&i| i >= rows) {
            return Err(JetfeedError::RowIndexOutOfRange {
                group: self.group.clone(),
                index,
                rows,
            });
        }
        Ok(array.select(Axis(0), indices))
    }

    /// Row count of the loaded shard, `None` before the first load
    pub fn n_available(&self) -> Option<usize> {
        self.current.as_ref().map(|shard| shard.array.nrows())
    }

    /// Position of the loaded shard
    pub fn current_index(&self) -> Option<usize> {
        self.current.as_ref().map(|shard| shard.index)
    }

    pub fn is_visited(&self, index: usize) -> bool {
        self.visited.contains(&index)
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    fn pass_complete(&self) -> bool {
        self.visited.len() >= self.paths.len()
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    fn loaded(&self) -> Result<&LoadedShard> {
        self.current.as_ref().ok_or_else(|| JetfeedError::UnsetState {
            group: self.group.clone(),
        })
    }
}

impl std::fmt::Debug for ShardSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardSource")
            .field("group", &self.group)
            .field("shards", &self.paths.len())
            .field("visited", &self.visited)
            .field("current", &self.current_index())
            .finish()
    }
}

impl Drop for ShardSource {
    fn drop(&mut self) {
        if let Some(rows) = self.n_available() {
            self.metrics.resident_rows.add(-(rows as i64));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};
    use ndarray_npy::write_npy;
    use tempfile::TempDir;

    fn write_shards(dir: &TempDir, rows: &[usize]) -> Vec<PathBuf> {
        rows.iter()
            .enumerate()
            .map(|(i, &n)| {
                let path = dir.path().join(format!("shard_{i}.npy"));
                let data = Array2::from_shape_fn((n, 2), |(r, c)| (i * 100 + r * 2 + c) as f64);
                write_npy(&path, &data).unwrap();
                path
            })
            .collect()
    }

    #[test]
    fn test_read_before_load() {
        let source = ShardSource::new("charged", vec![PathBuf::from("missing.npy")]);
        assert!(matches!(
            source.read(),
            Err(JetfeedError::UnsetState { .. })
        ));
        assert_eq!(source.n_available(), None);
    }

    #[test]
    fn test_sequential_pass_restarts() {
        let dir = TempDir::new().unwrap();
        let paths = write_shards(&dir, &[3, 4, 5]);
        let mut source = ShardSource::new("singletons", paths);

        assert_eq!(source.load(None, true).unwrap(), 0);
        assert_eq!(source.load(None, true).unwrap(), 1);
        assert_eq!(source.load(None, true).unwrap(), 2);
        assert_eq!(source.visited_count(), 3);

        // every shard visited: next default load starts over
        assert_eq!(source.load(None, true).unwrap(), 0);
        assert_eq!(source.visited_count(), 1);
        assert_eq!(source.n_available(), Some(3));
    }

    #[test]
    fn test_explicit_index_ignores_visited() {
        let dir = TempDir::new().unwrap();
        let paths = write_shards(&dir, &[2, 6]);
        let mut source = ShardSource::new("singletons", paths);

        source.load(Some(1), true).unwrap();
        source.load(Some(1), true).unwrap();
        assert_eq!(source.current_index(), Some(1));
        assert_eq!(source.n_available(), Some(6));

        // shard 1 already visited, so the default load picks shard 0
        assert_eq!(source.load(None, true).unwrap(), 0);
    }

    #[test]
    fn test_load_without_remember() {
        let dir = TempDir::new().unwrap();
        let paths = write_shards(&dir, &[2, 2]);
        let mut source = ShardSource::new("sv", paths);

        assert_eq!(source.load(None, false).unwrap(), 0);
        assert_eq!(source.load(None, false).unwrap(), 0);
        assert!(!source.is_visited(0));
    }

    #[test]
    fn test_read_rows() {
        let dir = TempDir::new().unwrap();
        let paths = write_shards(&dir, &[4]);
        let mut source = ShardSource::new("singletons", paths);
        source.load(None, true).unwrap();

        let rows = source.read_rows(&[3, 1]).unwrap();
        assert_eq!(rows, array![[6.0, 7.0], [2.0, 3.0]]);
        assert!(matches!(
            source.read_rows(&[4]),
            Err(JetfeedError::RowIndexOutOfRange { index: 4, rows: 4, .. })
        ));
    }

    #[test]
    fn test_float32_shard_widened() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("narrow.npy");
        write_npy(&path, &array![[1.5f32, 2.0], [3.0, 4.25]]).unwrap();

        let array = read_shard_file(&path).unwrap();
        assert_eq!(array, array![[1.5, 2.0], [3.0, 4.25]]);
    }

    #[test]
    fn test_missing_and_out_of_range() {
        let mut empty = ShardSource::new("sv", Vec::new());
        assert!(matches!(empty.load(None, true), Err(JetfeedError::NoShards { .. })));

        let mut source = ShardSource::new("sv", vec![PathBuf::from("/nonexistent/a.npy")]);
        assert!(source.load(Some(0), true).unwrap_err().is_io());
        assert!(matches!(
            source.load(Some(3), true),
            Err(JetfeedError::ShardIndexOutOfRange { index: 3, len: 1, .. })
        ));
        assert_eq!(source.visited_count(), 0);
    }

    #[test]
    fn test_resident_rows_sum_over_sources() {
        let dir = TempDir::new().unwrap();
        let paths = write_shards(&dir, &[3, 5]);
        let metrics = Arc::new(PipelineMetrics::new());
        let mut singletons = ShardSource::with_metrics("singletons", paths.clone(), metrics.clone());
        let mut charged = ShardSource::with_metrics("charged", paths, metrics.clone());

        singletons.load(Some(0), true).unwrap();
        charged.load(Some(1), true).unwrap();
        assert_eq!(metrics.resident_rows.get(), 8);

        // replacing a shard swaps its rows rather than adding them
        singletons.load(Some(1), true).unwrap();
        assert_eq!(metrics.resident_rows.get(), 10);

        drop(charged);
        assert_eq!(metrics.resident_rows.get(), 5);
    }
}
