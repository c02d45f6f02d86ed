//! Per-class collection of feature-group shard sources
//!
//! A class owns one [`ShardSource`] per feature group. Shard `i` of every
//! group holds the same events, so all groups load in lockstep and must
//! agree on row counts.

use std::collections::VecDeque;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

use ndarray::{s, Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use super::batch::{batch_ranges, one_hot, ClassBatch, COUNT_CATEGORIES};
use super::manifest::FeatureManifest;
use super::partition::{
    Partition, PartitionAssignment, DEFAULT_TEST_FRAC, DEFAULT_TRAIN_FRAC,
};
use super::shard::{read_shard_file, ShardSource};
use crate::config::{ClassSpec, PipelineConfig};
use crate::error::{JetfeedError, Result};
use crate::histogram::{Histogram1D, PT_WEIGHT_EDGES};
use crate::metrics::PipelineMetrics;

/// Default reference group, the one carrying pt and truth columns
pub const REFERENCE_GROUP: &str = "singletons";

/// Default placeholder token in shard path patterns
pub const GROUP_PLACEHOLDER: &str = "XXXX";

/// Outcome of sibling-file discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterReport {
    /// Base files with a sibling in every group
    pub accepted: usize,
    /// Base files dropped for a missing sibling
    pub excluded: usize,
}

/// Arrays for the whole loaded shard
#[derive(Debug, Clone, PartialEq)]
pub struct ShardArrays {
    /// Every group's rows, in registration order
    pub groups: Vec<(String, Array2<f64>)>,
    pub weight: Array1<f64>,
    /// Prong-count one-hot
    pub prongs: Array2<f64>,
    /// Heavy-flavour hadron count one-hot
    pub hadrons: Array2<f64>,
}

impl ShardArrays {
    pub fn group(&self, name: &str) -> Option<&Array2<f64>> {
        self.groups
            .iter()
            .find(|(group, _)| group == name)
            .map(|(_, array)| array)
    }
}

/// Per-event targets derived from the reference group
#[derive(Debug, Clone)]
struct ShardTargets {
    weight: Array1<f64>,
    prongs: Array2<f64>,
    hadrons: Array2<f64>,
}

/// Shard sources, partitions and pt weights for one class
pub struct ClassCollection {
    name: String,
    reference_group: String,
    manifest: FeatureManifest,
    pt_edges: Vec<f64>,
    train_frac: f64,
    test_frac: f64,
    groups: Vec<ShardSource>,
    input_groups: Option<Vec<String>>,
    partitions: Option<PartitionAssignment>,
    pt_weight: Option<Histogram1D>,
    rng: StdRng,
    metrics: Arc<PipelineMetrics>,
}

impl ClassCollection {
    /// Create an empty collection with default layout and fractions
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reference_group: REFERENCE_GROUP.to_string(),
            manifest: FeatureManifest::singletons(),
            pt_edges: PT_WEIGHT_EDGES.to_vec(),
            train_frac: DEFAULT_TRAIN_FRAC,
            test_frac: DEFAULT_TEST_FRAC,
            groups: Vec::new(),
            input_groups: None,
            partitions: None,
            pt_weight: None,
            rng: StdRng::from_entropy(),
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    /// Build and register a class from pipeline configuration
    pub fn from_config(
        config: &PipelineConfig,
        spec: &ClassSpec,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<(Self, RegisterReport)> {
        let mut collection = Self::new(spec.name.clone())
            .with_reference_group(config.reference_group.clone())
            .with_manifest(config.singletons.clone())
            .with_pt_edges(config.pt_edges.clone())
            .with_fractions(config.train_frac, config.test_frac)
            .with_metrics(metrics);
        if let Some(seed) = config.seed {
            collection = collection.with_seed(seed);
        }

        let report = collection.register(&spec.groups, &spec.pattern, &config.placeholder)?;
        if let Some(inputs) = &spec.input_groups {
            collection.set_input_groups(inputs.clone())?;
        }
        Ok((collection, report))
    }

    pub fn with_reference_group(mut self, group: impl Into<String>) -> Self {
        self.reference_group = group.into();
        self
    }

    pub fn with_manifest(mut self, manifest: FeatureManifest) -> Self {
        self.manifest = manifest;
        self
    }

    pub fn with_pt_edges(mut self, edges: Vec<f64>) -> Self {
        self.pt_edges = edges;
        self
    }

    pub fn with_fractions(mut self, train_frac: f64, test_frac: f64) -> Self {
        self.train_frac = train_frac;
        self.test_frac = test_frac;
        self
    }

    /// Make partition shuffles reproducible
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Discover aligned shard files for `groups`.
    ///
    /// `pattern` is a glob containing `placeholder`. Base files are found
    /// with the placeholder resolved to the reference group; each base
    /// file's siblings are its path with every occurrence of the reference
    /// group name replaced by the sibling group name. Base files missing any
    /// sibling are excluded. The reference group is always registered,
    /// first, even when `groups` omits it.
    pub fn register<S: AsRef<str>>(
        &mut self,
        groups: &[S],
        pattern: &str,
        placeholder: &str,
    ) -> Result<RegisterReport> {
        if !pattern.contains(placeholder) {
            return Err(JetfeedError::Pattern {
                pattern: pattern.to_string(),
                reason: format!("missing group placeholder {placeholder}"),
            });
        }

        let mut names: Vec<String> = vec![self.reference_group.clone()];
        for group in groups {
            let group = group.as_ref();
            if !names.iter().any(|n| n == group) {
                names.push(group.to_string());
            }
        }

        let base_pattern = pattern.replace(placeholder, &self.reference_group);
        let entries = glob::glob(&base_pattern).map_err(|e| JetfeedError::Pattern {
            pattern: base_pattern.clone(),
            reason: e.to_string(),
        })?;

        let mut aligned: Vec<Vec<PathBuf>> = vec![Vec::new(); names.len()];
        let mut report = RegisterReport::default();
        for entry in entries {
            let base = entry.map_err(|e| JetfeedError::Io {
                path: e.path().to_path_buf(),
                source: e.into_error(),
            })?;
            let base_str = base.to_string_lossy();
            let siblings: Vec<PathBuf> = names
                .iter()
                .map(|group| PathBuf::from(base_str.replace(&self.reference_group, group)))
                .collect();

            if siblings.iter().all(|p| p.is_file()) {
                for (list, path) in aligned.iter_mut().zip(siblings) {
                    list.push(path);
                }
                report.accepted += 1;
            } else {
                debug!("Class {}: excluding {}, missing a sibling", self.name, base.display());
                report.excluded += 1;
            }
        }

        if report.accepted == 0 {
            warn!("Class {} has no inputs matching {}", self.name, pattern);
        }
        if report.excluded > 0 {
            warn!(
                "Class {}: excluded {} base files without a sibling in every group",
                self.name, report.excluded
            );
            self.metrics.shards_excluded.inc_by(report.excluded as u64);
        }
        info!(
            "Registered class {} with groups {:?} and {} shards",
            self.name, names, report.accepted
        );

        self.groups = names
            .into_iter()
            .zip(aligned)
            .map(|(name, paths)| ShardSource::with_metrics(name, paths, self.metrics.clone()))
            .collect();
        self.partitions = None;
        self.pt_weight = None;
        Ok(report)
    }

    /// Override the groups fed to the model, in order
    pub fn set_input_groups(&mut self, groups: Vec<String>) -> Result<()> {
        if let Some(unknown) = groups.iter().find(|g| self.group(g).is_none()) {
            return Err(JetfeedError::UnknownGroup {
                group: unknown.clone(),
            });
        }
        self.input_groups = Some(groups);
        Ok(())
    }

    /// Groups fed to the model: the override if set, else every group but
    /// the reference group, else the reference group alone
    pub fn input_groups(&self) -> Vec<String> {
        if let Some(groups) = &self.input_groups {
            return groups.clone();
        }
        let others: Vec<String> = self
            .groups
            .iter()
            .map(|g| g.group().to_string())
            .filter(|g| *g != self.reference_group)
            .collect();
        if others.is_empty() && !self.groups.is_empty() {
            vec![self.reference_group.clone()]
        } else {
            others
        }
    }

    /// Split shard indices into train/test/validate and freeze the split
    pub fn partition(&mut self, train_frac: f64, test_frac: f64) -> Result<&PartitionAssignment> {
        let n = self.groups.iter().map(ShardSource::len).min().unwrap_or(0);
        let assignment = PartitionAssignment::build(n, train_frac, test_frac, &mut self.rng)?;
        info!("Class {}: partitioned {} shards", self.name, n);
        Ok(&*self.partitions.insert(assignment))
    }

    /// Partition with the collection's configured fractions
    pub fn repartition(&mut self) -> Result<&PartitionAssignment> {
        self.partition(self.train_frac, self.test_frac)
    }

    /// Load one shard position into every group, returning the position.
    ///
    /// With a partition, the position is drawn from that partition's queue
    /// (building the assignment first if needed) and `index` is ignored.
    /// Otherwise `index` selects the shard, or `None` the next unvisited one.
    pub fn load(&mut self, index: Option<usize>, partition: Option<Partition>) -> Result<usize> {
        if self.groups.is_empty() {
            return Err(JetfeedError::NoShards {
                group: self.reference_group.clone(),
            });
        }

        let index = match partition {
            Some(partition) => {
                if self.partitions.is_none() {
                    self.repartition()?;
                }
                let assignment = self.partitions.as_mut().ok_or_else(|| JetfeedError::Internal {
                    message: "partition assignment missing after build".into(),
                })?;
                Some(assignment.next_index(partition)?)
            }
            None => index,
        };

        let mut loaded = 0;
        for source in &mut self.groups {
            loaded = source.load(index, true)?;
        }
        Ok(loaded)
    }

    /// Common row count of the loaded shard across all groups
    pub fn n_available(&self) -> Result<usize> {
        let mut counts = Vec::with_capacity(self.groups.len());
        for source in &self.groups {
            let rows = source.n_available().ok_or_else(|| JetfeedError::UnsetState {
                group: source.group().to_string(),
            })?;
            counts.push((source.group().to_string(), rows));
        }

        let first = match counts.first() {
            Some(&(_, rows)) => rows,
            None => {
                return Err(JetfeedError::NoShards {
                    group: self.reference_group.clone(),
                })
            }
        };
        if counts.iter().all(|&(_, rows)| rows == first) {
            Ok(first)
        } else {
            Err(JetfeedError::RowCountMismatch { counts })
        }
    }

    /// Rebuild the inverse-pt histogram over every reference shard file
    pub fn compute_weight(&mut self) -> Result<&Histogram1D> {
        let reference = self.reference()?;
        let mut histogram = Histogram1D::new(self.pt_edges.clone());
        let mut events = 0usize;
        for path in reference.paths() {
            let array = read_shard_file(path)?;
            let pt = self.manifest.view(array.view(), "pt")?;
            histogram.fill_array(pt);
            events += pt.len();
        }
        histogram.invert();

        info!(
            "Class {}: computed pt weights from {} events in {} shards",
            self.name,
            events,
            reference.len()
        );
        self.metrics.weight_rebuilds.inc();
        Ok(&*self.pt_weight.insert(histogram))
    }

    /// Per-group row subsets of the loaded shard, or whole arrays
    pub fn rows(&self, indices: Option<&[usize]>) -> Result<Vec<(String, Array2<f64>)>> {
        self.groups
            .iter()
            .map(|source| {
                let rows = match indices {
                    Some(indices) => source.read_rows(indices)?,
                    None => source.read()?.to_owned(),
                };
                Ok((source.group().to_string(), rows))
            })
            .collect()
    }

    /// Whole loaded shard with weights and count one-hots
    pub fn read_batch_arrays(&self) -> Result<ShardArrays> {
        let targets = self.shard_targets()?;
        Ok(ShardArrays {
            groups: self.rows(None)?,
            weight: targets.weight,
            prongs: targets.prongs,
            hadrons: targets.hadrons,
        })
    }

    fn shard_targets(&self) -> Result<ShardTargets> {
        self.n_available()?;
        let histogram = self.pt_weight.as_ref().ok_or(JetfeedError::WeightsNotComputed)?;
        let reference = self.reference()?.read()?;

        let pt = self.manifest.view(reference, "pt")?;
        let n_prongs = self.manifest.view(reference, "nProngs")?;
        let n_hadrons = self.manifest.view(reference, "nbHadrons")?;
        Ok(ShardTargets {
            weight: histogram.eval_array(pt),
            prongs: one_hot(n_prongs, COUNT_CATEGORIES),
            hadrons: one_hot(n_hadrons, COUNT_CATEGORIES),
        })
    }

    /// Infinite batch sequence over one partition.
    ///
    /// Consumes the collection; [`ClassGenerator::into_inner`] returns it
    /// with its shard and partition state intact.
    pub fn generator(self, partition: Partition, batch: usize, repartition: bool) -> ClassGenerator {
        ClassGenerator {
            collection: self,
            partition,
            batch: batch.max(1),
            repartition,
            primed: false,
            cursor: None,
        }
    }

    pub fn group(&self, name: &str) -> Option<&ShardSource> {
        self.groups.iter().find(|g| g.group() == name)
    }

    pub fn groups(&self) -> &[ShardSource] {
        &self.groups
    }

    fn reference(&self) -> Result<&ShardSource> {
        self.group(&self.reference_group)
            .ok_or_else(|| JetfeedError::UnknownGroup {
                group: self.reference_group.clone(),
            })
    }

    pub fn partitions(&self) -> Option<&PartitionAssignment> {
        self.partitions.as_ref()
    }

    pub fn pt_weight(&self) -> Option<&Histogram1D> {
        self.pt_weight.as_ref()
    }

    pub fn manifest(&self) -> &FeatureManifest {
        &self.manifest
    }

    pub fn reference_group(&self) -> &str {
        &self.reference_group
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Shard count shared by every group
    pub fn n_shards(&self) -> usize {
        self.groups.iter().map(ShardSource::len).min().unwrap_or(0)
    }
}

impl std::fmt::Debug for ClassCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassCollection")
            .field("name", &self.name)
            .field("groups", &self.groups)
            .field("partitioned", &self.partitions.is_some())
            .field("weighted", &self.pt_weight.is_some())
            .finish()
    }
}

/// Read position inside the loaded shard
#[derive(Debug)]
struct ShardCursor {
    shard: usize,
    ranges: VecDeque<Range<usize>>,
    targets: ShardTargets,
}

/// Resumable batch generator over one class.
///
/// Batches never span shards: the last batch of a shard may be short.
pub struct ClassGenerator {
    collection: ClassCollection,
    partition: Partition,
    batch: usize,
    repartition: bool,
    primed: bool,
    cursor: Option<ShardCursor>,
}

impl ClassGenerator {
    /// Produce the next batch, loading the next partition shard as needed
    pub fn next_batch(&mut self) -> Result<ClassBatch> {
        if !self.primed {
            if self.repartition {
                self.collection.repartition()?;
            }
            self.collection.compute_weight()?;
            self.primed = true;
        }

        if self.cursor.as_ref().map_or(true, |c| c.ranges.is_empty()) {
            self.advance_shard()?;
        }
        let cursor = self.cursor.as_mut().ok_or_else(|| JetfeedError::Internal {
            message: "no shard cursor after advance".into(),
        })?;
        let Range { start: lo, end: hi } =
            cursor.ranges.pop_front().ok_or_else(|| JetfeedError::Internal {
                message: "shard cursor has no rows left".into(),
            })?;

        let collection = &self.collection;
        let slice_group = |name: &str| -> Result<Array2<f64>> {
            let source = collection
                .group(name)
                .ok_or_else(|| JetfeedError::UnknownGroup {
                    group: name.to_string(),
                })?;
            Ok(source.read()?.slice(s![lo..hi, ..]).to_owned())
        };

        let inputs = collection
            .input_groups()
            .iter()
            .map(|name| slice_group(name.as_str()))
            .collect::<Result<Vec<_>>>()?;
        let reference = slice_group(collection.reference_group.as_str())?;
        let targets = &cursor.targets;

        debug!(
            "Class {}: sliced rows {}..{} of shard {}",
            collection.name, lo, hi, cursor.shard
        );

        Ok(ClassBatch {
            inputs,
            outputs: vec![
                targets.prongs.slice(s![lo..hi, ..]).to_owned(),
                targets.hadrons.slice(s![lo..hi, ..]).to_owned(),
            ],
            weights: targets.weight.slice(s![lo..hi]).to_owned(),
            reference,
            shard: cursor.shard,
            offset: lo,
        })
    }

    /// Load partition shards until one has rows
    fn advance_shard(&mut self) -> Result<()> {
        if self.collection.partitions().is_none() {
            self.collection.repartition()?;
        }
        let attempts = self
            .collection
            .partitions()
            .map(|p| p.indices(self.partition).len())
            .unwrap_or(0)
            .max(1);

        for _ in 0..attempts {
            let shard = self.collection.load(None, Some(self.partition))?;
            let rows = self.collection.n_available()?;
            if rows == 0 {
                debug!("Class {}: skipping empty shard {}", self.collection.name, shard);
                continue;
            }
            let targets = self.collection.shard_targets()?;
            self.cursor = Some(ShardCursor {
                shard,
                ranges: batch_ranges(rows, self.batch).collect(),
                targets,
            });
            return Ok(());
        }

        Err(JetfeedError::EmptyPartition {
            partition: self.partition.to_string(),
        })
    }

    pub fn collection(&self) -> &ClassCollection {
        &self.collection
    }

    pub fn partition(&self) -> Partition {
        self.partition
    }

    pub fn batch_size(&self) -> usize {
        self.batch
    }

    /// Give back the collection with its state
    pub fn into_inner(self) -> ClassCollection {
        self.collection
    }
}

impl Iterator for ClassGenerator {
    type Item = Result<ClassBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_batch())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_load_without_groups() {
        let mut collection = ClassCollection::new("top");
        assert!(matches!(
            collection.load(None, None),
            Err(JetfeedError::NoShards { .. })
        ));
        assert!(collection.n_available().is_err());
    }

    #[test]
    fn test_pattern_requires_placeholder() {
        let mut collection = ClassCollection::new("qcd");
        let err = collection
            .register(&["charged"], "/tmp/files_singletons_*.npy", GROUP_PLACEHOLDER)
            .unwrap_err();
        assert!(matches!(err, JetfeedError::Pattern { .. }));
    }

    #[test]
    fn test_register_empty_class_is_not_fatal() {
        let dir = tempfile::TempDir::new().unwrap();
        let pattern = format!("{}/nothing_XXXX_*.npy", dir.path().display());
        let mut collection = ClassCollection::new("qcd");
        let report = collection.register(&["charged"], &pattern, "XXXX").unwrap();

        assert_eq!(report, RegisterReport { accepted: 0, excluded: 0 });
        assert_eq!(collection.groups().len(), 2);
        assert!(collection.load(None, Some(Partition::Train)).is_err());
    }

    #[test]
    fn test_shard_arrays_lookup() {
        let arrays = ShardArrays {
            groups: vec![("sv".into(), array![[1.0]])],
            weight: array![1.0],
            prongs: array![[1.0, 0.0, 0.0, 0.0, 0.0]],
            hadrons: array![[1.0, 0.0, 0.0, 0.0, 0.0]],
        };
        assert!(arrays.group("sv").is_some());
        assert!(arrays.group("charged").is_none());
    }
}
