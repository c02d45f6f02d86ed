//! Multi-class batch merging
//!
//! Pulls one batch from every class generator per cycle and concatenates
//! them along the event axis in class order.

use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use tracing::debug;

use super::batch::{category, concat_rows, concat_weights, one_hot_categories, Batch, ClassBatch};
use super::collection::{ClassCollection, ClassGenerator};
use crate::config::{DecorrelationConfig, GeneratorOptions, PipelineConfig};
use crate::error::{JetfeedError, Result};
use crate::metrics::PipelineMetrics;

/// Per-class batch size for a combined target: `max(1, batch / classes)`
pub fn per_class_batch(batch: usize, classes: usize) -> usize {
    (batch / classes.max(1)).max(1)
}

/// One generator per class, pulled in a fixed order
struct ClassStreams {
    generators: Vec<ClassGenerator>,
    per_class_batch: usize,
    metrics: Arc<PipelineMetrics>,
}

impl ClassStreams {
    fn open(collections: Vec<ClassCollection>, options: &GeneratorOptions) -> Result<Self> {
        let metrics = collections
            .first()
            .map(|c| c.metrics().clone())
            .ok_or(JetfeedError::NoCollections)?;
        let per_class_batch = per_class_batch(options.batch, collections.len());
        debug!(
            "Opening {} class generators on {} with {} events per class",
            collections.len(),
            options.partition,
            per_class_batch
        );

        let generators = collections
            .into_iter()
            .map(|c| c.generator(options.partition, per_class_batch, options.repartition))
            .collect();
        Ok(Self {
            generators,
            per_class_batch,
            metrics,
        })
    }

    /// One batch from every class. Classes advance independently.
    fn pull(&mut self) -> Result<Vec<ClassBatch>> {
        self.generators
            .iter_mut()
            .map(ClassGenerator::next_batch)
            .collect()
    }

    fn record(&self, batch: &Batch) {
        self.metrics.batches_yielded.inc();
        self.metrics.events_yielded.inc_by(batch.len() as u64);
    }

    fn collections(&self) -> impl Iterator<Item = &ClassCollection> {
        self.generators.iter().map(ClassGenerator::collection)
    }

    fn into_collections(self) -> Vec<ClassCollection> {
        self.generators
            .into_iter()
            .map(ClassGenerator::into_inner)
            .collect()
    }
}

/// Concatenate position `j` of every class's array list, for `j < count`
fn merge_arrays(lists: &[&[Array2<f64>]], count: usize) -> Result<Vec<Array2<f64>>> {
    (0..count)
        .map(|j| {
            let views: Vec<ArrayView2<'_, f64>> = lists
                .iter()
                .map(|list| list.get(j).map(|a| a.view()))
                .collect::<Option<_>>()
                .ok_or_else(|| JetfeedError::config("classes disagree on batch array layout"))?;
            concat_rows(&views)
        })
        .collect()
}

/// Weight counterpart of [`merge_arrays`]
fn merge_weights(lists: &[&[Array1<f64>]], count: usize) -> Result<Vec<Array1<f64>>> {
    (0..count)
        .map(|j| {
            let views: Vec<ArrayView1<'_, f64>> = lists
                .iter()
                .map(|list| list.get(j).map(|w| w.view()))
                .collect::<Option<_>>()
                .ok_or_else(|| JetfeedError::config("classes disagree on weight layout"))?;
            concat_weights(&views)
        })
        .collect()
}

/// Merger over per-group inputs with prong and hadron targets.
///
/// Yields inputs per input group, outputs `[prongs, hadrons]` and the pt
/// weights twice, one copy per classification head.
pub struct Merger {
    streams: ClassStreams,
}

impl Merger {
    pub fn new(collections: Vec<ClassCollection>, options: &GeneratorOptions) -> Result<Self> {
        Ok(Self {
            streams: ClassStreams::open(collections, options)?,
        })
    }

    pub fn next_batch(&mut self) -> Result<Batch> {
        let parts = self.streams.pull()?;
        let n_inputs = parts.first().map_or(0, |p| p.inputs.len());
        let n_outputs = parts.first().map_or(0, |p| p.outputs.len());

        let input_lists: Vec<_> = parts.iter().map(|p| p.inputs.as_slice()).collect();
        let output_lists: Vec<_> = parts.iter().map(|p| p.outputs.as_slice()).collect();
        let inputs = merge_arrays(&input_lists, n_inputs)?;
        let outputs = merge_arrays(&output_lists, n_outputs)?;
        let weight_views: Vec<_> = parts.iter().map(|p| p.weights.view()).collect();
        let weight = concat_weights(&weight_views)?;

        let batch = Batch {
            inputs,
            outputs,
            weights: vec![weight.clone(), weight],
        };
        self.streams.record(&batch);
        Ok(batch)
    }

    pub fn per_class_batch(&self) -> usize {
        self.streams.per_class_batch
    }

    pub fn collections(&self) -> impl Iterator<Item = &ClassCollection> {
        self.streams.collections()
    }

    pub fn into_collections(self) -> Vec<ClassCollection> {
        self.streams.into_collections()
    }
}

impl Iterator for Merger {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_batch())
    }
}

/// Reference-group column positions used by the decorrelated layout
#[derive(Debug, Clone)]
struct Columns {
    variables: Vec<usize>,
    msd: usize,
    pt: usize,
    n_prongs: usize,
}

/// Merger feeding a single standardized variable array plus adversary
/// targets.
///
/// Outputs are the truth one-hot, then the mass one-hot if enabled, then
/// the pt one-hot if enabled. The truth output carries the pt weight; each
/// decorrelation output carries the pt weight masked to the adversary's
/// truth categories.
pub struct DecorrelatedMerger {
    streams: ClassStreams,
    options: GeneratorOptions,
    config: DecorrelationConfig,
    columns: Columns,
    mus: Array1<f64>,
    sigmas: Array1<f64>,
}

impl DecorrelatedMerger {
    pub fn new(
        collections: Vec<ClassCollection>,
        options: &GeneratorOptions,
        config: &DecorrelationConfig,
    ) -> Result<Self> {
        let manifest = collections
            .first()
            .map(|c| c.manifest().clone())
            .ok_or(JetfeedError::NoCollections)?;
        if collections.iter().any(|c| *c.manifest() != manifest) {
            return Err(JetfeedError::config(
                "classes use different reference-group layouts",
            ));
        }
        config.validate(&manifest)?;

        let columns = Columns {
            variables: manifest.columns(&config.variables)?,
            msd: manifest.column("msd")?,
            pt: manifest.column("pt")?,
            n_prongs: manifest.column("nProngs")?,
        };

        Ok(Self {
            streams: ClassStreams::open(collections, options)?,
            options: options.clone(),
            config: config.clone(),
            columns,
            mus: Array1::from(config.mus.clone()),
            sigmas: Array1::from(config.sigmas.clone()),
        })
    }

    /// Number of output heads: truth plus enabled decorrelation targets
    pub fn n_outputs(&self) -> usize {
        1 + usize::from(self.options.decorr_mass) + usize::from(self.options.decorr_pt)
    }

    pub fn next_batch(&mut self) -> Result<Batch> {
        let parts = self.streams.pull()?;
        let per_class: Vec<Batch> = parts
            .iter()
            .map(|part| self.transform(part))
            .collect::<Result<_>>()?;

        let n_outputs = self.n_outputs();
        let input_lists: Vec<_> = per_class.iter().map(|b| b.inputs.as_slice()).collect();
        let output_lists: Vec<_> = per_class.iter().map(|b| b.outputs.as_slice()).collect();
        let weight_lists: Vec<_> = per_class.iter().map(|b| b.weights.as_slice()).collect();

        let batch = Batch {
            inputs: merge_arrays(&input_lists, 1)?,
            outputs: merge_arrays(&output_lists, n_outputs)?,
            weights: merge_weights(&weight_lists, n_outputs)?,
        };
        self.streams.record(&batch);
        Ok(batch)
    }

    /// Build one class's inputs, targets and weights
    fn transform(&self, part: &ClassBatch) -> Result<Batch> {
        let reference = &part.reference;
        let width = reference.ncols();
        let widest = self
            .columns
            .variables
            .iter()
            .chain([&self.columns.msd, &self.columns.pt, &self.columns.n_prongs])
            .max()
            .copied()
            .unwrap_or(0);
        if widest >= width {
            return Err(JetfeedError::ColumnOutOfRange {
                field: "reference".into(),
                column: widest,
                width,
            });
        }

        let mut x = reference.select(Axis(1), &self.columns.variables);
        if self.options.normalize {
            x -= &self.mus;
            x /= &self.sigmas;
        }

        let n_truth = self.config.n_truth;
        let truth: Vec<usize> = reference
            .column(self.columns.n_prongs)
            .iter()
            .map(|&v| category(v, n_truth))
            .collect();
        let base = part.weights.clone();
        let masked = Array1::from_iter(
            truth
                .iter()
                .zip(base.iter())
                .map(|(cat, w)| if self.config.adversary_mask.contains(cat) { *w } else { 0.0 }),
        );

        let mut outputs = vec![one_hot_categories(&truth, n_truth)];
        let mut weights = vec![base];
        if self.options.decorr_mass {
            outputs.push(self.config.mass.one_hot(reference.column(self.columns.msd)));
            weights.push(masked.clone());
        }
        if self.options.decorr_pt {
            outputs.push(self.config.pt.one_hot(reference.column(self.columns.pt)));
            weights.push(masked);
        }

        Ok(Batch {
            inputs: vec![x],
            outputs,
            weights,
        })
    }

    pub fn per_class_batch(&self) -> usize {
        self.streams.per_class_batch
    }

    pub fn collections(&self) -> impl Iterator<Item = &ClassCollection> {
        self.streams.collections()
    }

    pub fn into_collections(self) -> Vec<ClassCollection> {
        self.streams.into_collections()
    }
}

impl Iterator for DecorrelatedMerger {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_batch())
    }
}

/// Either merger layout behind one iterator
pub enum MergedStream {
    Plain(Merger),
    Decorrelated(DecorrelatedMerger),
}

impl MergedStream {
    /// Pick the layout from the generator options in `config`
    pub fn open(collections: Vec<ClassCollection>, config: &PipelineConfig) -> Result<Self> {
        let options = &config.generator;
        if options.wants_decorrelation() {
            DecorrelatedMerger::new(collections, options, &config.decorrelation)
                .map(MergedStream::Decorrelated)
        } else {
            Merger::new(collections, options).map(MergedStream::Plain)
        }
    }

    pub fn next_batch(&mut self) -> Result<Batch> {
        match self {
            MergedStream::Plain(m) => m.next_batch(),
            MergedStream::Decorrelated(m) => m.next_batch(),
        }
    }

    pub fn into_collections(self) -> Vec<ClassCollection> {
        match self {
            MergedStream::Plain(m) => m.into_collections(),
            MergedStream::Decorrelated(m) => m.into_collections(),
        }
    }
}

impl Iterator for MergedStream {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_batch())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_class_batch() {
        assert_eq!(per_class_batch(32, 2), 16);
        assert_eq!(per_class_batch(5, 2), 2);
        assert_eq!(per_class_batch(1, 3), 1);
        assert_eq!(per_class_batch(4, 0), 4);
    }

    #[test]
    fn test_merger_needs_collections() {
        let options = GeneratorOptions::default();
        assert!(matches!(
            Merger::new(Vec::new(), &options),
            Err(JetfeedError::NoCollections)
        ));
        assert!(matches!(
            DecorrelatedMerger::new(Vec::new(), &options, &DecorrelationConfig::default()),
            Err(JetfeedError::NoCollections)
        ));
    }
}
