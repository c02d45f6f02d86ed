//! Batch records and array helpers
//!
//! One-hot encoding, shard slicing and event-axis concatenation shared by
//! class generators and mergers.

use std::ops::Range;

use ndarray::{concatenate, Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{JetfeedError, Result};

/// Number of categories for prong and heavy-flavour hadron counts
pub const COUNT_CATEGORIES: usize = 5;

/// Model-ready batch: named inputs, targets and one weight array per target
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub inputs: Vec<Array2<f64>>,
    pub outputs: Vec<Array2<f64>>,
    pub weights: Vec<Array1<f64>>,
}

impl Batch {
    /// Number of events (rows) in the batch
    pub fn len(&self) -> usize {
        self.weights
            .first()
            .map(|w| w.len())
            .or_else(|| self.inputs.first().map(|x| x.nrows()))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One slice of one class's shard, before merging
#[derive(Debug, Clone, PartialEq)]
pub struct ClassBatch {
    /// Input-group arrays in the class's input order
    pub inputs: Vec<Array2<f64>>,
    /// Prong-count and hadron-count one-hots
    pub outputs: Vec<Array2<f64>>,
    /// Pt weights
    pub weights: Array1<f64>,
    /// Matching rows of the reference group
    pub reference: Array2<f64>,
    /// Shard position the rows came from
    pub shard: usize,
    /// First row of the slice within the shard
    pub offset: usize,
}

impl ClassBatch {
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

/// Integer category of a value: truncated toward zero and clipped to
/// `[0, n_classes - 1]`. NaN maps to 0.
pub fn category(value: f64, n_classes: usize) -> usize {
    let top = n_classes.saturating_sub(1);
    if value.is_nan() || value <= 0.0 {
        return 0;
    }
    (value.trunc() as usize).min(top)
}

/// One-hot encode precomputed categories
pub fn one_hot_categories(categories: &[usize], n_classes: usize) -> Array2<f64> {
    let mut encoded = Array2::zeros((categories.len(), n_classes));
    for (row, &cat) in categories.iter().enumerate() {
        if cat < n_classes {
            encoded[[row, cat]] = 1.0;
        }
    }
    encoded
}

/// One-hot encode raw counts with [`category`] rules
pub fn one_hot(values: ArrayView1<'_, f64>, n_classes: usize) -> Array2<f64> {
    let categories: Vec<usize> = values.iter().map(|&v| category(v, n_classes)).collect();
    one_hot_categories(&categories, n_classes)
}

/// Consecutive row ranges of at most `batch` rows covering `0..rows`
pub fn batch_ranges(rows: usize, batch: usize) -> impl Iterator<Item = Range<usize>> {
    let batch = batch.max(1);
    (0..rows)
        .step_by(batch)
        .map(move |lo| lo..(lo + batch).min(rows))
}

/// Stack 2-D arrays along the event axis
pub fn concat_rows(parts: &[ArrayView2<'_, f64>]) -> Result<Array2<f64>> {
    concatenate(Axis(0), parts).map_err(|e| JetfeedError::Internal {
        message: format!("cannot concatenate batch arrays: {e}"),
    })
}

/// Join 1-D arrays end to end
pub fn concat_weights(parts: &[ArrayView1<'_, f64>]) -> Result<Array1<f64>> {
    concatenate(Axis(0), parts).map_err(|e| JetfeedError::Internal {
        message: format!("cannot concatenate weight arrays: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_category_clipping() {
        assert_eq!(category(0.0, 5), 0);
        assert_eq!(category(2.9, 5), 2);
        assert_eq!(category(7.0, 5), 4);
        assert_eq!(category(-1.0, 5), 0);
        assert_eq!(category(f64::NAN, 5), 0);
    }

    #[test]
    fn test_one_hot() {
        let encoded = one_hot(array![1.0, 3.0, 9.0].view(), COUNT_CATEGORIES);
        assert_eq!(encoded.dim(), (3, 5));
        assert_eq!(encoded.row(0).to_vec(), vec![0.0, 1.0, 0.0, 0.0, 0.0]);
        assert_eq!(encoded.row(2).to_vec(), vec![0.0, 0.0, 0.0, 0.0, 1.0]);
        assert!(encoded.rows().into_iter().all(|r| r.sum() == 1.0));
    }

    #[test]
    fn test_batch_ranges_cover_rows() {
        let ranges: Vec<_> = batch_ranges(10, 4).collect();
        assert_eq!(ranges, vec![0..4, 4..8, 8..10]);

        let exact: Vec<_> = batch_ranges(8, 4).collect();
        assert_eq!(exact, vec![0..4, 4..8]);

        assert_eq!(batch_ranges(0, 4).count(), 0);
    }

    #[test]
    fn test_concat() {
        let a = array![[1.0, 2.0]];
        let b = array![[3.0, 4.0], [5.0, 6.0]];
        let merged = concat_rows(&[a.view(), b.view()]).unwrap();
        assert_eq!(merged.nrows(), 3);
        assert_eq!(merged.row(2).to_vec(), vec![5.0, 6.0]);

        let c = array![[1.0]];
        assert!(concat_rows(&[a.view(), c.view()]).is_err());

        let w = concat_weights(&[array![1.0].view(), array![2.0, 3.0].view()]).unwrap();
        assert_eq!(w, array![1.0, 2.0, 3.0]);
    }
}
