//! Fixed-bin 1-D histogram used for pt flattening weights
//!
//! Bin `i` collects values below `edges[i]` and at or above `edges[i - 1]`;
//! bin `edges.len()` is the overflow bin.

use ndarray::{Array1, ArrayView1};

/// Pt bin edges used for inverse-density weights
pub const PT_WEIGHT_EDGES: [f64; 19] = [
    0.0, 40.0, 80.0, 120.0, 160.0, 200.0, 250.0, 300.0, 350.0, 400.0, 450.0, 500.0, 600.0,
    700.0, 800.0, 1000.0, 1200.0, 1400.0, 2000.0,
];

/// Histogram with caller-supplied ascending edges
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram1D {
    edges: Vec<f64>,
    content: Vec<f64>,
}

impl Histogram1D {
    /// Create an empty histogram. Edges must be sorted ascending.
    pub fn new(edges: impl Into<Vec<f64>>) -> Self {
        let edges = edges.into();
        let content = vec![0.0; edges.len() + 1];
        Self { edges, content }
    }

    /// Smallest `i` with `x < edges[i]`, or `edges.len()` for overflow.
    ///
    /// NaN compares false against every edge and lands in overflow.
    pub fn find_bin(&self, x: f64) -> usize {
        self.edges
            .iter()
            .position(|&edge| x < edge)
            .unwrap_or(self.edges.len())
    }

    pub fn fill(&mut self, x: f64) {
        self.fill_weighted(x, 1.0);
    }

    pub fn fill_weighted(&mut self, x: f64, weight: f64) {
        let bin = self.find_bin(x);
        self.content[bin] += weight;
    }

    /// Fill every element of `values` with unit weight
    pub fn fill_array(&mut self, values: ArrayView1<'_, f64>) {
        for &x in values.iter() {
            self.fill(x);
        }
    }

    /// Replace every nonzero bin with its reciprocal.
    ///
    /// Empty bins stay at zero, so events landing there get zero weight.
    pub fn invert(&mut self) {
        for value in self.content.iter_mut().filter(|v| **v != 0.0) {
            *value = 1.0 / *value;
        }
    }

    /// Content of the bin each value falls into
    pub fn eval_array(&self, values: ArrayView1<'_, f64>) -> Array1<f64> {
        values.mapv(|x| self.content[self.find_bin(x)])
    }

    pub fn content(&self, bin: usize) -> Option<f64> {
        self.content.get(bin).copied()
    }

    pub fn contents(&self) -> &[f64] {
        &self.content
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Number of bins including overflow
    pub fn n_bins(&self) -> usize {
        self.content.len()
    }
}
