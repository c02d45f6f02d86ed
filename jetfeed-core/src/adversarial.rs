//! Gradient-reversal operators for adversarial decorrelation heads
//!
//! Each adversary head sits behind an identity op whose backward pass
//! negates and scales the incoming gradient. Ops get unique names from a
//! registry-owned counter so a training graph can refer to them.

use std::collections::HashMap;
use std::sync::Arc;

use ndarray::{Array, ArrayView, Dimension};
use parking_lot::Mutex;
use tracing::debug;

/// Name prefix of registered reversal ops
pub const REVERSAL_PREFIX: &str = "reverse";

/// Gradient reversal: `-scale * g` on the backward pass
#[derive(Debug, Clone, PartialEq)]
pub struct ReversalOp {
    name: String,
    scale: f64,
}

impl ReversalOp {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Backward pass: map an upstream gradient to `-scale * g`
    pub fn apply<D: Dimension>(&self, grad: ArrayView<'_, f64, D>) -> Array<f64, D> {
        let factor = -self.scale;
        grad.mapv(|g| factor * g)
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    counter: u64,
    ops: HashMap<String, Arc<ReversalOp>>,
}

/// Thread-safe source of uniquely named reversal ops.
///
/// Names are `reverse1`, `reverse2`, ... in registration order.
#[derive(Debug, Default)]
pub struct ReversalRegistry {
    inner: Mutex<RegistryInner>,
}

impl ReversalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new op with the given gradient scale
    pub fn register(&self, scale: f64) -> Arc<ReversalOp> {
        let mut inner = self.inner.lock();
        inner.counter += 1;
        let name = format!("{REVERSAL_PREFIX}{}", inner.counter);
        let op = Arc::new(ReversalOp {
            name: name.clone(),
            scale,
        });
        inner.ops.insert(name, op.clone());
        debug!("Registered gradient reversal {} with scale {}", op.name(), scale);
        op
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<ReversalOp>> {
        self.inner.lock().ops.get(name).cloned()
    }

    /// Number of ops registered so far
    pub fn len(&self) -> usize {
        self.inner.lock().ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
