use std::cell::RefCell;
use std::rc::Rc;

use log::trace;

use crate::error::SimError;
use crate::tensor::gradients::{GradStore, Gradients};
use crate::tensor::Tensor;

/// Propagates the gradient of a node's output into the gradients of its parents.
pub(crate) type BackwardFn = Box<dyn Fn(&[f64], &mut GradStore)>;

struct Node {
    backward: Option<BackwardFn>,
}

#[derive(Default)]
struct TapeData {
    nodes: Vec<Node>,
}

/// Records every tensor operation of a run so that `Tensor::backward` can replay them in
/// reverse.
///
/// A tape is cheap to clone; clones share the same recording. Tensors from different tapes
/// cannot be combined.
#[derive(Clone, Default)]
pub struct Tape {
    data: Rc<RefCell<TapeData>>,
}

impl Tape {
    #[must_use]
    pub fn new() -> Tape {
        Tape::default()
    }

    /// Number of recorded nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.borrow().nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn same_tape(&self, other: &Tape) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }

    /// A leaf whose gradient is tracked.
    pub fn variable(&self, rows: usize, cols: usize, values: Vec<f64>) -> Result<Tensor, SimError> {
        self.leaf(rows, cols, values, true)
    }

    /// A leaf that never receives gradient.
    pub fn constant(&self, rows: usize, cols: usize, values: Vec<f64>) -> Result<Tensor, SimError> {
        self.leaf(rows, cols, values, false)
    }

    #[must_use]
    pub fn scalar_variable(&self, value: f64) -> Tensor {
        self.record_leaf(1, 1, vec![value], true)
    }

    #[must_use]
    pub fn scalar(&self, value: f64) -> Tensor {
        self.full(1, 1, value)
    }

    #[must_use]
    pub fn full(&self, rows: usize, cols: usize, value: f64) -> Tensor {
        self.record_leaf(rows, cols, vec![value; rows * cols], false)
    }

    #[must_use]
    pub fn zeros(&self, rows: usize, cols: usize) -> Tensor {
        self.full(rows, cols, 0.0)
    }

    #[must_use]
    pub fn ones(&self, rows: usize, cols: usize) -> Tensor {
        self.full(rows, cols, 1.0)
    }

    fn leaf(
        &self,
        rows: usize,
        cols: usize,
        values: Vec<f64>,
        requires_grad: bool,
    ) -> Result<Tensor, SimError> {
        if values.len() != rows * cols {
            return Err(SimError::ShapeMismatch(format!(
                "{} values cannot fill a [{rows}, {cols}] tensor",
                values.len()
            )));
        }
        Ok(self.record_leaf(rows, cols, values, requires_grad))
    }

    fn record_leaf(
        &self,
        rows: usize,
        cols: usize,
        values: Vec<f64>,
        requires_grad: bool,
    ) -> Tensor {
        let id = self.push(None);
        Tensor {
            tape: self.clone(),
            id,
            rows,
            cols,
            value: values.into(),
            requires_grad,
        }
    }

    /// Records an op output. The output requires grad exactly when a backward fn is supplied.
    pub(crate) fn record(
        &self,
        rows: usize,
        cols: usize,
        value: Rc<[f64]>,
        backward: Option<BackwardFn>,
    ) -> Tensor {
        let requires_grad = backward.is_some();
        let id = self.push(backward);
        Tensor {
            tape: self.clone(),
            id,
            rows,
            cols,
            value,
            requires_grad,
        }
    }

    fn push(&self, backward: Option<BackwardFn>) -> usize {
        let mut data = self.data.borrow_mut();
        data.nodes.push(Node { backward });
        data.nodes.len() - 1
    }

    /// Reverse sweep from `output`, seeded with d(output)/d(output) = 1.
    pub(crate) fn backward_from(&self, output: &Tensor) -> Gradients {
        let data = self.data.borrow();
        trace!("backward pass over {} nodes", output.id + 1);
        let mut store = GradStore::new(data.nodes.len());
        store.accumulate(output.id, output.len(), |grad| grad.fill(1.0));
        for id in (0..=output.id).rev() {
            let Some(backward) = &data.nodes[id].backward else {
                continue;
            };
            if let Some(grad) = store.take(id) {
                backward(&grad, &mut store);
                store.restore(id, grad);
            }
        }
        store.into_gradients()
    }
}

impl std::fmt::Debug for Tape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tape").field("nodes", &self.len()).finish()
    }
}
