//! A small reverse-mode automatic differentiation engine over dense 2-D `f64` tensors.
//!
//! Every simulation quantity is a `Tensor` of shape `[rows, cols]`, stored row-major. By
//! convention rows index variants (or sampler outcomes) and columns index agents or venues, so
//! a per-agent scalar is `[1, n_agents]` and a per-variant per-agent quantity is
//! `[n_variants, n_agents]`.
//!
//! Operations record themselves on the `Tape` shared by their inputs. Calling `backward` on a
//! `[1, 1]` result replays the tape in reverse and returns `Gradients` for every tensor that
//! depends on a variable. Tensor values are immutable; an "update" builds a new tensor, so
//! earlier values stay available to the backward sweep.
//!
//! ```rust
//! use epigrad::tensor::Tape;
//!
//! let tape = Tape::new();
//! let x = tape.scalar_variable(2.0);
//! let y = x.mul(&x).unwrap().exp();
//! let grads = y.backward().unwrap();
//! let expected = 2.0 * 2.0 * (4.0_f64).exp();
//! assert!((grads.scalar_wrt(&x) - expected).abs() < 1e-9);
//! ```

mod gradients;
mod indexing;
mod ops;
mod tape;

use std::fmt;
use std::rc::Rc;

pub use gradients::Gradients;
pub(crate) use gradients::GradStore;
pub(crate) use tape::BackwardFn;
pub use tape::Tape;

use crate::error::SimError;

#[derive(Clone)]
pub struct Tensor {
    pub(crate) tape: Tape,
    pub(crate) id: usize,
    pub(crate) rows: usize,
    pub(crate) cols: usize,
    pub(crate) value: Rc<[f64]>,
    pub(crate) requires_grad: bool,
}

impl Tensor {
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.value.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.value
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<f64> {
        self.value.to_vec()
    }

    /// # Panics
    ///
    /// Panics if `(row, col)` is out of bounds.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        assert!(
            row < self.rows && col < self.cols,
            "index ({row}, {col}) out of bounds for shape {:?}",
            self.shape()
        );
        self.value[row * self.cols + col]
    }

    /// The single value of a `[1, 1]` tensor.
    pub fn item(&self) -> Result<f64, SimError> {
        if self.shape() != (1, 1) {
            return Err(SimError::ShapeMismatch(format!(
                "item() needs a [1, 1] tensor, got {:?}",
                self.shape()
            )));
        }
        Ok(self.value[0])
    }

    #[must_use]
    pub fn tape(&self) -> &Tape {
        &self.tape
    }

    /// True when some variable upstream of this tensor can receive gradient through it.
    #[must_use]
    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// Differentiates this `[1, 1]` tensor with respect to everything recorded before it.
    pub fn backward(&self) -> Result<Gradients, SimError> {
        if self.shape() != (1, 1) {
            return Err(SimError::ShapeMismatch(format!(
                "backward() needs a [1, 1] output, got {:?}",
                self.shape()
            )));
        }
        Ok(self.tape.backward_from(self))
    }

    /// A constant copy of this tensor: same values, no gradient path.
    #[must_use]
    pub fn detach(&self) -> Tensor {
        self.tape.record(self.rows, self.cols, self.value.clone(), None)
    }

    /// Fails with `NumericalInstability` if any value is NaN or infinite.
    pub fn check_finite(&self, what: &str) -> Result<(), SimError> {
        match self.value.iter().position(|x| !x.is_finite()) {
            Some(index) => Err(SimError::NumericalInstability(format!(
                "{what} has non-finite value {} at column {} of row {}",
                self.value[index],
                index % self.cols.max(1),
                index / self.cols.max(1)
            ))),
            None => Ok(()),
        }
    }

    pub(crate) fn check_same_tape(&self, other: &Tensor) -> Result<(), SimError> {
        if self.tape.same_tape(&other.tape) {
            Ok(())
        } else {
            Err(SimError::SimError(
                "tensors recorded on different tapes cannot be combined".to_string(),
            ))
        }
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SHOWN: usize = 8;
        let head = &self.value[..self.len().min(SHOWN)];
        f.debug_struct("Tensor")
            .field("shape", &self.shape())
            .field("requires_grad", &self.requires_grad)
            .field("head", &head)
            .finish()
    }
}
