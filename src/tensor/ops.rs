//! Element-wise arithmetic with broadcasting, plus reductions.
//!
//! Binary ops broadcast like numpy restricted to two dimensions: each dimension must either
//! match or be 1 on one side. Gradients flowing into a broadcast operand are summed over the
//! broadcast dimension.

use std::rc::Rc;

use crate::error::SimError;
use crate::tensor::{BackwardFn, GradStore, Tensor};

type Shape = (usize, usize);

fn broadcast_shape(a: Shape, b: Shape) -> Result<Shape, SimError> {
    let dim = |x: usize, y: usize| {
        if x == y || y == 1 {
            Some(x)
        } else if x == 1 {
            Some(y)
        } else {
            None
        }
    };
    match (dim(a.0, b.0), dim(a.1, b.1)) {
        (Some(rows), Some(cols)) => Ok((rows, cols)),
        _ => Err(SimError::ShapeMismatch(format!(
            "cannot broadcast {a:?} with {b:?}"
        ))),
    }
}

/// Flat index into an operand of `shape` for output position `(row, col)`.
#[inline]
fn source_index(shape: Shape, row: usize, col: usize) -> usize {
    let r = if shape.0 == 1 { 0 } else { row };
    let c = if shape.1 == 1 { 0 } else { col };
    r * shape.1 + c
}

impl Tensor {
    /// Applies `f` element-wise. `df(x, y)` is the derivative at input `x` with output `y`.
    fn map_with(
        &self,
        f: impl Fn(f64) -> f64,
        df: impl Fn(f64, f64) -> f64 + 'static,
    ) -> Tensor {
        let value: Rc<[f64]> = self.value.iter().map(|&x| f(x)).collect();
        let backward = self.requires_grad.then(|| {
            let parent = self.id;
            let input = self.value.clone();
            let output = value.clone();
            Box::new(move |grad: &[f64], store: &mut GradStore| {
                store.accumulate(parent, input.len(), |parent_grad| {
                    for (i, g) in grad.iter().enumerate() {
                        parent_grad[i] += g * df(input[i], output[i]);
                    }
                });
            }) as BackwardFn
        });
        self.tape.record(self.rows, self.cols, value, backward)
    }

    /// Applies `f` to broadcast pairs. `dfa(a, b)` and `dfb(a, b)` are the partial
    /// derivatives with respect to each operand.
    fn zip_with(
        &self,
        other: &Tensor,
        f: impl Fn(f64, f64) -> f64,
        dfa: impl Fn(f64, f64) -> f64 + 'static,
        dfb: impl Fn(f64, f64) -> f64 + 'static,
    ) -> Result<Tensor, SimError> {
        self.check_same_tape(other)?;
        let (sa, sb) = (self.shape(), other.shape());
        let (rows, cols) = broadcast_shape(sa, sb)?;

        let mut value = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                value.push(f(
                    self.value[source_index(sa, row, col)],
                    other.value[source_index(sb, row, col)],
                ));
            }
        }

        let backward = (self.requires_grad || other.requires_grad).then(|| {
            let a = self.value.clone();
            let b = other.value.clone();
            let id_a = self.requires_grad.then_some(self.id);
            let id_b = other.requires_grad.then_some(other.id);
            Box::new(move |grad: &[f64], store: &mut GradStore| {
                if let Some(id) = id_a {
                    store.accumulate(id, a.len(), |ga| {
                        for row in 0..rows {
                            for col in 0..cols {
                                let i = source_index(sa, row, col);
                                let j = source_index(sb, row, col);
                                ga[i] += grad[row * cols + col] * dfa(a[i], b[j]);
                            }
                        }
                    });
                }
                if let Some(id) = id_b {
                    store.accumulate(id, b.len(), |gb| {
                        for row in 0..rows {
                            for col in 0..cols {
                                let i = source_index(sa, row, col);
                                let j = source_index(sb, row, col);
                                gb[j] += grad[row * cols + col] * dfb(a[i], b[j]);
                            }
                        }
                    });
                }
            }) as BackwardFn
        });
        Ok(self.tape.record(rows, cols, value.into(), backward))
    }

    pub fn add(&self, other: &Tensor) -> Result<Tensor, SimError> {
        self.zip_with(other, |a, b| a + b, |_, _| 1.0, |_, _| 1.0)
    }

    pub fn sub(&self, other: &Tensor) -> Result<Tensor, SimError> {
        self.zip_with(other, |a, b| a - b, |_, _| 1.0, |_, _| -1.0)
    }

    pub fn mul(&self, other: &Tensor) -> Result<Tensor, SimError> {
        self.zip_with(other, |a, b| a * b, |_, b| b, |a, _| a)
    }

    #[must_use]
    pub fn neg(&self) -> Tensor {
        self.map_with(|x| -x, |_, _| -1.0)
    }

    #[must_use]
    pub fn scale(&self, factor: f64) -> Tensor {
        self.map_with(move |x| factor * x, move |_, _| factor)
    }

    #[must_use]
    pub fn add_scalar(&self, offset: f64) -> Tensor {
        self.map_with(move |x| x + offset, |_, _| 1.0)
    }

    /// `1 - x`.
    #[must_use]
    pub fn one_minus(&self) -> Tensor {
        self.map_with(|x| 1.0 - x, |_, _| -1.0)
    }

    #[must_use]
    pub fn exp(&self) -> Tensor {
        self.map_with(f64::exp, |_, y| y)
    }

    /// Natural log with the input floored at `f64::MIN_POSITIVE`, so `ln(0)` is a large finite
    /// negative number. No gradient flows through the floor.
    #[must_use]
    pub fn ln(&self) -> Tensor {
        self.map_with(
            |x| x.max(f64::MIN_POSITIVE).ln(),
            |x, _| if x > f64::MIN_POSITIVE { 1.0 / x } else { 0.0 },
        )
    }

    #[must_use]
    pub fn sigmoid(&self) -> Tensor {
        self.map_with(
            |x| {
                if x >= 0.0 {
                    1.0 / (1.0 + (-x).exp())
                } else {
                    let e = x.exp();
                    e / (1.0 + e)
                }
            },
            |_, y| y * (1.0 - y),
        )
    }

    /// `max(x, min)` that keeps NaN visible. Gradient passes where `x >= min`.
    #[must_use]
    pub fn clamp_min(&self, min: f64) -> Tensor {
        self.map_with(
            move |x| if x < min { min } else { x },
            move |x, _| if x >= min { 1.0 } else { 0.0 },
        )
    }

    /// Sum of all elements as a `[1, 1]` tensor.
    #[must_use]
    pub fn sum(&self) -> Tensor {
        let total: f64 = self.value.iter().sum();
        let backward = self.requires_grad.then(|| {
            let (parent, len) = (self.id, self.len());
            Box::new(move |grad: &[f64], store: &mut GradStore| {
                store.accumulate(parent, len, |parent_grad| {
                    for g in parent_grad.iter_mut() {
                        *g += grad[0];
                    }
                });
            }) as BackwardFn
        });
        self.tape.record(1, 1, Rc::from(vec![total]), backward)
    }

    /// Mean of all elements as a `[1, 1]` tensor.
    #[must_use]
    pub fn mean(&self) -> Tensor {
        let n = self.len().max(1) as f64;
        self.sum().scale(1.0 / n)
    }

    /// Column sums: `[rows, cols]` to `[1, cols]`.
    #[must_use]
    pub fn sum_rows(&self) -> Tensor {
        let (rows, cols) = self.shape();
        let mut value = vec![0.0; cols];
        for row in 0..rows {
            for col in 0..cols {
                value[col] += self.value[row * cols + col];
            }
        }
        let backward = self.requires_grad.then(|| {
            let parent = self.id;
            Box::new(move |grad: &[f64], store: &mut GradStore| {
                store.accumulate(parent, rows * cols, |parent_grad| {
                    for row in 0..rows {
                        for col in 0..cols {
                            parent_grad[row * cols + col] += grad[col];
                        }
                    }
                });
            }) as BackwardFn
        });
        self.tape.record(1, cols, value.into(), backward)
    }
}

#[cfg(test)]
mod tests {
    use crate::assert_almost_eq;
    use crate::error::SimError;
    use crate::tensor::Tape;

    #[test]
    fn broadcasting_scalar_and_row() {
        let tape = Tape::new();
        let m = tape.constant(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let row = tape.constant(1, 3, vec![10.0, 20.0, 30.0]).unwrap();
        let s = tape.scalar(2.0);

        let out = m.add(&row).unwrap().mul(&s).unwrap();
        assert_eq!(out.shape(), (2, 3));
        assert_eq!(out.values(), &[22.0, 44.0, 66.0, 28.0, 50.0, 72.0]);
    }

    #[test]
    fn incompatible_shapes_are_rejected() {
        let tape = Tape::new();
        let a = tape.zeros(2, 3);
        let b = tape.zeros(3, 2);
        assert!(matches!(a.add(&b), Err(SimError::ShapeMismatch(_))));
    }

    #[test]
    fn tapes_cannot_be_mixed() {
        let a = Tape::new().zeros(1, 1);
        let b = Tape::new().zeros(1, 1);
        assert!(matches!(a.add(&b), Err(SimError::SimError(_))));
    }

    #[test]
    fn gradient_of_broadcast_scalar_sums_over_elements() {
        let tape = Tape::new();
        let beta = tape.scalar_variable(3.0);
        let x = tape.constant(1, 4, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let loss = x.mul(&beta).unwrap().sum();
        let grads = loss.backward().unwrap();
        assert_almost_eq!(grads.scalar_wrt(&beta), 10.0, 1e-12);
        assert!(grads.wrt(&x).is_none());
    }

    #[test]
    fn product_rule_through_shared_input() {
        let tape = Tape::new();
        let x = tape.scalar_variable(3.0);
        // d/dx (x * x - x) = 2x - 1
        let y = x.mul(&x).unwrap().sub(&x).unwrap();
        let grads = y.backward().unwrap();
        assert_almost_eq!(grads.scalar_wrt(&x), 5.0, 1e-12);
    }

    #[test]
    fn exp_ln_sigmoid_derivatives() {
        let tape = Tape::new();
        let x = tape.scalar_variable(0.5);

        let grads = x.exp().backward().unwrap();
        assert_almost_eq!(grads.scalar_wrt(&x), 0.5_f64.exp(), 1e-12);

        let grads = x.ln().backward().unwrap();
        assert_almost_eq!(grads.scalar_wrt(&x), 2.0, 1e-12);

        let s = 1.0 / (1.0 + (-0.5_f64).exp());
        let grads = x.sigmoid().backward().unwrap();
        assert_almost_eq!(grads.scalar_wrt(&x), s * (1.0 - s), 1e-12);
    }

    #[test]
    fn ln_of_zero_is_finite_with_zero_gradient() {
        let tape = Tape::new();
        let x = tape.variable(1, 1, vec![0.0]).unwrap();
        let y = x.ln();
        assert!(y.values()[0].is_finite());
        assert!(y.values()[0] < -700.0);
        assert_eq!(y.backward().unwrap().scalar_wrt(&x), 0.0);
    }

    #[test]
    fn sigmoid_is_stable_for_large_inputs() {
        let tape = Tape::new();
        let x = tape.constant(1, 2, vec![-1000.0, 1000.0]).unwrap();
        assert_eq!(x.sigmoid().values(), &[0.0, 1.0]);
    }

    #[test]
    fn clamp_min_keeps_nan_and_blocks_gradient_below_floor() {
        let tape = Tape::new();
        let x = tape.variable(1, 3, vec![-0.5, 0.0, f64::NAN]).unwrap();
        let y = x.clamp_min(0.0);
        assert_eq!(y.values()[0], 0.0);
        assert_eq!(y.values()[1], 0.0);
        assert!(y.values()[2].is_nan());

        let tape = Tape::new();
        let x = tape.variable(1, 2, vec![-0.5, 0.25]).unwrap();
        let grads = x.clamp_min(0.0).sum().backward().unwrap();
        assert_eq!(grads.wrt(&x).unwrap(), &[0.0, 1.0]);
    }

    #[test]
    fn sum_rows_and_mean() {
        let tape = Tape::new();
        let x = tape.variable(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let col_sums = x.sum_rows();
        assert_eq!(col_sums.values(), &[4.0, 6.0]);
        assert_almost_eq!(x.mean().item().unwrap(), 2.5, 1e-12);

        let grads = col_sums.scale(2.0).sum().backward().unwrap();
        assert_eq!(grads.wrt(&x).unwrap(), &[2.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn backward_requires_scalar_output() {
        let tape = Tape::new();
        let x = tape.variable(1, 2, vec![1.0, 2.0]).unwrap();
        assert!(matches!(x.backward(), Err(SimError::ShapeMismatch(_))));
    }

    #[test]
    fn detach_cuts_the_gradient_path() {
        let tape = Tape::new();
        let x = tape.scalar_variable(2.0);
        let y = x.detach().mul(&x).unwrap();
        let grads = y.backward().unwrap();
        assert_almost_eq!(grads.scalar_wrt(&x), 2.0, 1e-12);
    }
}
