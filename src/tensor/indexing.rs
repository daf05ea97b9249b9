//! Structural ops: row slicing and stacking, column gather/scatter along an index, the
//! column-wise softmax and the straight-through estimator.

use std::rc::Rc;

use crate::error::SimError;
use crate::tensor::{BackwardFn, GradStore, Tensor};

impl Tensor {
    /// Rows `start..end` as a `[end - start, cols]` tensor.
    pub fn slice_rows(&self, start: usize, end: usize) -> Result<Tensor, SimError> {
        if start >= end || end > self.rows {
            return Err(SimError::ShapeMismatch(format!(
                "row range {start}..{end} is invalid for shape {:?}",
                self.shape()
            )));
        }
        let cols = self.cols;
        let value: Rc<[f64]> = self.value[start * cols..end * cols].into();
        let backward = self.requires_grad.then(|| {
            let (parent, len) = (self.id, self.len());
            Box::new(move |grad: &[f64], store: &mut GradStore| {
                store.accumulate(parent, len, |parent_grad| {
                    let rows = &mut parent_grad[start * cols..end * cols];
                    for (g_parent, g) in rows.iter_mut().zip(grad) {
                        *g_parent += g;
                    }
                });
            }) as BackwardFn
        });
        Ok(self.tape.record(end - start, cols, value, backward))
    }

    pub fn row(&self, row: usize) -> Result<Tensor, SimError> {
        self.slice_rows(row, row + 1)
    }

    /// The element at `(row, col)` as a `[1, 1]` tensor.
    pub fn element(&self, row: usize, col: usize) -> Result<Tensor, SimError> {
        if row >= self.rows || col >= self.cols {
            return Err(SimError::ShapeMismatch(format!(
                "index ({row}, {col}) out of bounds for shape {:?}",
                self.shape()
            )));
        }
        let index = row * self.cols + col;
        let backward = self.requires_grad.then(|| {
            let (parent, len) = (self.id, self.len());
            Box::new(move |grad: &[f64], store: &mut GradStore| {
                store.accumulate(parent, len, |parent_grad| parent_grad[index] += grad[0]);
            }) as BackwardFn
        });
        Ok(self
            .tape
            .record(1, 1, Rc::from(vec![self.value[index]]), backward))
    }

    /// Concatenates tensors with equal column counts along the row axis.
    pub fn vstack(parts: &[Tensor]) -> Result<Tensor, SimError> {
        let Some(first) = parts.first() else {
            return Err(SimError::ShapeMismatch(
                "cannot stack an empty list of tensors".to_string(),
            ));
        };
        let cols = first.cols;
        for part in parts {
            first.check_same_tape(part)?;
            if part.cols != cols {
                return Err(SimError::ShapeMismatch(format!(
                    "cannot stack {:?} under {:?}",
                    part.shape(),
                    first.shape()
                )));
            }
        }
        let rows = parts.iter().map(|part| part.rows).sum();
        let value: Rc<[f64]> = parts
            .iter()
            .flat_map(|part| part.value.iter().copied())
            .collect();

        let sources: Vec<(usize, usize, usize)> = parts
            .iter()
            .scan(0, |offset, part| {
                let start = *offset;
                *offset += part.len();
                Some((part.requires_grad, part.id, start, part.len()))
            })
            .filter(|(requires_grad, ..)| *requires_grad)
            .map(|(_, id, start, len)| (id, start, len))
            .collect();
        let backward = (!sources.is_empty()).then(|| {
            Box::new(move |grad: &[f64], store: &mut GradStore| {
                for &(id, start, len) in &sources {
                    store.accumulate(id, len, |part_grad| {
                        for (g_part, g) in part_grad.iter_mut().zip(&grad[start..start + len]) {
                            *g_part += g;
                        }
                    });
                }
            }) as BackwardFn
        });
        Ok(first.tape.record(rows, cols, value, backward))
    }

    /// The same values viewed as `[rows, cols]`.
    pub fn reshape(&self, rows: usize, cols: usize) -> Result<Tensor, SimError> {
        if rows * cols != self.len() {
            return Err(SimError::ShapeMismatch(format!(
                "cannot view {:?} as [{rows}, {cols}]",
                self.shape()
            )));
        }
        let id = self.id;
        let len = self.len();
        let backward = self.requires_grad.then(|| {
            Box::new(move |grad: &[f64], store: &mut GradStore| {
                store.accumulate(id, len, |g_in| {
                    for (g_in, g) in g_in.iter_mut().zip(grad) {
                        *g_in += g;
                    }
                });
            }) as BackwardFn
        });
        Ok(self.tape.record(rows, cols, Rc::clone(&self.value), backward))
    }

    /// Softmax over the row axis, independently for every column. Max-subtracted for
    /// stability.
    #[must_use]
    pub fn softmax_rows(&self) -> Tensor {
        let (rows, cols) = self.shape();
        let mut value = vec![0.0; rows * cols];
        for col in 0..cols {
            let max = (0..rows)
                .map(|row| self.value[row * cols + col])
                .fold(f64::NEG_INFINITY, f64::max);
            let mut total = 0.0;
            for row in 0..rows {
                let e = (self.value[row * cols + col] - max).exp();
                value[row * cols + col] = e;
                total += e;
            }
            for row in 0..rows {
                value[row * cols + col] /= total;
            }
        }
        let value: Rc<[f64]> = value.into();
        let backward = self.requires_grad.then(|| {
            let parent = self.id;
            let y = value.clone();
            Box::new(move |grad: &[f64], store: &mut GradStore| {
                store.accumulate(parent, rows * cols, |parent_grad| {
                    for col in 0..cols {
                        let dot: f64 = (0..rows)
                            .map(|row| grad[row * cols + col] * y[row * cols + col])
                            .sum();
                        for row in 0..rows {
                            let i = row * cols + col;
                            parent_grad[i] += y[i] * (grad[i] - dot);
                        }
                    }
                });
            }) as BackwardFn
        });
        self.tape.record(rows, cols, value, backward)
    }

    /// Returns `hard` as the forward value while passing gradient straight through to `self`.
    pub fn straight_through(&self, hard: Vec<f64>) -> Result<Tensor, SimError> {
        if hard.len() != self.len() {
            return Err(SimError::ShapeMismatch(format!(
                "{} hard values for a {:?} tensor",
                hard.len(),
                self.shape()
            )));
        }
        let backward = self.requires_grad.then(|| {
            let (parent, len) = (self.id, self.len());
            Box::new(move |grad: &[f64], store: &mut GradStore| {
                store.accumulate(parent, len, |parent_grad| {
                    for (g_parent, g) in parent_grad.iter_mut().zip(grad) {
                        *g_parent += g;
                    }
                });
            }) as BackwardFn
        });
        Ok(self.tape.record(self.rows, self.cols, hard.into(), backward))
    }

    /// `out[r, k] = self[r, index[k]]`.
    pub fn gather_cols(&self, index: &Rc<[usize]>) -> Result<Tensor, SimError> {
        if let Some(bad) = index.iter().find(|&&col| col >= self.cols) {
            return Err(SimError::ShapeMismatch(format!(
                "gather index {bad} out of range for {} columns",
                self.cols
            )));
        }
        let (rows, cols) = self.shape();
        let out_cols = index.len();
        let mut value = Vec::with_capacity(rows * out_cols);
        for row in 0..rows {
            value.extend(index.iter().map(|&col| self.value[row * cols + col]));
        }
        let backward = self.requires_grad.then(|| {
            let parent = self.id;
            let index = Rc::clone(index);
            Box::new(move |grad: &[f64], store: &mut GradStore| {
                store.accumulate(parent, rows * cols, |parent_grad| {
                    for row in 0..rows {
                        for (k, &col) in index.iter().enumerate() {
                            parent_grad[row * cols + col] += grad[row * out_cols + k];
                        }
                    }
                });
            }) as BackwardFn
        });
        Ok(self.tape.record(rows, out_cols, value.into(), backward))
    }

    /// `out[r, index[k]] += self[r, k]` into a `[rows, out_cols]` tensor of zeros.
    pub fn scatter_add_cols(
        &self,
        index: &Rc<[usize]>,
        out_cols: usize,
    ) -> Result<Tensor, SimError> {
        if index.len() != self.cols {
            return Err(SimError::ShapeMismatch(format!(
                "scatter index has {} entries for {} columns",
                index.len(),
                self.cols
            )));
        }
        if let Some(bad) = index.iter().find(|&&col| col >= out_cols) {
            return Err(SimError::ShapeMismatch(format!(
                "scatter index {bad} out of range for {out_cols} columns"
            )));
        }
        let (rows, cols) = self.shape();
        let mut value = vec![0.0; rows * out_cols];
        for row in 0..rows {
            for (k, &col) in index.iter().enumerate() {
                value[row * out_cols + col] += self.value[row * cols + k];
            }
        }
        let backward = self.requires_grad.then(|| {
            let parent = self.id;
            let index = Rc::clone(index);
            Box::new(move |grad: &[f64], store: &mut GradStore| {
                store.accumulate(parent, rows * cols, |parent_grad| {
                    for row in 0..rows {
                        for (k, &col) in index.iter().enumerate() {
                            parent_grad[row * cols + k] += grad[row * out_cols + col];
                        }
                    }
                });
            }) as BackwardFn
        });
        Ok(self.tape.record(rows, out_cols, value.into(), backward))
    }
}
