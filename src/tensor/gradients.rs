use crate::tensor::Tensor;

/// Gradient buffers indexed by tape node id, filled during a backward sweep.
pub(crate) struct GradStore {
    grads: Vec<Option<Vec<f64>>>,
}

impl GradStore {
    pub(crate) fn new(n_nodes: usize) -> GradStore {
        GradStore {
            grads: vec![None; n_nodes],
        }
    }

    /// Adds into the gradient of node `id` (length `len`) through `update`.
    pub(crate) fn accumulate(&mut self, id: usize, len: usize, update: impl FnOnce(&mut [f64])) {
        let grad = self.grads[id].get_or_insert_with(|| vec![0.0; len]);
        update(grad);
    }

    pub(crate) fn take(&mut self, id: usize) -> Option<Vec<f64>> {
        self.grads[id].take()
    }

    pub(crate) fn restore(&mut self, id: usize, grad: Vec<f64>) {
        self.grads[id] = Some(grad);
    }

    pub(crate) fn into_gradients(self) -> Gradients {
        Gradients { grads: self.grads }
    }
}

/// Result of `Tensor::backward`.
pub struct Gradients {
    grads: Vec<Option<Vec<f64>>>,
}

impl Gradients {
    /// Gradient of the differentiated output with respect to `tensor`, laid out like its
    /// values. `None` when no path connects the two.
    #[must_use]
    pub fn wrt(&self, tensor: &Tensor) -> Option<&[f64]> {
        self.grads
            .get(tensor.id)
            .and_then(Option::as_deref)
            .filter(|grad| grad.len() == tensor.len())
    }

    /// Gradient with respect to a `[1, 1]` tensor, treating a missing path as zero.
    #[must_use]
    pub fn scalar_wrt(&self, tensor: &Tensor) -> f64 {
        self.wrt(tensor).map_or(0.0, |grad| grad[0])
    }
}
