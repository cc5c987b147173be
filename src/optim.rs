use serde::{Deserialize, Serialize};

/// Gradient-descent flavor used when applying accumulated weight gradients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LearningMethod {
    /// Plain stochastic gradient descent with a momentum term.
    Sgd,
    /// RMSProp: gradients normalized by a running mean of their squares.
    RmsProp,
}

/// Accumulation phase of a mini-batch, passed explicitly into every
/// backpropagation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// No batching: reset accumulators, accumulate, and apply every call.
    Off,
    /// First example of a batch: reset accumulators, do not apply.
    First,
    /// Middle of a batch: accumulate, do not apply.
    Accumulate,
    /// Last example of a batch: accumulate, then apply once for the batch.
    Compute,
}

impl BatchMode {
    /// Whether gradient accumulators are cleared before this call.
    pub fn resets_accumulators(self) -> bool {
        matches!(self, BatchMode::Off | BatchMode::First)
    }

    /// Whether accumulated gradients are applied to the weights on this call.
    pub fn applies(self) -> bool {
        matches!(self, BatchMode::Off | BatchMode::Compute)
    }
}

/// The weight-update policy shared by every trainable layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UpdatePolicy {
    pub method: LearningMethod,
    pub learning_rate: f64,
    pub momentum: f64,
    pub weight_decay: f64,
}

impl UpdatePolicy {
    /// Applies accumulated gradients to `weights` elementwise, honoring the
    /// batch phase. `prev_grads` is refreshed on every call, applied or not,
    /// so the next momentum term always sees the latest gradients.
    ///
    /// All four slices must have the same length; callers guarantee this by
    /// allocating them together in layer `init`.
    pub fn apply(
        &self,
        mode: BatchMode,
        weights: &mut [f64],
        grads: &mut [f64],
        prev_grads: &mut [f64],
        mean_squares: &mut [f64],
    ) {
        let lr = self.learning_rate;

        for idx in 0..weights.len() {
            if mode.applies() {
                if self.weight_decay != 0.0 {
                    grads[idx] -= self.weight_decay * lr * weights[idx];
                }

                match self.method {
                    LearningMethod::RmsProp => {
                        mean_squares[idx] = 0.9 * mean_squares[idx] + 0.1 * grads[idx].powi(2);
                        grads[idx] /= (mean_squares[idx] + 1e-8).sqrt();
                    }
                    LearningMethod::Sgd => {
                        // Momentum is taken before the gradient step.
                        weights[idx] += lr * self.momentum * prev_grads[idx];
                    }
                }

                weights[idx] += lr * grads[idx];
            }

            prev_grads[idx] = grads[idx];
        }
    }
}
