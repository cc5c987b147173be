use rand::Rng;

use super::core::LayerCore;
use crate::{
    activation::Activation,
    optim::{BatchMode, UpdatePolicy},
    Result,
};

/// The top of the stack. Softmax is evaluated here jointly with its error
/// term; every other activation goes through the generic dense path.
#[derive(Debug, Clone)]
pub struct OutputLayer {
    pub(crate) core: LayerCore,
}

impl OutputLayer {
    pub fn new(activation: Activation, num_nodes: usize) -> Self {
        Self {
            core: LayerCore::new(activation, num_nodes),
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.core.num_nodes()
    }

    pub fn outputs(&self) -> &[f64] {
        self.core.outputs()
    }

    pub fn activation(&self) -> Activation {
        self.core.activation
    }

    pub(crate) fn init(&mut self, prev_node_count: usize) {
        self.core.init(prev_node_count);
    }

    pub(crate) fn randomize_weights<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.core.randomize_weights(rng);
    }

    pub fn evaluate(&mut self, input: &[f64]) -> Result<&[f64]> {
        if self.core.activation != Activation::Softmax {
            return self.core.evaluate(input);
        }

        self.core.check_input(input)?;

        // Subtract the row max before exponentiating so large logits cannot
        // overflow exp().
        let mut logits = vec![0.0; self.core.num_nodes];
        let mut max = f64::NEG_INFINITY;
        for (i, logit) in logits.iter_mut().enumerate() {
            *logit = self.core.weighted_sum(i, input);
            max = max.max(*logit);
        }

        let mut exp_sum = 0.0;
        for (out, &logit) in self.core.outputs.iter_mut().zip(&logits) {
            *out = (logit - max).exp();
            exp_sum += *out;
        }
        for out in &mut self.core.outputs {
            *out /= exp_sum;
        }

        Ok(&self.core.outputs)
    }

    /// Computes output gradients and the reported scalar error, then feeds
    /// the shared weight-gradient accumulation. The update policy runs
    /// later, once every layer below has taken its chain rule through the
    /// still-unmodified weights.
    ///
    /// Softmax pairs with cross-entropy, collapsing `dE/dO` to
    /// `expected - actual`; the scalar is mean binary cross-entropy. Other
    /// activations report mean absolute error.
    pub(crate) fn backpropagate(
        &mut self,
        expected: &[f64],
        downstream_outputs: &[f64],
        mode: BatchMode,
    ) -> Result<f64> {
        if mode.resets_accumulators() {
            self.core.reset_weight_gradients();
        }

        let mut error = 0.0;

        if self.core.activation == Activation::Softmax {
            for i in 0..self.core.num_nodes {
                let actual = self.core.outputs[i];
                self.core.output_gradients[i] = expected[i] - actual;
                error -= expected[i] * actual.ln() + (1.0 - expected[i]) * (1.0 - actual).ln();
            }
        } else {
            for i in 0..self.core.num_nodes {
                let actual = self.core.outputs[i];
                self.core.output_gradients[i] =
                    (expected[i] - actual) * self.core.activation.derivative(actual)?;
                error += (expected[i] - actual).abs();
            }
        }
        error /= expected.len() as f64;

        self.core.accumulate_weight_gradients(downstream_outputs);

        Ok(error)
    }

    pub(crate) fn update_weights(&mut self, policy: &UpdatePolicy, mode: BatchMode) {
        self.core.update_weights(policy, mode);
    }
}
