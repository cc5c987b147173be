use rand::Rng;

use super::{core::LayerCore, Upstream};
use crate::{activation::Activation, optim::BatchMode, Error, Result};

/// A fully-connected hidden layer.
#[derive(Debug, Clone)]
pub struct DenseLayer {
    pub(crate) core: LayerCore,
}

impl DenseLayer {
    pub fn new(activation: Activation, num_nodes: usize) -> Self {
        Self {
            core: LayerCore::new(activation, num_nodes),
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.core.num_nodes()
    }

    pub fn activation(&self) -> Activation {
        self.core.activation
    }

    pub fn outputs(&self) -> &[f64] {
        self.core.outputs()
    }

    pub(crate) fn init(&mut self, prev_node_count: usize) {
        self.core.init(prev_node_count);
    }

    pub fn evaluate(&mut self, input: &[f64]) -> Result<&[f64]> {
        self.core.evaluate(input)
    }

    pub(crate) fn randomize_weights<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.core.randomize_weights(rng);
    }

    /// Chain rule through the upstream neighbor, then gradient accumulation
    /// against the downstream outputs. Weights are untouched here; the
    /// network applies the update policy once the whole backward walk is
    /// done.
    pub(crate) fn backpropagate(
        &mut self,
        upstream: Upstream<'_>,
        downstream_outputs: &[f64],
        mode: BatchMode,
    ) -> Result<()> {
        let up = match upstream {
            Upstream::Dense(core) => core,
            Upstream::Conv(_) => {
                return Err(Error::Config(
                    "a dense hidden layer cannot sit below a convolutional layer",
                ))
            }
        };

        if mode.resets_accumulators() {
            self.core.reset_weight_gradients();
        }

        self.core.chain_rule_output_gradients(up)?;
        self.core.accumulate_weight_gradients(downstream_outputs);

        Ok(())
    }
}
