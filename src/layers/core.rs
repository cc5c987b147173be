use rand::Rng;

use crate::{
    activation::Activation,
    optim::{BatchMode, UpdatePolicy},
    Error, Result,
};

/// State shared by every node-major layer (dense hidden and output).
///
/// Weights are flat and node-major; index 0 of each node's block is the
/// bias, so `num_weights_per_node == previous_layer.num_nodes + 1`.
#[derive(Debug, Clone)]
pub struct LayerCore {
    pub(crate) activation: Activation,
    pub(crate) num_nodes: usize,
    pub(crate) num_weights_per_node: usize,
    pub(crate) weights: Vec<f64>,
    pub(crate) outputs: Vec<f64>,
    pub(crate) output_gradients: Vec<f64>,
    pub(crate) weight_gradients: Vec<f64>,
    pub(crate) prev_weight_gradients: Vec<f64>,
    pub(crate) weight_gradient_mean_squares: Vec<f64>,
}

impl LayerCore {
    pub fn new(activation: Activation, num_nodes: usize) -> Self {
        Self {
            activation,
            num_nodes,
            num_weights_per_node: 0,
            weights: Vec::new(),
            outputs: vec![0.0; num_nodes],
            output_gradients: vec![0.0; num_nodes],
            weight_gradients: Vec::new(),
            prev_weight_gradients: Vec::new(),
            weight_gradient_mean_squares: Vec::new(),
        }
    }

    /// Allocates weight and gradient buffers for `prev_node_count` incoming
    /// connections per node (plus bias). Mean squares are seeded to 1 so the
    /// first RMSProp step starts from a neutral normalizer.
    pub fn init(&mut self, prev_node_count: usize) {
        self.num_weights_per_node = prev_node_count + 1;
        let len = self.num_nodes * self.num_weights_per_node;
        self.weights = vec![0.0; len];
        self.weight_gradients = vec![0.0; len];
        self.prev_weight_gradients = vec![0.0; len];
        self.weight_gradient_mean_squares = vec![1.0; len];
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn outputs(&self) -> &[f64] {
        &self.outputs
    }

    /// Raw weighted sum for one node: bias plus the dot product with `input`.
    pub(crate) fn weighted_sum(&self, node: usize, input: &[f64]) -> f64 {
        let base = node * self.num_weights_per_node;
        let mut sum = self.weights[base];
        for (j, x) in input.iter().enumerate() {
            sum += self.weights[base + 1 + j] * x;
        }
        sum
    }

    /// Forward evaluation: activated weighted sum per node.
    ///
    /// # Errors
    /// `Error::SizeMismatch` if `input` does not match the layer's fan-in.
    pub fn evaluate(&mut self, input: &[f64]) -> Result<&[f64]> {
        self.check_input(input)?;

        for i in 0..self.num_nodes {
            let sum = self.weighted_sum(i, input);
            self.outputs[i] = self.activation.forward(sum)?;
        }

        Ok(&self.outputs)
    }

    pub(crate) fn check_input(&self, input: &[f64]) -> Result<()> {
        if input.len() != self.num_weights_per_node - 1 {
            return Err(Error::SizeMismatch {
                what: "input",
                got: input.len(),
                expected: self.num_weights_per_node - 1,
            });
        }
        Ok(())
    }

    /// Fan-in-scaled uniform initialization in `[-1/sqrt(fan_in), 1/sqrt(fan_in)]`.
    pub fn randomize_weights<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let fan_in = self.num_weights_per_node as f64;
        let scale = 1.0 / fan_in.sqrt();
        for w in &mut self.weights {
            *w = rng.random_range(-1.0..1.0) * scale;
        }
    }

    pub(crate) fn reset_weight_gradients(&mut self) {
        for g in &mut self.weight_gradients {
            *g = 0.0;
        }
    }

    /// Chain rule through the layer one step toward the output:
    /// `og[j] = f'(out[j]) * sum_k up.og[k] * up.weights[k][j]`.
    pub(crate) fn chain_rule_output_gradients(&mut self, upstream: &LayerCore) -> Result<()> {
        for j in 0..self.num_nodes {
            let mut sum = 0.0;
            for (k, up_grad) in upstream.output_gradients.iter().enumerate() {
                sum += up_grad * upstream.weights[k * upstream.num_weights_per_node + j];
            }
            self.output_gradients[j] = self.activation.derivative(self.outputs[j])? * sum;
        }
        Ok(())
    }

    /// Accumulates `dE/dW(i->j) = og[j] * downstream_output[i]` (1 for the
    /// bias position) into the weight-gradient buffer.
    pub(crate) fn accumulate_weight_gradients(&mut self, downstream_outputs: &[f64]) {
        for node in 0..self.num_nodes {
            let base = node * self.num_weights_per_node;
            let grad = self.output_gradients[node];
            self.weight_gradients[base] += grad;
            for (i, out) in downstream_outputs.iter().enumerate() {
                self.weight_gradients[base + 1 + i] += grad * out;
            }
        }
    }

    pub(crate) fn update_weights(&mut self, policy: &UpdatePolicy, mode: BatchMode) {
        policy.apply(
            mode,
            &mut self.weights,
            &mut self.weight_gradients,
            &mut self.prev_weight_gradients,
            &mut self.weight_gradient_mean_squares,
        );
    }

    /// Replaces the weight array wholesale, e.g. when restoring a checkpoint.
    pub(crate) fn load_weights(&mut self, weights: &[f64]) -> Result<()> {
        if weights.len() != self.weights.len() {
            return Err(Error::SizeMismatch {
                what: "layer weights",
                got: weights.len(),
                expected: self.weights.len(),
            });
        }
        self.weights.copy_from_slice(weights);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn init_sizes_buffers_and_seeds_mean_squares() {
        let mut core = LayerCore::new(Activation::Sigmoid, 3);
        core.init(4);
        assert_eq!(core.num_weights_per_node, 5);
        assert_eq!(core.weights.len(), 15);
        assert!(core.weight_gradient_mean_squares.iter().all(|&m| m == 1.0));
    }

    #[test]
    fn evaluate_rejects_wrong_input_width() {
        let mut core = LayerCore::new(Activation::Sigmoid, 2);
        core.init(3);
        assert!(matches!(
            core.evaluate(&[0.0, 0.0]),
            Err(Error::SizeMismatch { expected: 3, .. })
        ));
    }

    #[test]
    fn evaluate_applies_bias_and_activation() {
        let mut core = LayerCore::new(Activation::Sigmoid, 1);
        core.init(2);
        core.weights.copy_from_slice(&[0.5, 1.0, -1.0]);

        let out = core.evaluate(&[1.0, 2.0]).unwrap();
        let expected = 1.0 / (1.0 + (-(0.5 + 1.0 - 2.0) as f64).exp());
        assert!((out[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn randomized_weights_stay_within_fan_in_bound() {
        let mut core = LayerCore::new(Activation::Tanh, 8);
        core.init(15);
        let mut rng = StdRng::seed_from_u64(7);
        core.randomize_weights(&mut rng);

        let bound = 1.0 / (16.0f64).sqrt();
        assert!(core.weights.iter().all(|w| w.abs() <= bound));
        assert!(core.weights.iter().any(|&w| w != 0.0));
    }
}
