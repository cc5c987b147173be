use log::debug;
use rand::Rng;

use crate::{
    activation::Activation,
    dataset::Example,
    layers::{HiddenLayer, InputLayer, OutputLayer, Upstream},
    optim::{BatchMode, UpdatePolicy},
    Error, Result,
};

/// A fixed stack of layers trained by backpropagation: one input layer,
/// any number of hidden layers (convolutional layers first, then dense),
/// and one output layer.
///
/// The stack is wired at construction; layer sizes and connectivity never
/// change afterwards.
#[derive(Debug, Clone)]
pub struct NeuralNetwork {
    name: String,
    input: InputLayer,
    hidden: Vec<HiddenLayer>,
    output: OutputLayer,
    policy: UpdatePolicy,
}

fn validate_topology(hidden: &[HiddenLayer]) -> Result<()> {
    let mut seen_dense = false;
    for layer in hidden {
        match layer {
            HiddenLayer::Dense(dense) => {
                if dense.activation() == Activation::Softmax {
                    return Err(Error::Config(
                        "softmax is only available on the output layer",
                    ));
                }
                seen_dense = true;
            }
            HiddenLayer::Conv(conv) => {
                if conv.activation() == Activation::Softmax {
                    return Err(Error::Config(
                        "softmax is only available on the output layer",
                    ));
                }
                if seen_dense {
                    return Err(Error::Config(
                        "convolutional layers must come before dense layers",
                    ));
                }
            }
        }
    }
    Ok(())
}

impl NeuralNetwork {
    /// Wires the stack together and randomizes every weight.
    ///
    /// Random connectivity is drawn from `rng` here, before the feature-map
    /// geometry is fixed.
    ///
    /// # Errors
    ///
    /// Rejects stacks with a convolutional layer above a dense one, hidden
    /// softmax activations, and convolutional geometry that does not divide
    /// the previous layer's nodes into square channels.
    pub fn new<R: Rng + ?Sized>(
        name: impl Into<String>,
        input: InputLayer,
        hidden: Vec<HiddenLayer>,
        output: OutputLayer,
        policy: UpdatePolicy,
        rng: &mut R,
    ) -> Result<Self> {
        let mut network = Self::assemble_with(name, input, hidden, output, policy, Some(&mut *rng))?;
        network.randomize_weights(rng);
        Ok(network)
    }

    /// Wires a stack whose weights will be loaded rather than drawn. Random
    /// connectivity must already be resolved to an explicit map.
    pub(crate) fn assemble(
        name: impl Into<String>,
        input: InputLayer,
        hidden: Vec<HiddenLayer>,
        output: OutputLayer,
        policy: UpdatePolicy,
    ) -> Result<Self> {
        Self::assemble_with::<rand::rngs::StdRng>(name, input, hidden, output, policy, None)
    }

    fn assemble_with<R: Rng + ?Sized>(
        name: impl Into<String>,
        input: InputLayer,
        mut hidden: Vec<HiddenLayer>,
        mut output: OutputLayer,
        policy: UpdatePolicy,
        mut rng: Option<&mut R>,
    ) -> Result<Self> {
        validate_topology(&hidden)?;

        let mut prev_nodes = input.num_nodes();
        let mut prev_feature_maps = 1;
        for layer in &mut hidden {
            if let Some(rng) = rng.as_deref_mut() {
                layer.resolve_connectivity(prev_feature_maps, rng);
            }
            layer.init(prev_nodes, prev_feature_maps)?;
            prev_nodes = layer.num_nodes();
            prev_feature_maps = layer.num_feature_maps();
        }
        output.init(prev_nodes);

        let name = name.into();
        debug!(
            "network {}: {} inputs, {} hidden layers, {} outputs",
            name,
            input.num_nodes(),
            hidden.len(),
            output.num_nodes()
        );

        Ok(Self {
            name,
            input,
            hidden,
            output,
            policy,
        })
    }

    /// Re-draws every trainable weight, fan-in scaled. Deterministic under a
    /// seeded RNG.
    pub fn randomize_weights<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for layer in &mut self.hidden {
            layer.randomize_weights(rng);
        }
        self.output.randomize_weights(rng);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> UpdatePolicy {
        self.policy
    }

    pub fn learning_rate(&self) -> f64 {
        self.policy.learning_rate
    }

    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        self.policy.learning_rate = learning_rate;
    }

    pub fn input_layer(&self) -> &InputLayer {
        &self.input
    }

    pub fn hidden_layers(&self) -> &[HiddenLayer] {
        &self.hidden
    }

    pub fn output_layer(&self) -> &OutputLayer {
        &self.output
    }

    pub(crate) fn hidden_layers_mut(&mut self) -> &mut [HiddenLayer] {
        &mut self.hidden
    }

    pub(crate) fn output_layer_mut(&mut self) -> &mut OutputLayer {
        &mut self.output
    }

    /// Forward pass: scaled input, then each layer fed the outputs of the
    /// layer below it. Returns the output layer's activations.
    pub fn evaluate(&mut self, input: &[f64]) -> Result<&[f64]> {
        self.input.evaluate(input)?;

        for i in 0..self.hidden.len() {
            let (done, rest) = self.hidden.split_at_mut(i);
            let below: &[f64] = match done.last() {
                Some(layer) => layer.outputs(),
                None => self.input.outputs(),
            };
            rest[0].evaluate(below)?;
        }

        let below: &[f64] = match self.hidden.last() {
            Some(layer) => layer.outputs(),
            None => self.input.outputs(),
        };
        self.output.evaluate(below)
    }

    /// One training step: forward pass, a full backward walk from the
    /// output layer down, then one weight-update pass according to `mode`.
    /// Returns the example's scalar error.
    ///
    /// The update pass runs only after every layer has accumulated its
    /// gradients, so each chain rule reads the upstream weights the forward
    /// pass used. This also keeps a `Compute` step's batch delta equal to
    /// the sum of the per-example gradient deltas.
    ///
    /// # Errors
    ///
    /// Fails fast with [`Error::NumericInstability`] when the error or any
    /// gradient stops being finite, so a diverging run cannot silently
    /// poison the weights for thousands of iterations.
    pub fn train(&mut self, example: &Example, mode: BatchMode) -> Result<f64> {
        self.evaluate(&example.input)?;

        let below: &[f64] = match self.hidden.last() {
            Some(layer) => layer.outputs(),
            None => self.input.outputs(),
        };
        let error = self.output.backpropagate(&example.expected, below, mode)?;

        for i in (0..self.hidden.len()).rev() {
            let (below_layers, rest) = self.hidden.split_at_mut(i);
            let (current, above_layers) = rest.split_at_mut(1);

            let upstream = match above_layers.first() {
                Some(layer) => layer.as_upstream(),
                None => Upstream::Dense(&self.output.core),
            };
            let below: &[f64] = match below_layers.last() {
                Some(layer) => layer.outputs(),
                None => self.input.outputs(),
            };

            current[0].backpropagate(upstream, below, mode)?;
        }

        self.check_finite(error)?;

        let policy = self.policy;
        self.output.update_weights(&policy, mode);
        for layer in &mut self.hidden {
            layer.update_weights(&policy, mode);
        }

        Ok(error)
    }

    fn check_finite(&self, error: f64) -> Result<()> {
        if !error.is_finite() {
            return Err(Error::NumericInstability {
                context: "output error",
            });
        }
        for layer in &self.hidden {
            if layer.output_gradients().iter().any(|g| !g.is_finite()) {
                return Err(Error::NumericInstability {
                    context: "hidden layer gradients",
                });
            }
        }
        Ok(())
    }
}
