//! Layer types making up a network stack: a pass-through input layer,
//! dense and convolutional hidden layers, and an output layer that owns
//! the error term.

pub(crate) mod core;
mod conv;
mod dense;
mod feature_map;
mod input;
mod output;

pub use conv::{Connectivity, ConvLayer};
pub use dense::DenseLayer;
pub use feature_map::FeatureMap;
pub use input::{InputLayer, Scaling};
pub use output::OutputLayer;

use rand::Rng;

use crate::{
    optim::{BatchMode, UpdatePolicy},
    Result,
};

/// Read-only view of the neighbor one step closer to the output, handed to
/// a layer so it can chain-rule its own output gradients.
#[derive(Clone, Copy)]
pub(crate) enum Upstream<'a> {
    Dense(&'a self::core::LayerCore),
    Conv(&'a ConvLayer),
}

/// A hidden layer in the stack. The two shapes share the same training
/// protocol but differ in how gradients flow through them, so dispatch
/// happens here rather than behind a trait object.
#[derive(Debug, Clone)]
pub enum HiddenLayer {
    Dense(DenseLayer),
    Conv(ConvLayer),
}

impl HiddenLayer {
    pub fn num_nodes(&self) -> usize {
        match self {
            Self::Dense(layer) => layer.num_nodes(),
            Self::Conv(layer) => layer.num_nodes(),
        }
    }

    /// Channel count seen by the layer above; dense layers present a single
    /// channel.
    pub fn num_feature_maps(&self) -> usize {
        match self {
            Self::Dense(_) => 1,
            Self::Conv(layer) => layer.num_feature_maps(),
        }
    }

    pub fn outputs(&self) -> &[f64] {
        match self {
            Self::Dense(layer) => layer.outputs(),
            Self::Conv(layer) => layer.outputs(),
        }
    }

    pub(crate) fn output_gradients(&self) -> &[f64] {
        match self {
            Self::Dense(layer) => &layer.core.output_gradients,
            Self::Conv(layer) => &layer.output_gradients,
        }
    }

    pub(crate) fn resolve_connectivity<R: Rng + ?Sized>(
        &mut self,
        num_prev_feature_maps: usize,
        rng: &mut R,
    ) {
        if let Self::Conv(layer) = self {
            layer.resolve_connectivity(num_prev_feature_maps, rng);
        }
    }

    pub(crate) fn init(&mut self, prev_nodes: usize, num_prev_feature_maps: usize) -> Result<()> {
        match self {
            Self::Dense(layer) => {
                layer.init(prev_nodes);
                Ok(())
            }
            Self::Conv(layer) => layer.init_feature_maps(prev_nodes, num_prev_feature_maps),
        }
    }

    pub(crate) fn randomize_weights<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        match self {
            Self::Dense(layer) => layer.randomize_weights(rng),
            Self::Conv(layer) => layer.randomize_weights(rng),
        }
    }

    pub fn evaluate(&mut self, input: &[f64]) -> Result<&[f64]> {
        match self {
            Self::Dense(layer) => layer.evaluate(input),
            Self::Conv(layer) => layer.evaluate(input),
        }
    }

    pub(crate) fn backpropagate(
        &mut self,
        upstream: Upstream<'_>,
        downstream_outputs: &[f64],
        mode: BatchMode,
    ) -> Result<()> {
        match self {
            Self::Dense(layer) => layer.backpropagate(upstream, downstream_outputs, mode),
            Self::Conv(layer) => layer.backpropagate(upstream, downstream_outputs, mode),
        }
    }

    pub(crate) fn update_weights(&mut self, policy: &UpdatePolicy, mode: BatchMode) {
        match self {
            Self::Dense(layer) => layer.core.update_weights(policy, mode),
            Self::Conv(layer) => layer.update_weights(policy, mode),
        }
    }

    pub(crate) fn as_upstream(&self) -> Upstream<'_> {
        match self {
            Self::Dense(layer) => Upstream::Dense(&layer.core),
            Self::Conv(layer) => Upstream::Conv(layer),
        }
    }
}

impl From<DenseLayer> for HiddenLayer {
    fn from(layer: DenseLayer) -> Self {
        Self::Dense(layer)
    }
}

impl From<ConvLayer> for HiddenLayer {
    fn from(layer: ConvLayer) -> Self {
        Self::Conv(layer)
    }
}
