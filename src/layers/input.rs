use serde::{Deserialize, Serialize};

use crate::{dataset::DataSetProvider, Error, Result};

/// Linear rescaling applied to raw inputs before the first layer sees them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scaling {
    pub input_min: f64,
    pub input_max: f64,
    pub scale_min: f64,
    pub scale_max: f64,
}

impl Scaling {
    fn apply(&self, value: f64) -> f64 {
        (value - self.input_min) * (self.scale_max - self.scale_min)
            / (self.input_max - self.input_min)
            + self.scale_min
    }
}

/// Pass-through layer at the bottom of the stack. Holds no weights; only
/// copies (and optionally rescales) the raw input into its output buffer.
#[derive(Debug, Clone)]
pub struct InputLayer {
    num_nodes: usize,
    scaling: Option<Scaling>,
    outputs: Vec<f64>,
}

impl InputLayer {
    pub fn new(num_nodes: usize) -> Self {
        Self {
            num_nodes,
            scaling: None,
            outputs: vec![0.0; num_nodes],
        }
    }

    pub fn with_scaling(mut self, scaling: Scaling) -> Self {
        self.scaling = Some(scaling);
        self
    }

    /// Builds the input layer from a provider's declared size and scaling.
    pub fn from_provider<P: DataSetProvider + ?Sized>(provider: &P) -> Self {
        let layer = Self::new(provider.input_size());
        if provider.scale_input() {
            layer.with_scaling(Scaling {
                input_min: provider.input_min(),
                input_max: provider.input_max(),
                scale_min: provider.scale_min(),
                scale_max: provider.scale_max(),
            })
        } else {
            layer
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn outputs(&self) -> &[f64] {
        &self.outputs
    }

    pub(crate) fn scaling(&self) -> Option<Scaling> {
        self.scaling
    }

    pub fn evaluate(&mut self, input: &[f64]) -> Result<&[f64]> {
        if input.len() != self.num_nodes {
            return Err(Error::SizeMismatch {
                what: "input",
                got: input.len(),
                expected: self.num_nodes,
            });
        }

        match self.scaling {
            Some(scaling) => {
                for (out, &raw) in self.outputs.iter_mut().zip(input) {
                    *out = scaling.apply(raw);
                }
            }
            None => self.outputs.copy_from_slice(input),
        }

        Ok(&self.outputs)
    }
}
