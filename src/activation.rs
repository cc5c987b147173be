use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Activation function attached to a layer.
///
/// Pointwise accessors follow the engine-wide convention that the derivative
/// is taken on the layer *output*, not the raw weighted sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    Sigmoid,
    Tanh,
    /// Softmax has no pointwise form; the output layer computes it jointly
    /// with its error term.
    Softmax,
}

impl Activation {
    /// Applies the activation to a raw weighted sum.
    ///
    /// # Errors
    /// `Error::Config` for `Softmax`, which cannot be applied pointwise.
    pub fn forward(&self, x: f64) -> Result<f64> {
        match self {
            Activation::Sigmoid => Ok(1.0 / (1.0 + (-x).exp())),
            Activation::Tanh => Ok(x.tanh()),
            Activation::Softmax => Err(Error::Config(
                "softmax has no pointwise function; it is evaluated by the output layer",
            )),
        }
    }

    /// Derivative of the activation, evaluated at the activated output `y`.
    ///
    /// # Errors
    /// `Error::Config` for `Softmax`.
    pub fn derivative(&self, y: f64) -> Result<f64> {
        match self {
            Activation::Sigmoid => Ok(y * (1.0 - y)),
            Activation::Tanh => Ok((1.0 + y) * (1.0 - y)),
            Activation::Softmax => Err(Error::Config(
                "softmax has no pointwise derivative; it is evaluated by the output layer",
            )),
        }
    }
}
