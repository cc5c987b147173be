//! Backpropagation training engine for fixed stacks of dense and
//! convolutional layers.
//!
//! A [`NeuralNetwork`] is a linear stack: an input layer, hidden layers
//! (convolutional first, then dense), and an output layer. The
//! [`TrainingController`] drives it against a [`DataSetProvider`], with
//! optional mini-batching, an adaptive learning rate, and JSON
//! checkpointing through [`persistence`].

pub mod activation;
pub mod dataset;
pub mod error;
pub mod layers;
pub mod network;
pub mod optim;
pub mod persistence;
pub mod training;

mod test;

pub use activation::Activation;
pub use dataset::{DataSetProvider, Example, MemoryProvider};
pub use error::{Error, Result};
pub use layers::{
    Connectivity, ConvLayer, DenseLayer, FeatureMap, HiddenLayer, InputLayer, OutputLayer, Scaling,
};
pub use network::NeuralNetwork;
pub use optim::{BatchMode, LearningMethod, UpdatePolicy};
pub use training::{AdaptiveConfig, TrainingConfig, TrainingController};
