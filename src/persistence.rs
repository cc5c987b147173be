//! Checkpointing: a network's full topology and weights serialize to a
//! JSON document named after the network, so a training run can resume or
//! roll back to its best-seen state.

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    activation::Activation,
    layers::{Connectivity, ConvLayer, DenseLayer, HiddenLayer, InputLayer, OutputLayer, Scaling},
    network::NeuralNetwork,
    optim::UpdatePolicy,
    Error, Result,
};

#[derive(Debug, Serialize, Deserialize)]
struct Checkpoint {
    name: String,
    policy: UpdatePolicy,
    input: InputSpec,
    hidden: Vec<HiddenSpec>,
    output: OutputSpec,
}

#[derive(Debug, Serialize, Deserialize)]
struct InputSpec {
    num_nodes: usize,
    scaling: Option<Scaling>,
}

#[derive(Debug, Serialize, Deserialize)]
enum HiddenSpec {
    Dense {
        activation: Activation,
        num_nodes: usize,
        weights: Vec<f64>,
    },
    Conv {
        activation: Activation,
        kernel_width: usize,
        step_size: usize,
        num_feature_maps: usize,
        connectivity: Connectivity,
        feature_maps: Vec<FeatureMapWeights>,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct FeatureMapWeights {
    kernel_weights: Vec<f64>,
    bias: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct OutputSpec {
    activation: Activation,
    num_nodes: usize,
    weights: Vec<f64>,
}

/// Path a network with this name saves to under `dir`.
pub fn checkpoint_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.json"))
}

pub fn checkpoint_exists(dir: &Path, name: &str) -> bool {
    checkpoint_path(dir, name).is_file()
}

/// Writes the network to `<dir>/<name>.json`, creating `dir` if needed.
pub fn save(network: &NeuralNetwork, dir: &Path) -> Result<PathBuf> {
    let checkpoint = snapshot(network);
    let path = checkpoint_path(dir, network.name());

    fs::create_dir_all(dir)?;
    let json = serde_json::to_string(&checkpoint)?;
    fs::write(&path, json)?;

    info!("saved checkpoint {}", path.display());
    Ok(path)
}

/// Reads `<dir>/<name>.json` back into a trainable network.
///
/// # Errors
///
/// [`Error::CheckpointNotFound`] when no file exists for the name, and
/// [`Error::CheckpointCorrupt`] when the file does not decode or its
/// weights do not fit the recorded topology.
pub fn load(dir: &Path, name: &str) -> Result<NeuralNetwork> {
    let path = checkpoint_path(dir, name);
    let json = match fs::read_to_string(&path) {
        Ok(json) => json,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::CheckpointNotFound { path })
        }
        Err(err) => return Err(err.into()),
    };

    let checkpoint: Checkpoint = serde_json::from_str(&json)?;
    let network = restore(checkpoint)?;
    info!("loaded checkpoint {}", path.display());
    Ok(network)
}

fn snapshot(network: &NeuralNetwork) -> Checkpoint {
    let input = network.input_layer();
    let hidden = network
        .hidden_layers()
        .iter()
        .map(|layer| match layer {
            HiddenLayer::Dense(dense) => HiddenSpec::Dense {
                activation: dense.activation(),
                num_nodes: dense.num_nodes(),
                weights: dense.core.weights.clone(),
            },
            HiddenLayer::Conv(conv) => HiddenSpec::Conv {
                activation: conv.activation(),
                kernel_width: conv.kernel_width(),
                step_size: conv.step_size(),
                num_feature_maps: conv.num_feature_maps(),
                connectivity: conv.connectivity().clone(),
                feature_maps: conv
                    .feature_maps()
                    .iter()
                    .map(|fm| FeatureMapWeights {
                        kernel_weights: fm.kernel_weights().to_vec(),
                        bias: fm.bias(),
                    })
                    .collect(),
            },
        })
        .collect();

    Checkpoint {
        name: network.name().to_string(),
        policy: network.policy(),
        input: InputSpec {
            num_nodes: input.num_nodes(),
            scaling: input.scaling(),
        },
        hidden,
        output: OutputSpec {
            activation: network.output_layer().activation(),
            num_nodes: network.output_layer().num_nodes(),
            weights: network.output_layer().core.weights.clone(),
        },
    }
}

fn restore(checkpoint: Checkpoint) -> Result<NeuralNetwork> {
    let mut input = InputLayer::new(checkpoint.input.num_nodes);
    if let Some(scaling) = checkpoint.input.scaling {
        input = input.with_scaling(scaling);
    }

    let hidden: Vec<HiddenLayer> = checkpoint
        .hidden
        .iter()
        .map(|spec| match spec {
            HiddenSpec::Dense {
                activation,
                num_nodes,
                ..
            } => DenseLayer::new(*activation, *num_nodes).into(),
            HiddenSpec::Conv {
                activation,
                kernel_width,
                step_size,
                num_feature_maps,
                connectivity,
                ..
            } => ConvLayer::new(*activation, *kernel_width, *num_feature_maps, *step_size)
                .with_connectivity(connectivity.clone())
                .into(),
        })
        .collect();

    let output = OutputLayer::new(checkpoint.output.activation, checkpoint.output.num_nodes);

    let mut network = NeuralNetwork::assemble(
        checkpoint.name,
        input,
        hidden,
        output,
        checkpoint.policy,
    )
    .map_err(|err| Error::CheckpointCorrupt {
        reason: err.to_string(),
    })?;

    let corrupt = |err: Error| Error::CheckpointCorrupt {
        reason: err.to_string(),
    };

    for (layer, spec) in network
        .hidden_layers_mut()
        .iter_mut()
        .zip(&checkpoint.hidden)
    {
        match (layer, spec) {
            (HiddenLayer::Dense(dense), HiddenSpec::Dense { weights, .. }) => {
                dense.core.load_weights(weights).map_err(corrupt)?;
            }
            (HiddenLayer::Conv(conv), HiddenSpec::Conv { feature_maps, .. }) => {
                if feature_maps.len() != conv.feature_maps().len() {
                    return Err(Error::CheckpointCorrupt {
                        reason: format!(
                            "expected {} feature maps, found {}",
                            conv.feature_maps().len(),
                            feature_maps.len()
                        ),
                    });
                }
                for (fm, saved) in conv.feature_maps_mut().iter_mut().zip(feature_maps) {
                    fm.load_weights(&saved.kernel_weights, saved.bias)
                        .map_err(corrupt)?;
                }
            }
            _ => unreachable!("hidden specs were built from these layers"),
        }
    }
    network
        .output_layer_mut()
        .core
        .load_weights(&checkpoint.output.weights)
        .map_err(corrupt)?;

    Ok(network)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::optim::LearningMethod;
    use rand::{rngs::StdRng, SeedableRng};

    fn policy() -> UpdatePolicy {
        UpdatePolicy {
            method: LearningMethod::RmsProp,
            learning_rate: 0.01,
            momentum: 0.0,
            weight_decay: 0.0,
        }
    }

    #[test]
    fn missing_checkpoint_is_reported_as_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load(dir.path(), "nowhere"),
            Err(Error::CheckpointNotFound { .. })
        ));
    }

    #[test]
    fn garbage_checkpoint_is_reported_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(checkpoint_path(dir.path(), "bad"), "not json").unwrap();
        assert!(matches!(
            load(dir.path(), "bad"),
            Err(Error::CheckpointCorrupt { .. })
        ));
    }

    #[test]
    fn save_then_load_preserves_outputs() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut network = NeuralNetwork::new(
            "roundtrip",
            InputLayer::new(4),
            vec![DenseLayer::new(Activation::Tanh, 3).into()],
            OutputLayer::new(Activation::Sigmoid, 2),
            policy(),
            &mut rng,
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        save(&network, dir.path()).unwrap();
        let mut restored = load(dir.path(), "roundtrip").unwrap();

        let input = [0.1, -0.2, 0.3, -0.4];
        let expected: Vec<f64> = network.evaluate(&input).unwrap().to_vec();
        let actual = restored.evaluate(&input).unwrap();
        for (e, a) in expected.iter().zip(actual) {
            assert!((e - a).abs() < 1e-12);
        }
    }
}
