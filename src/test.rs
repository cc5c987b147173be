#![cfg(test)]

use rand::{rngs::StdRng, SeedableRng};

use crate::{
    activation::Activation,
    dataset::{logical_and, DataSetProvider, Example, MemoryProvider},
    layers::{ConvLayer, DenseLayer, HiddenLayer, InputLayer, OutputLayer},
    network::NeuralNetwork,
    optim::{BatchMode, LearningMethod, UpdatePolicy},
    persistence,
    training::{AdaptiveConfig, TrainingConfig, TrainingController},
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn sgd(learning_rate: f64, momentum: f64) -> UpdatePolicy {
    UpdatePolicy {
        method: LearningMethod::Sgd,
        learning_rate,
        momentum,
        weight_decay: 0.0,
    }
}

/// Every trainable weight in the stack, flattened in a fixed order.
fn all_weights(network: &NeuralNetwork) -> Vec<f64> {
    let mut weights = Vec::new();
    for layer in network.hidden_layers() {
        match layer {
            HiddenLayer::Dense(dense) => weights.extend_from_slice(&dense.core.weights),
            HiddenLayer::Conv(conv) => {
                for fm in conv.feature_maps() {
                    weights.extend_from_slice(fm.kernel_weights());
                    weights.push(fm.bias());
                }
            }
        }
    }
    weights.extend_from_slice(&network.output_layer().core.weights);
    weights
}

#[test]
fn logical_and_converges_below_a_tenth_mean_error() {
    init_logging();

    let mut rng = StdRng::seed_from_u64(20);
    let network = NeuralNetwork::new(
        "and",
        InputLayer::new(2),
        vec![DenseLayer::new(Activation::Sigmoid, 4).into()],
        OutputLayer::new(Activation::Sigmoid, 1),
        sgd(0.5, 0.1),
        &mut rng,
    )
    .unwrap();

    let mut controller = TrainingController::new(
        network,
        logical_and(),
        StdRng::seed_from_u64(21),
        TrainingConfig {
            iterations: 50_000,
            ..TrainingConfig::default()
        },
    )
    .unwrap();

    controller.train(|_, _| true).unwrap();
    let error = controller.test(|_, _, _, _| true).unwrap();
    assert!(error < 0.1, "mean error {error} after training");
}

#[test]
fn conv_over_4x4_input_yields_2x2_channels() {
    let mut rng = StdRng::seed_from_u64(30);
    let mut network = NeuralNetwork::new(
        "conv-geometry",
        InputLayer::new(16),
        vec![ConvLayer::new(Activation::Tanh, 2, 3, 2).into()],
        OutputLayer::new(Activation::Sigmoid, 4),
        sgd(0.1, 0.0),
        &mut rng,
    )
    .unwrap();

    match &network.hidden_layers()[0] {
        HiddenLayer::Conv(conv) => {
            assert_eq!(conv.feature_map_width(), 2);
            assert_eq!(conv.num_nodes(), 3 * 2 * 2);
        }
        HiddenLayer::Dense(_) => unreachable!(),
    }

    let out = network.evaluate(&[0.25; 16]).unwrap();
    assert_eq!(out.len(), 4);
}

#[test]
fn mini_batch_update_equals_sum_of_individual_gradients() {
    let mut rng = StdRng::seed_from_u64(40);
    let base = NeuralNetwork::new(
        "batch",
        InputLayer::new(2),
        vec![DenseLayer::new(Activation::Sigmoid, 3).into()],
        OutputLayer::new(Activation::Sigmoid, 1),
        sgd(0.2, 0.0),
        &mut rng,
    )
    .unwrap();

    let examples = [
        Example::new(vec![1.0, 1.0], vec![1.0]),
        Example::new(vec![1.0, 0.0], vec![0.0]),
        Example::new(vec![0.0, 1.0], vec![0.0]),
    ];

    let before = all_weights(&base);

    // With momentum off, an Off-mode step moves each weight by lr times the
    // example's gradient, so summing per-example deltas from the same start
    // gives the expected batch delta.
    let mut summed_delta = vec![0.0; before.len()];
    for example in &examples {
        let mut single = base.clone();
        single.train(example, BatchMode::Off).unwrap();
        for (delta, (after, before)) in summed_delta
            .iter_mut()
            .zip(all_weights(&single).iter().zip(&before))
        {
            *delta += after - before;
        }
    }

    let mut batched = base.clone();
    batched.train(&examples[0], BatchMode::First).unwrap();
    batched.train(&examples[1], BatchMode::Accumulate).unwrap();
    batched.train(&examples[2], BatchMode::Compute).unwrap();

    for ((after, before), delta) in all_weights(&batched)
        .iter()
        .zip(&before)
        .zip(&summed_delta)
    {
        assert!((after - before - delta).abs() < 1e-9);
    }
}

#[test]
fn identical_seeds_and_training_produce_bit_identical_weights() {
    let build_and_train = |seed: u64| {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut network = NeuralNetwork::new(
            "deterministic",
            InputLayer::new(2),
            vec![DenseLayer::new(Activation::Tanh, 5).into()],
            OutputLayer::new(Activation::Sigmoid, 1),
            sgd(0.3, 0.2),
            &mut rng,
        )
        .unwrap();

        for example in logical_and().training_examples() {
            for _ in 0..50 {
                network.train(example, BatchMode::Off).unwrap();
            }
        }
        network
    };

    let a = build_and_train(50);
    let b = build_and_train(50);
    assert_eq!(all_weights(&a), all_weights(&b));
}

#[test]
fn disconnected_channel_pairs_never_receive_updates() {
    use crate::layers::Connectivity;

    let mut rng = StdRng::seed_from_u64(60);
    // conv1: 4x4 input -> two 3x3 channels; conv2 reads them with channel
    // pair (src 1, dst 0) cut.
    let mut network = NeuralNetwork::new(
        "sparse",
        InputLayer::new(16),
        vec![
            ConvLayer::new(Activation::Tanh, 2, 2, 1).into(),
            ConvLayer::new(Activation::Tanh, 2, 2, 1)
                .with_connectivity(Connectivity::Explicit(vec![true, true, false, true]))
                .into(),
        ],
        OutputLayer::new(Activation::Sigmoid, 2),
        sgd(0.3, 0.1),
        &mut rng,
    )
    .unwrap();

    let initial_block: Vec<f64> = match &network.hidden_layers()[1] {
        HiddenLayer::Conv(conv) => conv.feature_maps()[0].kernel_block(1).to_vec(),
        HiddenLayer::Dense(_) => unreachable!(),
    };

    let example = Example::new(
        (0..16).map(|i| (i as f64) / 16.0).collect(),
        vec![1.0, 0.0],
    );
    for _ in 0..25 {
        network.train(&example, BatchMode::Off).unwrap();
    }

    match &network.hidden_layers()[1] {
        HiddenLayer::Conv(conv) => {
            assert_eq!(conv.feature_maps()[0].kernel_block(1), &initial_block[..]);
            // the connected pair did move
            assert_ne!(
                conv.feature_maps()[1].kernel_block(1),
                conv.feature_maps()[1].kernel_block(0)
            );
        }
        HiddenLayer::Dense(_) => unreachable!(),
    }
}

#[test]
fn trained_conv_network_survives_a_checkpoint_round_trip() {
    let mut rng = StdRng::seed_from_u64(70);
    let mut network = NeuralNetwork::new(
        "conv-roundtrip",
        InputLayer::new(16),
        vec![
            ConvLayer::new(Activation::Tanh, 2, 2, 1).into(),
            ConvLayer::new(Activation::Tanh, 2, 2, 1)
                .with_random_connections(0.6)
                .into(),
            DenseLayer::new(Activation::Sigmoid, 5).into(),
        ],
        OutputLayer::new(Activation::Softmax, 3),
        sgd(0.1, 0.0),
        &mut rng,
    )
    .unwrap();

    let example = Example::new(vec![0.5; 16], vec![1.0, 0.0, 0.0]);
    for _ in 0..10 {
        network.train(&example, BatchMode::Off).unwrap();
    }

    let dir = tempfile::tempdir().unwrap();
    persistence::save(&network, dir.path()).unwrap();
    let mut restored = persistence::load(dir.path(), "conv-roundtrip").unwrap();

    let input: Vec<f64> = (0..16).map(|i| (i as f64) / 20.0).collect();
    let expected: Vec<f64> = network.evaluate(&input).unwrap().to_vec();
    let actual = restored.evaluate(&input).unwrap();
    for (e, a) in expected.iter().zip(actual) {
        assert!((e - a).abs() < 1e-12);
    }
}

#[test]
fn adaptive_training_checkpoints_and_reports_the_best_state() {
    init_logging();

    let dir = tempfile::tempdir().unwrap();

    let mut rng = StdRng::seed_from_u64(80);
    let network = NeuralNetwork::new(
        "adaptive-and",
        InputLayer::new(2),
        vec![DenseLayer::new(Activation::Sigmoid, 4).into()],
        OutputLayer::new(Activation::Sigmoid, 1),
        sgd(0.2, 0.0),
        &mut rng,
    )
    .unwrap();

    let mut controller = TrainingController::new(
        network,
        logical_and(),
        StdRng::seed_from_u64(81),
        TrainingConfig {
            iterations: 500,
            report_interval: 100,
            checkpoint_dir: dir.path().to_path_buf(),
            adaptive: Some(AdaptiveConfig {
                sample_size: 4,
                stagnation_window: 100,
                ..AdaptiveConfig::default()
            }),
            ..TrainingConfig::default()
        },
    )
    .unwrap();

    let mut reports = 0;
    let error = controller
        .train(|_, error| {
            assert!(error.is_finite());
            reports += 1;
            true
        })
        .unwrap();

    assert!(error.is_finite());
    assert!(reports >= 1);
    assert!(persistence::checkpoint_exists(dir.path(), "adaptive-and"));
}

#[test]
fn scaled_inputs_flow_through_the_whole_stack() {
    let provider = MemoryProvider::new(vec![
        Example::new(vec![0.0, 255.0], vec![1.0]),
        Example::new(vec![255.0, 0.0], vec![0.0]),
    ])
    .with_scaling(0.0, 255.0, 0.0, 1.0);

    let mut rng = StdRng::seed_from_u64(90);
    let network = NeuralNetwork::new(
        "scaled",
        InputLayer::from_provider(&provider),
        vec![DenseLayer::new(Activation::Sigmoid, 3).into()],
        OutputLayer::new(Activation::Sigmoid, 1),
        sgd(0.5, 0.0),
        &mut rng,
    )
    .unwrap();

    let mut controller = TrainingController::new(
        network,
        provider,
        StdRng::seed_from_u64(91),
        TrainingConfig {
            iterations: 2_000,
            ..TrainingConfig::default()
        },
    )
    .unwrap();

    let error = controller.train(|_, _| true).unwrap();
    assert!(error.is_finite());
    assert_eq!(controller.network().input_layer().num_nodes(), 2);
}

#[test]
fn resumed_training_starts_from_the_saved_weights() {
    let dir = tempfile::tempdir().unwrap();

    let mut rng = StdRng::seed_from_u64(100);
    let network = NeuralNetwork::new(
        "resume",
        InputLayer::new(2),
        vec![DenseLayer::new(Activation::Sigmoid, 3).into()],
        OutputLayer::new(Activation::Sigmoid, 1),
        sgd(0.4, 0.0),
        &mut rng,
    )
    .unwrap();
    let saved_weights = all_weights(&network);
    persistence::save(&network, dir.path()).unwrap();

    // A different seed yields different initial weights; load_previous must
    // override them with the checkpoint.
    let mut rng = StdRng::seed_from_u64(101);
    let fresh = NeuralNetwork::new(
        "resume",
        InputLayer::new(2),
        vec![DenseLayer::new(Activation::Sigmoid, 3).into()],
        OutputLayer::new(Activation::Sigmoid, 1),
        sgd(0.4, 0.0),
        &mut rng,
    )
    .unwrap();
    assert_ne!(all_weights(&fresh), saved_weights);

    let mut controller = TrainingController::new(
        fresh,
        logical_and(),
        StdRng::seed_from_u64(102),
        TrainingConfig {
            iterations: 0,
            checkpoint_dir: dir.path().to_path_buf(),
            load_previous: true,
            ..TrainingConfig::default()
        },
    )
    .unwrap();

    controller.train(|_, _| true).unwrap();
    assert_eq!(all_weights(controller.network()), saved_weights);
}
