//! The training loop: example sampling, mini-batch orchestration, the
//! adaptive learning-rate heuristic, and checkpoint-on-improvement.

use std::{num::NonZeroUsize, path::PathBuf};

use log::{debug, info};
use rand::Rng;

use crate::{
    dataset::{DataSetProvider, Example},
    network::NeuralNetwork,
    optim::BatchMode,
    persistence, Error, Result,
};

/// Tuning knobs for the adaptive learning-rate loop. The defaults are
/// empirically tuned; treat them as starting points, not optima.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveConfig {
    /// Number of test examples averaged into the error estimate each
    /// iteration.
    pub sample_size: usize,
    /// Smoothing factor of the error-trend moving average.
    pub smoothing: f64,
    /// Minimum trend magnitude before the learning rate is cut.
    pub threshold: f64,
    /// Learning-rate multiplier while the error trend agrees (> 1).
    pub increase_factor: f64,
    /// Learning-rate multiplier on trend disagreement (< 1).
    pub decrease_factor: f64,
    /// Iterations without a new error minimum before reloading the last
    /// checkpoint.
    pub stagnation_window: usize,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            sample_size: 20,
            smoothing: 0.05,
            threshold: 0.01,
            increase_factor: 1.005,
            decrease_factor: 0.5,
            stagnation_window: 1000,
        }
    }
}

/// Configuration of a training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    /// Iteration budget; one iteration is one example or one mini-batch.
    pub iterations: usize,
    /// Mini-batch size; `None` applies the update after every example.
    pub batch_size: Option<NonZeroUsize>,
    /// Iterations between callback invocations.
    pub report_interval: usize,
    /// Stops the fixed-rate loop once the reported error drops below this.
    pub error_threshold: Option<f64>,
    /// Directory where checkpoints are written, keyed by network name.
    pub checkpoint_dir: PathBuf,
    /// Resume from an existing checkpoint of the same name, if present.
    pub load_previous: bool,
    /// Enables the adaptive learning-rate loop.
    pub adaptive: Option<AdaptiveConfig>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            iterations: 10_000,
            batch_size: None,
            report_interval: 100,
            error_threshold: None,
            checkpoint_dir: PathBuf::from("checkpoints"),
            load_previous: false,
            adaptive: None,
        }
    }
}

/// Drives a network through a training run against a dataset provider.
///
/// One controller owns one network exclusively; training steps never
/// overlap.
pub struct TrainingController<P, R> {
    network: NeuralNetwork,
    provider: P,
    rng: R,
    config: TrainingConfig,
}

impl<P: DataSetProvider, R: Rng> TrainingController<P, R> {
    /// # Errors
    ///
    /// Rejects a network whose input or output width does not match what
    /// the provider declares.
    pub fn new(network: NeuralNetwork, provider: P, rng: R, config: TrainingConfig) -> Result<Self> {
        if network.input_layer().num_nodes() != provider.input_size() {
            return Err(Error::SizeMismatch {
                what: "network input width",
                got: network.input_layer().num_nodes(),
                expected: provider.input_size(),
            });
        }
        if network.output_layer().num_nodes() != provider.result_size() {
            return Err(Error::SizeMismatch {
                what: "network output width",
                got: network.output_layer().num_nodes(),
                expected: provider.result_size(),
            });
        }
        Ok(Self {
            network,
            provider,
            rng,
            config,
        })
    }

    pub fn network(&self) -> &NeuralNetwork {
        &self.network
    }

    pub fn into_network(self) -> NeuralNetwork {
        self.network
    }

    /// Runs the configured training loop. The callback fires once per
    /// reporting interval with the current error; returning `false` stops
    /// the run. Cancellation is a normal termination, not an error.
    ///
    /// Returns the last reported error.
    pub fn train<F>(&mut self, callback: F) -> Result<f64>
    where
        F: FnMut(&NeuralNetwork, f64) -> bool,
    {
        if self.provider.training_examples().is_empty() {
            return Err(Error::Config("training set is empty"));
        }

        if self.config.load_previous
            && persistence::checkpoint_exists(&self.config.checkpoint_dir, self.network.name())
        {
            self.network =
                persistence::load(&self.config.checkpoint_dir, self.network.name())?;
            info!("resumed network {} from checkpoint", self.network.name());
        }

        match self.config.adaptive {
            Some(adaptive) => self.train_adaptive(adaptive, callback),
            None => self.train_fixed(callback),
        }
    }

    fn train_fixed<F>(&mut self, mut callback: F) -> Result<f64>
    where
        F: FnMut(&NeuralNetwork, f64) -> bool,
    {
        let report_interval = self.config.report_interval.max(1);
        let mut error = 0.0;

        for iteration in 0..self.config.iterations {
            error = self.train_step()?;

            if (iteration + 1) % report_interval == 0 {
                debug!("iteration {}: error {error:.6}", iteration + 1);
                if !callback(&self.network, error) {
                    info!("training cancelled at iteration {}", iteration + 1);
                    break;
                }
            }
            if let Some(threshold) = self.config.error_threshold {
                if error < threshold {
                    info!(
                        "error threshold {threshold} reached at iteration {}",
                        iteration + 1
                    );
                    break;
                }
            }
        }

        Ok(error)
    }

    /// Error-trend feedback loop: grow the learning rate while the sampled
    /// test error keeps falling, cut it hard when the trend flips, and fall
    /// back to the best-seen checkpoint when progress stalls.
    fn train_adaptive<F>(&mut self, adaptive: AdaptiveConfig, mut callback: F) -> Result<f64>
    where
        F: FnMut(&NeuralNetwork, f64) -> bool,
    {
        let dir = self.config.checkpoint_dir.clone();
        let report_interval = self.config.report_interval.max(1);

        let mut prev_error = self.sampled_test_error(adaptive.sample_size)?;
        let mut min_error = prev_error;
        let mut trend = 0.0;
        let mut since_improvement = 0usize;

        // Seed the best-seen checkpoint so stagnation always has a state to
        // fall back to.
        persistence::save(&self.network, &dir)?;

        for iteration in 0..self.config.iterations {
            self.train_step()?;
            let error = self.sampled_test_error(adaptive.sample_size)?;

            if let Some(change) = relative_change(error, prev_error) {
                trend = adaptive.smoothing * change + (1.0 - adaptive.smoothing) * trend;

                let rate = self.network.learning_rate();
                if change.signum() != trend.signum() && trend.abs() > adaptive.threshold {
                    self.network.set_learning_rate(rate * adaptive.decrease_factor);
                } else {
                    self.network.set_learning_rate(rate * adaptive.increase_factor);
                }
            }
            prev_error = error;

            if error < min_error {
                min_error = error;
                since_improvement = 0;
                persistence::save(&self.network, &dir)?;
            } else {
                since_improvement += 1;
                if since_improvement >= adaptive.stagnation_window {
                    info!(
                        "no improvement in {} iterations, reloading best checkpoint",
                        since_improvement
                    );
                    self.network = persistence::load(&dir, self.network.name())?;
                    since_improvement = 0;
                }
            }

            if (iteration + 1) % report_interval == 0 {
                debug!(
                    "iteration {}: error {error:.6}, rate {:.6}",
                    iteration + 1,
                    self.network.learning_rate()
                );
                if !callback(&self.network, error) {
                    info!("training cancelled at iteration {}", iteration + 1);
                    break;
                }
            }
        }

        // Revert to the best-seen state and report it once more.
        self.network = persistence::load(&dir, self.network.name())?;
        let final_error = self.sampled_test_error(adaptive.sample_size)?;
        callback(&self.network, final_error);
        Ok(final_error)
    }

    /// One iteration: a single randomly sampled example, or a full
    /// mini-batch whose update is applied once on the closing step.
    fn train_step(&mut self) -> Result<f64> {
        let Self {
            network,
            provider,
            rng,
            config,
        } = self;
        let examples = provider.training_examples();

        match config.batch_size.map(NonZeroUsize::get) {
            None | Some(1) => {
                let example = &examples[rng.random_range(0..examples.len())];
                network.train(example, BatchMode::Off)
            }
            Some(size) => {
                let mut error = 0.0;
                for step in 0..size {
                    let mode = if step == 0 {
                        BatchMode::First
                    } else if step + 1 == size {
                        BatchMode::Compute
                    } else {
                        BatchMode::Accumulate
                    };
                    let example = &examples[rng.random_range(0..examples.len())];
                    error = network.train(example, mode)?;
                }
                Ok(error)
            }
        }
    }

    /// Mean absolute error over a fixed-size prefix of the test set.
    fn sampled_test_error(&mut self, sample_size: usize) -> Result<f64> {
        let Self {
            network, provider, ..
        } = self;
        let examples = provider.testing_examples();
        if examples.is_empty() {
            return Err(Error::Config("testing set is empty"));
        }

        let count = sample_size.clamp(1, examples.len());
        let mut total = 0.0;
        for example in &examples[..count] {
            total += example_error(network, example)?;
        }
        Ok(total / count as f64)
    }

    /// Evaluates every test example, reporting each to the callback;
    /// returning `false` stops early. Returns the mean absolute error over
    /// the examples visited.
    pub fn test<F>(&mut self, mut callback: F) -> Result<f64>
    where
        F: FnMut(&NeuralNetwork, &[f64], &[f64], &[f64]) -> bool,
    {
        let Self {
            network, provider, ..
        } = self;
        let examples = provider.testing_examples();
        if examples.is_empty() {
            return Err(Error::Config("testing set is empty"));
        }

        let mut total = 0.0;
        let mut visited = 0usize;
        for example in examples {
            total += example_error(network, example)?;
            visited += 1;

            let actual: Vec<f64> = network.output_layer().outputs().to_vec();
            if !callback(network, &example.input, &actual, &example.expected) {
                break;
            }
        }
        Ok(total / visited as f64)
    }
}

/// Relative error change between two samples; undefined at zero error,
/// where the trend statistics simply skip the sample.
fn relative_change(error: f64, prev_error: f64) -> Option<f64> {
    (error != 0.0).then(|| (error - prev_error) / error)
}

fn example_error(network: &mut NeuralNetwork, example: &Example) -> Result<f64> {
    let actual = network.evaluate(&example.input)?;
    let sum: f64 = actual
        .iter()
        .zip(&example.expected)
        .map(|(a, e)| (e - a).abs())
        .sum();
    Ok(sum / example.expected.len() as f64)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        activation::Activation,
        dataset::logical_and,
        layers::{DenseLayer, InputLayer, OutputLayer},
        optim::{LearningMethod, UpdatePolicy},
    };
    use rand::{rngs::StdRng, SeedableRng};

    fn and_network(seed: u64) -> NeuralNetwork {
        let mut rng = StdRng::seed_from_u64(seed);
        NeuralNetwork::new(
            "and",
            InputLayer::new(2),
            vec![DenseLayer::new(Activation::Sigmoid, 4).into()],
            OutputLayer::new(Activation::Sigmoid, 1),
            UpdatePolicy {
                method: LearningMethod::Sgd,
                learning_rate: 0.5,
                momentum: 0.1,
                weight_decay: 0.0,
            },
            &mut rng,
        )
        .unwrap()
    }

    #[test]
    fn callback_false_stops_the_fixed_loop() {
        let mut controller = TrainingController::new(
            and_network(1),
            logical_and(),
            StdRng::seed_from_u64(2),
            TrainingConfig {
                iterations: 10_000,
                report_interval: 1,
                ..TrainingConfig::default()
            },
        )
        .unwrap();

        let mut reports = 0;
        controller
            .train(|_, _| {
                reports += 1;
                reports < 5
            })
            .unwrap();
        assert_eq!(reports, 5);
    }

    #[test]
    fn error_threshold_ends_the_run() {
        let mut controller = TrainingController::new(
            and_network(3),
            logical_and(),
            StdRng::seed_from_u64(4),
            TrainingConfig {
                iterations: 200_000,
                error_threshold: Some(0.05),
                ..TrainingConfig::default()
            },
        )
        .unwrap();

        let error = controller.train(|_, _| true).unwrap();
        assert!(error < 0.05);
    }

    #[test]
    fn zero_error_yields_no_trend_sample() {
        assert!(relative_change(0.0, 0.5).is_none());
        assert!((relative_change(0.5, 0.25).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn mismatched_provider_width_is_rejected() {
        let mut rng = StdRng::seed_from_u64(5);
        let network = NeuralNetwork::new(
            "wide",
            InputLayer::new(7),
            vec![DenseLayer::new(Activation::Sigmoid, 3).into()],
            OutputLayer::new(Activation::Sigmoid, 1),
            UpdatePolicy {
                method: LearningMethod::Sgd,
                learning_rate: 0.1,
                momentum: 0.0,
                weight_decay: 0.0,
            },
            &mut rng,
        )
        .unwrap();

        let result =
            TrainingController::new(network, logical_and(), rng, TrainingConfig::default());
        assert!(matches!(result, Err(Error::SizeMismatch { .. })));
    }

    #[test]
    fn test_callback_sees_every_example() {
        let mut controller = TrainingController::new(
            and_network(6),
            logical_and(),
            StdRng::seed_from_u64(7),
            TrainingConfig::default(),
        )
        .unwrap();

        let mut seen = Vec::new();
        controller
            .test(|_, input, actual, expected| {
                assert_eq!(actual.len(), expected.len());
                seen.push(input.to_vec());
                true
            })
            .unwrap();
        assert_eq!(seen.len(), 4);
    }
}
