//! The dataset contract consumed by the training controller.
//!
//! Providers own acquisition and parsing; the engine only asks for example
//! vectors and the optional input-scaling parameters used by the input layer.

/// One labeled example: an input vector and the expected output vector.
/// Immutable once produced by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    pub input: Vec<f64>,
    pub expected: Vec<f64>,
}

impl Example {
    pub fn new(input: Vec<f64>, expected: Vec<f64>) -> Self {
        Self { input, expected }
    }
}

/// Supplies training and testing examples to the engine.
pub trait DataSetProvider {
    /// The training set, in provider order.
    fn training_examples(&self) -> &[Example];

    /// The held-out set. Defaults to the training set.
    fn testing_examples(&self) -> &[Example] {
        self.training_examples()
    }

    /// Width of each example's input vector.
    fn input_size(&self) -> usize;

    /// Width of each example's expected vector.
    fn result_size(&self) -> usize;

    /// Whether raw inputs should be linearly rescaled by the input layer.
    fn scale_input(&self) -> bool {
        false
    }

    fn input_min(&self) -> f64 {
        0.0
    }

    fn input_max(&self) -> f64 {
        0.0
    }

    fn scale_min(&self) -> f64 {
        0.0
    }

    fn scale_max(&self) -> f64 {
        0.0
    }
}

/// A provider over an in-memory example table, with optional input scaling.
/// Enough for truth-table datasets and tests.
#[derive(Debug, Clone)]
pub struct MemoryProvider {
    examples: Vec<Example>,
    input_size: usize,
    result_size: usize,
    scaling: Option<(f64, f64, f64, f64)>,
}

impl MemoryProvider {
    /// Builds a provider from an example table. Sizes are taken from the
    /// first example; callers supply at least one.
    pub fn new(examples: Vec<Example>) -> Self {
        let input_size = examples.first().map_or(0, |e| e.input.len());
        let result_size = examples.first().map_or(0, |e| e.expected.len());
        Self {
            examples,
            input_size,
            result_size,
            scaling: None,
        }
    }

    /// Enables linear rescaling of raw inputs from `[input_min, input_max]`
    /// into `[scale_min, scale_max]`.
    pub fn with_scaling(mut self, input_min: f64, input_max: f64, scale_min: f64, scale_max: f64) -> Self {
        self.scaling = Some((input_min, input_max, scale_min, scale_max));
        self
    }
}

impl DataSetProvider for MemoryProvider {
    fn training_examples(&self) -> &[Example] {
        &self.examples
    }

    fn input_size(&self) -> usize {
        self.input_size
    }

    fn result_size(&self) -> usize {
        self.result_size
    }

    fn scale_input(&self) -> bool {
        self.scaling.is_some()
    }

    fn input_min(&self) -> f64 {
        self.scaling.map_or(0.0, |s| s.0)
    }

    fn input_max(&self) -> f64 {
        self.scaling.map_or(0.0, |s| s.1)
    }

    fn scale_min(&self) -> f64 {
        self.scaling.map_or(0.0, |s| s.2)
    }

    fn scale_max(&self) -> f64 {
        self.scaling.map_or(0.0, |s| s.3)
    }
}

/// The four-row logical-AND table, used across the test suite.
#[cfg(test)]
pub fn logical_and() -> MemoryProvider {
    MemoryProvider::new(vec![
        Example::new(vec![1.0, 1.0], vec![1.0]),
        Example::new(vec![1.0, 0.0], vec![0.0]),
        Example::new(vec![0.0, 1.0], vec![0.0]),
        Example::new(vec![0.0, 0.0], vec![0.0]),
    ])
}
