use rand::Rng;

use crate::{
    activation::Activation,
    optim::{BatchMode, UpdatePolicy},
    Error, Result,
};

/// One output channel of a convolutional layer: a kernel block per source
/// channel, a bias, and the channel's output pixels.
///
/// A map carries its own geometry and receives neighbor state as arguments,
/// so it needs no reference back to the layer that owns it.
#[derive(Debug, Clone)]
pub struct FeatureMap {
    width: usize,
    kernel_width: usize,
    num_kernels: usize,
    kernel_weights: Vec<f64>,
    bias: f64,
    output: Vec<f64>,

    kernel_gradients: Vec<f64>,
    prev_kernel_gradients: Vec<f64>,
    kernel_mean_squares: Vec<f64>,
    bias_gradient: f64,
    prev_bias_gradient: f64,
    bias_mean_square: f64,
}

impl FeatureMap {
    /// `num_kernels` is the number of source channels; each gets its own
    /// `kernel_width * kernel_width` weight block.
    pub fn new(width: usize, kernel_width: usize, num_kernels: usize) -> Self {
        let kernel_len = num_kernels * kernel_width * kernel_width;
        Self {
            width,
            kernel_width,
            num_kernels,
            kernel_weights: vec![0.0; kernel_len],
            bias: 0.0,
            output: vec![0.0; width * width],
            kernel_gradients: vec![0.0; kernel_len],
            prev_kernel_gradients: vec![0.0; kernel_len],
            kernel_mean_squares: vec![1.0; kernel_len],
            bias_gradient: 0.0,
            prev_bias_gradient: 0.0,
            bias_mean_square: 1.0,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn output(&self) -> &[f64] {
        &self.output
    }

    pub fn kernel_weights(&self) -> &[f64] {
        &self.kernel_weights
    }

    pub fn bias(&self) -> f64 {
        self.bias
    }

    pub(crate) fn kernel_block(&self, src_index: usize) -> &[f64] {
        let k2 = self.kernel_width * self.kernel_width;
        &self.kernel_weights[src_index * k2..(src_index + 1) * k2]
    }

    pub(crate) fn reset_output(&mut self) {
        for o in &mut self.output {
            *o = 0.0;
        }
    }

    /// Strided 2D convolution of one source channel, accumulated into the
    /// raw output sums:
    /// `out[x,y] += input[kx + x*step + ky*w_in + y*w_in*step] * kernel[kx,ky]`.
    pub(crate) fn convolute(&mut self, input: &[f64], src_index: usize, step: usize) {
        let input_width = (input.len() as f64).sqrt() as usize;
        let kernel_base = src_index * self.kernel_width * self.kernel_width;

        for y in 0..self.width {
            for x in 0..self.width {
                let mut sum = 0.0;
                for ky in 0..self.kernel_width {
                    for kx in 0..self.kernel_width {
                        sum += input[kx + x * step + ky * input_width + y * input_width * step]
                            * self.kernel_weights[kernel_base + kx + ky * self.kernel_width];
                    }
                }
                self.output[x + y * self.width] += sum;
            }
        }
    }

    /// Converts accumulated raw sums to activated outputs, adding the bias.
    pub(crate) fn finish_output(&mut self, activation: Activation) -> Result<()> {
        for o in &mut self.output {
            *o = activation.forward(*o + self.bias)?;
        }
        Ok(())
    }

    pub(crate) fn reset_gradients(&mut self) {
        for g in &mut self.kernel_gradients {
            *g = 0.0;
        }
        self.bias_gradient = 0.0;
    }

    /// Pixel-sum of this map's output gradients, accumulated as the bias
    /// gradient.
    pub(crate) fn accumulate_bias_gradient(&mut self, fm_output_gradients: &[f64]) {
        self.bias_gradient += fm_output_gradients.iter().sum::<f64>();
    }

    /// Accumulates kernel-weight gradients against the downstream outputs,
    /// mirroring `convolute`: for every output pixel `(x, y)` and kernel
    /// offset `(kx, ky)`,
    /// `grad[k][kx,ky] += og[x,y] * down[kx + x*step + ky*w_in + y*w_in*step]`.
    ///
    /// Disconnected source channels are skipped, so their kernel blocks
    /// never move away from their initial values.
    pub(crate) fn accumulate_kernel_gradients<C>(
        &mut self,
        fm_output_gradients: &[f64],
        downstream_outputs: &[f64],
        step: usize,
        connected: C,
    ) where
        C: Fn(usize) -> bool,
    {
        let channel_len = downstream_outputs.len() / self.num_kernels;
        let input_width = (channel_len as f64).sqrt() as usize;
        let k2 = self.kernel_width * self.kernel_width;

        for k in 0..self.num_kernels {
            if !connected(k) {
                continue;
            }
            let channel = &downstream_outputs[k * channel_len..(k + 1) * channel_len];

            for y in 0..self.width {
                for x in 0..self.width {
                    let d_err = fm_output_gradients[x + y * self.width];
                    for ky in 0..self.kernel_width {
                        for kx in 0..self.kernel_width {
                            self.kernel_gradients[k * k2 + kx + ky * self.kernel_width] += d_err
                                * channel
                                    [kx + x * step + ky * input_width + y * input_width * step];
                        }
                    }
                }
            }
        }
    }

    pub(crate) fn update_weights(&mut self, policy: &UpdatePolicy, mode: BatchMode) {
        policy.apply(
            mode,
            &mut self.kernel_weights,
            &mut self.kernel_gradients,
            &mut self.prev_kernel_gradients,
            &mut self.kernel_mean_squares,
        );
        policy.apply(
            mode,
            std::slice::from_mut(&mut self.bias),
            std::slice::from_mut(&mut self.bias_gradient),
            std::slice::from_mut(&mut self.prev_bias_gradient),
            std::slice::from_mut(&mut self.bias_mean_square),
        );
    }

    /// Bias uniform in `[-1, 1]`; kernel weights fan-in-scaled uniform with
    /// fan-in equal to the feature map's pixel count.
    pub(crate) fn randomize_weights<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.bias = rng.random_range(-1.0..1.0);

        let fan_in = (self.width * self.width) as f64;
        let scale = 1.0 / fan_in.sqrt();
        for w in &mut self.kernel_weights {
            *w = rng.random_range(-1.0..1.0) * scale;
        }
    }

    pub(crate) fn load_weights(&mut self, kernel_weights: &[f64], bias: f64) -> Result<()> {
        if kernel_weights.len() != self.kernel_weights.len() {
            return Err(Error::SizeMismatch {
                what: "kernel weights",
                got: kernel_weights.len(),
                expected: self.kernel_weights.len(),
            });
        }
        self.kernel_weights.copy_from_slice(kernel_weights);
        self.bias = bias;
        Ok(())
    }
}
