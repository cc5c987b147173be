use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{feature_map::FeatureMap, Upstream};
use crate::{
    activation::Activation,
    optim::{BatchMode, UpdatePolicy},
    Error, Result,
};

/// Which (source channel, feature map) pairs of a convolutional layer are
/// wired together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Connectivity {
    /// Every feature map reads every source channel.
    Full,
    /// Resolved to an explicit map at init time: each pair is connected with
    /// probability `density`.
    Random { density: f64 },
    /// Explicit boolean map indexed `src_fm * num_feature_maps + dst_fm`.
    Explicit(Vec<bool>),
}

fn connected(connectivity: &Connectivity, num_feature_maps: usize, dst_fm: usize, src_fm: usize) -> bool {
    match connectivity {
        Connectivity::Full | Connectivity::Random { .. } => true,
        Connectivity::Explicit(map) => map[src_fm * num_feature_maps + dst_fm],
    }
}

/// A convolutional hidden layer: a bank of feature maps sharing geometry.
///
/// Output nodes are laid out channel-major: feature map 0's pixels first,
/// then feature map 1's, and so on.
#[derive(Debug, Clone)]
pub struct ConvLayer {
    activation: Activation,
    kernel_width: usize,
    step_size: usize,
    num_feature_maps: usize,
    connectivity: Connectivity,

    // Geometry, fixed by init_feature_maps.
    num_prev_feature_maps: usize,
    feature_map_width: usize,
    prev_nodes: usize,
    num_nodes: usize,

    outputs: Vec<f64>,
    pub(crate) output_gradients: Vec<f64>,
    feature_maps: Vec<FeatureMap>,
}

impl ConvLayer {
    pub fn new(activation: Activation, kernel_width: usize, num_feature_maps: usize, step_size: usize) -> Self {
        Self {
            activation,
            kernel_width,
            step_size,
            num_feature_maps,
            connectivity: Connectivity::Full,
            num_prev_feature_maps: 0,
            feature_map_width: 0,
            prev_nodes: 0,
            num_nodes: 0,
            outputs: Vec::new(),
            output_gradients: Vec::new(),
            feature_maps: Vec::new(),
        }
    }

    /// Requests sparse random wiring to the previous layer's channels; the
    /// boolean map is drawn when the network wires the stack together.
    pub fn with_random_connections(mut self, density: f64) -> Self {
        self.connectivity = Connectivity::Random { density };
        self
    }

    pub fn with_connectivity(mut self, connectivity: Connectivity) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn num_feature_maps(&self) -> usize {
        self.num_feature_maps
    }

    pub fn feature_map_width(&self) -> usize {
        self.feature_map_width
    }

    pub fn kernel_width(&self) -> usize {
        self.kernel_width
    }

    pub fn step_size(&self) -> usize {
        self.step_size
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn outputs(&self) -> &[f64] {
        &self.outputs
    }

    pub fn feature_maps(&self) -> &[FeatureMap] {
        &self.feature_maps
    }

    pub(crate) fn feature_maps_mut(&mut self) -> &mut [FeatureMap] {
        &mut self.feature_maps
    }

    pub fn is_connected(&self, dst_fm: usize, src_fm: usize) -> bool {
        connected(&self.connectivity, self.num_feature_maps, dst_fm, src_fm)
    }

    /// Draws the explicit connection map when random wiring was requested.
    /// With a single source channel the layer is always fully connected.
    pub(crate) fn resolve_connectivity<R: Rng + ?Sized>(&mut self, num_prev_feature_maps: usize, rng: &mut R) {
        if let Connectivity::Random { density } = self.connectivity {
            if num_prev_feature_maps > 1 {
                let map = (0..num_prev_feature_maps * self.num_feature_maps)
                    .map(|_| rng.random::<f64>() > 1.0 - density)
                    .collect();
                self.connectivity = Connectivity::Explicit(map);
            } else {
                self.connectivity = Connectivity::Full;
            }
        }
    }

    /// Fixes the layer geometry from the previous layer's node and channel
    /// counts:
    /// `feature_map_width = (sqrt(prev_nodes/prev_fm) - kernel_width)/step + 1`.
    pub(crate) fn init_feature_maps(&mut self, prev_nodes: usize, num_prev_feature_maps: usize) -> Result<()> {
        if let Connectivity::Random { .. } = self.connectivity {
            if num_prev_feature_maps > 1 {
                return Err(Error::Config(
                    "random connectivity must be resolved before feature-map init",
                ));
            }
            self.connectivity = Connectivity::Full;
        }
        if let Connectivity::Explicit(map) = &self.connectivity {
            let expected = num_prev_feature_maps * self.num_feature_maps;
            if map.len() != expected {
                return Err(Error::SizeMismatch {
                    what: "connectivity map",
                    got: map.len(),
                    expected,
                });
            }
        }
        if num_prev_feature_maps == 0 || prev_nodes % num_prev_feature_maps != 0 {
            return Err(Error::SizeMismatch {
                what: "previous layer channels",
                got: prev_nodes,
                expected: num_prev_feature_maps,
            });
        }

        let channel_len = prev_nodes / num_prev_feature_maps;
        let prev_width = (channel_len as f64).sqrt() as usize;
        if prev_width < self.kernel_width {
            return Err(Error::Config("kernel is wider than the input channel"));
        }

        self.num_prev_feature_maps = num_prev_feature_maps;
        self.prev_nodes = prev_nodes;
        self.feature_map_width = (prev_width - self.kernel_width) / self.step_size + 1;
        self.num_nodes = self.num_feature_maps * self.feature_map_width * self.feature_map_width;
        self.outputs = vec![0.0; self.num_nodes];
        self.output_gradients = vec![0.0; self.num_nodes];
        self.feature_maps = (0..self.num_feature_maps)
            .map(|_| FeatureMap::new(self.feature_map_width, self.kernel_width, num_prev_feature_maps))
            .collect();

        Ok(())
    }

    /// Convolves every connected (channel, feature map) pair. Feature maps
    /// are independent and run in parallel; each writes only its own output.
    pub fn evaluate(&mut self, input: &[f64]) -> Result<&[f64]> {
        if input.len() != self.prev_nodes {
            return Err(Error::SizeMismatch {
                what: "input",
                got: input.len(),
                expected: self.prev_nodes,
            });
        }

        let channel_len = self.prev_nodes / self.num_prev_feature_maps;
        let step = self.step_size;
        let num_fm = self.num_feature_maps;
        let activation = self.activation;
        let connectivity = &self.connectivity;

        self.feature_maps
            .par_iter_mut()
            .enumerate()
            .try_for_each(|(fm_index, fm)| {
                fm.reset_output();
                for (src, channel) in input.chunks(channel_len).enumerate() {
                    if connected(connectivity, num_fm, fm_index, src) {
                        fm.convolute(channel, src, step);
                    }
                }
                fm.finish_output(activation)
            })?;

        let fm_size = self.feature_map_width * self.feature_map_width;
        for (block, fm) in self.outputs.chunks_mut(fm_size).zip(&self.feature_maps) {
            block.copy_from_slice(fm.output());
        }

        Ok(&self.outputs)
    }

    pub(crate) fn randomize_weights<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for fm in &mut self.feature_maps {
            fm.randomize_weights(rng);
        }
    }

    pub(crate) fn backpropagate(
        &mut self,
        upstream: Upstream<'_>,
        downstream_outputs: &[f64],
        mode: BatchMode,
    ) -> Result<()> {
        if mode.resets_accumulators() {
            for fm in &mut self.feature_maps {
                fm.reset_gradients();
            }
        }

        let fm_size = self.feature_map_width * self.feature_map_width;

        match upstream {
            Upstream::Conv(up) => self.scatter_from_conv(up, fm_size),
            Upstream::Dense(up) => {
                for i in 0..self.num_nodes {
                    let mut sum = 0.0;
                    for (k, up_grad) in up.output_gradients.iter().enumerate() {
                        sum += up_grad * up.weights[k * up.num_weights_per_node + i];
                    }
                    self.output_gradients[i] = sum;
                }
            }
        }

        // Bias gradients are the pixel-sums of the raw (pre-derivative)
        // output gradients, one per feature map.
        for (fm, og_block) in self
            .feature_maps
            .iter_mut()
            .zip(self.output_gradients.chunks(fm_size))
        {
            fm.accumulate_bias_gradient(og_block);
        }

        for i in 0..self.num_nodes {
            self.output_gradients[i] *= self.activation.derivative(self.outputs[i])?;
        }

        let Self {
            feature_maps,
            output_gradients,
            connectivity,
            step_size,
            num_feature_maps,
            ..
        } = self;
        let step = *step_size;
        let num_fm = *num_feature_maps;
        let og: &[f64] = output_gradients;
        let connectivity: &Connectivity = connectivity;

        feature_maps
            .par_iter_mut()
            .enumerate()
            .for_each(|(fm_index, fm)| {
                let og_block = &og[fm_index * fm_size..(fm_index + 1) * fm_size];
                fm.accumulate_kernel_gradients(og_block, downstream_outputs, step, |src| {
                    connected(connectivity, num_fm, fm_index, src)
                });
            });

        Ok(())
    }

    /// Runs only after the parallel accumulation joins, and after every
    /// layer in the stack has finished its chain rule.
    pub(crate) fn update_weights(&mut self, policy: &UpdatePolicy, mode: BatchMode) {
        for fm in &mut self.feature_maps {
            fm.update_weights(policy, mode);
        }
    }

    /// Transposed-convolution scatter from an upstream convolutional layer:
    /// each upstream output gradient is pushed back through every kernel
    /// position that read this layer's pixels, for connected pairs only.
    /// Parallel per destination feature map; each task owns one gradient
    /// block.
    fn scatter_from_conv(&mut self, up: &ConvLayer, fm_size: usize) {
        let width = self.feature_map_width;
        let up_fm_size = up.feature_map_width * up.feature_map_width;

        self.output_gradients
            .par_chunks_mut(fm_size)
            .enumerate()
            .for_each(|(fm_index, og_block)| {
                for g in og_block.iter_mut() {
                    *g = 0.0;
                }

                for up_fm in 0..up.num_feature_maps {
                    if !up.is_connected(up_fm, fm_index) {
                        continue;
                    }

                    let up_og = &up.output_gradients[up_fm * up_fm_size..(up_fm + 1) * up_fm_size];
                    let kernel = up.feature_maps[up_fm].kernel_block(fm_index);

                    for fy in 0..up.feature_map_width {
                        for fx in 0..up.feature_map_width {
                            let d_ey = up_og[fx + fy * up.feature_map_width];
                            let base = fx * up.step_size + fy * width * up.step_size;

                            for ky in 0..up.kernel_width {
                                for kx in 0..up.kernel_width {
                                    og_block[base + kx + ky * width] +=
                                        d_ey * kernel[kx + ky * up.kernel_width];
                                }
                            }
                        }
                    }
                }
            });
    }
}
