use crate::errors::Error;
use crate::tensor::Tensor;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;

const POOL_SIZE: usize = 2;

/// Compute resources resolved once before the loop starts and threaded
/// through every extractor call.
#[derive(Debug)]
pub struct ExecutionContext {
    thread_count: usize,
}

impl ExecutionContext {
    pub fn new(max_thread_count: Option<usize>) -> Self {
        Self {
            thread_count: max_thread_count.unwrap_or_else(num_cpus::get).max(1),
        }
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }
}

/// The result of one forward pass: the content activation, the ordered
/// style activations, and an opaque tape the extractor needs to push
/// gradients back to the input image.
pub struct Extraction<T> {
    pub content: Tensor,
    pub styles: Vec<Tensor>,
    pub tape: T,
}

/// A fixed function from an image to activation maps at designated depths.
///
/// The extractor's weights are frozen: `backward` differentiates with
/// respect to the input image only, pushing the cotangents supplied at the
/// content and style taps down to a gradient of the same shape as the
/// image. Target activations extracted from the fixed inputs carry no tape
/// and are constants by contract.
pub trait FeatureExtractor {
    type Tape;

    fn forward(&self, ctx: &ExecutionContext, image: &Tensor) -> Extraction<Self::Tape>;

    /// Consumes a tape from `forward` and returns d(objective)/d(image),
    /// where the objective's gradients with respect to the tapped
    /// activations are `content_grad` and `style_grads` (one per style
    /// depth, in extraction order).
    fn backward(
        &self,
        ctx: &ExecutionContext,
        tape: Self::Tape,
        content_grad: Tensor,
        style_grads: Vec<Tensor>,
    ) -> Tensor;
}

/// Downsampling flavor in a declarative topology.
///
/// Max pooling is accepted in descriptions for fidelity to common
/// pretrained stacks, but is always substituted with average pooling when
/// the network is constructed: max-pooling gradients reach only the maximal
/// element of each window, which starves whole regions of the canvas of
/// signal, while average pooling spreads the gradient over the window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pooling {
    Max,
    Average,
}

/// Frozen weights of one convolution layer, laid out as
/// (out_channels, in_channels, kernel, kernel), with 'same' zero padding.
#[derive(Clone, Debug)]
pub struct ConvWeights {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel: usize,
    pub weight: Vec<f32>,
    pub bias: Vec<f32>,
}

impl ConvWeights {
    /// Random frozen weights for tests and demo runs, deterministically
    /// derived from the caller's rng. Scaled by 1/sqrt(fan-in) so that
    /// activations keep a workable magnitude through deep stacks.
    pub fn seeded(in_channels: usize, out_channels: usize, kernel: usize, rng: &mut Pcg32) -> Self {
        let fan_in = (in_channels * kernel * kernel) as f32;
        let scale = (2.0 / fan_in).sqrt();
        let weight = (0..out_channels * in_channels * kernel * kernel)
            .map(|_| rng.gen_range(-1.0..1.0) * scale)
            .collect();

        Self {
            in_channels,
            out_channels,
            kernel,
            weight,
            bias: vec![0.0; out_channels],
        }
    }
}

/// One operation in a declarative layer topology.
pub enum LayerDesc {
    Conv(ConvWeights),
    Activation,
    Pool(Pooling),
}

/// An explicit, ordered description of the extractor's layer stack, plus
/// the indices of the layers whose outputs are tapped.
///
/// Tap index `i` refers to the output of `layers[i]`.
pub struct Topology {
    pub layers: Vec<LayerDesc>,
    pub content_tap: usize,
    pub style_taps: Vec<usize>,
}

impl Topology {
    /// The canonical 5-stage VGG16 feature stack, truncated after the first
    /// activation of the fifth stage (the deepest tap).
    ///
    /// Style taps sit on the first activation of each stage, shallow
    /// texture through deep structure; the content tap sits on the second
    /// activation of the fourth stage, deep enough to encode large-scale
    /// structure but not exact pixel values. Expects the 11 conv layers'
    /// pretrained weights in stack order; loading them from wherever they
    /// are stored is the caller's concern.
    pub fn vgg16(mut convs: Vec<ConvWeights>) -> Result<Self, Error> {
        if convs.len() != 11 {
            return Err(Error::Topology(format!(
                "vgg16 expects 11 conv layers, got {}",
                convs.len()
            )));
        }

        // conv counts per stage; only the first conv of stage 5 is kept
        let stage_convs = [2usize, 2, 3, 3, 1];

        let mut layers = Vec::new();
        let mut style_taps = Vec::with_capacity(stage_convs.len());
        let mut content_tap = 0;
        let mut remaining = convs.drain(..);

        for (stage, &count) in stage_convs.iter().enumerate() {
            for conv_idx in 0..count {
                layers.push(LayerDesc::Conv(remaining.next().unwrap()));
                layers.push(LayerDesc::Activation);

                let tap = layers.len() - 1;
                if conv_idx == 0 {
                    style_taps.push(tap);
                }
                // second activation of stage 4
                if stage == 3 && conv_idx == 1 {
                    content_tap = tap;
                }
            }

            if stage + 1 < stage_convs.len() {
                layers.push(LayerDesc::Pool(Pooling::Max));
            }
        }

        Ok(Self {
            layers,
            content_tap,
            style_taps,
        })
    }

    /// `vgg16` filled with seeded random weights.
    pub fn vgg16_seeded(seed: u64) -> Self {
        let mut rng = Pcg32::seed_from_u64(seed);
        let channels = [
            (3, 64),
            (64, 64),
            (64, 128),
            (128, 128),
            (128, 256),
            (256, 256),
            (256, 256),
            (256, 512),
            (512, 512),
            (512, 512),
            (512, 512),
        ];

        let convs = channels
            .iter()
            .map(|&(inp, out)| ConvWeights::seeded(inp, out, 3, &mut rng))
            .collect();

        // the layout is static, the only failure mode is a wrong conv count
        Self::vgg16(convs).unwrap()
    }
}

#[derive(Debug)]
enum Layer {
    Conv(ConvWeights),
    Relu,
    AvgPool,
}

/// A feature extractor built from a declarative [`Topology`].
///
/// Construction validates the description and applies the one-time
/// max-to-average pooling substitution; nothing about the layer stack
/// changes per iteration after that.
#[derive(Debug)]
pub struct ConvNet {
    layers: Vec<Layer>,
    content_tap: usize,
    style_taps: Vec<usize>,
}

impl ConvNet {
    pub fn new(topology: Topology) -> Result<Self, Error> {
        let layer_count = topology.layers.len();
        if layer_count == 0 {
            return Err(Error::Topology("no layers".into()));
        }
        if topology.content_tap >= layer_count {
            return Err(Error::Topology(format!(
                "content tap {} is out of bounds ({} layers)",
                topology.content_tap, layer_count
            )));
        }
        if topology.style_taps.is_empty() {
            return Err(Error::Topology("no style taps".into()));
        }
        for &tap in &topology.style_taps {
            if tap >= layer_count {
                return Err(Error::Topology(format!(
                    "style tap {} is out of bounds ({} layers)",
                    tap, layer_count
                )));
            }
        }

        let mut channels = 3;
        let mut layers = Vec::with_capacity(layer_count);

        for (idx, desc) in topology.layers.into_iter().enumerate() {
            match desc {
                LayerDesc::Conv(w) => {
                    if w.in_channels != channels {
                        return Err(Error::Topology(format!(
                            "conv at layer {} expects {} input channels, previous layer yields {}",
                            idx, w.in_channels, channels
                        )));
                    }
                    if w.kernel % 2 == 0 {
                        return Err(Error::Topology(format!(
                            "conv at layer {} has even kernel size {}",
                            idx, w.kernel
                        )));
                    }
                    let expected = w.out_channels * w.in_channels * w.kernel * w.kernel;
                    if w.weight.len() != expected || w.bias.len() != w.out_channels {
                        return Err(Error::Topology(format!(
                            "conv at layer {} has mismatched weight or bias length",
                            idx
                        )));
                    }
                    channels = w.out_channels;
                    layers.push(Layer::Conv(w));
                }
                LayerDesc::Activation => layers.push(Layer::Relu),
                // the structural substitution: every max pool in the
                // description becomes an average pool
                LayerDesc::Pool(_) => layers.push(Layer::AvgPool),
            }
        }

        Ok(Self {
            layers,
            content_tap: topology.content_tap,
            style_taps: topology.style_taps,
        })
    }
}

impl FeatureExtractor for ConvNet {
    type Tape = Vec<Tensor>;

    fn forward(&self, ctx: &ExecutionContext, image: &Tensor) -> Extraction<Self::Tape> {
        let mut tape = Vec::with_capacity(self.layers.len() + 1);
        tape.push(image.clone());

        for layer in &self.layers {
            let input = tape.last().unwrap();
            let output = match layer {
                Layer::Conv(w) => conv_forward(ctx, input, w),
                Layer::Relu => relu_forward(input),
                Layer::AvgPool => avg_pool_forward(input),
            };
            tape.push(output);
        }

        let content = tape[self.content_tap + 1].clone();
        let styles = self
            .style_taps
            .iter()
            .map(|&tap| tape[tap + 1].clone())
            .collect();

        Extraction {
            content,
            styles,
            tape,
        }
    }

    fn backward(
        &self,
        ctx: &ExecutionContext,
        tape: Self::Tape,
        content_grad: Tensor,
        style_grads: Vec<Tensor>,
    ) -> Tensor {
        debug_assert_eq!(tape.len(), self.layers.len() + 1);
        debug_assert_eq!(style_grads.len(), self.style_taps.len());

        let mut content_grad = Some(content_grad);
        let mut style_grads: Vec<Option<Tensor>> = style_grads.into_iter().map(Some).collect();

        let last = tape.last().unwrap();
        let mut cotangent = Tensor::zeros(last.channels(), last.height(), last.width());

        for idx in (0..self.layers.len()).rev() {
            // inject the objective's gradients at the tapped layers
            if idx == self.content_tap {
                if let Some(g) = content_grad.take() {
                    cotangent.add_scaled(&g, 1.0);
                }
            }
            if let Some(pos) = self.style_taps.iter().position(|&tap| tap == idx) {
                if let Some(g) = style_grads[pos].take() {
                    cotangent.add_scaled(&g, 1.0);
                }
            }

            let input = &tape[idx];
            cotangent = match &self.layers[idx] {
                Layer::Conv(w) => conv_backward_input(ctx, w, &cotangent),
                Layer::Relu => relu_backward(input, &cotangent),
                Layer::AvgPool => avg_pool_backward(input, &cotangent),
            };
        }

        cotangent
    }
}

/// Runs `f` once per channel plane of `data`, fanning the planes out over
/// the context's threads. Each plane is written by exactly one thread, so
/// the result does not depend on the thread count.
#[cfg(not(target_arch = "wasm32"))]
fn for_each_plane<F>(ctx: &ExecutionContext, data: &mut [f32], plane_len: usize, f: F)
where
    F: Fn(usize, &mut [f32]) + Sync,
{
    let channels = data.len() / plane_len;
    let threads = ctx.thread_count().min(channels).max(1);

    if threads == 1 {
        for (c, plane) in data.chunks_mut(plane_len).enumerate() {
            f(c, plane);
        }
        return;
    }

    let chunk_channels = (channels + threads - 1) / threads;
    crossbeam_utils::thread::scope(|scope| {
        for (t, chunk) in data.chunks_mut(chunk_channels * plane_len).enumerate() {
            let f = &f;
            scope.spawn(move |_| {
                for (c, plane) in chunk.chunks_mut(plane_len).enumerate() {
                    f(t * chunk_channels + c, plane);
                }
            });
        }
    })
    .unwrap();
}

#[cfg(target_arch = "wasm32")]
fn for_each_plane<F>(_ctx: &ExecutionContext, data: &mut [f32], plane_len: usize, f: F)
where
    F: Fn(usize, &mut [f32]) + Sync,
{
    for (c, plane) in data.chunks_mut(plane_len).enumerate() {
        f(c, plane);
    }
}

fn conv_forward(ctx: &ExecutionContext, input: &Tensor, w: &ConvWeights) -> Tensor {
    let (height, width) = (input.height(), input.width());
    let kernel = w.kernel;
    let pad = kernel / 2;

    let mut output = Tensor::zeros(w.out_channels, height, width);
    let plane_len = height * width;

    for_each_plane(ctx, output.as_mut_slice(), plane_len, |oc, out_plane| {
        for v in out_plane.iter_mut() {
            *v = w.bias[oc];
        }

        for ic in 0..w.in_channels {
            let in_plane = input.plane(ic);
            let kernel_base = ((oc * w.in_channels) + ic) * kernel * kernel;

            for ky in 0..kernel {
                for kx in 0..kernel {
                    let weight = w.weight[kernel_base + ky * kernel + kx];
                    if weight == 0.0 {
                        continue;
                    }

                    for y in 0..height {
                        let sy = y + ky;
                        if sy < pad || sy - pad >= height {
                            continue;
                        }
                        let in_row = (sy - pad) * width;
                        let out_row = y * width;

                        for x in 0..width {
                            let sx = x + kx;
                            if sx < pad || sx - pad >= width {
                                continue;
                            }
                            out_plane[out_row + x] += weight * in_plane[in_row + sx - pad];
                        }
                    }
                }
            }
        }
    });

    output
}

/// Gradient of `conv_forward` with respect to its input; the weights are
/// frozen and never receive gradient.
fn conv_backward_input(ctx: &ExecutionContext, w: &ConvWeights, out_grad: &Tensor) -> Tensor {
    let (height, width) = (out_grad.height(), out_grad.width());
    let kernel = w.kernel;
    let pad = kernel / 2;

    let mut input_grad = Tensor::zeros(w.in_channels, height, width);
    let plane_len = height * width;

    for_each_plane(ctx, input_grad.as_mut_slice(), plane_len, |ic, in_plane| {
        for oc in 0..w.out_channels {
            let grad_plane = out_grad.plane(oc);
            let kernel_base = ((oc * w.in_channels) + ic) * kernel * kernel;

            for ky in 0..kernel {
                for kx in 0..kernel {
                    let weight = w.weight[kernel_base + ky * kernel + kx];
                    if weight == 0.0 {
                        continue;
                    }

                    // input position (y, x) contributed to output
                    // (y + pad - ky, x + pad - kx)
                    for y in 0..height {
                        let oy = y + pad;
                        if oy < ky || oy - ky >= height {
                            continue;
                        }
                        let grad_row = (oy - ky) * width;
                        let in_row = y * width;

                        for x in 0..width {
                            let ox = x + pad;
                            if ox < kx || ox - kx >= width {
                                continue;
                            }
                            in_plane[in_row + x] += weight * grad_plane[grad_row + ox - kx];
                        }
                    }
                }
            }
        }
    });

    input_grad
}

fn relu_forward(input: &Tensor) -> Tensor {
    let data = input.as_slice().iter().map(|&v| v.max(0.0)).collect();
    Tensor::from_data(input.channels(), input.height(), input.width(), data)
}

fn relu_backward(input: &Tensor, out_grad: &Tensor) -> Tensor {
    let data = input
        .as_slice()
        .iter()
        .zip(out_grad.as_slice().iter())
        .map(|(&v, &g)| if v > 0.0 { g } else { 0.0 })
        .collect();
    Tensor::from_data(input.channels(), input.height(), input.width(), data)
}

fn avg_pool_forward(input: &Tensor) -> Tensor {
    let out_h = input.height() / POOL_SIZE;
    let out_w = input.width() / POOL_SIZE;
    let norm = 1.0 / (POOL_SIZE * POOL_SIZE) as f32;

    let mut output = Tensor::zeros(input.channels(), out_h, out_w);
    for c in 0..input.channels() {
        for y in 0..out_h {
            for x in 0..out_w {
                let mut sum = 0.0;
                for dy in 0..POOL_SIZE {
                    for dx in 0..POOL_SIZE {
                        sum += input.get(c, y * POOL_SIZE + dy, x * POOL_SIZE + dx);
                    }
                }
                output.set(c, y, x, sum * norm);
            }
        }
    }
    output
}

fn avg_pool_backward(input: &Tensor, out_grad: &Tensor) -> Tensor {
    let norm = 1.0 / (POOL_SIZE * POOL_SIZE) as f32;

    // rows and columns cut off by the floored output size receive nothing
    let mut input_grad = Tensor::zeros(input.channels(), input.height(), input.width());
    for c in 0..out_grad.channels() {
        for y in 0..out_grad.height() {
            for x in 0..out_grad.width() {
                let spread = out_grad.get(c, y, x) * norm;
                for dy in 0..POOL_SIZE {
                    for dx in 0..POOL_SIZE {
                        let (iy, ix) = (y * POOL_SIZE + dy, x * POOL_SIZE + dx);
                        input_grad.set(c, iy, ix, spread);
                    }
                }
            }
        }
    }
    input_grad
}
