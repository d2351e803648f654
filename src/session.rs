use crate::{
    errors,
    extractor::{ExecutionContext, FeatureExtractor},
    loss::{LossComposer, LossTerms, LossWeights},
    optimizer::Adam,
    tensor::Tensor,
    utils, Dims, Error, ImageSource,
};
use std::path::{Path, PathBuf};

/// Style synthesis session.
///
/// Calling `run()` iteratively adjusts a noise-initialized canvas to
/// minimize the composed content/style/variation loss, consuming the
/// session in the process. You can provide a `SynthesisProgress`
/// implementation to periodically get the iteration index and the weighted
/// loss terms, and a `CheckpointSink` receives denormalized snapshots of
/// the canvas on the configured cadence.
///
/// # Example
/// ```no_run
/// use style_synthesis as ss;
///
/// let extractor = ss::ConvNet::new(ss::Topology::vgg16_seeded(0)).unwrap();
/// let session = ss::Session::builder(extractor)
///     .content(&"imgs/portrait.jpg")
///     .style(&"imgs/mosaic.jpg")
///     .img_dim(224)
///     .iterations(3000)
///     .build().expect("failed to build session");
///
/// let mut sink = ss::DirectorySink::new("output").unwrap();
/// let synthesized = session.run(&mut sink, None).unwrap();
/// synthesized.save("output/final.png").unwrap();
/// ```
#[derive(Debug)]
pub struct Session<E: FeatureExtractor> {
    extractor: E,
    ctx: ExecutionContext,
    composer: LossComposer,
    canvas: Tensor,
    params: Parameters,
}

impl<E: FeatureExtractor> Session<E> {
    /// Creates a new session builder around a feature extractor.
    ///
    /// The extractor is a frozen collaborator: loading pretrained weights
    /// into a [`crate::Topology`] is the caller's concern.
    pub fn builder<'a>(extractor: E) -> SessionBuilder<'a, E> {
        SessionBuilder::new(extractor)
    }

    /// Runs the optimization loop for the configured number of iterations
    /// and returns the final canvas.
    ///
    /// Exactly `iterations` steps are performed, 0-indexed; there is no
    /// convergence test and no early stopping. A non-finite loss is not
    /// detected and will propagate through subsequent iterations.
    pub fn run(
        mut self,
        sink: &mut dyn CheckpointSink,
        mut progress: Option<Box<dyn SynthesisProgress>>,
    ) -> Result<SynthesizedImage, Error> {
        let mut optimizer = Adam::new(self.canvas.len(), self.params.learning_rate);

        for iteration in 0..self.params.iterations {
            let (terms, gradient) = self
                .composer
                .evaluate(&self.extractor, &self.ctx, &self.canvas);

            if iteration % self.params.print_every == 0 {
                if let Some(ref mut progress) = progress {
                    progress.update(IterationUpdate {
                        iteration,
                        total_iterations: self.params.iterations,
                        terms,
                    });
                }
            }

            if iteration % self.params.save_every == 0 {
                sink.emit(iteration, &utils::tensor_to_image(&self.canvas))?;
            }

            optimizer.step(&mut self.canvas, &gradient);
        }

        Ok(SynthesizedImage {
            image: utils::tensor_to_image(&self.canvas),
        })
    }
}

#[derive(Debug)]
pub(crate) struct Parameters {
    img_dim: u32,
    iterations: usize,
    content_weight: f32,
    style_weight: f32,
    variation_weight: f32,
    learning_rate: f32,
    print_every: usize,
    save_every: usize,
    seed: u64,
    max_thread_count: Option<usize>,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            img_dim: 224,
            iterations: 3000,
            content_weight: 1.0,
            style_weight: 1e4,
            variation_weight: 10.0,
            learning_rate: 0.01,
            print_every: 100,
            save_every: 1000,
            seed: 0,
            max_thread_count: None,
        }
    }
}

/// Builds a session by setting parameters and the two input images;
/// calling `build` validates the parameters, checks that both inputs
/// exist before anything is decoded, extracts the frozen targets once and
/// initializes the canvas from seeded noise.
pub struct SessionBuilder<'a, E: FeatureExtractor> {
    extractor: E,
    content: Option<ImageSource<'a>>,
    style: Option<ImageSource<'a>>,
    params: Parameters,
}

impl<'a, E: FeatureExtractor> SessionBuilder<'a, E> {
    pub fn new(extractor: E) -> Self {
        Self {
            extractor,
            content: None,
            style: None,
            params: Parameters::default(),
        }
    }

    /// The image whose large-scale structure the canvas should follow.
    pub fn content<I: Into<ImageSource<'a>>>(mut self, source: I) -> Self {
        self.content = Some(source.into());
        self
    }

    /// The image whose texture statistics the canvas should match.
    pub fn style<I: Into<ImageSource<'a>>>(mut self, source: I) -> Self {
        self.style = Some(source.into());
        self
    }

    /// Side length of the square working resolution both inputs are
    /// resized to, and of the canvas.
    ///
    /// Default: 224
    pub fn img_dim(mut self, dim: u32) -> Self {
        self.params.img_dim = dim;
        self
    }

    /// Number of optimization steps; the loop always runs exactly this
    /// many.
    ///
    /// Default: 3000
    pub fn iterations(mut self, count: usize) -> Self {
        self.params.iterations = count;
        self
    }

    /// Weight of the content term. The raw terms have very different
    /// natural magnitudes, so the three weights are expected to differ by
    /// orders of magnitude.
    ///
    /// Default: 1.0
    pub fn content_weight(mut self, weight: f32) -> Self {
        self.params.content_weight = weight;
        self
    }

    /// Weight of the style term.
    ///
    /// Default: 1e4
    pub fn style_weight(mut self, weight: f32) -> Self {
        self.params.style_weight = weight;
        self
    }

    /// Weight of the total-variation smoothness term.
    ///
    /// Default: 10.0
    pub fn variation_weight(mut self, weight: f32) -> Self {
        self.params.variation_weight = weight;
        self
    }

    /// Fixed base learning rate of the adaptive update rule.
    ///
    /// Default: 0.01
    pub fn learning_rate(mut self, rate: f32) -> Self {
        self.params.learning_rate = rate;
        self
    }

    /// Progress is reported every this many iterations.
    ///
    /// Default: 100
    pub fn print_every(mut self, every: usize) -> Self {
        self.params.print_every = every;
        self
    }

    /// A checkpoint is emitted every this many iterations, always
    /// including iteration 0.
    ///
    /// Default: 1000
    pub fn save_every(mut self, every: usize) -> Self {
        self.params.save_every = every;
        self
    }

    /// Seed for the canvas's initial noise. Two runs with the same seed,
    /// configuration and extractor produce the same loss trajectory and
    /// checkpoints.
    ///
    /// Default: 0
    pub fn seed(mut self, seed: u64) -> Self {
        self.params.seed = seed;
        self
    }

    /// Controls the maximum number of threads the extractor fans
    /// convolution planes out over. Results do not depend on this number.
    ///
    /// Default: the number of logical cores on this system.
    pub fn max_thread_count(mut self, count: usize) -> Self {
        self.params.max_thread_count = Some(count);
        self
    }

    /// Creates a `Session`, or returns an error if invalid parameters or
    /// input images were specified.
    pub fn build(self) -> Result<Session<E>, Error> {
        self.check_parameters_validity()?;

        // inputs are validated before anything is decoded or allocated
        let content_src = take_input("content", self.content)?;
        let style_src = take_input("style", self.style)?;

        let dims = Dims::square(self.params.img_dim);
        let content = utils::image_to_tensor(&utils::load_image(content_src, dims)?);
        let style = utils::image_to_tensor(&utils::load_image(style_src, dims)?);

        let ctx = ExecutionContext::new(self.params.max_thread_count);
        let composer = LossComposer::new(
            &self.extractor,
            &ctx,
            &content,
            &style,
            LossWeights {
                content: self.params.content_weight,
                style: self.params.style_weight,
                variation: self.params.variation_weight,
            },
        );

        let canvas = Tensor::noise(
            3,
            self.params.img_dim as usize,
            self.params.img_dim as usize,
            self.params.seed,
        );

        Ok(Session {
            extractor: self.extractor,
            ctx,
            composer,
            canvas,
            params: self.params,
        })
    }

    fn check_parameters_validity(&self) -> Result<(), Error> {
        if self.params.img_dim == 0 {
            return Err(Error::InvalidRange(errors::InvalidRange {
                min: 1.0,
                max: 16384.0,
                value: self.params.img_dim as f32,
                name: "img-dim",
            }));
        }

        if self.params.iterations == 0 {
            return Err(Error::InvalidRange(errors::InvalidRange {
                min: 1.0,
                max: 1e9,
                value: self.params.iterations as f32,
                name: "iterations",
            }));
        }

        if self.params.print_every == 0 {
            return Err(Error::InvalidRange(errors::InvalidRange {
                min: 1.0,
                max: 1e9,
                value: 0.0,
                name: "print-every",
            }));
        }

        if self.params.save_every == 0 {
            return Err(Error::InvalidRange(errors::InvalidRange {
                min: 1.0,
                max: 1e9,
                value: 0.0,
                name: "save-every",
            }));
        }

        if !(self.params.learning_rate > 0.0) {
            return Err(Error::InvalidRange(errors::InvalidRange {
                min: 1e-6,
                max: 1000.0,
                value: self.params.learning_rate,
                name: "learning-rate",
            }));
        }

        if let Some(max_count) = self.params.max_thread_count {
            if max_count == 0 {
                return Err(Error::InvalidRange(errors::InvalidRange {
                    min: 1.0,
                    max: 1024.0,
                    value: max_count as f32,
                    name: "max-thread-count",
                }));
            }
        }

        Ok(())
    }
}

/// An input must be present, and a path input must exist on disk.
fn take_input<'a>(
    name: &'static str,
    source: Option<ImageSource<'a>>,
) -> Result<ImageSource<'a>, Error> {
    match source {
        None => Err(Error::MissingInput(errors::MissingInput { name, path: None })),
        Some(ImageSource::Path(path)) if !path.exists() => {
            Err(Error::MissingInput(errors::MissingInput {
                name,
                path: Some(path.to_path_buf()),
            }))
        }
        Some(src) => Ok(src),
    }
}

/// The state of the loop at one reporting point.
pub struct IterationUpdate {
    /// 0-indexed iteration about to be applied
    pub iteration: usize,
    /// The configured total number of iterations
    pub total_iterations: usize,
    /// The weighted loss terms measured before this iteration's update
    pub terms: LossTerms,
}

/// Allows the loop to update external callers with the current loss
/// breakdown on the `print_every` cadence.
pub trait SynthesisProgress {
    fn update(&mut self, info: IterationUpdate);
}

impl<G> SynthesisProgress for G
where
    G: FnMut(IterationUpdate) + Send,
{
    fn update(&mut self, info: IterationUpdate) {
        self(info)
    }
}

/// Receives periodic denormalized snapshots of the canvas. Write-only: the
/// loop never reads a checkpoint back.
pub trait CheckpointSink {
    fn emit(&mut self, iteration: usize, snapshot: &image::RgbImage) -> Result<(), Error>;
}

/// Writes each checkpoint into a directory as
/// `iteration_{index:05}.png`, creating the directory if absent.
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, Error> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }
}

impl CheckpointSink for DirectorySink {
    fn emit(&mut self, iteration: usize, snapshot: &image::RgbImage) -> Result<(), Error> {
        let path = self.dir.join(format!("iteration_{:05}.png", iteration));
        snapshot.save(&path)?;
        Ok(())
    }
}

/// Keeps checkpoints in memory; useful for tests and embedding.
#[derive(Default)]
pub struct CollectingSink {
    pub snapshots: Vec<(usize, image::RgbImage)>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointSink for CollectingSink {
    fn emit(&mut self, iteration: usize, snapshot: &image::RgbImage) -> Result<(), Error> {
        self.snapshots.push((iteration, snapshot.clone()));
        Ok(())
    }
}

/// The final canvas produced by a `Session::run()`
pub struct SynthesizedImage {
    image: image::RgbImage,
}

impl SynthesizedImage {
    /// Saves the synthesized image to the specified path
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let path = path.as_ref();
        if let Some(parent_path) = path.parent() {
            std::fs::create_dir_all(parent_path)?;
        }

        self.image.save(path)?;
        Ok(())
    }

    /// Returns the synthesized output image
    pub fn into_image(self) -> image::RgbImage {
        self.image
    }
}

impl AsRef<image::RgbImage> for SynthesizedImage {
    fn as_ref(&self) -> &image::RgbImage {
        &self.image
    }
}
