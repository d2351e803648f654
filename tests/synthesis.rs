use rand::SeedableRng;
use rand_pcg::Pcg32;
use std::sync::{Arc, Mutex};
use style_synthesis as ss;

/// A small extractor that keeps these tests fast: two conv stages with a
/// pooling step between them, style taps on both stages.
fn tiny_extractor(seed: u64) -> ss::ConvNet {
    let mut rng = Pcg32::seed_from_u64(seed);
    ss::ConvNet::new(ss::Topology {
        layers: vec![
            ss::LayerDesc::Conv(ss::ConvWeights::seeded(3, 4, 3, &mut rng)),
            ss::LayerDesc::Activation,
            ss::LayerDesc::Pool(ss::Pooling::Max),
            ss::LayerDesc::Conv(ss::ConvWeights::seeded(4, 6, 3, &mut rng)),
            ss::LayerDesc::Activation,
        ],
        content_tap: 4,
        style_taps: vec![1, 4],
    })
    .unwrap()
}

fn gray_image(dim: u32) -> ss::ImageSource<'static> {
    ss::ImageSource::Image(ss::image::DynamicImage::ImageRgb8(
        ss::image::RgbImage::from_pixel(dim, dim, ss::image::Rgb([128, 128, 128])),
    ))
}

fn checkerboard_image(dim: u32) -> ss::ImageSource<'static> {
    ss::ImageSource::Image(ss::image::DynamicImage::ImageRgb8(
        ss::image::RgbImage::from_fn(dim, dim, |x, y| {
            if (x / 8 + y / 8) % 2 == 0 {
                ss::image::Rgb([255, 255, 255])
            } else {
                ss::image::Rgb([0, 0, 0])
            }
        }),
    ))
}

#[test]
fn checkpoints_follow_the_save_cadence_starting_at_zero() {
    let session = ss::Session::builder(tiny_extractor(1))
        .content(gray_image(16))
        .style(checkerboard_image(16))
        .img_dim(16)
        .iterations(5)
        .save_every(2)
        .print_every(1)
        .max_thread_count(1)
        .build()
        .unwrap();

    let mut sink = ss::CollectingSink::new();
    session.run(&mut sink, None).unwrap();

    let indices: Vec<usize> = sink.snapshots.iter().map(|(i, _)| *i).collect();
    assert_eq!(indices, vec![0, 2, 4]);
    for (_, snapshot) in &sink.snapshots {
        assert_eq!(snapshot.dimensions(), (16, 16));
    }
}

#[test]
fn identical_configurations_produce_identical_trajectories() {
    let run = || {
        let losses = Arc::new(Mutex::new(Vec::new()));
        let sink_losses = losses.clone();

        let session = ss::Session::builder(tiny_extractor(2))
            .content(gray_image(16))
            .style(checkerboard_image(16))
            .img_dim(16)
            .iterations(4)
            .seed(9)
            .print_every(1)
            .save_every(10)
            .max_thread_count(1)
            .build()
            .unwrap();

        let progress = Box::new(move |info: ss::IterationUpdate| {
            sink_losses.lock().unwrap().push(info.terms.total());
        });

        let mut sink = ss::CollectingSink::new();
        let img = session.run(&mut sink, Some(progress)).unwrap().into_image();

        let trajectory = losses.lock().unwrap().clone();
        (trajectory, img)
    };

    let (trajectory_a, img_a) = run();
    let (trajectory_b, img_b) = run();

    assert_eq!(trajectory_a.len(), 4);
    assert_eq!(trajectory_a, trajectory_b);
    assert_eq!(img_a, img_b);
}

#[test]
fn a_small_step_reduces_the_composed_loss() {
    // uniform gray content, checkerboard style, one optimizer step with a
    // small learning rate
    let ctx = ss::ExecutionContext::new(Some(1));
    let extractor = tiny_extractor(3);

    let dim = 32;
    let gray = ss::Tensor::from_data(3, dim, dim, vec![0.1; 3 * dim * dim]);
    let mut checker_data = Vec::with_capacity(3 * dim * dim);
    for _c in 0..3 {
        for y in 0..dim {
            for x in 0..dim {
                checker_data.push(if (x / 8 + y / 8) % 2 == 0 { 1.0 } else { -1.0 });
            }
        }
    }
    let checker = ss::Tensor::from_data(3, dim, dim, checker_data);

    let composer = ss::LossComposer::new(
        &extractor,
        &ctx,
        &gray,
        &checker,
        ss::LossWeights {
            content: 1.0,
            style: 100.0,
            variation: 1.0,
        },
    );

    let mut canvas = ss::Tensor::noise(3, dim, dim, 5);
    let (initial, gradient) = composer.evaluate(&extractor, &ctx, &canvas);

    // random noise is neither smooth nor equal to the gray activations
    assert!(initial.variation > 0.0);
    assert!(initial.content > 0.0);

    let mut optimizer = ss::Adam::new(canvas.len(), 1e-3);
    optimizer.step(&mut canvas, &gradient);

    let (stepped, _) = composer.evaluate(&extractor, &ctx, &canvas);
    assert!(
        stepped.total() < initial.total(),
        "loss went from {} to {}",
        initial.total(),
        stepped.total()
    );
}

#[test]
fn missing_input_paths_fail_before_anything_is_loaded() {
    let err = ss::Session::builder(tiny_extractor(4))
        .content(&"/definitely/not/a/real/path.png")
        .style(gray_image(8))
        .img_dim(8)
        .build()
        .unwrap_err();
    assert!(matches!(err, ss::Error::MissingInput(_)), "{}", err);

    let err = ss::Session::builder(tiny_extractor(4))
        .content(gray_image(8))
        .img_dim(8)
        .build()
        .unwrap_err();
    assert!(matches!(err, ss::Error::MissingInput(_)), "{}", err);
}

#[test]
fn degenerate_parameters_are_rejected() {
    let err = ss::Session::builder(tiny_extractor(5))
        .content(gray_image(8))
        .style(checkerboard_image(8))
        .iterations(0)
        .build()
        .unwrap_err();
    assert!(matches!(err, ss::Error::InvalidRange(_)), "{}", err);

    let err = ss::Session::builder(tiny_extractor(5))
        .content(gray_image(8))
        .style(checkerboard_image(8))
        .img_dim(0)
        .build()
        .unwrap_err();
    assert!(matches!(err, ss::Error::InvalidRange(_)), "{}", err);
}

#[test]
fn run_yields_a_canvas_of_the_working_resolution() {
    let session = ss::Session::builder(tiny_extractor(6))
        .content(gray_image(24))
        .style(checkerboard_image(24))
        .img_dim(24)
        .iterations(2)
        .save_every(100)
        .max_thread_count(1)
        .build()
        .unwrap();

    let mut sink = ss::CollectingSink::new();
    let img = session.run(&mut sink, None).unwrap().into_image();
    assert_eq!(img.dimensions(), (24, 24));
}
