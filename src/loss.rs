use crate::extractor::{ExecutionContext, FeatureExtractor};
use crate::gram::{gram, GramMatrix};
use crate::tensor::Tensor;

/// The three weighted loss terms of one iteration.
#[derive(Clone, Copy, Debug)]
pub struct LossTerms {
    pub content: f32,
    pub style: f32,
    pub variation: f32,
}

impl LossTerms {
    pub fn total(&self) -> f32 {
        self.content + self.style + self.variation
    }
}

/// Relative importance of the three objectives.
///
/// The terms have wildly different natural magnitudes — content loss is
/// numerically large, style loss can be enormous early on, variation loss
/// is small — so the weights are expected to differ by orders of magnitude.
/// No auto-balancing is performed.
#[derive(Clone, Copy, Debug)]
pub struct LossWeights {
    pub content: f32,
    pub style: f32,
    pub variation: f32,
}

#[derive(Debug)]
struct StyleTarget {
    gram: GramMatrix,
    /// 1 / (2 · N · M)² for this depth's feature-map shape, which keeps
    /// depths of differing channel/spatial size commensurate.
    normalizer: f32,
}

/// Composes content, style and total-variation losses against targets that
/// are extracted exactly once, at construction, and never re-derived.
///
/// `evaluate` is the differentiation seam of the crate: one call runs the
/// canvas through the extractor, produces the weighted loss breakdown and
/// the gradient of the weighted total with respect to the canvas pixels.
/// The stored targets are constants of that differentiation by contract —
/// they carry no tape.
#[derive(Debug)]
pub struct LossComposer {
    weights: LossWeights,
    content_target: Tensor,
    style_targets: Vec<StyleTarget>,
}

impl LossComposer {
    /// Extracts and freezes the targets from the fixed content and style
    /// images.
    pub fn new<E: FeatureExtractor>(
        extractor: &E,
        ctx: &ExecutionContext,
        content_image: &Tensor,
        style_image: &Tensor,
        weights: LossWeights,
    ) -> Self {
        let content_target = extractor.forward(ctx, content_image).content;

        let style_targets = extractor
            .forward(ctx, style_image)
            .styles
            .iter()
            .map(|map| StyleTarget {
                gram: gram(map),
                normalizer: style_normalizer(map),
            })
            .collect();

        Self {
            weights,
            content_target,
            style_targets,
        }
    }

    pub fn weights(&self) -> LossWeights {
        self.weights
    }

    /// Computes the weighted loss terms and d(total)/d(canvas).
    pub fn evaluate<E: FeatureExtractor>(
        &self,
        extractor: &E,
        ctx: &ExecutionContext,
        canvas: &Tensor,
    ) -> (LossTerms, Tensor) {
        let extraction = extractor.forward(ctx, canvas);
        debug_assert_eq!(extraction.styles.len(), self.style_targets.len());

        // content: L = ½ Σ (F − P)², dL/dF = F − P. Intentionally not
        // normalized by size.
        let mut content_raw = 0.0;
        let mut content_grad = extraction.content.clone();
        for (g, &target) in content_grad
            .as_mut_slice()
            .iter_mut()
            .zip(self.content_target.as_slice().iter())
        {
            let diff = *g - target;
            content_raw += 0.5 * diff * diff;
            *g = diff * self.weights.content;
        }

        // style: per depth, L = s · Σ (G − A)² with s = 1/(2NM)², and
        // dL/dF = 4 s (G − A) F since both G and A are symmetric. Depths
        // are averaged with equal weight.
        let depth_count = self.style_targets.len();
        let mut style_raw = 0.0;
        let mut style_grads = Vec::with_capacity(depth_count);

        for (map, target) in extraction.styles.iter().zip(self.style_targets.iter()) {
            let canvas_gram = gram(map);

            let mut depth_raw = 0.0;
            for (&g, &a) in canvas_gram
                .as_slice()
                .iter()
                .zip(target.gram.as_slice().iter())
            {
                let diff = g - a;
                depth_raw += diff * diff;
            }
            depth_raw *= target.normalizer;
            style_raw += depth_raw;

            let scale =
                4.0 * target.normalizer * self.weights.style / depth_count as f32;
            style_grads.push(style_map_gradient(map, &canvas_gram, &target.gram, scale));
        }
        style_raw /= depth_count as f32;

        // smoothness on the raw canvas
        let (variation_raw, variation_grad) =
            total_variation(canvas, self.weights.variation);

        let mut gradient =
            extractor.backward(ctx, extraction.tape, content_grad, style_grads);
        gradient.add_scaled(&variation_grad, 1.0);

        let terms = LossTerms {
            content: self.weights.content * content_raw,
            style: self.weights.style * style_raw,
            variation: self.weights.variation * variation_raw,
        };

        (terms, gradient)
    }
}

fn style_normalizer(map: &Tensor) -> f32 {
    let n = map.channels() as f32;
    let m = map.plane_len() as f32;
    let denom = 2.0 * n * m;
    1.0 / (denom * denom)
}

/// `scale · D · F` reshaped back to the feature map, with `D = G − A`.
fn style_map_gradient(
    map: &Tensor,
    canvas_gram: &GramMatrix,
    target_gram: &GramMatrix,
    scale: f32,
) -> Tensor {
    let channels = map.channels();
    let mut grad = Tensor::zeros(channels, map.height(), map.width());
    let plane_len = map.plane_len();

    for i in 0..channels {
        let out_base = i * plane_len;
        for j in 0..channels {
            let d = (canvas_gram.get(i, j) - target_gram.get(i, j)) * scale;
            if d == 0.0 {
                continue;
            }
            let row_j = map.plane(j);
            let out = &mut grad.as_mut_slice()[out_base..out_base + plane_len];
            for (o, &f) in out.iter_mut().zip(row_j.iter()) {
                *o += d * f;
            }
        }
    }

    grad
}

/// Mean absolute difference to the right neighbor plus mean absolute
/// difference to the neighbor below, and the (sub)gradient of
/// `weight · loss`. The subgradient of |d| at d = 0 is taken as 0.
fn total_variation(canvas: &Tensor, weight: f32) -> (f32, Tensor) {
    let (channels, height, width) = (canvas.channels(), canvas.height(), canvas.width());
    let mut grad = Tensor::zeros(channels, height, width);

    let horiz_count = (channels * height * width.saturating_sub(1)).max(1) as f32;
    let vert_count = (channels * height.saturating_sub(1) * width).max(1) as f32;

    let mut horiz_sum = 0.0;
    let mut vert_sum = 0.0;

    for c in 0..channels {
        for y in 0..height {
            for x in 0..width {
                let here = canvas.get(c, y, x);

                if x + 1 < width {
                    let diff = here - canvas.get(c, y, x + 1);
                    horiz_sum += diff.abs();
                    let s = weight * sign(diff) / horiz_count;
                    grad.set(c, y, x, grad.get(c, y, x) + s);
                    grad.set(c, y, x + 1, grad.get(c, y, x + 1) - s);
                }

                if y + 1 < height {
                    let diff = here - canvas.get(c, y + 1, x);
                    vert_sum += diff.abs();
                    let s = weight * sign(diff) / vert_count;
                    grad.set(c, y, x, grad.get(c, y, x) + s);
                    grad.set(c, y + 1, x, grad.get(c, y + 1, x) - s);
                }
            }
        }
    }

    let loss = horiz_sum / horiz_count + vert_sum / vert_count;
    (loss, grad)
}

// f32::signum maps 0.0 to 1.0, which is not a valid subgradient of |x|
#[inline]
fn sign(v: f32) -> f32 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::extractor::{ConvNet, ConvWeights, LayerDesc, Pooling, Topology};
    use rand::SeedableRng;
    use rand_pcg::Pcg32;

    fn tiny_net(seed: u64) -> ConvNet {
        let mut rng = Pcg32::seed_from_u64(seed);
        ConvNet::new(Topology {
            layers: vec![
                LayerDesc::Conv(ConvWeights::seeded(3, 4, 3, &mut rng)),
                LayerDesc::Pool(Pooling::Max),
                LayerDesc::Conv(ConvWeights::seeded(4, 4, 3, &mut rng)),
            ],
            content_tap: 2,
            style_taps: vec![0, 2],
        })
        .unwrap()
    }

    fn unit_weights() -> LossWeights {
        LossWeights {
            content: 1.0,
            style: 1.0,
            variation: 1.0,
        }
    }

    #[test]
    fn all_losses_vanish_when_canvas_equals_both_targets() {
        let ctx = ExecutionContext::new(Some(1));
        let net = tiny_net(3);

        // constant image: content and style targets match the canvas, and
        // total variation is zero by construction
        let flat = Tensor::from_data(3, 8, 8, vec![0.25; 3 * 8 * 8]);
        let composer = LossComposer::new(&net, &ctx, &flat, &flat, unit_weights());

        let (terms, _) = composer.evaluate(&net, &ctx, &flat);
        assert!(terms.content.abs() < 1e-6);
        assert!(terms.style.abs() < 1e-6);
        assert_eq!(terms.variation, 0.0);
    }

    #[test]
    fn losses_are_strictly_positive_for_a_differing_canvas() {
        let ctx = ExecutionContext::new(Some(1));
        let net = tiny_net(3);

        let content = Tensor::from_data(3, 8, 8, vec![0.5; 3 * 8 * 8]);
        let style = Tensor::noise(3, 8, 8, 77);
        let composer = LossComposer::new(&net, &ctx, &content, &style, unit_weights());

        let canvas = Tensor::noise(3, 8, 8, 1234);
        let (terms, gradient) = composer.evaluate(&net, &ctx, &canvas);

        assert!(terms.content > 0.0);
        assert!(terms.style > 0.0);
        assert!(terms.variation > 0.0);
        assert!(gradient.as_slice().iter().any(|&g| g != 0.0));
    }

    #[test]
    fn content_loss_grows_with_the_elementwise_difference() {
        let ctx = ExecutionContext::new(Some(1));
        let net = tiny_net(5);

        let content = Tensor::from_data(3, 8, 8, vec![0.0; 3 * 8 * 8]);
        let composer = LossComposer::new(&net, &ctx, &content, &content, unit_weights());

        let near = Tensor::from_data(3, 8, 8, vec![0.1; 3 * 8 * 8]);
        let far = Tensor::from_data(3, 8, 8, vec![0.4; 3 * 8 * 8]);

        let (near_terms, _) = composer.evaluate(&net, &ctx, &near);
        let (far_terms, _) = composer.evaluate(&net, &ctx, &far);

        assert!(far_terms.content > near_terms.content);
    }

    #[test]
    fn total_variation_penalizes_only_neighbor_differences() {
        let flat = Tensor::from_data(1, 3, 3, vec![0.7; 9]);
        let (loss, grad) = total_variation(&flat, 1.0);
        assert_eq!(loss, 0.0);
        assert!(grad.as_slice().iter().all(|&g| g == 0.0));

        let mut bumped = flat;
        bumped.set(0, 1, 1, 1.7);
        let (loss, grad) = total_variation(&bumped, 1.0);
        assert!(loss > 0.0);
        // the bumped pixel is pulled down, its four neighbors up
        assert!(grad.get(0, 1, 1) > 0.0);
        assert!(grad.get(0, 1, 0) < 0.0);
        assert!(grad.get(0, 0, 1) < 0.0);
    }

    #[test]
    fn style_loss_is_zero_against_an_identical_gram_and_positive_otherwise() {
        let ctx = ExecutionContext::new(Some(1));
        let net = tiny_net(7);

        let style = Tensor::noise(3, 8, 8, 99);
        let weights = LossWeights {
            content: 0.0,
            style: 1.0,
            variation: 0.0,
        };
        let composer = LossComposer::new(&net, &ctx, &style, &style, weights);

        let (matching, _) = composer.evaluate(&net, &ctx, &style);
        assert!(matching.style.abs() < 1e-9);

        let probe = Tensor::noise(3, 8, 8, 4);
        let (differing, _) = composer.evaluate(&net, &ctx, &probe);
        assert!(differing.style > 0.0);
    }

    #[test]
    fn evaluate_gradient_matches_finite_differences() {
        // the tiny net has no activations, so the composed objective is a
        // smooth polynomial in the canvas and central differences converge
        let ctx = ExecutionContext::new(Some(1));
        let net = tiny_net(11);

        let content = Tensor::noise(3, 6, 6, 55);
        let style = Tensor::noise(3, 6, 6, 56);
        let weights = LossWeights {
            content: 1e-2,
            style: 1.0,
            variation: 1e-2,
        };
        let composer = LossComposer::new(&net, &ctx, &content, &style, weights);

        let canvas = Tensor::noise(3, 6, 6, 57);
        let (_, analytic) = composer.evaluate(&net, &ctx, &canvas);

        let h = 1e-2;
        for &idx in &[3usize, 40, 71, 104] {
            let mut plus = canvas.clone();
            plus.as_mut_slice()[idx] += h;
            let mut minus = canvas.clone();
            minus.as_mut_slice()[idx] -= h;

            let (plus_terms, _) = composer.evaluate(&net, &ctx, &plus);
            let (minus_terms, _) = composer.evaluate(&net, &ctx, &minus);
            let numeric = (plus_terms.total() - minus_terms.total()) / (2.0 * h);

            let got = analytic.as_slice()[idx];
            assert!(
                (numeric - got).abs() < 5e-3 + 0.1 * numeric.abs(),
                "index {}: numeric {} vs analytic {}",
                idx,
                numeric,
                got
            );
        }
    }
}
