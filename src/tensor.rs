use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;

/// A dense (channels, height, width) tensor of `f32` values.
///
/// Activation maps, the canvas under optimization and its gradient are all
/// stored in this layout: channel-major planes of row-major pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    channels: usize,
    height: usize,
    width: usize,
    data: Vec<f32>,
}

impl Tensor {
    pub fn zeros(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
            data: vec![0.0; channels * height * width],
        }
    }

    pub fn from_data(channels: usize, height: usize, width: usize, data: Vec<f32>) -> Self {
        assert_eq!(data.len(), channels * height * width);
        Self {
            channels,
            height,
            width,
            data,
        }
    }

    /// Fills a new tensor with uniform noise in [-1, 1), deterministically
    /// derived from `seed`.
    pub fn noise(channels: usize, height: usize, width: usize, seed: u64) -> Self {
        let mut rng = Pcg32::seed_from_u64(seed);
        let data = (0..channels * height * width)
            .map(|_| rng.gen_range(-1.0..1.0))
            .collect();
        Self {
            channels,
            height,
            width,
            data,
        }
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of spatial positions in one channel plane.
    #[inline]
    pub fn plane_len(&self) -> usize {
        self.height * self.width
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn get(&self, c: usize, y: usize, x: usize) -> f32 {
        self.data[(c * self.height + y) * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, c: usize, y: usize, x: usize, value: f32) {
        self.data[(c * self.height + y) * self.width + x] = value;
    }

    #[inline]
    pub fn plane(&self, c: usize) -> &[f32] {
        let len = self.plane_len();
        &self.data[c * len..(c + 1) * len]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn same_shape(&self, other: &Self) -> bool {
        self.channels == other.channels
            && self.height == other.height
            && self.width == other.width
    }

    /// `self += scale * other`, elementwise.
    pub fn add_scaled(&mut self, other: &Self, scale: f32) {
        debug_assert!(self.same_shape(other));
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += scale * b;
        }
    }
}

#[cfg(test)]
mod test {
    use super::Tensor;

    #[test]
    fn noise_is_deterministic_per_seed() {
        let a = Tensor::noise(3, 4, 4, 7);
        let b = Tensor::noise(3, 4, 4, 7);
        let c = Tensor::noise(3, 4, 4, 8);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_slice().iter().all(|v| (-1.0..1.0).contains(v)));
    }

    #[test]
    fn indexing_is_channel_major() {
        let mut t = Tensor::zeros(2, 2, 3);
        t.set(1, 1, 2, 5.0);

        assert_eq!(t.as_slice()[(1 * 2 + 1) * 3 + 2], 5.0);
        assert_eq!(t.get(1, 1, 2), 5.0);
        assert_eq!(t.plane(1)[1 * 3 + 2], 5.0);
    }

    #[test]
    fn add_scaled_accumulates() {
        let mut a = Tensor::from_data(1, 1, 2, vec![1.0, 2.0]);
        let b = Tensor::from_data(1, 1, 2, vec![10.0, 20.0]);
        a.add_scaled(&b, 0.5);

        assert_eq!(a.as_slice(), &[6.0, 12.0]);
    }
}
