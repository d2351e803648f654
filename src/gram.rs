use crate::tensor::Tensor;

/// Channel-correlation matrix of an activation map.
///
/// Entry (i, j) is the inner product of channel i and channel j across all
/// spatial positions. Spatial arrangement is discarded entirely, which is
/// what makes the matrix a texture signature rather than a content one.
#[derive(Clone, Debug, PartialEq)]
pub struct GramMatrix {
    channels: usize,
    data: Vec<f32>,
}

impl GramMatrix {
    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f32 {
        self.data[i * self.channels + j]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// Computes `F · Fᵗ` for the feature map reshaped to (channels, positions).
///
/// The result is symmetric, so only the upper triangle is computed and then
/// mirrored.
pub fn gram(map: &Tensor) -> GramMatrix {
    let channels = map.channels();
    let mut data = vec![0.0; channels * channels];

    for i in 0..channels {
        let row_i = map.plane(i);
        for j in i..channels {
            let row_j = map.plane(j);
            let dot: f32 = row_i.iter().zip(row_j.iter()).map(|(a, b)| a * b).sum();
            data[i * channels + j] = dot;
            data[j * channels + i] = dot;
        }
    }

    GramMatrix { channels, data }
}
