use crate::tensor::Tensor;

/// Adaptive first-order optimizer state for the canvas.
///
/// Maintains exponential moving averages of the gradient (decay `beta1`)
/// and its square (decay `beta2`), bias-corrects both, and steps each
/// element opposite the gradient scaled by `learning_rate` over the root of
/// the second-moment estimate plus a small stability constant.
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    timestep: u32,
    first_moment: Vec<f32>,
    second_moment: Vec<f32>,
}

impl Adam {
    pub fn new(len: usize, learning_rate: f32) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            timestep: 0,
            first_moment: vec![0.0; len],
            second_moment: vec![0.0; len],
        }
    }

    /// Applies one update step to `params` in place.
    pub fn step(&mut self, params: &mut Tensor, gradient: &Tensor) {
        debug_assert!(params.same_shape(gradient));
        self.timestep += 1;

        let bias1 = 1.0 - self.beta1.powi(self.timestep as i32);
        let bias2 = 1.0 - self.beta2.powi(self.timestep as i32);

        let grads = gradient.as_slice();
        for (i, p) in params.as_mut_slice().iter_mut().enumerate() {
            let g = grads[i];

            let m = self.beta1 * self.first_moment[i] + (1.0 - self.beta1) * g;
            let v = self.beta2 * self.second_moment[i] + (1.0 - self.beta2) * g * g;
            self.first_moment[i] = m;
            self.second_moment[i] = v;

            let m_hat = m / bias1;
            let v_hat = v / bias2;

            *p -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
        }
    }
}
