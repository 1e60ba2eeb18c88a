//! Optimizers for training the pairwise scoring networks.

use std::collections::HashMap;

use ndarray::{Array1, Array2};

use crate::config::{OptimizerConfig, OptimizerKind};

/// Stochastic Gradient Descent with momentum and optional Nesterov lookahead.
///
/// Implements the update rule:
/// ```text
/// velocity = momentum * velocity + learning_rate * gradient
/// parameter = parameter - velocity
/// ```
/// With Nesterov enabled the applied step is
/// `momentum * velocity + learning_rate * gradient` instead of the velocity.
pub struct SgdOptimizer {
    pub learning_rate: f32,
    pub momentum: f32,
    pub nesterov: bool,
    velocities: HashMap<String, Vec<f32>>,
}

impl SgdOptimizer {
    pub fn new(learning_rate: f32, momentum: f32, nesterov: bool) -> Self {
        Self {
            learning_rate,
            momentum,
            nesterov,
            velocities: HashMap::new(),
        }
    }

    fn step_slice(&mut self, name: &str, param: &mut [f32], grad: &[f32], weight_decay: f32) {
        let velocity = self
            .velocities
            .entry(name.to_string())
            .or_insert_with(|| vec![0.0; param.len()]);
        for ((p, &g), v) in param.iter_mut().zip(grad.iter()).zip(velocity.iter_mut()) {
            let g = g + weight_decay * *p;
            *v = self.momentum * *v + self.learning_rate * g;
            if self.nesterov {
                *p -= self.momentum * *v + self.learning_rate * g;
            } else {
                *p -= *v;
            }
        }
    }
}

/// Adam optimizer (Adaptive Moment Estimation) with per-parameter step counts.
pub struct AdamOptimizer {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    first_moments: HashMap<String, Vec<f32>>,
    second_moments: HashMap<String, Vec<f32>>,
    steps: HashMap<String, usize>,
}

impl AdamOptimizer {
    pub fn new(learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            first_moments: HashMap::new(),
            second_moments: HashMap::new(),
            steps: HashMap::new(),
        }
    }

    fn step_slice(&mut self, name: &str, param: &mut [f32], grad: &[f32], weight_decay: f32) {
        let t = {
            let counter = self.steps.entry(name.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };
        let m = self
            .first_moments
            .entry(name.to_string())
            .or_insert_with(|| vec![0.0; param.len()]);
        let v = self
            .second_moments
            .entry(name.to_string())
            .or_insert_with(|| vec![0.0; param.len()]);

        let bias1 = 1.0 - self.beta1.powi(t as i32);
        let bias2 = 1.0 - self.beta2.powi(t as i32);

        for (((p, &g), m), v) in param
            .iter_mut()
            .zip(grad.iter())
            .zip(m.iter_mut())
            .zip(v.iter_mut())
        {
            let g = g + weight_decay * *p;
            *m = self.beta1 * *m + (1.0 - self.beta1) * g;
            *v = self.beta2 * *v + (1.0 - self.beta2) * g * g;
            let m_hat = *m / bias1;
            let v_hat = *v / bias2;
            *p -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
        }
    }
}

/// Optimizer selected by [`OptimizerConfig`]
pub enum Optimizer {
    Sgd(SgdOptimizer),
    Adam(AdamOptimizer),
}

impl Optimizer {
    pub fn from_config(config: &OptimizerConfig) -> Self {
        match config.kind {
            OptimizerKind::Sgd => Optimizer::Sgd(SgdOptimizer::new(
                config.learning_rate,
                config.momentum,
                config.nesterov,
            )),
            OptimizerKind::Adam => Optimizer::Adam(AdamOptimizer::new(
                config.learning_rate,
                config.beta1,
                config.beta2,
                config.epsilon,
            )),
        }
    }

    pub fn learning_rate(&self) -> f32 {
        match self {
            Optimizer::Sgd(opt) => opt.learning_rate,
            Optimizer::Adam(opt) => opt.learning_rate,
        }
    }

    /// Update a vector parameter using its accumulated gradient
    pub fn step1(&mut self, name: &str, param: &mut Array1<f32>, grad: &Array1<f32>, decay: f32) {
        let param = param.as_slice_mut().expect("contiguous");
        let grad = grad.as_standard_layout();
        let grad = grad.as_slice().expect("standard layout");
        match self {
            Optimizer::Sgd(opt) => opt.step_slice(name, param, grad, decay),
            Optimizer::Adam(opt) => opt.step_slice(name, param, grad, decay),
        }
    }

    /// Update a matrix parameter using its accumulated gradient
    pub fn step2(&mut self, name: &str, param: &mut Array2<f32>, grad: &Array2<f32>, decay: f32) {
        let param = param.as_slice_mut().expect("contiguous");
        let grad = grad.as_standard_layout();
        let grad = grad.as_slice().expect("standard layout");
        match self {
            Optimizer::Sgd(opt) => opt.step_slice(name, param, grad, decay),
            Optimizer::Adam(opt) => opt.step_slice(name, param, grad, decay),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sgd_moves_parameter_against_gradient() {
        let mut optimizer = Optimizer::Sgd(SgdOptimizer::new(0.1, 0.0, false));
        let mut param = Array1::from_vec(vec![1.0, -1.0]);
        let grad = Array1::from_vec(vec![0.5, -0.5]);

        optimizer.step1("weight", &mut param, &grad, 0.0);

        assert!((param[0] - 0.95).abs() < 1e-6);
        assert!((param[1] + 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_sgd_momentum_accumulates() {
        let mut optimizer = Optimizer::Sgd(SgdOptimizer::new(0.1, 0.9, false));
        let mut param = Array1::from_vec(vec![0.0]);
        let grad = Array1::from_vec(vec![1.0]);

        optimizer.step1("w", &mut param, &grad, 0.0);
        let first_step = -param[0];
        optimizer.step1("w", &mut param, &grad, 0.0);
        let second_step = -param[0] - first_step;

        // Velocity carries over, so the second step exceeds the first
        assert!(second_step > first_step);
    }

    #[test]
    fn test_adam_step_is_bounded_by_learning_rate() {
        let mut optimizer = Optimizer::Adam(AdamOptimizer::new(0.01, 0.9, 0.999, 1e-8));
        let mut param = Array1::from_vec(vec![1.0]);
        let grad = Array1::from_vec(vec![100.0]);

        optimizer.step1("w", &mut param, &grad, 0.0);

        // Adam normalizes by the gradient magnitude
        assert!((1.0 - param[0]).abs() < 0.02);
    }

    #[test]
    fn test_weight_decay_shrinks_parameter() {
        let mut optimizer = Optimizer::Sgd(SgdOptimizer::new(0.1, 0.0, false));
        let mut param = Array1::from_vec(vec![2.0]);
        let grad = Array1::from_vec(vec![0.0]);

        optimizer.step1("w", &mut param, &grad, 0.5);

        assert!(param[0] < 2.0);
    }

    #[test]
    fn test_separate_parameters_have_separate_state() {
        let mut optimizer = Optimizer::Sgd(SgdOptimizer::new(0.1, 0.9, false));
        let mut a = Array1::from_vec(vec![0.0]);
        let mut b = Array1::from_vec(vec![0.0]);
        let grad = Array1::from_vec(vec![1.0]);

        optimizer.step1("a", &mut a, &grad, 0.0);
        optimizer.step1("b", &mut b, &grad, 0.0);

        assert!((a[0] - b[0]).abs() < 1e-7);
    }
}
