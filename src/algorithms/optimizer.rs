use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Gradient-descent update rule over named parameter matrices.
pub trait Optimizer: Send + Sync {
    /// Marks the start of a new mini-batch step.
    fn begin_step(&mut self);
    fn update(&mut self, key: &str, params: &mut DMatrix<f32>, gradients: &DMatrix<f32>);
    fn reset(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Sgd,
    Adam,
}

impl OptimizerKind {
    pub fn build(&self, learning_rate: f64) -> Box<dyn Optimizer> {
        match self {
            OptimizerKind::Sgd => Box::new(SGD::new(learning_rate)),
            OptimizerKind::Adam => Box::new(Adam::with_learning_rate(learning_rate)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SGD {
    learning_rate: f64,
}

impl SGD {
    pub fn new(learning_rate: f64) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for SGD {
    fn begin_step(&mut self) {}

    fn update(&mut self, _key: &str, params: &mut DMatrix<f32>, gradients: &DMatrix<f32>) {
        *params -= gradients * self.learning_rate as f32;
    }

    fn reset(&mut self) {}
}

#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    t: i32,
    m: HashMap<String, DMatrix<f32>>,
    v: HashMap<String, DMatrix<f32>>,
}

impl Adam {
    pub fn new(learning_rate: f64, beta1: f64, beta2: f64, epsilon: f64) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            t: 0,
            m: HashMap::new(),
            v: HashMap::new(),
        }
    }

    pub fn with_learning_rate(learning_rate: f64) -> Self {
        Self::new(learning_rate, 0.9, 0.999, 1e-7)
    }
}

impl Default for Adam {
    fn default() -> Self {
        Self::with_learning_rate(0.001)
    }
}

impl Optimizer for Adam {
    fn begin_step(&mut self) {
        self.t += 1;
    }

    fn update(&mut self, key: &str, params: &mut DMatrix<f32>, gradients: &DMatrix<f32>) {
        let t = self.t.max(1);
        let (rows, cols) = params.shape();
        let m = self
            .m
            .entry(key.to_string())
            .or_insert_with(|| DMatrix::zeros(rows, cols));
        let v = self
            .v
            .entry(key.to_string())
            .or_insert_with(|| DMatrix::zeros(rows, cols));

        // Biased first and second moment estimates
        *m = m.scale(self.beta1 as f32) + gradients.scale(1.0 - self.beta1 as f32);
        *v = v.scale(self.beta2 as f32)
            + gradients.component_mul(gradients).scale(1.0 - self.beta2 as f32);

        let m_hat = m.scale(1.0 / (1.0 - (self.beta1 as f32).powi(t)));
        let v_hat = v.scale(1.0 / (1.0 - (self.beta2 as f32).powi(t)));

        let denominator = v_hat.map(|x| x.sqrt() + self.epsilon as f32);
        let update = m_hat.component_div(&denominator).scale(self.learning_rate as f32);

        *params -= update;
    }

    fn reset(&mut self) {
        self.t = 0;
        self.m.clear();
        self.v.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sgd_step() {
        let mut sgd = SGD::new(0.1);
        let mut params = DMatrix::from_row_slice(1, 2, &[1.0, 2.0]);
        let grads = DMatrix::from_row_slice(1, 2, &[1.0, -1.0]);
        sgd.begin_step();
        sgd.update("w", &mut params, &grads);
        assert!((params[(0, 0)] - 0.9).abs() < 1e-6);
        assert!((params[(0, 1)] - 2.1).abs() < 1e-6);
    }

    #[test]
    fn test_adam_first_step_moves_by_learning_rate() {
        let mut adam = Adam::with_learning_rate(0.01);
        let mut params = DMatrix::from_row_slice(1, 2, &[0.0, 0.0]);
        let grads = DMatrix::from_row_slice(1, 2, &[5.0, -0.5]);
        adam.begin_step();
        adam.update("w", &mut params, &grads);
        // bias-corrected first step is lr * sign(g)
        assert!((params[(0, 0)] + 0.01).abs() < 1e-4);
        assert!((params[(0, 1)] - 0.01).abs() < 1e-4);
    }

    #[test]
    fn test_adam_keys_are_independent() {
        let mut adam = Adam::default();
        let mut a = DMatrix::from_element(2, 2, 1.0);
        let mut b = DMatrix::from_element(3, 1, 1.0);
        adam.begin_step();
        adam.update("a", &mut a, &DMatrix::from_element(2, 2, 1.0));
        adam.update("b", &mut b, &DMatrix::from_element(3, 1, -1.0));
        assert!(a[(0, 0)] < 1.0);
        assert!(b[(0, 0)] > 1.0);
    }
}
