use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Glorot uniform limit for a `fan_out x fan_in` weight matrix.
pub fn xavier_uniform(rng: &mut StdRng, fan_in: usize, fan_out: usize) -> DMatrix<f32> {
    let limit = (6.0 / (fan_in + fan_out).max(1) as f32).sqrt();
    DMatrix::from_fn(fan_out, fan_in, |_, _| rng.gen_range(-limit..limit))
}

pub fn he_uniform(rng: &mut StdRng, fan_in: usize, fan_out: usize) -> DMatrix<f32> {
    let limit = (6.0 / fan_in.max(1) as f32).sqrt();
    DMatrix::from_fn(fan_out, fan_in, |_, _| rng.gen_range(-limit..limit))
}

pub fn zeros(rows: usize, cols: usize) -> DMatrix<f32> {
    DMatrix::zeros(rows, cols)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitializationMethod {
    XavierUniform,
    HeUniform,
}

impl InitializationMethod {
    pub fn initialize(&self, rng: &mut StdRng, fan_in: usize, fan_out: usize) -> DMatrix<f32> {
        match self {
            InitializationMethod::XavierUniform => xavier_uniform(rng, fan_in, fan_out),
            InitializationMethod::HeUniform => he_uniform(rng, fan_in, fan_out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_xavier_uniform_bounds_and_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        let weights = xavier_uniform(&mut rng, 40, 10);
        assert_eq!(weights.shape(), (10, 40));
        let limit = (6.0 / 50.0_f32).sqrt();
        assert!(weights.iter().all(|&w| w >= -limit && w <= limit));
    }

    #[test]
    fn test_seeded_initialization_is_reproducible() {
        let a = InitializationMethod::HeUniform.initialize(&mut StdRng::seed_from_u64(42), 8, 4);
        let b = InitializationMethod::HeUniform.initialize(&mut StdRng::seed_from_u64(42), 8, 4);
        assert_eq!(a, b);
    }
}
