//! Random data for the testing tier

use ndarray::{Array1, Array2, Array4};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::f64::consts::PI;

use super::config::ProblemType;
use crate::error::{MlError, Result};

/// Standard deviation of the noise added to synthetic regression targets
pub const REGRESSION_NOISE: f64 = 0.1;

/// Source of synthetic features, targets and images
#[derive(Debug, Clone)]
pub struct SyntheticData {
    rng: ChaCha8Rng,
}

impl SyntheticData {
    pub fn new() -> Self {
        Self {
            rng: ChaCha8Rng::from_entropy(),
        }
    }

    /// Set random seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    /// Uniform `[0, 1)` feature matrix
    pub fn features(&mut self, n_samples: usize, n_features: usize) -> Array2<f64> {
        Array2::from_shape_fn((n_samples, n_features), |_| self.rng.gen::<f64>())
    }

    /// Feature matrix plus targets.
    ///
    /// Classification labels are uniform over `0..n_classes`; regression
    /// targets are `X·w + N(0, 0.1)` with a random weight vector.
    pub fn tabular(
        &mut self,
        n_samples: usize,
        n_features: usize,
        problem_type: ProblemType,
        n_classes: usize,
    ) -> Result<(Array2<f64>, Array1<f64>)> {
        if n_samples == 0 || n_features == 0 {
            return Err(MlError::ValidationError(
                "num_samples and num_features must be at least 1".to_string(),
            ));
        }
        let x = self.features(n_samples, n_features);
        let y = match problem_type {
            ProblemType::Classification => {
                if n_classes < 2 {
                    return Err(MlError::ValidationError("num_classes must be at least 2".to_string()));
                }
                Array1::from_shape_fn(n_samples, |_| self.rng.gen_range(0..n_classes) as f64)
            }
            ProblemType::Regression => {
                let weights = Array1::from_shape_fn(n_features, |_| self.rng.gen::<f64>());
                let mut y = x.dot(&weights);
                y.mapv_inplace(|v| v + REGRESSION_NOISE * self.gaussian());
                y
            }
        };
        Ok((x, y))
    }

    /// Uniform `[0, 1)` RGB images
    pub fn image_batch(&mut self, n_images: usize, height: usize, width: usize) -> Array4<f32> {
        Array4::from_shape_fn((n_images, height, width, 3), |_| self.rng.gen::<f32>())
    }

    /// Random images with uniformly drawn labels
    pub fn images(
        &mut self,
        n_images: usize,
        height: usize,
        width: usize,
        n_classes: usize,
    ) -> Result<(Array4<f32>, Array1<usize>)> {
        if n_images == 0 || height == 0 || width == 0 {
            return Err(MlError::ValidationError(
                "num_samples and image size must be at least 1".to_string(),
            ));
        }
        if n_classes < 2 {
            return Err(MlError::ValidationError("num_classes must be at least 2".to_string()));
        }
        let x = self.image_batch(n_images, height, width);
        let y = Array1::from_shape_fn(n_images, |_| self.rng.gen_range(0..n_classes));
        Ok((x, y))
    }

    /// Box-Muller standard normal sample
    fn gaussian(&mut self) -> f64 {
        let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.gen();
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }
}

impl Default for SyntheticData {
    fn default() -> Self {
        Self::new()
    }
}
