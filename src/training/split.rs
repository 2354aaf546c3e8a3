//! Train/test partitioning

use ndarray::{Array, Axis, RemoveAxis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{MlError, Result};

/// Share of samples held out for testing, validated to lie in `(0, 1)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct TestFraction(f64);

impl TestFraction {
    pub fn new(fraction: f64) -> Result<Self> {
        if fraction.is_finite() && fraction > 0.0 && fraction < 1.0 {
            Ok(Self(fraction))
        } else {
            Err(MlError::ValidationError(format!(
                "test_size must be between 0 and 1 (exclusive), got {}",
                fraction
            )))
        }
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Number of test samples out of `n_samples`, rounded up
    pub fn test_count(&self, n_samples: usize) -> usize {
        (self.0 * n_samples as f64).ceil() as usize
    }
}

impl Default for TestFraction {
    fn default() -> Self {
        Self(0.2)
    }
}

impl TryFrom<f64> for TestFraction {
    type Error = MlError;

    fn try_from(value: f64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<TestFraction> for f64 {
    fn from(fraction: TestFraction) -> Self {
        fraction.0
    }
}

/// Row indices of each side of a split
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Rows of a split, in `(x_train, x_test, y_train, y_test)` order
pub type Split<A, D, B, E> = (Array<A, D>, Array<A, D>, Array<B, E>, Array<B, E>);

/// Uniform random train/test splitter
#[derive(Debug, Clone, Default)]
pub struct Splitter {
    test_fraction: TestFraction,
    random_state: Option<u64>,
}

impl Splitter {
    pub fn new(test_fraction: TestFraction) -> Self {
        Self {
            test_fraction,
            random_state: None,
        }
    }

    /// Seed the shuffle so repeated splits agree
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    /// Shuffled index partition for `n_samples` rows
    pub fn indices(&self, n_samples: usize) -> Result<SplitIndices> {
        let n_test = self.test_fraction.test_count(n_samples);
        if n_test == 0 || n_test >= n_samples {
            return Err(MlError::ValidationError(format!(
                "Cannot split {} samples with test_size {}: both sides need at least one sample",
                n_samples,
                self.test_fraction.value()
            )));
        }

        let mut indices: Vec<usize> = (0..n_samples).collect();
        let mut rng = match self.random_state {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        indices.shuffle(&mut rng);

        let train = indices.split_off(n_test);
        Ok(SplitIndices { train, test: indices })
    }

    /// Split features and labels along their first axis with one shared
    /// row selection.
    pub fn split<A, D, B, E>(&self, x: &Array<A, D>, y: &Array<B, E>) -> Result<Split<A, D, B, E>>
    where
        A: Clone,
        B: Clone,
        D: RemoveAxis,
        E: RemoveAxis,
    {
        let n = x.len_of(Axis(0));
        if y.len_of(Axis(0)) != n {
            return Err(MlError::ShapeError {
                expected: format!("{} labels", n),
                actual: format!("{} labels", y.len_of(Axis(0))),
            });
        }
        let SplitIndices { train, test } = self.indices(n)?;
        Ok((
            x.select(Axis(0), &train),
            x.select(Axis(0), &test),
            y.select(Axis(0), &train),
            y.select(Axis(0), &test),
        ))
    }
}

/// Split with a validated fraction and optional seed
pub fn split<A, D, B, E>(
    x: &Array<A, D>,
    y: &Array<B, E>,
    test_fraction: TestFraction,
    random_state: Option<u64>,
) -> Result<Split<A, D, B, E>>
where
    A: Clone,
    B: Clone,
    D: RemoveAxis,
    E: RemoveAxis,
{
    let mut splitter = Splitter::new(test_fraction);
    if let Some(seed) = random_state {
        splitter = splitter.with_random_state(seed);
    }
    splitter.split(x, y)
}
