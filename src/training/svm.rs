//! Support Vector Machine implementations
//!
//! Kernel SVM trained by dual coordinate descent. The bias is folded into
//! the kernel (`K(x, y) + 1`), so each dual variable can be updated in
//! closed form without the pairwise SMO step. Classification is
//! one-vs-rest; regression uses the epsilon-insensitive loss.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::config::{Kernel, ProblemType, SvmParams};
use super::linear_models::softmax_rows;
use crate::error::{MlError, Result};

/// Beyond this the dense kernel matrix does not fit in memory comfortably.
const MAX_KERNEL_MATRIX_SAMPLES: usize = 10_000;
const TOLERANCE: f64 = 1e-3;

/// Kernel function with its coefficients resolved against the training data
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct KernelFn {
    kind: Kernel,
    gamma: f64,
    degree: u32,
    coef0: f64,
}

impl KernelFn {
    fn eval(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        match self.kind {
            Kernel::Linear => a.dot(&b),
            Kernel::Poly => (self.gamma * a.dot(&b) + self.coef0).powi(self.degree as i32),
            Kernel::Rbf => {
                let sq: f64 = a.iter().zip(b.iter()).map(|(p, q)| (p - q).powi(2)).sum();
                (-self.gamma * sq).exp()
            }
            Kernel::Sigmoid => (self.gamma * a.dot(&b) + self.coef0).tanh(),
        }
    }

    /// Kernel with the absorbed bias term
    fn eval_biased(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        self.eval(a, b) + 1.0
    }

    fn matrix(&self, x: &Array2<f64>) -> Array2<f64> {
        let n = x.nrows();
        let rows: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|i| (0..n).map(|j| self.eval_biased(x.row(i), x.row(j))).collect())
            .collect();
        Array2::from_shape_vec((n, n), rows.into_iter().flatten().collect())
            .unwrap_or_else(|_| Array2::zeros((n, n)))
    }
}

/// Fitted support vector machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SvmModel {
    params: SvmParams,
    problem_type: ProblemType,
    kernel: Option<KernelFn>,
    support_vectors: Array2<f64>,
    /// One row per machine (one per class, or a single row for regression),
    /// one column per support vector
    dual_coef: Array2<f64>,
    n_classes: usize,
}

impl SvmModel {
    pub fn new(params: SvmParams, problem_type: ProblemType) -> Self {
        Self {
            params,
            problem_type,
            kernel: None,
            support_vectors: Array2::zeros((0, 0)),
            dual_coef: Array2::zeros((0, 0)),
            n_classes: 0,
        }
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let n = x.nrows();
        if n == 0 || n != y.len() {
            return Err(MlError::ValidationError(format!(
                "SVM needs matching, non-empty inputs (x rows = {}, y = {})",
                n,
                y.len()
            )));
        }
        if n > MAX_KERNEL_MATRIX_SAMPLES {
            return Err(MlError::ValidationError(format!(
                "SVM training supports at most {} samples, got {}",
                MAX_KERNEL_MATRIX_SAMPLES, n
            )));
        }

        let variance = x.iter().copied().collect::<Array1<f64>>().var(0.0);
        let kernel = KernelFn {
            kind: self.params.kernel,
            gamma: self.params.gamma.resolve(x.ncols(), variance),
            degree: self.params.degree,
            coef0: self.params.coef0,
        };
        let gram = kernel.matrix(x);
        let mut rng = match self.params.random_state {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        let machines: Vec<Array1<f64>> = match self.problem_type {
            ProblemType::Classification => {
                self.n_classes = y.iter().map(|v| v.round().max(0.0) as usize).max().unwrap_or(0) + 1;
                (0..self.n_classes)
                    .map(|class| {
                        let signs = y.mapv(|v| if v.round() as usize == class { 1.0 } else { -1.0 });
                        let alpha = self.hinge_dual(&gram, &signs, &mut rng);
                        alpha * &signs
                    })
                    .collect()
            }
            ProblemType::Regression => {
                self.n_classes = 0;
                vec![self.epsilon_dual(&gram, y, &mut rng)]
            }
        };

        let support: Vec<usize> = (0..n)
            .filter(|&i| machines.iter().any(|m| m[i].abs() > 1e-12))
            .collect();
        self.support_vectors = x.select(Axis(0), &support);
        self.dual_coef = Array2::from_shape_fn((machines.len(), support.len()), |(m, s)| machines[m][support[s]]);
        self.kernel = Some(kernel);

        debug!(
            samples = n,
            support_vectors = support.len(),
            machines = machines.len(),
            "Fitted SVM"
        );
        Ok(())
    }

    /// Hinge-loss dual for one binary problem; returns alpha in `[0, C]`
    fn hinge_dual(&self, gram: &Array2<f64>, signs: &Array1<f64>, rng: &mut ChaCha8Rng) -> Array1<f64> {
        let n = signs.len();
        let c = self.params.c;
        let mut alpha = Array1::<f64>::zeros(n);
        // f_i = sum_j alpha_j y_j K'_ij
        let mut f = Array1::<f64>::zeros(n);
        let mut order: Vec<usize> = (0..n).collect();

        for _ in 0..self.params.max_iter {
            order.shuffle(rng);
            let mut max_step: f64 = 0.0;
            for &i in &order {
                let kii = gram[[i, i]].max(1e-12);
                let grad = signs[i] * f[i] - 1.0;
                let updated = (alpha[i] - grad / kii).clamp(0.0, c);
                let delta = updated - alpha[i];
                if delta.abs() > 1e-12 {
                    alpha[i] = updated;
                    f.scaled_add(delta * signs[i], &gram.column(i));
                    max_step = max_step.max(delta.abs());
                }
            }
            if max_step < TOLERANCE * c.min(1.0) {
                break;
            }
        }
        alpha
    }

    /// Epsilon-insensitive dual; returns beta in `[-C, C]`
    fn epsilon_dual(&self, gram: &Array2<f64>, y: &Array1<f64>, rng: &mut ChaCha8Rng) -> Array1<f64> {
        let n = y.len();
        let c = self.params.c;
        let eps = self.params.epsilon;
        let mut beta = Array1::<f64>::zeros(n);
        let mut f = Array1::<f64>::zeros(n);
        let mut order: Vec<usize> = (0..n).collect();

        for _ in 0..self.params.max_iter {
            order.shuffle(rng);
            let mut max_step: f64 = 0.0;
            for &i in &order {
                let kii = gram[[i, i]].max(1e-12);
                let residual = y[i] - (f[i] - kii * beta[i]);
                let updated = (soft(residual, eps) / kii).clamp(-c, c);
                let delta = updated - beta[i];
                if delta.abs() > 1e-12 {
                    beta[i] = updated;
                    f.scaled_add(delta, &gram.column(i));
                    max_step = max_step.max(delta.abs());
                }
            }
            if max_step < TOLERANCE * c.min(1.0) {
                break;
            }
        }
        beta
    }

    /// Raw decision values, one column per machine
    pub fn decision_function(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let kernel = self.kernel.ok_or(MlError::ModelNotFitted)?;
        let n_sv = self.support_vectors.nrows();
        let machines = self.dual_coef.nrows();
        let rows: Vec<f64> = (0..x.nrows())
            .into_par_iter()
            .flat_map_iter(|i| {
                let k: Array1<f64> = (0..n_sv)
                    .map(|s| kernel.eval_biased(x.row(i), self.support_vectors.row(s)))
                    .collect();
                (0..machines)
                    .map(|m| self.dual_coef.row(m).dot(&k))
                    .collect::<Vec<f64>>()
            })
            .collect();
        Ok(Array2::from_shape_vec((x.nrows(), machines), rows)?)
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let scores = self.decision_function(x)?;
        Ok(match self.problem_type {
            ProblemType::Classification => scores
                .rows()
                .into_iter()
                .map(|row| super::knn::argmax(row) as f64)
                .collect(),
            ProblemType::Regression => scores.column(0).to_owned(),
        })
    }

    /// Softmax over the one-vs-rest decision values
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.problem_type != ProblemType::Classification {
            return Err(MlError::ValidationError(
                "Probabilities are only available for classification".to_string(),
            ));
        }
        Ok(softmax_rows(&self.decision_function(x)?))
    }

    /// Primal weights, only defined for the linear kernel. One row per
    /// machine.
    pub fn coefficients(&self) -> Option<Array2<f64>> {
        match self.kernel {
            Some(k) if k.kind == Kernel::Linear => Some(self.dual_coef.dot(&self.support_vectors)),
            _ => None,
        }
    }

    pub fn n_support_vectors(&self) -> usize {
        self.support_vectors.nrows()
    }
}

fn soft(v: f64, threshold: f64) -> f64 {
    if v > threshold {
        v - threshold
    } else if v < -threshold {
        v + threshold
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::config::Gamma;
    use ndarray::array;

    fn separable() -> (Array2<f64>, Array1<f64>) {
        let x = array![
            [1.0, 1.0],
            [1.5, 2.0],
            [2.0, 1.0],
            [6.0, 5.0],
            [7.0, 7.0],
            [6.5, 6.0]
        ];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        (x, y)
    }

    fn params(kernel: Kernel) -> SvmParams {
        SvmParams {
            kernel,
            random_state: Some(7),
            ..Default::default()
        }
    }

    #[test]
    fn test_svm_classifier_linear() {
        let (x, y) = separable();
        let mut svm = SvmModel::new(params(Kernel::Linear), ProblemType::Classification);
        svm.fit(&x, &y).unwrap();
        assert_eq!(svm.predict(&x).unwrap(), y);
        assert!(svm.n_support_vectors() > 0);

        let coef = svm.coefficients().unwrap();
        assert_eq!(coef.dim(), (2, 2));
        // class 1 machine leans towards larger feature values
        assert!(coef[[1, 0]] + coef[[1, 1]] > 0.0);
    }

    #[test]
    fn test_svm_classifier_rbf_multiclass() {
        let x = array![[0.0, 0.0], [0.2, 0.1], [5.0, 5.0], [5.1, 4.9], [0.0, 5.0], [0.1, 5.2]];
        let y = array![0.0, 0.0, 1.0, 1.0, 2.0, 2.0];
        let mut svm = SvmModel::new(
            SvmParams {
                gamma: Gamma::Value(0.5),
                c: 10.0,
                ..params(Kernel::Rbf)
            },
            ProblemType::Classification,
        );
        svm.fit(&x, &y).unwrap();
        assert_eq!(svm.predict(&x).unwrap(), y);
        assert!(svm.coefficients().is_none());

        let proba = svm.predict_proba(&x).unwrap();
        for row in proba.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_svm_regressor() {
        let x = Array2::from_shape_fn((20, 1), |(i, _)| i as f64 / 4.0);
        let y = x.column(0).mapv(|v| 2.0 * v + 1.0);
        let mut svm = SvmModel::new(
            SvmParams {
                c: 100.0,
                epsilon: 0.01,
                max_iter: 5000,
                ..params(Kernel::Linear)
            },
            ProblemType::Regression,
        );
        svm.fit(&x, &y).unwrap();
        let pred = svm.predict(&array![[2.0]]).unwrap()[0];
        assert!((pred - 5.0).abs() < 0.5, "prediction {pred}");
        assert!(svm.predict_proba(&x).is_err());
    }

    #[test]
    fn test_unfitted() {
        let svm = SvmModel::new(SvmParams::default(), ProblemType::Classification);
        assert!(matches!(svm.predict(&array![[1.0]]), Err(MlError::ModelNotFitted)));
    }
}
