//! Linear models: least squares (plain, ridge, lasso) and multinomial
//! logistic regression

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use super::config::{LinearKind, LinearParams};
use crate::error::{MlError, Result};

/// Solve the symmetric positive-definite system `a x = b` by Cholesky
/// decomposition, adding diagonal jitter when `a` is near-singular.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return None;
    }
    let scale = a.diag().iter().map(|v| v.abs()).sum::<f64>() / n.max(1) as f64;
    for ridge in [0.0, 1e-10, 1e-8, 1e-6] {
        let mut reg = a.clone();
        for k in 0..n {
            reg[[k, k]] += ridge * scale.max(1.0);
        }
        if let Some(x) = cholesky_solve_once(&reg, b) {
            return Some(x);
        }
    }
    None
}

fn cholesky_solve_once(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[[i, k]] * l[[j, k]]).sum();
            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 0.0 {
                    return None;
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // L y = b
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let sum: f64 = (0..i).map(|j| l[[i, j]] * y[j]).sum();
        y[i] = (b[i] - sum) / l[[i, i]];
    }
    // L^T x = y
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let sum: f64 = ((i + 1)..n).map(|j| l[[j, i]] * x[j]).sum();
        x[i] = (y[i] - sum) / l[[i, i]];
    }
    Some(x)
}

fn soft_threshold(val: f64, threshold: f64) -> f64 {
    if val > threshold {
        val - threshold
    } else if val < -threshold {
        val + threshold
    } else {
        0.0
    }
}

fn check_rows(x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
    if x.nrows() != y.len() {
        return Err(MlError::ShapeError {
            expected: format!("y length = {}", x.nrows()),
            actual: format!("y length = {}", y.len()),
        });
    }
    if x.nrows() == 0 {
        return Err(MlError::ValidationError("Cannot fit on an empty dataset".to_string()));
    }
    Ok(())
}

/// Least-squares regression with optional L2 (ridge) or L1 (lasso) penalty
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearRegressor {
    params: LinearParams,
    coefficients: Option<Array1<f64>>,
    intercept: f64,
}

impl LinearRegressor {
    pub fn new(params: LinearParams) -> Self {
        Self {
            params,
            coefficients: None,
            intercept: 0.0,
        }
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_rows(x, y)?;
        let x_mean = x.mean_axis(Axis(0)).ok_or(MlError::ModelNotFitted)?;
        let y_mean = y.mean().unwrap_or(0.0);
        let x_c = x - &x_mean.view().insert_axis(Axis(0));
        let y_c = y - y_mean;

        let w = match self.params.model_type {
            LinearKind::Simple => self.solve_normal(&x_c, &y_c, 0.0)?,
            LinearKind::Ridge => self.solve_normal(&x_c, &y_c, self.params.alpha)?,
            LinearKind::Lasso => self.coordinate_descent(&x_c, &y_c),
        };

        self.intercept = y_mean - w.dot(&x_mean);
        self.coefficients = Some(w);
        Ok(())
    }

    fn solve_normal(&self, x_c: &Array2<f64>, y_c: &Array1<f64>, alpha: f64) -> Result<Array1<f64>> {
        let mut xtx = x_c.t().dot(x_c);
        for k in 0..xtx.nrows() {
            xtx[[k, k]] += alpha;
        }
        let xty = x_c.t().dot(y_c);
        cholesky_solve(&xtx, &xty).ok_or_else(|| {
            MlError::ValidationError("Linear system is singular; try ridge regularization".to_string())
        })
    }

    /// Coordinate descent on `1/(2n) ||y - Xw||² + alpha ||w||₁`
    fn coordinate_descent(&self, x_c: &Array2<f64>, y_c: &Array1<f64>) -> Array1<f64> {
        let n_samples = x_c.nrows() as f64;
        let n_features = x_c.ncols();
        let col_norms: Vec<f64> = (0..n_features)
            .map(|j| x_c.column(j).mapv(|v| v * v).sum())
            .collect();
        let lambda = self.params.alpha * n_samples;

        let mut w = Array1::<f64>::zeros(n_features);
        let mut r = y_c.clone();
        for _ in 0..self.params.max_iter {
            let mut max_delta: f64 = 0.0;
            for j in 0..n_features {
                if col_norms[j] < 1e-15 {
                    continue;
                }
                let rho = x_c.column(j).dot(&r) + col_norms[j] * w[j];
                let new_wj = soft_threshold(rho, lambda) / col_norms[j];
                let delta = new_wj - w[j];
                if delta != 0.0 {
                    r.scaled_add(-delta, &x_c.column(j));
                    w[j] = new_wj;
                    max_delta = max_delta.max(delta.abs());
                }
            }
            if max_delta < 1e-8 {
                break;
            }
        }
        w
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let w = self.coefficients.as_ref().ok_or(MlError::ModelNotFitted)?;
        Ok(x.dot(w) + self.intercept)
    }

    pub fn coefficients(&self) -> Option<&Array1<f64>> {
        self.coefficients.as_ref()
    }
}

/// Multinomial logistic regression with L2 penalty `1 / C = alpha`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticClassifier {
    params: LinearParams,
    /// `(n_classes, n_features)` in standardized feature space
    weights: Option<Array2<f64>>,
    bias: Array1<f64>,
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl LogisticClassifier {
    const LEARNING_RATE: f64 = 0.5;

    pub fn new(params: LinearParams) -> Self {
        Self {
            params,
            weights: None,
            bias: Array1::zeros(0),
            mean: Array1::zeros(0),
            scale: Array1::zeros(0),
        }
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_rows(x, y)?;
        let n = x.nrows();
        let n_classes = y.iter().map(|v| v.round() as usize).max().unwrap_or(0) + 1;
        let n_classes = n_classes.max(2);

        self.mean = x.mean_axis(Axis(0)).ok_or(MlError::ModelNotFitted)?;
        self.scale = x.std_axis(Axis(0), 0.0).mapv(|s| if s > 1e-12 { s } else { 1.0 });
        let xs = (x - &self.mean.view().insert_axis(Axis(0))) / &self.scale.view().insert_axis(Axis(0));

        let mut onehot = Array2::<f64>::zeros((n, n_classes));
        for (i, v) in y.iter().enumerate() {
            onehot[[i, (v.round().max(0.0) as usize).min(n_classes - 1)]] = 1.0;
        }

        let penalty = self.params.alpha / n as f64;
        let mut w = Array2::<f64>::zeros((n_classes, x.ncols()));
        let mut b = Array1::<f64>::zeros(n_classes);

        for _ in 0..self.params.max_iter {
            let logits = xs.dot(&w.t()) + &b.view().insert_axis(Axis(0));
            let proba = softmax_rows(&logits);
            let err = (&proba - &onehot) / n as f64;
            let grad_w = err.t().dot(&xs) + &(&w * penalty);
            let grad_b = err.sum_axis(Axis(0));
            w.scaled_add(-Self::LEARNING_RATE, &grad_w);
            b.scaled_add(-Self::LEARNING_RATE, &grad_b);
            let step = grad_w.iter().chain(grad_b.iter()).fold(0.0f64, |m, g| m.max(g.abs()));
            if step < 1e-6 {
                break;
            }
        }

        self.weights = Some(w);
        self.bias = b;
        Ok(())
    }

    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let w = self.weights.as_ref().ok_or(MlError::ModelNotFitted)?;
        let xs = (x - &self.mean.view().insert_axis(Axis(0))) / &self.scale.view().insert_axis(Axis(0));
        let logits = xs.dot(&w.t()) + &self.bias.view().insert_axis(Axis(0));
        Ok(softmax_rows(&logits))
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let proba = self.predict_proba(x)?;
        Ok(proba
            .rows()
            .into_iter()
            .map(|row| super::knn::argmax(row) as f64)
            .collect())
    }

    /// Coefficients in original feature units, one row per class
    pub fn coefficients(&self) -> Option<Array2<f64>> {
        self.weights
            .as_ref()
            .map(|w| w / &self.scale.view().insert_axis(Axis(0)))
    }
}

pub(crate) fn softmax_rows(logits: &Array2<f64>) -> Array2<f64> {
    let mut out = logits.clone();
    for mut row in out.rows_mut() {
        let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        if sum > 0.0 {
            row.mapv_inplace(|v| v / sum);
        }
    }
    out
}
