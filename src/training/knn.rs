//! K-Nearest Neighbors
//!
//! Exact neighbour search over the stored training set, for both
//! classification (majority / inverse-distance vote) and regression
//! (uniform / inverse-distance mean).

use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::config::{KnnParams, ProblemType, WeightScheme};
use crate::error::{MlError, Result};

/// Fitted neighbour index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnnModel {
    params: KnnParams,
    problem_type: ProblemType,
    x_train: Option<Array2<f64>>,
    y_train: Option<Array1<f64>>,
    n_classes: usize,
}

impl KnnModel {
    pub fn new(params: KnnParams, problem_type: ProblemType) -> Self {
        Self {
            params,
            problem_type,
            x_train: None,
            y_train: None,
            n_classes: 0,
        }
    }

    /// Store the training set
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        if x.nrows() == 0 {
            return Err(MlError::ValidationError("Cannot fit k-NN on an empty dataset".to_string()));
        }
        self.n_classes = match self.problem_type {
            ProblemType::Classification => y.iter().map(|v| v.round() as usize).max().unwrap_or(0) + 1,
            ProblemType::Regression => 0,
        };
        self.x_train = Some(x.clone());
        self.y_train = Some(y.clone());
        Ok(())
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        match self.problem_type {
            ProblemType::Classification => {
                let proba = self.predict_proba(x)?;
                Ok(proba
                    .rows()
                    .into_iter()
                    .map(|row| argmax(row) as f64)
                    .collect())
            }
            ProblemType::Regression => {
                let (x_train, y_train) = self.fitted()?;
                let predictions: Vec<f64> = (0..x.nrows())
                    .into_par_iter()
                    .map(|i| {
                        let neighbors = self.nearest(x.row(i), x_train);
                        weighted_mean(&neighbors, y_train, self.params.weights)
                    })
                    .collect();
                Ok(Array1::from_vec(predictions))
            }
        }
    }

    /// Class membership estimates from the neighbour vote
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.problem_type != ProblemType::Classification {
            return Err(MlError::ValidationError(
                "Probabilities are only available for classification".to_string(),
            ));
        }
        let (x_train, y_train) = self.fitted()?;
        let k = self.n_classes;
        let rows: Vec<Vec<f64>> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let neighbors = self.nearest(x.row(i), x_train);
                let mut votes = vec![0.0; k];
                for (idx, dist) in &neighbors {
                    let class = (y_train[*idx].round() as usize).min(k - 1);
                    votes[class] += neighbor_weight(*dist, self.params.weights);
                }
                let total: f64 = votes.iter().sum();
                if total > 0.0 {
                    votes.iter_mut().for_each(|v| *v /= total);
                }
                votes
            })
            .collect();

        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        Ok(Array2::from_shape_vec((x.nrows(), k), flat)?)
    }

    fn fitted(&self) -> Result<(&Array2<f64>, &Array1<f64>)> {
        match (&self.x_train, &self.y_train) {
            (Some(x), Some(y)) => Ok((x, y)),
            _ => Err(MlError::ModelNotFitted),
        }
    }

    /// Indices and distances of the k closest training rows
    fn nearest(&self, query: ArrayView1<f64>, x_train: &Array2<f64>) -> Vec<(usize, f64)> {
        let mut distances: Vec<(usize, f64)> = x_train
            .rows()
            .into_iter()
            .enumerate()
            .map(|(idx, row)| {
                let d: f64 = row
                    .iter()
                    .zip(query.iter())
                    .map(|(a, b)| (a - b).powi(2))
                    .sum();
                (idx, d.sqrt())
            })
            .collect();
        let k = self.params.n_neighbors.max(1).min(distances.len());
        distances.select_nth_unstable_by(k - 1, |a, b| a.1.total_cmp(&b.1));
        distances.truncate(k);
        distances.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        distances
    }
}

fn neighbor_weight(distance: f64, scheme: WeightScheme) -> f64 {
    match scheme {
        WeightScheme::Uniform => 1.0,
        WeightScheme::Distance => 1.0 / distance.max(1e-12),
    }
}

fn weighted_mean(neighbors: &[(usize, f64)], y: &Array1<f64>, scheme: WeightScheme) -> f64 {
    let (sum, weight) = neighbors.iter().fold((0.0, 0.0), |(s, w), (idx, dist)| {
        let wi = neighbor_weight(*dist, scheme);
        (s + wi * y[*idx], w + wi)
    });
    if weight > 0.0 {
        sum / weight
    } else {
        0.0
    }
}

pub(crate) fn argmax(row: ArrayView1<f64>) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(best, best_v), (i, &v)| {
            if v > best_v {
                (i, v)
            } else {
                (best, best_v)
            }
        })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn params(k: usize, weights: WeightScheme) -> KnnParams {
        KnnParams {
            n_neighbors: k,
            weights,
            ..Default::default()
        }
    }

    #[test]
    fn test_knn_classifier() {
        let x = array![[0.0, 0.0], [0.1, 0.1], [0.2, 0.0], [5.0, 5.0], [5.1, 5.2], [4.9, 5.0]];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let mut model = KnnModel::new(params(3, WeightScheme::Uniform), ProblemType::Classification);
        model.fit(&x, &y).unwrap();

        let preds = model.predict(&array![[0.05, 0.05], [5.0, 5.1]]).unwrap();
        assert_eq!(preds.to_vec(), vec![0.0, 1.0]);
        let proba = model.predict_proba(&array![[0.05, 0.05]]).unwrap();
        assert_eq!(proba.row(0).to_vec(), vec![1.0, 0.0]);
    }

    #[test]
    fn test_knn_regressor_distance_weights() {
        let x = array![[0.0], [1.0], [10.0]];
        let y = array![0.0, 10.0, 100.0];
        let mut model = KnnModel::new(params(2, WeightScheme::Distance), ProblemType::Regression);
        model.fit(&x, &y).unwrap();
        let pred = model.predict(&array![[0.25]]).unwrap()[0];
        // weights 4 and 4/3 over values 0 and 10
        assert!((pred - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_k_larger_than_dataset() {
        let x = array![[0.0], [1.0]];
        let y = array![1.0, 3.0];
        let mut model = KnnModel::new(params(10, WeightScheme::Uniform), ProblemType::Regression);
        model.fit(&x, &y).unwrap();
        assert_eq!(model.predict(&array![[0.5]]).unwrap()[0], 2.0);
    }

    #[test]
    fn test_unfitted() {
        let model = KnnModel::new(KnnParams::default(), ProblemType::Regression);
        assert!(matches!(model.predict(&array![[1.0]]), Err(MlError::ModelNotFitted)));
    }
}
