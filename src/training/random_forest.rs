//! Random Forest

use ndarray::{Array1, Array2};
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::config::{ProblemType, RandomForestParams};
use super::decision_tree::{DecisionTree, TreeParams};
use crate::error::{MlError, Result};

/// Bagged ensemble of CART trees
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    params: RandomForestParams,
    problem_type: ProblemType,
    trees: Vec<DecisionTree>,
    n_classes: usize,
    feature_importances: Option<Array1<f64>>,
}

impl RandomForest {
    pub fn new(params: RandomForestParams, problem_type: ProblemType) -> Self {
        Self {
            params,
            problem_type,
            trees: Vec::new(),
            n_classes: 0,
            feature_importances: None,
        }
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let n_samples = x.nrows();
        let n_features = x.ncols();
        if n_samples == 0 || n_samples != y.len() {
            return Err(MlError::ValidationError(format!(
                "Random forest needs matching, non-empty inputs (x rows = {}, y = {})",
                n_samples,
                y.len()
            )));
        }

        self.n_classes = match self.problem_type {
            ProblemType::Classification => y.iter().map(|v| v.round().max(0.0) as usize).max().unwrap_or(0) + 1,
            ProblemType::Regression => 0,
        };

        // sqrt(n_features) per split for classification, all features for regression
        let max_features = match self.problem_type {
            ProblemType::Classification => Some(((n_features as f64).sqrt().round() as usize).max(1)),
            ProblemType::Regression => None,
        };
        let tree_params = TreeParams {
            max_depth: self.params.max_depth,
            min_samples_split: self.params.min_samples_split,
            min_samples_leaf: self.params.min_samples_leaf,
            max_features,
        };

        let mut master = match self.params.random_state {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let seeds: Vec<u64> = (0..self.params.n_estimators).map(|_| master.next_u64()).collect();

        let problem_type = self.problem_type;
        let n_classes = self.n_classes;
        let trees = seeds
            .into_par_iter()
            .map(|seed| -> Result<DecisionTree> {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                let bootstrap: Vec<usize> = (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect();
                let mut tree = match problem_type {
                    ProblemType::Classification => DecisionTree::classifier(tree_params.clone(), n_classes),
                    ProblemType::Regression => DecisionTree::regressor(tree_params.clone()),
                };
                tree.fit_indices(x, y, bootstrap, &mut rng)?;
                Ok(tree)
            })
            .collect::<Result<Vec<DecisionTree>>>()?;

        let mut importances = Array1::<f64>::zeros(n_features);
        for tree in &trees {
            let decrease = tree.impurity_decrease();
            let total: f64 = decrease.iter().sum();
            if total > 0.0 {
                for (j, d) in decrease.iter().enumerate() {
                    importances[j] += d / total;
                }
            }
        }
        let sum = importances.sum();
        if sum > 0.0 {
            importances /= sum;
        }

        debug!(trees = trees.len(), features = n_features, "Fitted random forest");
        self.trees = trees;
        self.feature_importances = Some(importances);
        Ok(())
    }

    /// Mean of per-tree class distributions
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.problem_type != ProblemType::Classification {
            return Err(MlError::ValidationError(
                "Probabilities are only available for classification".to_string(),
            ));
        }
        self.ensure_fitted()?;
        let k = self.n_classes;
        let mut out = Array2::<f64>::zeros((x.nrows(), k));
        for (i, row) in x.rows().into_iter().enumerate() {
            let sample = row.to_vec();
            for tree in &self.trees {
                for (c, p) in tree.leaf_for(&sample)?.iter().enumerate() {
                    out[[i, c]] += p;
                }
            }
        }
        out /= self.trees.len() as f64;
        Ok(out)
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.ensure_fitted()?;
        match self.problem_type {
            ProblemType::Classification => {
                let proba = self.predict_proba(x)?;
                Ok(proba
                    .rows()
                    .into_iter()
                    .map(|row| super::knn::argmax(row) as f64)
                    .collect())
            }
            ProblemType::Regression => x
                .rows()
                .into_iter()
                .map(|row| {
                    let sample = row.to_vec();
                    let total = self
                        .trees
                        .iter()
                        .map(|t| t.leaf_for(&sample).map(|v| v[0]))
                        .sum::<Result<f64>>()?;
                    Ok(total / self.trees.len() as f64)
                })
                .collect::<Result<Vec<f64>>>()
                .map(Array1::from_vec),
        }
    }

    /// Impurity-based importances, normalized to sum to 1
    pub fn feature_importances(&self) -> Option<&Array1<f64>> {
        self.feature_importances.as_ref()
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    fn ensure_fitted(&self) -> Result<()> {
        if self.trees.is_empty() {
            Err(MlError::ModelNotFitted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn params(n: usize) -> RandomForestParams {
        RandomForestParams {
            n_estimators: n,
            random_state: Some(42),
            ..Default::default()
        }
    }

    fn blobs() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((40, 3), |(r, c)| match c {
            0 => if r < 20 { r as f64 * 0.1 } else { 10.0 + r as f64 * 0.1 },
            1 => (r % 7) as f64,
            _ => ((r * 13) % 5) as f64,
        });
        let y = Array1::from_iter((0..40).map(|r| if r < 20 { 0.0 } else { 1.0 }));
        (x, y)
    }

    #[test]
    fn test_classifier_and_importances() {
        let (x, y) = blobs();
        let mut forest = RandomForest::new(params(25), ProblemType::Classification);
        forest.fit(&x, &y).unwrap();
        assert_eq!(forest.n_trees(), 25);
        assert_eq!(forest.predict(&x).unwrap(), y);

        let imp = forest.feature_importances().unwrap();
        assert!((imp.sum() - 1.0).abs() < 1e-9);
        assert!(imp[0] > imp[1] && imp[0] > imp[2]);
    }

    #[test]
    fn test_seeded_forest_is_deterministic() {
        let (x, y) = blobs();
        let mut a = RandomForest::new(params(5), ProblemType::Regression);
        let mut b = RandomForest::new(params(5), ProblemType::Regression);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a.predict(&x).unwrap(), b.predict(&x).unwrap());
    }

    #[test]
    fn test_unfitted_forest() {
        let forest = RandomForest::new(params(3), ProblemType::Regression);
        assert!(matches!(forest.predict(&Array2::zeros((1, 1))), Err(MlError::ModelNotFitted)));
    }
}
