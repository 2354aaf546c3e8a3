//! Trained-model wrapper for the classical engine

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::config::{Kernel, ModelSpec, ProblemType};
use super::knn::KnnModel;
use super::linear_models::{LinearRegressor, LogisticClassifier};
use super::metrics::Evaluation;
use super::random_forest::RandomForest;
use super::svm::SvmModel;
use crate::error::{MlError, Result};
use crate::export::{Payload, PayloadKind};

/// What a fitted model can say about its features, fixed when the model is
/// built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    None,
    /// Impurity-based feature weights
    FeatureWeights,
    /// Linear coefficients
    Coefficients,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Estimator {
    Svm(SvmModel),
    Knn(KnnModel),
    Forest(RandomForest),
    Linear(LinearRegressor),
    Logistic(LogisticClassifier),
}

/// A tabular model: algorithm choice, problem type and fitted state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabularModel {
    spec: ModelSpec,
    problem_type: ProblemType,
    capability: Capability,
    n_features: usize,
    n_classes: usize,
    fitted: bool,
    estimator: Estimator,
}

impl TabularModel {
    pub fn new(spec: ModelSpec, problem_type: ProblemType) -> Self {
        let (estimator, capability) = match &spec {
            ModelSpec::Svm(p) => {
                let capability = if p.kernel == Kernel::Linear {
                    Capability::Coefficients
                } else {
                    Capability::None
                };
                (Estimator::Svm(SvmModel::new(p.clone(), problem_type)), capability)
            }
            ModelSpec::Knn(p) => (Estimator::Knn(KnnModel::new(p.clone(), problem_type)), Capability::None),
            ModelSpec::RandomForest(p) => (
                Estimator::Forest(RandomForest::new(p.clone(), problem_type)),
                Capability::FeatureWeights,
            ),
            ModelSpec::LinearRegression(p) => match problem_type {
                ProblemType::Classification => {
                    (Estimator::Logistic(LogisticClassifier::new(p.clone())), Capability::Coefficients)
                }
                ProblemType::Regression => {
                    (Estimator::Linear(LinearRegressor::new(p.clone())), Capability::Coefficients)
                }
            },
        };
        Self {
            spec,
            problem_type,
            capability,
            n_features: 0,
            n_classes: 0,
            fitted: false,
            estimator,
        }
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        if x.nrows() != y.len() {
            return Err(MlError::ShapeError {
                expected: format!("{} labels", x.nrows()),
                actual: format!("{} labels", y.len()),
            });
        }
        if self.problem_type == ProblemType::Classification
            && y.iter().any(|v| !v.is_finite() || *v < 0.0 || (v - v.round()).abs() > 1e-9)
        {
            return Err(MlError::ValidationError(
                "Classification targets must be non-negative class codes".to_string(),
            ));
        }

        match &mut self.estimator {
            Estimator::Svm(m) => m.fit(x, y)?,
            Estimator::Knn(m) => m.fit(x, y)?,
            Estimator::Forest(m) => m.fit(x, y)?,
            Estimator::Linear(m) => m.fit(x, y)?,
            Estimator::Logistic(m) => m.fit(x, y)?,
        }

        self.n_features = x.ncols();
        self.n_classes = match self.problem_type {
            ProblemType::Classification => y.iter().map(|v| v.round() as usize).max().unwrap_or(0) + 1,
            ProblemType::Regression => 0,
        };
        self.fitted = true;
        info!(
            algorithm = %self.spec.algorithm(),
            problem_type = %self.problem_type,
            samples = x.nrows(),
            features = self.n_features,
            "Model trained"
        );
        Ok(())
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.check_input(x)?;
        match &self.estimator {
            Estimator::Svm(m) => m.predict(x),
            Estimator::Knn(m) => m.predict(x),
            Estimator::Forest(m) => m.predict(x),
            Estimator::Linear(m) => m.predict(x),
            Estimator::Logistic(m) => m.predict(x),
        }
    }

    /// Class probabilities; `None` for regression models
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Option<Array2<f64>>> {
        self.check_input(x)?;
        if self.problem_type == ProblemType::Regression {
            return Ok(None);
        }
        let proba = match &self.estimator {
            Estimator::Svm(m) => m.predict_proba(x)?,
            Estimator::Knn(m) => m.predict_proba(x)?,
            Estimator::Forest(m) => m.predict_proba(x)?,
            Estimator::Logistic(m) => m.predict_proba(x)?,
            Estimator::Linear(_) => return Ok(None),
        };
        Ok(Some(proba))
    }

    /// Per-feature importance as dictated by the capability tag.
    ///
    /// Coefficients are reported signed for a single output and as the mean
    /// absolute value across classes otherwise.
    pub fn feature_importance(&self, names: &[String]) -> Option<Vec<FeatureImportance>> {
        let weights: Vec<f64> = match (self.capability, &self.estimator) {
            (Capability::None, _) => return None,
            (Capability::FeatureWeights, Estimator::Forest(m)) => m.feature_importances()?.to_vec(),
            (Capability::Coefficients, Estimator::Linear(m)) => m.coefficients()?.to_vec(),
            (Capability::Coefficients, Estimator::Logistic(m)) => collapse(&m.coefficients()?),
            (Capability::Coefficients, Estimator::Svm(m)) => collapse(&m.coefficients()?),
            _ => return None,
        };
        Some(
            weights
                .into_iter()
                .enumerate()
                .map(|(i, importance)| FeatureImportance {
                    feature: names.get(i).cloned().unwrap_or_else(|| format!("feature_{}", i)),
                    importance,
                })
                .collect(),
        )
    }

    /// Score on held-out data. `labels` names the classes in the report.
    pub fn evaluate(&self, x: &Array2<f64>, y: &Array1<f64>, labels: &[String]) -> Result<Evaluation> {
        let predictions = self.predict(x)?;
        Ok(match self.problem_type {
            ProblemType::Classification => Evaluation::classification(y, &predictions, self.n_classes, labels),
            ProblemType::Regression => Evaluation::regression(y, &predictions),
        })
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn problem_type(&self) -> ProblemType {
        self.problem_type
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn check_input(&self, x: &Array2<f64>) -> Result<()> {
        if !self.fitted {
            return Err(MlError::ModelNotFitted);
        }
        if x.ncols() != self.n_features {
            return Err(MlError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }
        Ok(())
    }
}

impl Payload for TabularModel {
    const KIND: PayloadKind = PayloadKind::Classical;
}

fn collapse(coef: &Array2<f64>) -> Vec<f64> {
    if coef.nrows() == 1 {
        coef.row(0).to_vec()
    } else {
        coef.columns()
            .into_iter()
            .map(|col| col.iter().map(|v| v.abs()).sum::<f64>() / col.len().max(1) as f64)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::config::{Algorithm, LinearParams, RandomForestParams};
    use ndarray::array;
    use serde_json::{json, Map};

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("f{}", i)).collect()
    }

    #[test]
    fn test_capability_fixed_at_construction() {
        let rf = TabularModel::new(
            ModelSpec::RandomForest(RandomForestParams::default()),
            ProblemType::Classification,
        );
        assert_eq!(rf.capability(), Capability::FeatureWeights);

        let knn = TabularModel::new(
            ModelSpec::from_params(Algorithm::Knn, &Map::new()).unwrap(),
            ProblemType::Regression,
        );
        assert_eq!(knn.capability(), Capability::None);

        let params = json!({"kernel": "linear"}).as_object().cloned().unwrap();
        let svm = TabularModel::new(ModelSpec::from_params(Algorithm::Svm, &params).unwrap(), ProblemType::Classification);
        assert_eq!(svm.capability(), Capability::Coefficients);
    }

    #[test]
    fn test_linear_regression_importance_is_signed() {
        let x = Array2::from_shape_fn((30, 2), |(i, j)| if j == 0 { i as f64 } else { ((i * 7) % 5) as f64 });
        let y = x.column(0).mapv(|v| -3.0 * v) + &x.column(1) + 2.0;
        let mut model = TabularModel::new(
            ModelSpec::LinearRegression(LinearParams::default()),
            ProblemType::Regression,
        );
        model.fit(&x, &y).unwrap();

        let imp = model.feature_importance(&names(2)).unwrap();
        assert_eq!(imp[0].feature, "f0");
        assert!((imp[0].importance + 3.0).abs() < 1e-6);
        assert!((imp[1].importance - 1.0).abs() < 1e-6);
        assert!(model.predict_proba(&x).unwrap().is_none());
    }

    #[test]
    fn test_rejects_wrong_width_and_unfitted() {
        let model = TabularModel::new(
            ModelSpec::RandomForest(RandomForestParams::default()),
            ProblemType::Regression,
        );
        assert!(matches!(model.predict(&array![[1.0]]), Err(MlError::ModelNotFitted)));

        let mut model = model;
        model.fit(&array![[1.0, 2.0], [2.0, 1.0], [3.0, 3.0]], &array![1.0, 2.0, 3.0]).unwrap();
        assert!(matches!(model.predict(&array![[1.0]]), Err(MlError::ShapeError { .. })));
    }

    #[test]
    fn test_classification_requires_codes() {
        let mut model = TabularModel::new(
            ModelSpec::RandomForest(RandomForestParams::default()),
            ProblemType::Classification,
        );
        let err = model.fit(&array![[1.0], [2.0]], &array![0.5, 1.0]).unwrap_err();
        assert!(matches!(err, MlError::ValidationError(_)));
    }

    #[test]
    fn test_evaluate_classification() {
        let x = array![[0.0], [0.1], [0.2], [5.0], [5.1], [5.2]];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let mut model = TabularModel::new(
            ModelSpec::from_params(Algorithm::Knn, &json!({"n_neighbors": 3}).as_object().cloned().unwrap()).unwrap(),
            ProblemType::Classification,
        );
        model.fit(&x, &y).unwrap();
        let eval = model.evaluate(&x, &y, &["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(eval.accuracy, Some(1.0));
        assert!(eval.classification_report.contains_key("b"));
        let proba = model.predict_proba(&x).unwrap().unwrap();
        assert_eq!(proba.dim(), (6, 2));
    }
}
