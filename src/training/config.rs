//! Algorithm names and hyperparameters

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::{MlError, Result};

/// Kind of supervised task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemType {
    #[default]
    Classification,
    Regression,
}

impl ProblemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProblemType::Classification => "classification",
            ProblemType::Regression => "regression",
        }
    }
}

impl fmt::Display for ProblemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProblemType {
    type Err = MlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "classification" => Ok(ProblemType::Classification),
            "regression" => Ok(ProblemType::Regression),
            other => Err(MlError::ValidationError(format!(
                "Unknown problem type '{}'; expected classification or regression",
                other
            ))),
        }
    }
}

/// Classical algorithms available for tabular data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    Svm,
    Knn,
    RandomForest,
    LinearRegression,
}

impl Algorithm {
    pub const ALL: [Algorithm; 4] = [
        Algorithm::Svm,
        Algorithm::Knn,
        Algorithm::RandomForest,
        Algorithm::LinearRegression,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Svm => "svm",
            Algorithm::Knn => "knn",
            Algorithm::RandomForest => "random_forest",
            Algorithm::LinearRegression => "linear_regression",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = MlError;

    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim().to_lowercase();
        Algorithm::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == needle)
            .ok_or_else(|| {
                MlError::ValidationError(format!(
                    "Unknown algorithm '{}'; expected one of svm, knn, random_forest, linear_regression",
                    s
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kernel {
    Linear,
    Poly,
    Rbf,
    Sigmoid,
}

/// Kernel coefficient for rbf, poly and sigmoid kernels.
///
/// Human-readable formats see `"scale"`, `"auto"` or a number; binary
/// formats get a plain tagged enum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gamma {
    /// `1 / (n_features * var(X))`
    Scale,
    /// `1 / n_features`
    Auto,
    Value(f64),
}

impl Gamma {
    /// Resolve against the training matrix statistics
    pub fn resolve(&self, n_features: usize, variance: f64) -> f64 {
        let n = n_features.max(1) as f64;
        match self {
            Gamma::Scale if variance > 0.0 => 1.0 / (n * variance),
            Gamma::Scale | Gamma::Auto => 1.0 / n,
            Gamma::Value(v) => *v,
        }
    }
}

impl TryFrom<Value> for Gamma {
    type Error = String;

    fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
        match &value {
            Value::String(s) if s == "scale" => Ok(Gamma::Scale),
            Value::String(s) if s == "auto" => Ok(Gamma::Auto),
            Value::Number(n) => match n.as_f64() {
                Some(v) if v > 0.0 => Ok(Gamma::Value(v)),
                _ => Err(format!("gamma must be positive, got {}", n)),
            },
            other => Err(format!("gamma must be 'scale', 'auto' or a number, got {}", other)),
        }
    }
}

impl From<Gamma> for Value {
    fn from(gamma: Gamma) -> Self {
        match gamma {
            Gamma::Scale => Value::from("scale"),
            Gamma::Auto => Value::from("auto"),
            Gamma::Value(v) => Value::from(v),
        }
    }
}

#[derive(Serialize, Deserialize)]
enum GammaRepr {
    Scale,
    Auto,
    Value(f64),
}

impl Serialize for Gamma {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            Value::from(*self).serialize(serializer)
        } else {
            let repr = match *self {
                Gamma::Scale => GammaRepr::Scale,
                Gamma::Auto => GammaRepr::Auto,
                Gamma::Value(v) => GammaRepr::Value(v),
            };
            repr.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Gamma {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let value = Value::deserialize(deserializer)?;
            Gamma::try_from(value).map_err(de::Error::custom)
        } else {
            Ok(match GammaRepr::deserialize(deserializer)? {
                GammaRepr::Scale => Gamma::Scale,
                GammaRepr::Auto => Gamma::Auto,
                GammaRepr::Value(v) => Gamma::Value(v),
            })
        }
    }
}

/// Support vector machine hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SvmParams {
    pub kernel: Kernel,
    #[serde(rename = "C")]
    pub c: f64,
    pub gamma: Gamma,
    pub degree: u32,
    pub coef0: f64,
    /// Margin of the epsilon-insensitive loss used for regression
    pub epsilon: f64,
    pub max_iter: usize,
    pub random_state: Option<u64>,
}

impl Default for SvmParams {
    fn default() -> Self {
        Self {
            kernel: Kernel::Rbf,
            c: 1.0,
            gamma: Gamma::Scale,
            degree: 3,
            coef0: 0.0,
            epsilon: 0.1,
            max_iter: 1000,
            random_state: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightScheme {
    Uniform,
    Distance,
}

/// Neighbour search strategy. Every strategy returns exact neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeighborSearch {
    Auto,
    BallTree,
    KdTree,
    Brute,
}

/// k-nearest-neighbours hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KnnParams {
    pub n_neighbors: usize,
    pub weights: WeightScheme,
    pub algorithm: NeighborSearch,
}

impl Default for KnnParams {
    fn default() -> Self {
        Self {
            n_neighbors: 5,
            weights: WeightScheme::Uniform,
            algorithm: NeighborSearch::Auto,
        }
    }
}

/// Random forest hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RandomForestParams {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub random_state: Option<u64>,
}

impl Default for RandomForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            random_state: None,
        }
    }
}

/// Regularization variant of the linear family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinearKind {
    Simple,
    Ridge,
    Lasso,
}

/// Linear / logistic regression hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinearParams {
    pub model_type: LinearKind,
    pub alpha: f64,
    pub max_iter: usize,
}

impl Default for LinearParams {
    fn default() -> Self {
        Self {
            model_type: LinearKind::Simple,
            alpha: 1.0,
            max_iter: 1000,
        }
    }
}

/// A validated algorithm choice with its hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSpec {
    Svm(SvmParams),
    Knn(KnnParams),
    RandomForest(RandomForestParams),
    LinearRegression(LinearParams),
}

impl ModelSpec {
    /// Parse hyperparameters for `algorithm`; unknown keys are rejected.
    pub fn from_params(algorithm: Algorithm, params: &Map<String, Value>) -> Result<Self> {
        let value = Value::Object(params.clone());
        let invalid = |e: serde_json::Error| {
            MlError::ValidationError(format!("Invalid {} parameters: {}", algorithm, e))
        };
        let spec = match algorithm {
            Algorithm::Svm => ModelSpec::Svm(serde_json::from_value(value).map_err(invalid)?),
            Algorithm::Knn => ModelSpec::Knn(serde_json::from_value(value).map_err(invalid)?),
            Algorithm::RandomForest => {
                ModelSpec::RandomForest(serde_json::from_value(value).map_err(invalid)?)
            }
            Algorithm::LinearRegression => {
                ModelSpec::LinearRegression(serde_json::from_value(value).map_err(invalid)?)
            }
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            ModelSpec::Svm(_) => Algorithm::Svm,
            ModelSpec::Knn(_) => Algorithm::Knn,
            ModelSpec::RandomForest(_) => Algorithm::RandomForest,
            ModelSpec::LinearRegression(_) => Algorithm::LinearRegression,
        }
    }

    /// Hyperparameters as a JSON object, defaults filled in
    pub fn params_json(&self) -> Map<String, Value> {
        let value = match self {
            ModelSpec::Svm(p) => serde_json::to_value(p),
            ModelSpec::Knn(p) => serde_json::to_value(p),
            ModelSpec::RandomForest(p) => serde_json::to_value(p),
            ModelSpec::LinearRegression(p) => serde_json::to_value(p),
        };
        match value {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    fn validate(&self) -> Result<()> {
        let bad = |name: &str, reason: &str| {
            Err(MlError::ValidationError(format!("{} {}", name, reason)))
        };
        match self {
            ModelSpec::Svm(p) if !(p.c > 0.0) => bad("C", "must be positive"),
            ModelSpec::Svm(p) if p.max_iter == 0 => bad("max_iter", "must be at least 1"),
            ModelSpec::Knn(p) if p.n_neighbors == 0 => bad("n_neighbors", "must be at least 1"),
            ModelSpec::RandomForest(p) if p.n_estimators == 0 => bad("n_estimators", "must be at least 1"),
            ModelSpec::RandomForest(p) if p.min_samples_split < 2 => bad("min_samples_split", "must be at least 2"),
            ModelSpec::RandomForest(p) if p.min_samples_leaf == 0 => bad("min_samples_leaf", "must be at least 1"),
            ModelSpec::LinearRegression(p) if !(p.alpha > 0.0) => bad("alpha", "must be positive"),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("Random_Forest".parse::<Algorithm>().unwrap(), Algorithm::RandomForest);
        assert!("xgboost".parse::<Algorithm>().is_err());
        assert_eq!("regression".parse::<ProblemType>().unwrap(), ProblemType::Regression);
        assert!("clustering".parse::<ProblemType>().is_err());
    }

    #[test]
    fn test_svm_params() {
        let spec = ModelSpec::from_params(
            Algorithm::Svm,
            &obj(json!({"kernel": "linear", "C": 0.5, "gamma": "auto"})),
        )
        .unwrap();
        match spec {
            ModelSpec::Svm(p) => {
                assert_eq!(p.kernel, Kernel::Linear);
                assert_eq!(p.c, 0.5);
                assert_eq!(p.gamma, Gamma::Auto);
            }
            other => panic!("unexpected spec {other:?}"),
        }
    }

    #[test]
    fn test_defaults_and_echo() {
        let spec = ModelSpec::from_params(Algorithm::RandomForest, &Map::new()).unwrap();
        let params = spec.params_json();
        assert_eq!(params["n_estimators"], json!(100));
        assert_eq!(params["max_depth"], Value::Null);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = ModelSpec::from_params(Algorithm::Knn, &obj(json!({"k": 3}))).unwrap_err();
        assert!(matches!(err, MlError::ValidationError(_)));
    }

    #[test]
    fn test_gamma_binary_roundtrip() {
        let params = SvmParams {
            gamma: Gamma::Value(0.25),
            ..Default::default()
        };
        let bytes = bincode::serialize(&ModelSpec::Svm(params.clone())).unwrap();
        let back: ModelSpec = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, ModelSpec::Svm(params));
        assert_eq!(serde_json::to_value(Gamma::Scale).unwrap(), json!("scale"));
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert!(ModelSpec::from_params(Algorithm::Knn, &obj(json!({"n_neighbors": 0}))).is_err());
        assert!(ModelSpec::from_params(Algorithm::LinearRegression, &obj(json!({"alpha": -1.0}))).is_err());
        assert!(ModelSpec::from_params(Algorithm::Svm, &obj(json!({"gamma": "wide"}))).is_err());
    }
}
