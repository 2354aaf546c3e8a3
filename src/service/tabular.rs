//! Tabular model training and prediction

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use tracing::info;

use super::{default_model_name, delete_by_name, resolve, Scratch, Upload};
use crate::config::AppConfig;
use crate::error::{MlError, Result};
use crate::export::{
    ArtifactId, ArtifactMetadata, ArtifactStore, ArtifactSummary, ModelFamily, PayloadKind, Provenance,
};
use crate::security::{AccessPolicy, Caller, Operation};
use crate::tabular::{ColumnEncoding, EncodingMap, FeatureLayout, TabularLoader, TabularPreparer};
use crate::training::{
    Algorithm, Evaluation, FeatureImportance, ModelSpec, ProblemType, Splitter, SyntheticData, TabularModel,
    TestFraction,
};

fn default_test_size() -> f64 {
    0.2
}

fn default_num_samples() -> usize {
    100
}

fn default_num_features() -> usize {
    5
}

fn default_num_classes() -> usize {
    2
}

/// Train on randomly generated data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticTabularRequest {
    pub algorithm: Algorithm,
    #[serde(default)]
    pub problem_type: ProblemType,
    #[serde(default)]
    pub model_params: Map<String, Value>,
    #[serde(default = "default_test_size")]
    pub test_size: f64,
    #[serde(default = "default_num_samples")]
    pub num_samples: usize,
    #[serde(default = "default_num_features")]
    pub num_features: usize,
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,
    #[serde(default)]
    pub model_name: Option<String>,
    /// Seeds data generation and the split
    #[serde(default)]
    pub random_state: Option<u64>,
}

impl SyntheticTabularRequest {
    pub fn new(algorithm: Algorithm, problem_type: ProblemType) -> Self {
        Self {
            algorithm,
            problem_type,
            model_params: Map::new(),
            test_size: default_test_size(),
            num_samples: default_num_samples(),
            num_features: default_num_features(),
            num_classes: default_num_classes(),
            model_name: None,
            random_state: None,
        }
    }
}

/// Train on an uploaded CSV or Excel file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabularUploadRequest {
    pub target_column: String,
    #[serde(default)]
    pub features: Option<Vec<String>>,
    #[serde(default)]
    pub categorical_columns: Option<Vec<String>>,
    pub algorithm: Algorithm,
    #[serde(default)]
    pub problem_type: ProblemType,
    #[serde(default)]
    pub model_params: Map<String, Value>,
    #[serde(default = "default_test_size")]
    pub test_size: f64,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub random_state: Option<u64>,
}

impl TabularUploadRequest {
    pub fn new(target_column: impl Into<String>, algorithm: Algorithm, problem_type: ProblemType) -> Self {
        Self {
            target_column: target_column.into(),
            features: None,
            categorical_columns: None,
            algorithm,
            problem_type,
            model_params: Map::new(),
            test_size: default_test_size(),
            model_name: None,
            random_state: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TabularTrainReport {
    pub model_name: String,
    pub identity: ArtifactId,
    pub model_path: PathBuf,
    pub evaluation: Evaluation,
    pub feature_importance: Option<Vec<FeatureImportance>>,
    pub feature_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TabularPrediction {
    pub model_name: String,
    pub identity: ArtifactId,
    /// Decoded class labels, class codes, or regression values
    pub predictions: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probabilities: Option<Vec<Vec<f64>>>,
    /// Feature rows the predictions were made from
    pub data: Vec<Vec<f64>>,
    pub metadata: ArtifactMetadata,
}

/// Training, prediction and management of tabular models
#[derive(Debug, Clone)]
pub struct TabularService {
    config: AppConfig,
    policy: AccessPolicy,
    store: ArtifactStore,
    loader: TabularLoader,
}

impl TabularService {
    pub fn new(config: AppConfig, policy: AccessPolicy) -> Result<Self> {
        config.validate()?;
        let store = ArtifactStore::open(config.tabular_models_dir())?;
        let loader = TabularLoader::new().with_numeric_fill(config.numeric_fill);
        Ok(Self {
            config,
            policy,
            store,
            loader,
        })
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn train_synthetic(&self, caller: &Caller, request: &SyntheticTabularRequest) -> Result<TabularTrainReport> {
        self.policy.authorize(caller, Operation::TrainSynthetic)?;
        let fraction = TestFraction::new(request.test_size)?;
        let spec = ModelSpec::from_params(request.algorithm, &request.model_params)?;

        let mut generator = SyntheticData::new();
        if let Some(seed) = request.random_state {
            generator = generator.with_seed(seed);
        }
        let (x, y) = generator.tabular(
            request.num_samples,
            request.num_features,
            request.problem_type,
            request.num_classes,
        )?;
        let feature_names: Vec<String> = (0..request.num_features).map(|i| format!("feature_{}", i)).collect();

        let model_name = request
            .model_name
            .clone()
            .unwrap_or_else(|| default_model_name(&format!("{}_{}", request.algorithm, request.problem_type)));

        let mut metadata = ArtifactMetadata::new(ModelFamily::Tabular, Provenance::Test)
            .with_model_name(&model_name)
            .with_created_by(Some(caller.user_id.as_str()));
        metadata.feature_names = feature_names.clone();
        metadata.extra.insert("num_samples".to_string(), Value::from(request.num_samples));
        metadata.extra.insert("num_features".to_string(), Value::from(request.num_features));

        let fit = FitInput {
            x,
            y,
            spec,
            problem_type: request.problem_type,
            fraction,
            random_state: request.random_state,
            class_labels: Vec::new(),
        };
        self.fit_and_save(fit, model_name, feature_names, metadata)
    }

    pub fn train_from_upload(
        &self,
        caller: &Caller,
        upload: &Upload,
        request: &TabularUploadRequest,
    ) -> Result<TabularTrainReport> {
        self.policy.authorize(caller, Operation::TrainReal)?;
        upload.check(&self.config, |n| self.config.is_allowed_tabular(n), "a CSV or Excel file")?;
        let fraction = TestFraction::new(request.test_size)?;
        let spec = ModelSpec::from_params(request.algorithm, &request.model_params)?;

        let scratch = Scratch::new_in(&self.config.tabular_upload_dir())?;
        let loaded = scratch.store(upload).and_then(|path| self.loader.load(path));
        scratch.finish();
        let df = loaded?;

        let mut preparer = TabularPreparer::new(&request.target_column)
            .with_encoded_target(request.problem_type == ProblemType::Classification);
        if let Some(features) = &request.features {
            preparer = preparer.with_feature_columns(features.clone());
        }
        if let Some(categorical) = &request.categorical_columns {
            preparer = preparer.with_categorical_columns(categorical.clone());
        }
        let prepared = preparer.prepare(&df)?;

        let class_labels = match (request.problem_type, prepared.target_encoding()) {
            (ProblemType::Classification, Some(encoding)) => encoding.categories().to_vec(),
            _ => Vec::new(),
        };
        if request.problem_type == ProblemType::Regression && prepared.target_encoding().is_some() {
            return Err(MlError::ValidationError(format!(
                "Target column '{}' is categorical; use classification",
                request.target_column
            )));
        }

        let model_name = request
            .model_name
            .clone()
            .unwrap_or_else(|| default_model_name(&format!("{}_{}", request.algorithm, request.problem_type)));

        let mut metadata = ArtifactMetadata::new(ModelFamily::Tabular, Provenance::Real)
            .with_model_name(&model_name)
            .with_created_by(Some(caller.user_id.as_str()));
        metadata.feature_names = prepared.feature_columns.clone();
        metadata.target_column = Some(prepared.target_column.clone());
        metadata.categorical_columns = prepared.encodings.keys().cloned().collect();
        metadata.encoded_columns = prepared.encodings.clone();
        metadata.fill_values = prepared
            .fill_values
            .iter()
            .filter(|(name, _)| prepared.feature_columns.contains(name))
            .map(|(name, fill)| (name.clone(), fill.clone()))
            .collect();
        metadata.file_name = Some(upload.file_name.clone());

        let feature_names = prepared.feature_columns.clone();
        let fit = FitInput {
            x: prepared.x,
            y: prepared.y,
            spec,
            problem_type: request.problem_type,
            fraction,
            random_state: request.random_state,
            class_labels,
        };
        self.fit_and_save(fit, model_name, feature_names, metadata)
    }

    /// Predict one random row shaped like the model's training data
    pub fn predict_synthetic(&self, caller: &Caller, model_name: &str) -> Result<TabularPrediction> {
        self.policy.authorize(caller, Operation::PredictSynthetic)?;
        let (identity, model, metadata) = self.load(model_name)?;
        let x = SyntheticData::new().features(1, model.n_features());
        self.predict_rows(model_name, identity, &model, metadata, x)
    }

    /// Predict every row of an uploaded file
    pub fn predict_from_upload(&self, caller: &Caller, model_name: &str, upload: &Upload) -> Result<TabularPrediction> {
        self.policy.authorize(caller, Operation::PredictReal)?;
        upload.check(&self.config, |n| self.config.is_allowed_tabular(n), "a CSV or Excel file")?;
        let (identity, model, metadata) = self.load(model_name)?;

        let scratch = Scratch::new_in(&self.config.tabular_upload_dir())?;
        let loaded = scratch.store(upload).and_then(|path| self.loader.load(path));
        scratch.finish();
        let df = loaded?;

        let x = layout(&metadata, &model)?.frame_matrix(&df)?;
        self.predict_rows(model_name, identity, &model, metadata, x)
    }

    /// Predict JSON records keyed by feature name
    pub fn predict_records(
        &self,
        caller: &Caller,
        model_name: &str,
        records: &[Map<String, Value>],
    ) -> Result<TabularPrediction> {
        self.policy.authorize(caller, Operation::PredictReal)?;
        let (identity, model, metadata) = self.load(model_name)?;
        let x = layout(&metadata, &model)?.records_matrix(records)?;
        self.predict_rows(model_name, identity, &model, metadata, x)
    }

    pub fn list(&self, caller: &Caller) -> Result<Vec<ArtifactSummary>> {
        self.policy.authorize(caller, Operation::ListModels)?;
        self.store.list(Some(PayloadKind::Classical))
    }

    /// Delete the newest artifact named `model_name` (or that exact identity)
    pub fn delete(&self, caller: &Caller, model_name: &str) -> Result<bool> {
        delete_by_name(&self.policy, caller, &self.store, PayloadKind::Classical, model_name)
    }

    fn load(&self, model_name: &str) -> Result<(ArtifactId, TabularModel, ArtifactMetadata)> {
        let identity = resolve(&self.store, PayloadKind::Classical, model_name)?;
        let (model, metadata) = self.store.load::<TabularModel>(&identity)?;
        Ok((identity, model, metadata))
    }

    fn fit_and_save(
        &self,
        fit: FitInput,
        model_name: String,
        feature_names: Vec<String>,
        mut metadata: ArtifactMetadata,
    ) -> Result<TabularTrainReport> {
        let mut splitter = Splitter::new(fit.fraction);
        if let Some(seed) = fit.random_state {
            splitter = splitter.with_random_state(seed);
        }
        let (x_train, x_test, y_train, y_test) = splitter.split(&fit.x, &fit.y)?;

        let mut model = TabularModel::new(fit.spec, fit.problem_type);
        model.fit(&x_train, &y_train)?;
        let evaluation = model.evaluate(&x_test, &y_test, &fit.class_labels)?;
        let feature_importance = model.feature_importance(&feature_names);

        metadata.algorithm = Some(model.spec().algorithm().to_string());
        metadata.problem_type = Some(fit.problem_type);
        metadata.hyperparameters = model.spec().params_json();
        metadata.test_size = Some(fit.fraction.value());
        metadata.evaluation = Some(evaluation.clone());
        metadata.feature_importance = feature_importance.clone();

        let saved = self.store.save(&model, &model_name, Some(&metadata))?;
        info!(
            identity = %saved.identity,
            algorithm = %model.spec().algorithm(),
            score = ?evaluation.headline(),
            "Trained tabular model"
        );

        Ok(TabularTrainReport {
            model_name,
            identity: saved.identity,
            model_path: saved.payload_path,
            evaluation,
            feature_importance,
            feature_names,
        })
    }

    fn predict_rows(
        &self,
        model_name: &str,
        identity: ArtifactId,
        model: &TabularModel,
        metadata: ArtifactMetadata,
        x: Array2<f64>,
    ) -> Result<TabularPrediction> {
        let raw = model.predict(&x)?;
        let target_encoding = metadata
            .target_column
            .as_ref()
            .and_then(|target| metadata.encoded_columns.get(target));
        let predictions = present_predictions(&raw, model.problem_type(), target_encoding);
        let probabilities = model
            .predict_proba(&x)?
            .map(|p| p.rows().into_iter().map(|r| r.to_vec()).collect());

        info!(identity = %identity, rows = x.nrows(), "Tabular prediction");
        Ok(TabularPrediction {
            model_name: model_name.to_string(),
            identity,
            predictions,
            probabilities,
            data: x.rows().into_iter().map(|r| r.to_vec()).collect(),
            metadata,
        })
    }
}

struct FitInput {
    x: Array2<f64>,
    y: Array1<f64>,
    spec: ModelSpec,
    problem_type: ProblemType,
    fraction: TestFraction,
    random_state: Option<u64>,
    class_labels: Vec<String>,
}

/// Layout recorded with the model; features only, target excluded
fn layout(metadata: &ArtifactMetadata, model: &TabularModel) -> Result<FeatureLayout> {
    let columns = if metadata.feature_names.is_empty() {
        (0..model.n_features()).map(|i| format!("feature_{}", i)).collect()
    } else {
        metadata.feature_names.clone()
    };
    if columns.len() != model.n_features() {
        return Err(MlError::ShapeError {
            expected: format!("{} features", model.n_features()),
            actual: format!("{} feature names in metadata", columns.len()),
        });
    }
    let encodings: EncodingMap = metadata
        .encoded_columns
        .iter()
        .filter(|(name, _)| columns.contains(name))
        .map(|(name, enc)| (name.clone(), enc.clone()))
        .collect();
    let fills = metadata
        .fill_values
        .iter()
        .filter(|(name, _)| columns.contains(name))
        .map(|(name, fill)| (name.clone(), fill.clone()))
        .collect();
    Ok(FeatureLayout::new(columns, encodings).with_fill_values(fills))
}

fn present_predictions(raw: &Array1<f64>, problem_type: ProblemType, target: Option<&ColumnEncoding>) -> Vec<Value> {
    raw.iter()
        .map(|&v| match problem_type {
            ProblemType::Regression => Value::from(v),
            ProblemType::Classification => {
                let code = v.round().max(0.0) as usize;
                match target.and_then(|enc| enc.value_of(code)) {
                    Some(label) => Value::from(label),
                    None => Value::from(code),
                }
            }
        })
        .collect()
}
