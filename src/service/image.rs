//! Image classifier training and prediction

use ndarray::{Array1, Array4, Axis};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

use super::{default_model_name, delete_by_name, resolve, Scratch, Upload};
use crate::config::AppConfig;
use crate::error::{MlError, Result};
use crate::export::{
    ArtifactId, ArtifactMetadata, ArtifactStore, ArtifactSummary, ModelFamily, PayloadKind, Provenance,
};
use crate::images::{extract, ClassMapping, ImagePreparer};
use crate::security::{AccessPolicy, Caller, Operation};
use crate::training::{
    CnnParams, Evaluation, ImageClassifier, Splitter, SyntheticData, TestFraction, TrainParams, TrainingHistory,
};

const ARCHIVE_EXTENSION: &str = "zip";

fn default_test_size() -> f64 {
    0.2
}

fn default_num_samples() -> usize {
    100
}

fn default_input_side() -> u32 {
    224
}

/// Train on random images
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticImageRequest {
    #[serde(default)]
    pub model_params: CnnParams,
    #[serde(default)]
    pub train_params: TrainParams,
    #[serde(default = "default_test_size")]
    pub test_size: f64,
    #[serde(default = "default_num_samples")]
    pub num_samples: usize,
    #[serde(default)]
    pub model_name: Option<String>,
}

impl Default for SyntheticImageRequest {
    fn default() -> Self {
        Self {
            model_params: CnnParams::default(),
            train_params: TrainParams::default(),
            test_size: default_test_size(),
            num_samples: default_num_samples(),
            model_name: None,
        }
    }
}

/// Train on a zip archive of images grouped in class folders
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageArchiveRequest {
    /// `input_shape` and `num_classes` are taken from the archive
    #[serde(default)]
    pub model_params: CnnParams,
    #[serde(default)]
    pub train_params: TrainParams,
    #[serde(default = "default_test_size")]
    pub test_size: f64,
    #[serde(default = "default_input_side")]
    pub input_height: u32,
    #[serde(default = "default_input_side")]
    pub input_width: u32,
    /// Display names replacing detected folder names, by class index
    #[serde(default)]
    pub class_names: BTreeMap<usize, String>,
    #[serde(default)]
    pub model_name: Option<String>,
}

impl Default for ImageArchiveRequest {
    fn default() -> Self {
        Self {
            model_params: CnnParams::default(),
            train_params: TrainParams::default(),
            test_size: default_test_size(),
            input_height: default_input_side(),
            input_width: default_input_side(),
            class_names: BTreeMap::new(),
            model_name: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageTrainReport {
    pub model_name: String,
    pub identity: ArtifactId,
    pub model_path: PathBuf,
    pub evaluation: Evaluation,
    pub history: TrainingHistory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_mapping: Option<ClassMapping>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImagePrediction {
    pub model_name: String,
    pub identity: ArtifactId,
    pub class_index: usize,
    pub class_name: String,
    pub confidence: f32,
    pub probabilities: Vec<f32>,
    pub metadata: ArtifactMetadata,
}

/// Training, prediction and management of image classifiers
#[derive(Debug, Clone)]
pub struct ImageService {
    config: AppConfig,
    policy: AccessPolicy,
    store: ArtifactStore,
}

impl ImageService {
    pub fn new(config: AppConfig, policy: AccessPolicy) -> Result<Self> {
        config.validate()?;
        let store = ArtifactStore::open(config.cnn_models_dir())?;
        Ok(Self { config, policy, store })
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn train_synthetic(&self, caller: &Caller, request: &SyntheticImageRequest) -> Result<ImageTrainReport> {
        self.policy.authorize(caller, Operation::TrainSynthetic)?;
        let fraction = TestFraction::new(request.test_size)?;
        let [height, width, _] = request.model_params.input_shape;
        let params = request.model_params.clone().with_input_shape(height, width, 3);
        params.validate()?;

        let mut generator = SyntheticData::new();
        if let Some(seed) = params.random_state {
            generator = generator.with_seed(seed);
        }
        let (x, y) = generator.images(request.num_samples, height, width, params.num_classes)?;

        let model_name = request
            .model_name
            .clone()
            .unwrap_or_else(|| default_model_name("cnn_test"));
        let metadata = ArtifactMetadata::new(ModelFamily::Cnn, Provenance::Test)
            .with_model_name(&model_name)
            .with_created_by(Some(caller.user_id.as_str()));

        let fit = FitInput {
            x,
            y,
            params,
            train: request.train_params.clone(),
            fraction,
            classes: None,
        };
        self.fit_and_save(fit, model_name, metadata)
    }

    /// Extract → rename classes → prepare → split → train → evaluate → save
    pub fn train_from_archive(
        &self,
        caller: &Caller,
        upload: &Upload,
        request: &ImageArchiveRequest,
    ) -> Result<ImageTrainReport> {
        self.policy.authorize(caller, Operation::TrainReal)?;
        upload.check(
            &self.config,
            |_| upload.extension().as_deref() == Some(ARCHIVE_EXTENSION),
            "a ZIP archive",
        )?;
        let fraction = TestFraction::new(request.test_size)?;
        let preparer = ImagePreparer::new(request.input_height, request.input_width)?;
        // The class count is only known after extraction
        let params = request
            .model_params
            .clone()
            .with_input_shape(request.input_height as usize, request.input_width as usize, 3);
        params.clone().with_num_classes(params.num_classes.max(1)).validate()?;

        let scratch = Scratch::new_in(&self.config.image_upload_dir())?;
        let staged = scratch.store(upload).and_then(|archive| {
            let extracted = extract(
                &archive,
                scratch.path().join("extract"),
                &self.config.allowed_image_extensions,
            )?;
            let prepared = preparer.prepare(&extracted.image_paths, Some(extracted.labels.as_slice()))?;
            Ok((extracted, prepared))
        });
        scratch.finish();
        let (extracted, prepared) = staged?;

        let mut class_mapping = extracted.class_mapping.clone();
        let detected = class_mapping.len();
        if request.model_params.num_classes != detected {
            warn!(
                requested = request.model_params.num_classes,
                detected,
                "Class count differs from the archive; using the detected count"
            );
        }
        for (&index, name) in &request.class_names {
            let name = name.trim();
            if !name.is_empty() && !class_mapping.rename(index, name) {
                warn!(index, "Ignoring name for a class that does not exist");
            }
        }
        if !prepared.failed.is_empty() {
            warn!(failed = prepared.failed.len(), "Some images could not be decoded and were left blank");
        }

        let params = params.with_num_classes(detected);
        params.validate()?;

        let model_name = request
            .model_name
            .clone()
            .unwrap_or_else(|| default_model_name("cnn_real"));
        let mut metadata = ArtifactMetadata::new(ModelFamily::Cnn, Provenance::Real)
            .with_model_name(&model_name)
            .with_created_by(Some(caller.user_id.as_str()));
        metadata.num_images = Some(extracted.len());
        metadata.class_names = class_mapping.names();
        metadata.class_mapping = Some(class_mapping.clone());
        metadata.file_name = Some(upload.file_name.clone());

        let y = prepared
            .y
            .ok_or_else(|| MlError::ValidationError("Images were prepared without labels".to_string()))?;
        let fit = FitInput {
            x: prepared.x,
            y,
            params,
            train: request.train_params.clone(),
            fraction,
            classes: Some(class_mapping),
        };
        self.fit_and_save(fit, model_name, metadata)
    }

    /// Classify one random image of the model's input size
    pub fn predict_synthetic(&self, caller: &Caller, model_name: &str) -> Result<ImagePrediction> {
        self.policy.authorize(caller, Operation::PredictSynthetic)?;
        let (identity, model, metadata) = self.load(model_name)?;
        let [height, width, _] = model.params().input_shape;
        let x = SyntheticData::new().image_batch(1, height, width);
        classify(model_name, identity, &model, metadata, x)
    }

    /// Classify an uploaded image. Unlike batch preparation, a decode
    /// failure here is an error.
    pub fn predict_image(&self, caller: &Caller, model_name: &str, upload: &Upload) -> Result<ImagePrediction> {
        self.policy.authorize(caller, Operation::PredictReal)?;
        upload.check(&self.config, |n| self.config.is_allowed_image(n), "a PNG or JPEG image")?;
        let (identity, model, metadata) = self.load(model_name)?;
        let [height, width, _] = model.params().input_shape;
        let preparer = ImagePreparer::new(height as u32, width as u32)?;
        let pixels = preparer.load_bytes(&upload.bytes, &upload.file_name)?;
        let x = pixels.insert_axis(Axis(0));
        classify(model_name, identity, &model, metadata, x)
    }

    pub fn list(&self, caller: &Caller) -> Result<Vec<ArtifactSummary>> {
        self.policy.authorize(caller, Operation::ListModels)?;
        self.store.list(Some(PayloadKind::Deep))
    }

    pub fn delete(&self, caller: &Caller, model_name: &str) -> Result<bool> {
        delete_by_name(&self.policy, caller, &self.store, PayloadKind::Deep, model_name)
    }

    fn load(&self, model_name: &str) -> Result<(ArtifactId, ImageClassifier, ArtifactMetadata)> {
        let identity = resolve(&self.store, PayloadKind::Deep, model_name)?;
        let (model, metadata) = self.store.load::<ImageClassifier>(&identity)?;
        Ok((identity, model, metadata))
    }

    fn fit_and_save(&self, fit: FitInput, model_name: String, mut metadata: ArtifactMetadata) -> Result<ImageTrainReport> {
        let mut splitter = Splitter::new(fit.fraction);
        if let Some(seed) = fit.params.random_state {
            splitter = splitter.with_random_state(seed);
        }
        let (x_train, x_test, y_train, y_test) = splitter.split(&fit.x, &fit.y)?;

        let mut model = ImageClassifier::new(fit.params.clone())?;
        let history = model.train(&x_train, &y_train, Some((&x_test, &y_test)), &fit.train)?;
        let labels = fit
            .classes
            .as_ref()
            .map(ClassMapping::names)
            .unwrap_or_else(|| ClassMapping::numbered(fit.params.num_classes).names());
        let evaluation = model.evaluate(&x_test, &y_test, &labels)?;

        metadata.architecture = Some(fit.params.architecture.clone());
        metadata.hyperparameters = to_object(&fit.params);
        metadata.train_params = to_object(&fit.train);
        metadata.test_size = Some(fit.fraction.value());
        metadata.input_shape = Some(fit.params.input_shape);
        metadata.evaluation = Some(evaluation.clone());
        metadata.training_history = Some(history.clone());

        let saved = self.store.save(&model, &model_name, Some(&metadata))?;
        info!(
            identity = %saved.identity,
            accuracy = ?evaluation.accuracy,
            loss = ?evaluation.loss,
            "Trained image classifier"
        );

        Ok(ImageTrainReport {
            model_name,
            identity: saved.identity,
            model_path: saved.payload_path,
            evaluation,
            history,
            class_mapping: fit.classes,
        })
    }
}

struct FitInput {
    x: Array4<f32>,
    y: Array1<usize>,
    params: CnnParams,
    train: TrainParams,
    fraction: TestFraction,
    classes: Option<ClassMapping>,
}

fn classify(
    model_name: &str,
    identity: ArtifactId,
    model: &ImageClassifier,
    metadata: ArtifactMetadata,
    x: Array4<f32>,
) -> Result<ImagePrediction> {
    let proba = model.predict_proba(&x)?;
    let probabilities = proba.row(0).to_vec();
    let (class_index, confidence) = probabilities
        .iter()
        .copied()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, p)| if p > best.1 { (i, p) } else { best });
    let class_name = match &metadata.class_mapping {
        Some(mapping) => mapping.name_or_default(class_index),
        None => format!("Class {}", class_index),
    };
    info!(identity = %identity, class = class_index, confidence, "Image prediction");
    Ok(ImagePrediction {
        model_name: model_name.to_string(),
        identity,
        class_index,
        class_name,
        confidence,
        probabilities,
        metadata,
    })
}

fn to_object<T: Serialize>(value: &T) -> Map<String, Value> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}
