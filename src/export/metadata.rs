//! Metadata record stored next to every artifact

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::images::ClassMapping;
use crate::tabular::{EncodingMap, FillValue};
use crate::training::{Evaluation, FeatureImportance, ProblemType, TrainingHistory};

/// Where the training data came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Synthetic data from the testing tier
    Test,
    /// User-supplied data
    Real,
}

/// Engine family of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    Tabular,
    Cnn,
}

/// How and from what an artifact was produced.
///
/// Every field is optional on read so that partial or older records still
/// load; keys this struct does not know are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_type: Option<ModelFamily>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem_type: Option<ProblemType>,
    #[serde(alias = "model_params", skip_serializing_if = "Map::is_empty")]
    pub hyperparameters: Map<String, Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub train_params: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_size: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Evaluation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub training_history: Option<TrainingHistory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_importance: Option<Vec<FeatureImportance>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(alias = "data_type", skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,

    // Tabular
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub feature_names: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_column: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub categorical_columns: Vec<String>,
    /// Category codes per encoded column, the target included when it was
    /// encoded
    #[serde(skip_serializing_if = "EncodingMap::is_empty")]
    pub encoded_columns: EncodingMap,
    /// Training-time fill values, replayed on gaps in prediction inputs
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fill_values: BTreeMap<String, FillValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    // Images
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_mapping: Option<ClassMapping>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub class_names: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_images: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_shape: Option<[usize; 3]>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ArtifactMetadata {
    pub fn new(model_type: ModelFamily, provenance: Provenance) -> Self {
        Self {
            model_type: Some(model_type),
            provenance: Some(provenance),
            created_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = Some(name.into());
        self
    }

    pub fn with_created_by(mut self, user: Option<&str>) -> Self {
        self.created_by = user.map(str::to_string);
        self
    }

    /// Accuracy on the held-out split, if the model was scored on one
    pub fn accuracy(&self) -> Option<f64> {
        self.evaluation.as_ref().and_then(|e| e.accuracy)
    }

    /// `algorithm` for tabular models, `architecture` for networks
    pub fn model_label(&self) -> Option<&str> {
        match self.model_type {
            Some(ModelFamily::Cnn) => self.architecture.as_deref(),
            _ => self.algorithm.as_deref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_legacy_keys_accepted() {
        let meta: ArtifactMetadata = serde_json::from_value(json!({
            "model_name": "iris",
            "model_params": {"n_neighbors": 3},
            "data_type": "real",
            "custom_note": "kept"
        }))
        .unwrap();
        assert_eq!(meta.hyperparameters["n_neighbors"], json!(3));
        assert_eq!(meta.provenance, Some(Provenance::Real));
        assert_eq!(meta.extra["custom_note"], json!("kept"));
    }

    #[test]
    fn test_empty_fields_omitted() {
        let meta = ArtifactMetadata::new(ModelFamily::Tabular, Provenance::Test).with_model_name("m");
        let value = serde_json::to_value(&meta).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj["model_type"], json!("tabular"));
        assert_eq!(obj["provenance"], json!("test"));
        assert!(!obj.contains_key("feature_names"));
        assert!(!obj.contains_key("class_mapping"));

        let back: ArtifactMetadata = serde_json::from_value(value).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn test_non_finite_metrics_become_null() {
        let meta = ArtifactMetadata {
            test_size: Some(f64::NAN),
            ..Default::default()
        };
        let text = serde_json::to_string(&meta).unwrap();
        assert!(text.contains("\"test_size\":null"));
        assert!(ArtifactMetadata::default().is_empty());
    }

    #[test]
    fn test_model_label() {
        let mut meta = ArtifactMetadata::new(ModelFamily::Cnn, Provenance::Real);
        meta.architecture = Some("custom".to_string());
        meta.algorithm = Some("ignored".to_string());
        assert_eq!(meta.model_label(), Some("custom"));
    }
}
