//! Model training module
//!
//! Provides the model factory and trainers for both engines:
//! - Classical tabular models: SVM, k-NN, Random Forest, linear/logistic
//! - A convolutional image classifier
//! - Train/test splitting, evaluation metrics and synthetic data

mod config;
mod models;
pub mod decision_tree;
pub mod knn;
pub mod linear_models;
pub mod metrics;
pub mod network;
pub mod random_forest;
pub mod split;
pub mod svm;
pub mod synthetic;

pub use config::{
    Algorithm, Gamma, Kernel, KnnParams, LinearKind, LinearParams, ModelSpec, NeighborSearch, ProblemType,
    RandomForestParams, SvmParams, WeightScheme,
};
pub use metrics::{ClassReport, Evaluation};
pub use models::{Capability, FeatureImportance, TabularModel};
pub use network::{CnnParams, ImageClassifier, TrainParams, TrainingHistory, CUSTOM_ARCHITECTURE};
pub use split::{split, Split, SplitIndices, Splitter, TestFraction};
pub use synthetic::SyntheticData;
