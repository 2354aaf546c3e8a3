//! mlforge - model artifact lifecycle and dataset preparation
//!
//! This crate turns uploaded datasets into trained, persisted models:
//! - Tabular and image dataset loading and tensor preparation
//! - Classical and convolutional model training with evaluation
//! - Collision-free artifact persistence with metadata
//! - Role-gated service entry points for a host HTTP layer
//!
//! # Modules
//!
//! ## Data
//! - [`tabular`] - CSV/Excel loading, cleaning, imputation, categorical encoding
//! - [`images`] - Zip extraction with folder-derived classes, image tensors
//!
//! ## Models
//! - [`training`] - Splitter, model factory, trainers and metrics
//! - [`export`] - Artifact store, identities, metadata and name index
//!
//! ## Services
//! - [`security`] - Role-based access policy
//! - [`service`] - Tabular, image and dashboard operations
//! - [`config`] - Directory and upload configuration

// Core error handling
pub mod error;
pub mod config;

// Data preparation
pub mod tabular;
pub mod images;

// Models and persistence
pub mod training;
pub mod export;

// Services
pub mod security;
pub mod service;

pub use error::{ErrorKind, MlError, Result};

/// Re-export commonly used types
pub mod prelude {
    // Error handling and configuration
    pub use crate::config::AppConfig;
    pub use crate::error::{ErrorKind, MlError, Result};

    // Data preparation
    pub use crate::images::{ClassMapping, ImagePreparer};
    pub use crate::tabular::{EncodingMap, FeatureLayout, NumericFill, TabularLoader, TabularPreparer};

    // Training
    pub use crate::training::{
        Algorithm, CnnParams, Evaluation, ImageClassifier, ModelSpec, ProblemType, Splitter, TabularModel,
        TestFraction, TrainParams,
    };

    // Persistence
    pub use crate::export::{ArtifactId, ArtifactIndex, ArtifactMetadata, ArtifactStore, PayloadKind};

    // Services
    pub use crate::security::{AccessPolicy, Caller, Operation, Role};
    pub use crate::service::{ImageService, TabularService, Upload};
}
