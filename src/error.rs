//! Error types for mlforge

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for mlforge operations
pub type Result<T> = std::result::Result<T, MlError>;

/// Main error type
#[derive(Error, Debug)]
pub enum MlError {
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Missing column(s): {}", columns.join(", "))]
    MissingColumn { columns: Vec<String> },

    #[error("No images found in archive {0}")]
    NoImagesFound(PathBuf),

    #[error("A model named '{0}' already exists")]
    DuplicateName(String),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Failed to decode {path}: {cause}")]
    DecodeFailure { path: PathBuf, cause: String },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Error loading file {path}: {cause}")]
    Parse { path: PathBuf, cause: String },

    #[error("Unknown category '{value}' for column '{column}'")]
    UnknownCategory { column: String, value: String },

    #[error("Operation requires one of the roles: {required}")]
    Forbidden { required: String },

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Archive error: {0}")]
    ArchiveError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },
}

/// Coarse classification of [`MlError`] for callers that map failures
/// onto transport-level status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnsupportedFormat,
    MissingColumn,
    NoImagesFound,
    DuplicateName,
    ArtifactNotFound,
    DecodeFailure,
    Validation,
    Forbidden,
    Internal,
}

impl MlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MlError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            MlError::MissingColumn { .. } => ErrorKind::MissingColumn,
            MlError::NoImagesFound(_) => ErrorKind::NoImagesFound,
            MlError::DuplicateName(_) => ErrorKind::DuplicateName,
            MlError::ArtifactNotFound(_) => ErrorKind::ArtifactNotFound,
            MlError::DecodeFailure { .. } => ErrorKind::DecodeFailure,
            MlError::ValidationError(_)
            | MlError::Parse { .. }
            | MlError::UnknownCategory { .. } => ErrorKind::Validation,
            MlError::Forbidden { .. } => ErrorKind::Forbidden,
            _ => ErrorKind::Internal,
        }
    }

    pub(crate) fn missing_column(name: impl Into<String>) -> Self {
        MlError::MissingColumn {
            columns: vec![name.into()],
        }
    }
}

impl From<polars::error::PolarsError> for MlError {
    fn from(err: polars::error::PolarsError) -> Self {
        MlError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for MlError {
    fn from(err: serde_json::Error) -> Self {
        MlError::SerializationError(err.to_string())
    }
}

impl From<bincode::Error> for MlError {
    fn from(err: bincode::Error) -> Self {
        MlError::SerializationError(err.to_string())
    }
}

impl From<zip::result::ZipError> for MlError {
    fn from(err: zip::result::ZipError) -> Self {
        MlError::ArchiveError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for MlError {
    fn from(err: ndarray::ShapeError) -> Self {
        MlError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}
