//! Directory and upload configuration
//!
//! An [`AppConfig`] is built by the host application and handed to each
//! service call. Nothing here reads the process environment.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{MlError, Result};
use crate::images::DEFAULT_IMAGE_EXTENSIONS;
use crate::tabular::NumericFill;

const DEFAULT_MAX_UPLOAD_BYTES: u64 = 500 * 1024 * 1024;

/// Storage locations and upload limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Root for request-scoped upload scratch space
    pub upload_dir: PathBuf,
    /// Root for persisted artifacts
    pub models_dir: PathBuf,
    pub allowed_image_extensions: BTreeSet<String>,
    pub allowed_tabular_extensions: BTreeSet<String>,
    pub max_upload_bytes: u64,
    /// Fill policy the tabular loader applies to numeric gaps
    pub numeric_fill: NumericFill,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::new(),
            models_dir: PathBuf::new(),
            allowed_image_extensions: DEFAULT_IMAGE_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            allowed_tabular_extensions: ["csv", "xlsx", "xls"].iter().map(|s| s.to_string()).collect(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            numeric_fill: NumericFill::Zero,
        }
    }
}

impl AppConfig {
    /// Create a configuration rooted at the given directories
    pub fn new(upload_dir: impl Into<PathBuf>, models_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            models_dir: models_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_max_upload_bytes(mut self, bytes: u64) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    pub fn with_numeric_fill(mut self, fill: NumericFill) -> Self {
        self.numeric_fill = fill;
        self
    }

    pub fn image_upload_dir(&self) -> PathBuf {
        self.upload_dir.join("images")
    }

    pub fn tabular_upload_dir(&self) -> PathBuf {
        self.upload_dir.join("tabular")
    }

    pub fn cnn_models_dir(&self) -> PathBuf {
        self.models_dir.join("cnn")
    }

    pub fn tabular_models_dir(&self) -> PathBuf {
        self.models_dir.join("tabular")
    }

    /// Check that both roots are absolute and limits are sane
    pub fn validate(&self) -> Result<()> {
        for (field, dir) in [("upload_dir", &self.upload_dir), ("models_dir", &self.models_dir)] {
            if !dir.is_absolute() {
                return Err(MlError::ConfigError(format!(
                    "{} must be an absolute path, got '{}'",
                    field,
                    dir.display()
                )));
            }
        }
        if self.max_upload_bytes == 0 {
            return Err(MlError::ConfigError("max_upload_bytes must be positive".to_string()));
        }
        Ok(())
    }

    /// Whether `file_name` carries one of the allowed image extensions
    pub fn is_allowed_image(&self, file_name: &str) -> bool {
        Self::has_extension_in(file_name, &self.allowed_image_extensions)
    }

    /// Whether `file_name` carries one of the allowed tabular extensions
    pub fn is_allowed_tabular(&self, file_name: &str) -> bool {
        Self::has_extension_in(file_name, &self.allowed_tabular_extensions)
    }

    fn has_extension_in(file_name: &str, allowed: &BTreeSet<String>) -> bool {
        Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| allowed.contains(&e.to_ascii_lowercase()))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_dirs_rejected() {
        let config = AppConfig::new("uploads", "/srv/models");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("upload_dir"));
    }

    #[test]
    fn test_subdirectories() {
        let config = AppConfig::new("/srv/uploads", "/srv/models");
        assert!(config.validate().is_ok());
        assert_eq!(config.cnn_models_dir(), PathBuf::from("/srv/models/cnn"));
        assert_eq!(config.tabular_upload_dir(), PathBuf::from("/srv/uploads/tabular"));
    }

    #[test]
    fn test_extension_checks_ignore_case() {
        let config = AppConfig::new("/a", "/b");
        assert!(config.is_allowed_image("Photo.JPG"));
        assert!(config.is_allowed_tabular("sales.xlsx"));
        assert!(!config.is_allowed_tabular("notes.txt"));
        assert!(!config.is_allowed_image("noext"));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: AppConfig =
            serde_json::from_str(r#"{"upload_dir": "/u", "models_dir": "/m"}"#).unwrap();
        assert_eq!(config.max_upload_bytes, 500 * 1024 * 1024);
        assert!(config.allowed_image_extensions.contains("png"));
    }
}
