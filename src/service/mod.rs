//! Request-level orchestration
//!
//! Each service checks the caller against the [`AccessPolicy`], stages any
//! uploaded bytes in request-scoped scratch space, runs the
//! load → prepare → split → train → evaluate → save pipeline and returns a
//! serializable report. Transport concerns stay with the host application.

pub mod dashboard;
pub mod image;
pub mod tabular;

pub use dashboard::{stats, view, BestModel, DashboardStats};
pub use image::{
    ImageArchiveRequest, ImagePrediction, ImageService, ImageTrainReport, SyntheticImageRequest,
};
pub use tabular::{
    SyntheticTabularRequest, TabularPrediction, TabularService, TabularTrainReport, TabularUploadRequest,
};

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{MlError, Result};
use crate::export::{sanitize_name, ArtifactIndex, ArtifactId, ArtifactStore, PayloadKind};
use crate::security::{AccessPolicy, Caller, Operation};

/// A file received from a client
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    /// Lowercased extension of the client-side file name
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
    }

    /// Reject empty, oversized or wrongly typed uploads
    pub(crate) fn check(&self, config: &AppConfig, allowed: impl Fn(&str) -> bool, expected: &str) -> Result<()> {
        if self.file_name.trim().is_empty() {
            return Err(MlError::ValidationError("No file was selected".to_string()));
        }
        if self.bytes.is_empty() {
            return Err(MlError::ValidationError(format!("Uploaded file '{}' is empty", self.file_name)));
        }
        if self.bytes.len() as u64 > config.max_upload_bytes {
            return Err(MlError::ValidationError(format!(
                "Uploaded file is {} bytes, the limit is {}",
                self.bytes.len(),
                config.max_upload_bytes
            )));
        }
        if !allowed(&self.file_name) {
            return Err(MlError::UnsupportedFormat(format!(
                "'{}' must be {}",
                self.file_name, expected
            )));
        }
        Ok(())
    }

    /// File name safe to create inside a scratch directory
    fn safe_file_name(&self) -> String {
        let base = Path::new(&self.file_name)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload");
        let name = sanitize_name(base);
        if name.is_empty() || name.starts_with('.') {
            format!("upload{}", name)
        } else {
            name
        }
    }
}

/// Directory holding one request's uploaded files and extractions.
///
/// Removed by [`Scratch::finish`], or on drop when a request bails out early.
#[derive(Debug)]
pub(crate) struct Scratch {
    dir: TempDir,
}

impl Scratch {
    pub(crate) fn new_in(parent: &Path) -> Result<Self> {
        fs::create_dir_all(parent)?;
        let dir = tempfile::Builder::new().prefix("request_").tempdir_in(parent)?;
        debug!(path = %dir.path().display(), "Created scratch directory");
        Ok(Self { dir })
    }

    pub(crate) fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `upload` into the scratch directory
    pub(crate) fn store(&self, upload: &Upload) -> Result<PathBuf> {
        let path = self.dir.path().join(upload.safe_file_name());
        fs::write(&path, &upload.bytes)?;
        Ok(path)
    }

    /// Remove the directory, logging instead of failing
    pub(crate) fn finish(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!(path = %path.display(), error = %e, "Failed to remove scratch directory");
        }
    }
}

/// `{prefix}_{8 hex}`
pub(crate) fn default_model_name(prefix: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &id[..8])
}

/// Resolve a model name or identity against the store's current contents
pub(crate) fn resolve(store: &ArtifactStore, kind: PayloadKind, name: &str) -> Result<ArtifactId> {
    if name.trim().is_empty() {
        return Err(MlError::ValidationError("No model name was given".to_string()));
    }
    ArtifactIndex::build(store, Some(kind))?.resolve(name)
}

/// Gate and perform a delete by name
pub(crate) fn delete_by_name(
    policy: &AccessPolicy,
    caller: &Caller,
    store: &ArtifactStore,
    kind: PayloadKind,
    name: &str,
) -> Result<bool> {
    policy.authorize(caller, Operation::DeleteModel)?;
    let identity = resolve(store, kind, name)?;
    let removed = store.delete(&identity);
    if removed {
        info!(identity = %identity, user = %caller.user_id, "Deleted model");
    }
    Ok(removed)
}
