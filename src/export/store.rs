//! On-disk artifact store
//!
//! Each artifact is a payload file `<identity>.<ext>` plus an optional
//! `<identity>.json` metadata file in the same directory. Payloads are
//! published with an exclusive create, so two saves can never overwrite one
//! another even when they race inside the same second.

use chrono::{DateTime, Local};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::identity::{sanitize_name, ArtifactId};
use super::metadata::ArtifactMetadata;
use crate::error::{MlError, Result};

const MAGIC: [u8; 4] = *b"MLFG";
const FORMAT_VERSION: u32 = 1;
const METADATA_EXTENSION: &str = "json";

/// Serialization engine of a payload, told apart by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    /// Tabular models
    Classical,
    /// Neural networks
    Deep,
}

impl PayloadKind {
    pub const ALL: [PayloadKind; 2] = [PayloadKind::Classical, PayloadKind::Deep];

    pub fn extension(&self) -> &'static str {
        match self {
            PayloadKind::Classical => "model",
            PayloadKind::Deep => "net",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        Self::ALL.into_iter().find(|k| k.extension() == ext)
    }
}

/// A model the store knows how to persist
pub trait Payload: Serialize + DeserializeOwned {
    const KIND: PayloadKind;
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    magic: [u8; 4],
    format_version: u32,
    kind: PayloadKind,
    checksum: u64,
    data: Vec<u8>,
}

impl Envelope {
    fn seal<P: Payload>(model: &P) -> Result<Vec<u8>> {
        let data = bincode::serialize(model)?;
        let envelope = Envelope {
            magic: MAGIC,
            format_version: FORMAT_VERSION,
            kind: P::KIND,
            checksum: fnv1a(&data),
            data,
        };
        Ok(bincode::serialize(&envelope)?)
    }

    fn open<P: Payload>(bytes: &[u8], path: &Path) -> Result<P> {
        let corrupt = |reason: &str| MlError::SerializationError(format!("{}: {}", path.display(), reason));
        let envelope: Envelope = bincode::deserialize(bytes).map_err(|_| corrupt("not a model file"))?;
        if envelope.magic != MAGIC {
            return Err(corrupt("not a model file"));
        }
        if envelope.format_version != FORMAT_VERSION {
            return Err(corrupt(&format!("unsupported format version {}", envelope.format_version)));
        }
        if envelope.kind != P::KIND {
            return Err(corrupt(&format!("holds a {:?} payload", envelope.kind)));
        }
        if fnv1a(&envelope.data) != envelope.checksum {
            return Err(corrupt("checksum verification failed"));
        }
        Ok(bincode::deserialize(&envelope.data)?)
    }
}

/// FNV-1a over the payload bytes
fn fnv1a(data: &[u8]) -> u64 {
    const FNV_OFFSET: u64 = 14695981039346656037;
    const FNV_PRIME: u64 = 1099511628211;
    data.iter().fold(FNV_OFFSET, |hash, byte| (hash ^ *byte as u64).wrapping_mul(FNV_PRIME))
}

/// Result of a successful save
#[derive(Debug, Clone, PartialEq)]
pub struct SavedArtifact {
    pub identity: ArtifactId,
    pub payload_path: PathBuf,
    pub metadata_path: Option<PathBuf>,
}

/// One entry of [`ArtifactStore::list`]
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactSummary {
    pub identity: ArtifactId,
    pub kind: PayloadKind,
    pub path: PathBuf,
    pub created_at: DateTime<Local>,
    pub metadata: ArtifactMetadata,
}

/// Directory of persisted artifacts
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open the store at `root`, creating the directory if needed
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True if any payload in the store was saved under `name` (compared
    /// after sanitizing, timestamp suffix removed)
    pub fn exists(&self, name: &str) -> Result<bool> {
        let wanted = sanitize_name(name.trim());
        Ok(self
            .payload_files(None)?
            .iter()
            .any(|(id, _, _)| id.model_name() == wanted))
    }

    /// Persist `model` under a fresh identity derived from `name`.
    ///
    /// Fails with [`MlError::DuplicateName`] when the name is taken; in that
    /// case nothing is written.
    pub fn save<P: Payload>(
        &self,
        model: &P,
        name: &str,
        metadata: Option<&ArtifactMetadata>,
    ) -> Result<SavedArtifact> {
        let sanitized = sanitize_name(name.trim());
        if self.exists(&sanitized)? {
            return Err(MlError::DuplicateName(sanitized));
        }
        let identity = ArtifactId::generate(&sanitized)?;
        let bytes = Envelope::seal(model)?;

        let payload_path = self.payload_path(&identity, P::KIND);
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist_noclobber(&payload_path).map_err(|e| {
            if e.error.kind() == io::ErrorKind::AlreadyExists {
                MlError::DuplicateName(sanitized.clone())
            } else {
                MlError::IoError(e.error)
            }
        })?;

        let metadata_path = match metadata {
            Some(meta) => {
                let path = self.metadata_path(&identity);
                if let Err(e) = self.write_metadata(&path, meta) {
                    // the artifact never becomes visible without its metadata
                    if let Err(rm) = fs::remove_file(&payload_path) {
                        warn!(path = %payload_path.display(), error = %rm, "Failed to roll back payload");
                    }
                    return Err(e);
                }
                Some(path)
            }
            None => None,
        };

        info!(identity = %identity, kind = ?P::KIND, "Saved artifact");
        Ok(SavedArtifact {
            identity,
            payload_path,
            metadata_path,
        })
    }

    /// Load a payload and its metadata. Missing metadata yields an empty
    /// record.
    pub fn load<P: Payload>(&self, identity: &ArtifactId) -> Result<(P, ArtifactMetadata)> {
        let path = self
            .locate(identity, P::KIND)?
            .ok_or_else(|| MlError::ArtifactNotFound(identity.to_string()))?;
        let bytes = fs::read(&path)?;
        let model = Envelope::open::<P>(&bytes, &path)?;
        let metadata = self.read_metadata(&path.with_extension(METADATA_EXTENSION))?;
        debug!(identity = %identity, "Loaded artifact");
        Ok((model, metadata))
    }

    /// All artifacts (optionally of one kind), newest first.
    ///
    /// A single unreadable entry never fails the listing: damaged metadata
    /// is listed as empty and a payload removed mid-scan is skipped.
    pub fn list(&self, kind: Option<PayloadKind>) -> Result<Vec<ArtifactSummary>> {
        let mut summaries = Vec::new();
        for (identity, kind, path) in self.payload_files(kind)? {
            let created_at = match creation_time(&path) {
                Ok(time) => time,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping artifact that could not be inspected");
                    continue;
                }
            };
            let metadata_path = path.with_extension(METADATA_EXTENSION);
            let metadata = self.read_metadata(&metadata_path).unwrap_or_else(|e| {
                warn!(path = %metadata_path.display(), error = %e, "Unreadable metadata, listing as empty");
                ArtifactMetadata::default()
            });
            summaries.push(ArtifactSummary {
                identity,
                kind,
                path,
                created_at,
                metadata,
            });
        }
        summaries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.identity.cmp(&a.identity))
        });
        Ok(summaries)
    }

    /// Remove payload and metadata. Returns `false` when nothing was found or
    /// a removal failed; a partial removal is not rolled back.
    pub fn delete(&self, identity: &ArtifactId) -> bool {
        let mut targets = Vec::new();
        for kind in PayloadKind::ALL {
            match self.locate(identity, kind) {
                Ok(Some(path)) => {
                    targets.push(path.with_extension(METADATA_EXTENSION));
                    targets.push(path);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(identity = %identity, error = %e, "Failed to look up artifact for deletion");
                    return false;
                }
            }
        }
        if targets.is_empty() {
            let orphan = self.metadata_path(identity);
            if !orphan.exists() {
                return false;
            }
            targets.push(orphan);
        }

        let mut ok = true;
        for path in targets.iter().rev() {
            if !path.exists() {
                continue;
            }
            if let Err(e) = fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "Failed to remove artifact file");
                ok = false;
            }
        }
        if ok {
            info!(identity = %identity, "Deleted artifact");
        }
        ok
    }

    fn payload_path(&self, identity: &ArtifactId, kind: PayloadKind) -> PathBuf {
        self.root.join(format!("{}.{}", identity, kind.extension()))
    }

    fn metadata_path(&self, identity: &ArtifactId) -> PathBuf {
        self.root.join(format!("{}.{}", identity, METADATA_EXTENSION))
    }

    /// Payload path for `identity`, at the top level or in a subdirectory
    fn locate(&self, identity: &ArtifactId, kind: PayloadKind) -> Result<Option<PathBuf>> {
        let direct = self.payload_path(identity, kind);
        if direct.is_file() {
            return Ok(Some(direct));
        }
        Ok(self
            .payload_files(Some(kind))?
            .into_iter()
            .find(|(id, _, _)| id == identity)
            .map(|(_, _, path)| path))
    }

    fn payload_files(&self, kind: Option<PayloadKind>) -> Result<Vec<(ArtifactId, PayloadKind, PathBuf)>> {
        let mut files = Vec::new();
        collect_files(&self.root, &mut files)?;
        Ok(files
            .into_iter()
            .filter_map(|path| {
                let found = PayloadKind::from_path(&path)?;
                if kind.map_or(false, |k| k != found) {
                    return None;
                }
                let stem = path.file_stem()?.to_str()?;
                let identity = ArtifactId::parse(stem).ok()?;
                Some((identity, found, path))
            })
            .collect())
    }

    fn write_metadata(&self, path: &Path, metadata: &ArtifactMetadata) -> Result<()> {
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        serde_json::to_writer_pretty(&mut tmp, metadata)?;
        tmp.write_all(b"\n")?;
        tmp.persist(path).map_err(|e| MlError::IoError(e.error))?;
        Ok(())
    }

    fn read_metadata(&self, path: &Path) -> Result<ArtifactMetadata> {
        match fs::read(path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Metadata file missing, using empty metadata");
                Ok(ArtifactMetadata::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(&entry.path(), out)?;
        } else if file_type.is_file() {
            out.push(entry.path());
        }
    }
    Ok(())
}

/// Birth time where the filesystem records it, modification time otherwise
fn creation_time(path: &Path) -> Result<DateTime<Local>> {
    let meta = fs::metadata(path)?;
    let time = meta.created().or_else(|_| meta.modified())?;
    Ok(DateTime::<Local>::from(time))
}
