//! Unpacking labelled image archives

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{MlError, Result};

/// Image extensions accepted when nothing else is configured
pub const DEFAULT_IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Whether a file name carries one of the `allowed` (lowercase) extensions
pub fn is_image_name(name: &str, allowed: &BTreeSet<String>) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| allowed.contains(&e.to_ascii_lowercase()))
        .unwrap_or(false)
}

/// Index-to-label table for an image classifier.
///
/// Indices are handed out in order of first appearance and never change;
/// renaming only replaces the display name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassMapping {
    names: BTreeMap<usize, String>,
}

impl ClassMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mapping with classes `0..names.len()` in the given order
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).enumerate().collect(),
        }
    }

    /// Placeholder names `Class 0..n`
    pub fn numbered(n_classes: usize) -> Self {
        Self::from_names((0..n_classes).map(|i| format!("Class {}", i)))
    }

    /// Index for `name`, assigning the next free index on first sight
    pub fn index_or_insert(&mut self, name: &str) -> usize {
        if let Some((&idx, _)) = self.names.iter().find(|(_, n)| n.as_str() == name) {
            return idx;
        }
        let idx = self.names.len();
        self.names.insert(idx, name.to_string());
        idx
    }

    /// Replace the display name of `index`; false if no such class
    pub fn rename(&mut self, index: usize, name: impl Into<String>) -> bool {
        match self.names.get_mut(&index) {
            Some(slot) => {
                *slot = name.into();
                true
            }
            None => false,
        }
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(&index).map(String::as_str)
    }

    /// Name for `index`, or `Class {index}` when unmapped
    pub fn name_or_default(&self, index: usize) -> String {
        self.name(index)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Class {}", index))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Names ordered by index
    pub fn names(&self) -> Vec<String> {
        self.names.values().cloned().collect()
    }

    pub fn as_map(&self) -> &BTreeMap<usize, String> {
        &self.names
    }
}

/// Images written out of an archive, with aligned labels
#[derive(Debug, Clone)]
pub struct ExtractedImages {
    pub image_paths: Vec<PathBuf>,
    pub labels: Vec<usize>,
    pub class_mapping: ClassMapping,
}

impl ExtractedImages {
    pub fn len(&self) -> usize {
        self.image_paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image_paths.is_empty()
    }

    /// Number of images per class index
    pub fn class_counts(&self) -> BTreeMap<usize, usize> {
        let mut counts = BTreeMap::new();
        for label in &self.labels {
            *counts.entry(*label).or_insert(0) += 1;
        }
        counts
    }
}

/// Extract every image entry of `zip_path` under `dest_dir`. Only file
/// names with an extension in `allowed` count as images.
///
/// The label of an image is the name of the directory directly containing
/// it. Images at the archive root fall into one class named after the
/// archive itself. Entries whose path would escape `dest_dir` are skipped,
/// as is macOS resource-fork clutter.
pub fn extract(
    zip_path: impl AsRef<Path>,
    dest_dir: impl AsRef<Path>,
    allowed: &BTreeSet<String>,
) -> Result<ExtractedImages> {
    let zip_path = zip_path.as_ref();
    let dest_dir = dest_dir.as_ref();
    fs::create_dir_all(dest_dir)?;

    let file = File::open(zip_path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let root_class = zip_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("images")
        .to_string();

    let mut image_paths = Vec::new();
    let mut labels = Vec::new();
    let mut class_mapping = ClassMapping::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let relative = match entry.enclosed_name() {
            Some(path) => path,
            None => {
                warn!(entry = %entry.name(), "Skipping archive entry with unsafe path");
                continue;
            }
        };
        let file_name = match relative.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };
        if !is_image_name(&file_name, allowed) || is_resource_fork(&relative, &file_name) {
            continue;
        }

        let label_name = relative
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| root_class.clone());

        let target = dest_dir.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;

        labels.push(class_mapping.index_or_insert(&label_name));
        image_paths.push(target);
    }

    if image_paths.is_empty() {
        return Err(MlError::NoImagesFound(zip_path.to_path_buf()));
    }

    info!(
        archive = %zip_path.display(),
        images = image_paths.len(),
        classes = class_mapping.len(),
        "Extracted image archive"
    );

    Ok(ExtractedImages {
        image_paths,
        labels,
        class_mapping,
    })
}

fn is_resource_fork(relative: &Path, file_name: &str) -> bool {
    file_name.starts_with("._")
        || relative
            .components()
            .any(|c| c.as_os_str() == "__MACOSX")
}
