//! Decoding images into a fixed-shape tensor

use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::{Array1, Array3, Array4, Axis};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{MlError, Result};

/// Output of [`ImagePreparer::prepare`]
#[derive(Debug, Clone)]
pub struct PreparedImages {
    /// `(n, height, width, 3)` with channel values in `[0, 1]`
    pub x: Array4<f32>,
    pub y: Option<Array1<usize>>,
    /// Slots that hold a blank image because decoding failed
    pub failed: Vec<usize>,
}

/// Resizes and scales images to `(height, width, 3)`
#[derive(Debug, Clone, Copy)]
pub struct ImagePreparer {
    height: u32,
    width: u32,
}

impl ImagePreparer {
    pub fn new(height: u32, width: u32) -> Result<Self> {
        if height == 0 || width == 0 {
            return Err(MlError::ValidationError(format!(
                "Image size must be positive, got {}x{}",
                height, width
            )));
        }
        Ok(Self { height, width })
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    /// Decode every path into its own slot of the output tensor.
    ///
    /// A file that cannot be decoded is logged and leaves its slot all-zero;
    /// the batch as a whole still succeeds.
    pub fn prepare(&self, image_paths: &[PathBuf], labels: Option<&[usize]>) -> Result<PreparedImages> {
        if let Some(labels) = labels {
            if labels.len() != image_paths.len() {
                return Err(MlError::ValidationError(format!(
                    "Got {} labels for {} images",
                    labels.len(),
                    image_paths.len()
                )));
            }
        }

        let decoded: Vec<Option<Array3<f32>>> = image_paths
            .par_iter()
            .map(|path| match self.load(path) {
                Ok(pixels) => Some(pixels),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Substituting blank image");
                    None
                }
            })
            .collect();

        let (h, w) = (self.height as usize, self.width as usize);
        let mut x = Array4::<f32>::zeros((image_paths.len(), h, w, 3));
        let mut failed = Vec::new();
        for (idx, (mut slot, pixels)) in x.axis_iter_mut(Axis(0)).zip(decoded).enumerate() {
            match pixels {
                Some(pixels) => slot.assign(&pixels),
                None => failed.push(idx),
            }
        }

        debug!(images = image_paths.len(), failed = failed.len(), "Prepared image batch");

        Ok(PreparedImages {
            x,
            y: labels.map(|l| Array1::from_vec(l.to_vec())),
            failed,
        })
    }

    /// Decode a single file, failing on any decode error
    pub fn load(&self, path: &Path) -> Result<Array3<f32>> {
        let img = image::open(path).map_err(|e| MlError::DecodeFailure {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;
        self.to_tensor(&img)
    }

    /// Decode in-memory bytes, failing on any decode error
    pub fn load_bytes(&self, bytes: &[u8], label: &str) -> Result<Array3<f32>> {
        let img = image::load_from_memory(bytes).map_err(|e| MlError::DecodeFailure {
            path: PathBuf::from(label),
            cause: e.to_string(),
        })?;
        self.to_tensor(&img)
    }

    fn to_tensor(&self, img: &DynamicImage) -> Result<Array3<f32>> {
        let rgb = img
            .resize_exact(self.width, self.height, FilterType::Nearest)
            .to_rgb8();
        let (h, w) = (self.height as usize, self.width as usize);
        let data: Vec<f32> = rgb.into_raw().into_iter().map(|v| v as f32 / 255.0).collect();
        Ok(Array3::from_shape_vec((h, w, 3), data)?)
    }
}

/// Functional form of [`ImagePreparer::prepare`]
pub fn prepare(
    image_paths: &[PathBuf],
    height: u32,
    width: u32,
    labels: Option<&[usize]>,
) -> Result<(Array4<f32>, Option<Array1<usize>>)> {
    let prepared = ImagePreparer::new(height, width)?.prepare(image_paths, labels)?;
    Ok((prepared.x, prepared.y))
}
