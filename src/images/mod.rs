//! Image datasets: archive extraction and tensor preparation

pub mod extract;
pub mod prepare;

pub use extract::{extract, is_image_name, ClassMapping, ExtractedImages, DEFAULT_IMAGE_EXTENSIONS};
pub use prepare::{prepare, ImagePreparer, PreparedImages};
