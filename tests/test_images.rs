//! Integration tests for archive extraction and image tensors

mod common;

use common::{png_bytes, pets_archive, write_file, zip_bytes};
use mlforge::config::AppConfig;
use mlforge::images::{extract, ClassMapping, ImagePreparer};
use mlforge::MlError;
use std::collections::{BTreeMap, BTreeSet};
use tempfile::TempDir;

fn image_extensions() -> BTreeSet<String> {
    AppConfig::default().allowed_image_extensions
}

// ============================================================================
// Extraction
// ============================================================================

#[test]
fn test_folders_become_classes() {
    let dir = TempDir::new().unwrap();
    let archive = write_file(dir.path(), "pets.zip", &pets_archive());
    let extracted = extract(&archive, dir.path().join("out"), &image_extensions()).unwrap();

    let expected: BTreeMap<usize, String> = [(0, "cat".to_string()), (1, "dog".to_string())].into();
    assert_eq!(extracted.class_mapping.as_map(), &expected);
    assert_eq!(extracted.len(), 5);
    assert_eq!(extracted.labels, vec![0, 0, 0, 1, 1]);
    assert!(extracted.image_paths.iter().all(|p| p.exists()));
    assert_eq!(extracted.class_counts()[&0], 3);
}

#[test]
fn test_archive_without_images() {
    let dir = TempDir::new().unwrap();
    let bytes = zip_bytes(&[("readme.txt", b"nothing here".to_vec()), ("data/a.csv", b"a\n1\n".to_vec())]);
    let archive = write_file(dir.path(), "docs.zip", &bytes);

    let err = extract(&archive, dir.path().join("out"), &image_extensions()).unwrap_err();
    assert!(matches!(err, MlError::NoImagesFound(_)));
}

#[test]
fn test_resource_forks_and_loose_files() {
    let dir = TempDir::new().unwrap();
    let bytes = zip_bytes(&[
        ("__MACOSX/cat/._1.png", b"junk".to_vec()),
        ("cat/._2.png", b"junk".to_vec()),
        ("cat/1.png", png_bytes(4, [1, 2, 3])),
        ("loose.png", png_bytes(4, [4, 5, 6])),
    ]);
    let archive = write_file(dir.path(), "mixed.zip", &bytes);
    let extracted = extract(&archive, dir.path().join("out"), &image_extensions()).unwrap();

    assert_eq!(extracted.len(), 2);
    // a file at the archive root is labelled after the archive itself
    assert_eq!(extracted.class_mapping.names(), vec!["cat", "mixed"]);
}

#[test]
fn test_only_configured_extensions_extracted() {
    let dir = TempDir::new().unwrap();
    let bytes = zip_bytes(&[
        ("cat/1.png", png_bytes(4, [1, 2, 3])),
        ("cat/2.JPG", png_bytes(4, [1, 2, 3])),
        ("dog/3.jpeg", png_bytes(4, [4, 5, 6])),
    ]);
    let archive = write_file(dir.path(), "pets.zip", &bytes);

    let png_only: BTreeSet<String> = ["png".to_string()].into();
    let extracted = extract(&archive, dir.path().join("png"), &png_only).unwrap();
    assert_eq!(extracted.len(), 1);
    assert_eq!(extracted.class_mapping.names(), vec!["cat"]);

    let all = extract(&archive, dir.path().join("all"), &image_extensions()).unwrap();
    assert_eq!(all.len(), 3);

    let none: BTreeSet<String> = ["gif".to_string()].into();
    assert!(matches!(
        extract(&archive, dir.path().join("none"), &none),
        Err(MlError::NoImagesFound(_))
    ));
}

// ============================================================================
// Preparation
// ============================================================================

#[test]
fn test_tensor_shape_and_range() {
    let dir = TempDir::new().unwrap();
    let archive = write_file(dir.path(), "pets.zip", &pets_archive());
    let extracted = extract(&archive, dir.path().join("out"), &image_extensions()).unwrap();

    let prepared = ImagePreparer::new(8, 10)
        .unwrap()
        .prepare(&extracted.image_paths, Some(extracted.labels.as_slice()))
        .unwrap();
    assert_eq!(prepared.x.shape(), &[5, 8, 10, 3]);
    assert!(prepared.x.iter().all(|&v| (0.0..=1.0).contains(&v)));
    assert_eq!(prepared.y.unwrap().to_vec(), extracted.labels);
    assert!(prepared.failed.is_empty());
}

#[test]
fn test_corrupt_file_leaves_blank_slot() {
    let dir = TempDir::new().unwrap();
    let paths = vec![
        write_file(dir.path(), "a.png", &png_bytes(5, [255, 255, 255])),
        write_file(dir.path(), "broken.png", b"definitely not a png"),
        write_file(dir.path(), "c.png", &png_bytes(5, [255, 0, 0])),
    ];

    let prepared = ImagePreparer::new(4, 4).unwrap().prepare(&paths, None).unwrap();
    assert_eq!(prepared.x.shape()[0], 3);
    assert_eq!(prepared.failed, vec![1]);
    assert!(prepared.x.index_axis(ndarray::Axis(0), 1).iter().all(|&v| v == 0.0));
    assert!(prepared.x.index_axis(ndarray::Axis(0), 0).iter().all(|&v| v == 1.0));
    assert!(prepared.y.is_none());
}

#[test]
fn test_single_image_decode_is_strict() {
    let preparer = ImagePreparer::new(4, 4).unwrap();
    let err = preparer.load_bytes(b"garbage", "upload.png").unwrap_err();
    assert!(matches!(err, MlError::DecodeFailure { .. }));

    let pixels = preparer.load_bytes(&png_bytes(9, [0, 255, 0]), "ok.png").unwrap();
    assert_eq!(pixels.shape(), &[4, 4, 3]);
    assert_eq!(pixels[[2, 2, 1]], 1.0);
}

#[test]
fn test_label_count_mismatch() {
    let dir = TempDir::new().unwrap();
    let paths = vec![write_file(dir.path(), "a.png", &png_bytes(3, [0, 0, 0]))];
    let err = ImagePreparer::new(3, 3).unwrap().prepare(&paths, Some(&[0, 1][..])).unwrap_err();
    assert!(matches!(err, MlError::ValidationError(_)));
}

// ============================================================================
// Class names
// ============================================================================

#[test]
fn test_rename_changes_names_only() {
    let mut mapping = ClassMapping::from_names(["cat", "dog"]);
    assert!(mapping.rename(1, "puppy"));
    assert!(!mapping.rename(5, "ghost"));
    assert_eq!(mapping.names(), vec!["cat", "puppy"]);
    assert_eq!(mapping.len(), 2);
    assert_eq!(mapping.name_or_default(7), "Class 7");
}
