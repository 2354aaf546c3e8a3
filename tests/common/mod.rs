//! Fixtures shared by the integration tests

#![allow(dead_code)]

use image::{ImageFormat, Rgb, RgbImage};
use std::fs::File;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// PNG bytes of a solid `size`x`size` image
pub fn png_bytes(size: u32, color: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(size, size, Rgb(color));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

/// Zip archive bytes holding `entries` in order
pub fn zip_bytes(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (name, bytes) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    let mut file = File::create(&path).unwrap();
    file.write_all(bytes).unwrap();
    path
}

/// Three cats and two dogs, red and blue respectively
pub fn pets_archive() -> Vec<u8> {
    zip_bytes(&[
        ("cat/1.png", png_bytes(6, [220, 30, 30])),
        ("cat/2.png", png_bytes(6, [200, 40, 20])),
        ("cat/3.png", png_bytes(6, [240, 10, 50])),
        ("dog/1.png", png_bytes(6, [20, 30, 220])),
        ("dog/2.png", png_bytes(6, [40, 20, 200])),
    ])
}

/// Install a test subscriber once; ignored if another test got there first
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
