//! Upload file fixtures

use bytes::Bytes;
use image::{DynamicImage, Rgb, RgbImage};

use crate::upload::UploadFile;
use intake_processing::{ImageCompressor, OutputFormat};

/// A PDF-looking file of exactly `size` bytes
pub fn pdf_file(name: &str, size: usize) -> UploadFile {
    let mut data = b"%PDF-1.7\n".to_vec();
    data.resize(size.max(data.len()), b'0');
    data.truncate(size);
    UploadFile::new(name, "application/pdf", Bytes::from(data))
}

pub fn text_file(name: &str, contents: &str) -> UploadFile {
    UploadFile::new(name, "text/plain", Bytes::from(contents.to_string()))
}

/// A real JPEG of the given dimensions
pub fn jpeg_file(name: &str, width: u32, height: u32) -> UploadFile {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            ((x ^ y) & 0xff) as u8,
        ])
    });
    let data = ImageCompressor::encode_image(&DynamicImage::ImageRgb8(img), OutputFormat::Jpeg, 0.95)
        .unwrap_or_default();
    UploadFile::new(name, "image/jpeg", data)
}
