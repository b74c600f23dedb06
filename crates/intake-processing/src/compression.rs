use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader, Limits};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use intake_core::IntakeError;

/// Default encoding quality (0-1)
pub const DEFAULT_QUALITY: f32 = 0.8;

/// Largest width or height accepted for decoding. Bounds the in-memory pixel copy.
pub const DEFAULT_MAX_WORKING_DIMENSION: u32 = 16_384;

const MIN_SEARCH_QUALITY: f32 = 0.1;
const MAX_SEARCH_QUALITY: f32 = 0.9;
const MAX_SEARCH_ITERATIONS: usize = 10;
const CLOSE_ENOUGH_RATIO: f64 = 0.95;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompressionError {
    #[error("Failed to load image: {0}")]
    ImageLoad(String),

    #[error("Failed to encode image: {0}")]
    Encode(String),

    #[error("Unsupported output format: {0} (expected jpeg, png or webp)")]
    UnsupportedFormat(String),
}

impl From<CompressionError> for IntakeError {
    fn from(err: CompressionError) -> Self {
        match err {
            CompressionError::ImageLoad(msg) => IntakeError::ImageLoad(msg),
            CompressionError::Encode(msg) => IntakeError::Compression(msg),
            CompressionError::UnsupportedFormat(format) => IntakeError::Validation(format!(
                "Unsupported output format: {} (expected jpeg, png or webp)",
                format
            )),
        }
    }
}

/// Output format for compressed images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
    #[serde(rename = "webp")]
    WebP,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Result<Self, CompressionError> {
        match s.to_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            "png" => Ok(OutputFormat::Png),
            "webp" => Ok(OutputFormat::WebP),
            _ => Err(CompressionError::UnsupportedFormat(s.to_string())),
        }
    }

    pub fn to_mime_type(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::WebP => "image/webp",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::WebP => "webp",
        }
    }

    pub fn to_image_format(self) -> ImageFormat {
        match self {
            OutputFormat::Jpeg => ImageFormat::Jpeg,
            OutputFormat::Png => ImageFormat::Png,
            OutputFormat::WebP => ImageFormat::WebP,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionOptions {
    #[serde(default)]
    pub max_width: Option<u32>,
    #[serde(default)]
    pub max_height: Option<u32>,
    /// Encoding quality in 0-1. Ignored by PNG.
    #[serde(default = "default_quality")]
    pub quality: f32,
    #[serde(default)]
    pub format: OutputFormat,
    /// Byte budget for the encoded output
    #[serde(default)]
    pub max_size_bytes: Option<u64>,
}

fn default_quality() -> f32 {
    DEFAULT_QUALITY
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            max_width: None,
            max_height: None,
            quality: DEFAULT_QUALITY,
            format: OutputFormat::default(),
            max_size_bytes: None,
        }
    }
}

impl CompressionOptions {
    pub fn with_max_dimensions(mut self, max_width: Option<u32>, max_height: Option<u32>) -> Self {
        self.max_width = max_width;
        self.max_height = max_height;
        self
    }

    pub fn with_quality(mut self, quality: f32) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_max_size_bytes(mut self, max_size_bytes: u64) -> Self {
        self.max_size_bytes = Some(max_size_bytes);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompressionResult {
    pub data: Bytes,
    pub format: OutputFormat,
    pub original_size: u64,
    pub compressed_size: u64,
    /// `compressed_size / original_size`
    pub compression_ratio: f64,
    pub width: u32,
    pub height: u32,
    /// Quality of the returned encode
    pub quality: f32,
}

/// Compute output dimensions, preserving aspect ratio.
///
/// Width is clamped first; the height limit is then applied independently to
/// the result of that first pass.
pub fn target_dimensions(
    width: u32,
    height: u32,
    max_width: Option<u32>,
    max_height: Option<u32>,
) -> (u32, u32) {
    let mut w = width as f64;
    let mut h = height as f64;

    if let Some(max_width) = max_width.filter(|m| *m > 0) {
        if w > max_width as f64 {
            h = h * max_width as f64 / w;
            w = max_width as f64;
        }
    }

    if let Some(max_height) = max_height.filter(|m| *m > 0) {
        if h > max_height as f64 {
            w = w * max_height as f64 / h;
            h = max_height as f64;
        }
    }

    ((w.round() as u32).max(1), (h.round() as u32).max(1))
}

/// Resizes and re-encodes images, optionally searching for a quality that
/// fits a byte budget.
#[derive(Debug, Clone, Copy)]
pub struct ImageCompressor {
    max_working_dimension: u32,
}

impl Default for ImageCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageCompressor {
    pub fn new() -> Self {
        Self {
            max_working_dimension: DEFAULT_MAX_WORKING_DIMENSION,
        }
    }

    pub fn with_max_working_dimension(mut self, max_working_dimension: u32) -> Self {
        self.max_working_dimension = max_working_dimension;
        self
    }

    /// Compress image bytes according to `options`.
    ///
    /// Failing to meet `max_size_bytes` is not an error: the quality 0.1 encode
    /// is returned as the best effort.
    pub fn compress(
        &self,
        data: &[u8],
        options: &CompressionOptions,
    ) -> Result<CompressionResult, CompressionError> {
        let original_size = data.len() as u64;
        let img = self.decode(data)?;
        let (source_width, source_height) = img.dimensions();
        let (width, height) =
            target_dimensions(source_width, source_height, options.max_width, options.max_height);

        let surface = if (width, height) == (source_width, source_height) {
            img
        } else {
            tracing::debug!(
                source_width,
                source_height,
                width,
                height,
                "Resizing image before encode"
            );
            img.resize_exact(width, height, FilterType::Lanczos3)
        };

        let quality = options.quality.clamp(0.0, 1.0);
        let first = Self::encode_image(&surface, options.format, quality)?;

        let (data, quality) = match options.max_size_bytes {
            Some(target) if first.len() as u64 > target => {
                tracing::debug!(
                    size = first.len(),
                    target,
                    "First encode over budget, searching quality"
                );
                Self::search_quality(&surface, options.format, target)?
            }
            _ => (first, quality),
        };

        let compressed_size = data.len() as u64;
        Ok(CompressionResult {
            data,
            format: options.format,
            original_size,
            compressed_size,
            compression_ratio: if original_size == 0 {
                0.0
            } else {
                compressed_size as f64 / original_size as f64
            },
            width,
            height,
            quality,
        })
    }

    /// Run `compress` on the blocking pool so the async caller stays responsive.
    pub async fn compress_async(
        &self,
        data: Bytes,
        options: CompressionOptions,
    ) -> Result<CompressionResult, CompressionError> {
        let compressor = *self;
        tokio::task::spawn_blocking(move || compressor.compress(&data, &options))
            .await
            .map_err(|e| CompressionError::Encode(format!("Compression task failed: {}", e)))?
    }

    /// Binary search over quality in [0.1, 0.9], at most 10 encodes.
    fn search_quality(
        surface: &DynamicImage,
        format: OutputFormat,
        target: u64,
    ) -> Result<(Bytes, f32), CompressionError> {
        let mut low = MIN_SEARCH_QUALITY;
        let mut high = MAX_SEARCH_QUALITY;
        let mut best: Option<(Bytes, f32)> = None;

        for iteration in 0..MAX_SEARCH_ITERATIONS {
            let quality = (low + high) / 2.0;
            let encoded = Self::encode_image(surface, format, quality)?;
            let size = encoded.len() as u64;

            tracing::debug!(iteration, quality, size, target, "Quality search step");

            if size <= target {
                let close_enough = size as f64 >= target as f64 * CLOSE_ENOUGH_RATIO;
                best = Some((encoded, quality));
                if close_enough {
                    break;
                }
                low = quality;
            } else {
                high = quality;
            }
        }

        match best {
            Some(found) => Ok(found),
            None => {
                tracing::warn!(
                    target,
                    "No quality met the size budget, returning lowest-quality encode"
                );
                let encoded = Self::encode_image(surface, format, MIN_SEARCH_QUALITY)?;
                Ok((encoded, MIN_SEARCH_QUALITY))
            }
        }
    }

    fn decode(&self, data: &[u8]) -> Result<DynamicImage, CompressionError> {
        let mut reader = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| CompressionError::ImageLoad(e.to_string()))?;

        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_working_dimension);
        limits.max_image_height = Some(self.max_working_dimension);
        reader.limits(limits);

        reader
            .decode()
            .map_err(|e| CompressionError::ImageLoad(e.to_string()))
    }

    /// Encode a raster at `quality` (0-1).
    pub fn encode_image(
        img: &DynamicImage,
        format: OutputFormat,
        quality: f32,
    ) -> Result<Bytes, CompressionError> {
        match format {
            OutputFormat::Jpeg => Self::encode_jpeg(img, quality),
            OutputFormat::Png => Self::encode_png(img),
            OutputFormat::WebP => Self::encode_webp(img, quality),
        }
    }

    /// Encode to JPEG using mozjpeg
    fn encode_jpeg(img: &DynamicImage, quality: f32) -> Result<Bytes, CompressionError> {
        let rgb_img = img.to_rgb8();
        let (width, height) = rgb_img.dimensions();

        let mut comp = mozjpeg::Compress::new(mozjpeg::ColorSpace::JCS_RGB);
        comp.set_size(width as usize, height as usize);
        comp.set_quality(quality * 100.0);
        comp.set_optimize_coding(true);

        let mut comp = comp
            .start_compress(Vec::new())
            .map_err(|e| CompressionError::Encode(e.to_string()))?;
        comp.write_scanlines(&rgb_img)
            .map_err(|e| CompressionError::Encode(e.to_string()))?;
        let jpeg_data = comp
            .finish()
            .map_err(|e| CompressionError::Encode(e.to_string()))?;

        Ok(Bytes::from(jpeg_data))
    }

    /// Encode to PNG (lossless)
    fn encode_png(img: &DynamicImage) -> Result<Bytes, CompressionError> {
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .map_err(|e| CompressionError::Encode(e.to_string()))?;
        Ok(Bytes::from(buffer))
    }

    fn encode_webp(img: &DynamicImage, quality: f32) -> Result<Bytes, CompressionError> {
        let (width, height) = img.dimensions();
        let rgba_img = img.to_rgba8();

        let encoder = webp::Encoder::from_rgba(&rgba_img, width, height);
        let webp_data = encoder.encode(quality * 100.0);

        if webp_data.is_empty() {
            return Err(CompressionError::Encode(
                "WebP encoder produced no output".to_string(),
            ));
        }

        Ok(Bytes::copy_from_slice(&webp_data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    /// Gradient with deterministic noise so lossy encoders have work to do.
    fn noisy_image(width: u32, height: u32) -> DynamicImage {
        let mut seed: u32 = 0x2545_f491;
        let img = RgbImage::from_fn(width, height, |x, y| {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let noise = (seed >> 24) as u8;
            Rgb([
                ((x * 255 / width.max(1)) as u8).wrapping_add(noise / 2),
                ((y * 255 / height.max(1)) as u8).wrapping_add(noise / 3),
                noise,
            ])
        });
        DynamicImage::ImageRgb8(img)
    }

    fn jpeg_bytes(img: &DynamicImage) -> Vec<u8> {
        let mut buffer = Vec::new();
        let encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(Cursor::new(&mut buffer), 95);
        img.write_with_encoder(encoder).unwrap();
        buffer
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!(OutputFormat::parse("jpeg").unwrap(), OutputFormat::Jpeg);
        assert_eq!(OutputFormat::parse("JPG").unwrap(), OutputFormat::Jpeg);
        assert_eq!(OutputFormat::parse("png").unwrap(), OutputFormat::Png);
        assert_eq!(OutputFormat::parse("webp").unwrap(), OutputFormat::WebP);

        let err = OutputFormat::parse("avif").unwrap_err();
        assert_eq!(err, CompressionError::UnsupportedFormat("avif".to_string()));
        assert!(matches!(IntakeError::from(err), IntakeError::Validation(msg) if msg.contains("avif")));
    }

    #[test]
    fn test_output_format_to_mime_type() {
        assert_eq!(OutputFormat::Jpeg.to_mime_type(), "image/jpeg");
        assert_eq!(OutputFormat::Png.to_mime_type(), "image/png");
        assert_eq!(OutputFormat::WebP.to_mime_type(), "image/webp");
    }

    #[test]
    fn test_options_defaults_and_serde() {
        let options = CompressionOptions::default();
        assert_eq!(options.quality, 0.8);
        assert_eq!(options.format, OutputFormat::Jpeg);

        let parsed: CompressionOptions =
            serde_json::from_str(r#"{"maxWidth":1920,"format":"webp"}"#).unwrap();
        assert_eq!(parsed.max_width, Some(1920));
        assert_eq!(parsed.quality, 0.8);
        assert_eq!(parsed.format, OutputFormat::WebP);
    }

    #[test]
    fn test_target_dimensions_width_then_height() {
        assert_eq!(
            target_dimensions(6000, 4000, Some(1920), Some(1920)),
            (1920, 1280)
        );
        // Portrait: width pass does nothing, height pass clamps.
        assert_eq!(
            target_dimensions(3000, 6000, Some(1920), Some(1920)),
            (960, 1920)
        );
        // Both passes apply.
        assert_eq!(
            target_dimensions(4000, 3000, Some(2000), Some(1000)),
            (1333, 1000)
        );
        assert_eq!(target_dimensions(800, 600, Some(1920), None), (800, 600));
        assert_eq!(target_dimensions(800, 600, None, None), (800, 600));
        assert_eq!(target_dimensions(10_000, 1, Some(100), None), (100, 1));
    }

    #[test]
    fn test_target_dimensions_preserve_aspect_ratio() {
        let sizes = [(6000, 4000), (4000, 6000), (1234, 987), (50, 3000), (3000, 50)];
        let limits = [
            (Some(1920), Some(1920)),
            (Some(800), None),
            (None, Some(600)),
            (Some(300), Some(1200)),
        ];

        for &(width, height) in &sizes {
            for &(max_width, max_height) in &limits {
                let (w, h) = target_dimensions(width, height, max_width, max_height);
                if let Some(mw) = max_width {
                    assert!(w <= mw);
                }
                if let Some(mh) = max_height {
                    assert!(h <= mh);
                }
                let input_ratio = width as f64 / height as f64;
                let output_ratio = w as f64 / h as f64;
                // One pixel of rounding on the shorter side
                let tolerance = input_ratio / (h.min(w) as f64).max(1.0) + 1e-9;
                assert!(
                    (input_ratio - output_ratio).abs() <= tolerance.max(input_ratio * 0.02),
                    "{}x{} -> {}x{} with {:?}/{:?}",
                    width,
                    height,
                    w,
                    h,
                    max_width,
                    max_height
                );
            }
        }
    }

    #[test]
    fn test_compress_large_jpeg_scenario() {
        let original = jpeg_bytes(&noisy_image(6000, 4000));
        let options = CompressionOptions::default()
            .with_max_dimensions(Some(1920), Some(1920))
            .with_quality(0.8);

        let result = ImageCompressor::new().compress(&original, &options).unwrap();

        assert_eq!((result.width, result.height), (1920, 1280));
        assert_eq!(result.original_size, original.len() as u64);
        assert!(result.compressed_size < result.original_size);
        assert!(result.compression_ratio < 1.0);
        assert_eq!(
            image::guess_format(&result.data).unwrap(),
            ImageFormat::Jpeg
        );
    }

    #[test]
    fn test_compress_without_budget_encodes_once_at_requested_quality() {
        let original = jpeg_bytes(&noisy_image(320, 240));
        let options = CompressionOptions::default().with_quality(0.6);

        let result = ImageCompressor::new().compress(&original, &options).unwrap();

        assert_eq!((result.width, result.height), (320, 240));
        assert_eq!(result.quality, 0.6);
    }

    #[test]
    fn test_budget_met_by_first_encode_keeps_quality() {
        let original = jpeg_bytes(&noisy_image(64, 64));
        let options = CompressionOptions::default().with_max_size_bytes(10 * 1024 * 1024);

        let result = ImageCompressor::new().compress(&original, &options).unwrap();
        assert_eq!(result.quality, 0.8);
    }

    #[test]
    fn test_budget_search_converges_under_target() {
        let img = noisy_image(400, 300);
        let original = jpeg_bytes(&img);
        let high = ImageCompressor::encode_image(&img, OutputFormat::Jpeg, 0.8).unwrap();
        let low = ImageCompressor::encode_image(&img, OutputFormat::Jpeg, 0.1).unwrap();
        assert!(low.len() < high.len());
        let target = ((low.len() + high.len()) / 2) as u64;

        let options = CompressionOptions::default().with_max_size_bytes(target);
        let result = ImageCompressor::new().compress(&original, &options).unwrap();

        assert!(result.compressed_size <= target);
        assert!(result.quality >= 0.1 && result.quality <= 0.9);
    }

    #[test]
    fn test_unachievable_budget_returns_lowest_quality_encode() {
        let img = noisy_image(200, 200);
        let original = jpeg_bytes(&img);
        let options = CompressionOptions::default().with_max_size_bytes(100);

        let result = ImageCompressor::new().compress(&original, &options).unwrap();

        // compress works on the decoded JPEG, not the in-memory raster
        let decoded = image::load_from_memory(&original).unwrap();
        let expected = ImageCompressor::encode_image(&decoded, OutputFormat::Jpeg, 0.1).unwrap();
        assert_eq!(result.quality, 0.1);
        assert!(result.compressed_size > 100);
        assert_eq!(result.compressed_size, expected.len() as u64);
    }

    #[test]
    fn test_compress_to_png_and_webp() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(120, 80, Rgba([10, 200, 30, 255])));
        let mut source = Vec::new();
        img.write_to(&mut Cursor::new(&mut source), ImageFormat::Png)
            .unwrap();
        let compressor = ImageCompressor::new();

        let png = compressor
            .compress(
                &source,
                &CompressionOptions::default()
                    .with_format(OutputFormat::Png)
                    .with_max_dimensions(Some(60), None),
            )
            .unwrap();
        assert_eq!((png.width, png.height), (60, 40));
        assert_eq!(image::guess_format(&png.data).unwrap(), ImageFormat::Png);

        let webp = compressor
            .compress(
                &source,
                &CompressionOptions::default().with_format(OutputFormat::WebP),
            )
            .unwrap();
        assert_eq!(image::guess_format(&webp.data).unwrap(), ImageFormat::WebP);
        assert_eq!(webp.format.to_mime_type(), "image/webp");
    }

    #[test]
    fn test_invalid_input_is_image_load_error() {
        let result = ImageCompressor::new().compress(b"not an image", &CompressionOptions::default());
        assert!(matches!(result, Err(CompressionError::ImageLoad(_))));

        let err: IntakeError = result.unwrap_err().into();
        assert_eq!(err.error_type(), "ImageLoad");
    }

    #[test]
    fn test_working_dimension_limit() {
        let original = jpeg_bytes(&noisy_image(300, 200));
        let result = ImageCompressor::new()
            .with_max_working_dimension(256)
            .compress(&original, &CompressionOptions::default());
        assert!(matches!(result, Err(CompressionError::ImageLoad(_))));
    }

    #[tokio::test]
    async fn test_compress_async() {
        let original = jpeg_bytes(&noisy_image(200, 100));
        let result = ImageCompressor::new()
            .compress_async(
                Bytes::from(original),
                CompressionOptions::default().with_max_dimensions(Some(100), None),
            )
            .await
            .unwrap();
        assert_eq!((result.width, result.height), (100, 50));
    }
}
