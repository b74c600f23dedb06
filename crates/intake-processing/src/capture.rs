//! Capture device contract
//!
//! A capture device produces still frames that enter the upload pipeline like
//! any other file. Frame contents are opaque to the rest of the pipeline.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::{DynamicImage, GenericImageView};

use crate::compression::{CompressionError, ImageCompressor, OutputFormat};
use intake_core::IntakeError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CaptureError {
    #[error("Capture device is not started")]
    NotStarted,

    #[error("Capture device unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Encode(#[from] CompressionError),
}

impl From<CaptureError> for IntakeError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::Encode(e) => e.into(),
            other => IntakeError::Validation(other.to_string()),
        }
    }
}

/// Description of a live source returned by `CaptureDevice::start`
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSource {
    pub label: String,
    pub width: u32,
    pub height: u32,
}

/// One encoded still frame
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedFrame {
    pub data: Bytes,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

impl CapturedFrame {
    /// `capture-<unix millis>.<ext>`
    pub fn file_name(&self) -> String {
        format!(
            "capture-{}.{}",
            self.captured_at.timestamp_millis(),
            self.format.extension()
        )
    }

    pub fn content_type(&self) -> &'static str {
        self.format.to_mime_type()
    }
}

#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn start(&mut self) -> Result<LiveSource, CaptureError>;

    /// Grab a still from the running source, encoded at `quality` (0-1).
    async fn capture_still(
        &mut self,
        quality: f32,
        format: OutputFormat,
    ) -> Result<CapturedFrame, CaptureError>;

    async fn stop(&mut self) -> Result<(), CaptureError>;

    fn is_active(&self) -> bool;
}

/// Device that always "sees" the same image. Used by tests and the CLI.
#[derive(Debug, Clone)]
pub struct StaticCaptureDevice {
    label: String,
    image: DynamicImage,
    active: bool,
}

impl StaticCaptureDevice {
    pub fn new(label: impl Into<String>, image: DynamicImage) -> Self {
        Self {
            label: label.into(),
            image,
            active: false,
        }
    }

    pub fn from_bytes(label: impl Into<String>, data: &[u8]) -> Result<Self, CaptureError> {
        let image = image::load_from_memory(data)
            .map_err(|e| CaptureError::Encode(CompressionError::ImageLoad(e.to_string())))?;
        Ok(Self::new(label, image))
    }
}

#[async_trait]
impl CaptureDevice for StaticCaptureDevice {
    async fn start(&mut self) -> Result<LiveSource, CaptureError> {
        self.active = true;
        let (width, height) = self.image.dimensions();
        tracing::debug!(label = %self.label, width, height, "Capture source started");
        Ok(LiveSource {
            label: self.label.clone(),
            width,
            height,
        })
    }

    async fn capture_still(
        &mut self,
        quality: f32,
        format: OutputFormat,
    ) -> Result<CapturedFrame, CaptureError> {
        if !self.active {
            return Err(CaptureError::NotStarted);
        }

        let data = ImageCompressor::encode_image(&self.image, format, quality.clamp(0.0, 1.0))?;
        let (width, height) = self.image.dimensions();

        Ok(CapturedFrame {
            data,
            format,
            width,
            height,
            captured_at: Utc::now(),
        })
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        self.active = false;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use image::{Rgb, RgbImage};

    fn device() -> StaticCaptureDevice {
        let img = RgbImage::from_pixel(64, 48, Rgb([200, 120, 40]));
        StaticCaptureDevice::new("test-camera", DynamicImage::ImageRgb8(img))
    }

    #[tokio::test]
    async fn test_capture_requires_start() {
        let mut device = device();
        let err = device
            .capture_still(0.9, OutputFormat::Jpeg)
            .await
            .unwrap_err();
        assert_eq!(err, CaptureError::NotStarted);
    }

    #[tokio::test]
    async fn test_capture_lifecycle() {
        let mut device = device();
        let source = device.start().await.unwrap();
        assert_eq!((source.width, source.height), (64, 48));
        assert!(device.is_active());

        let frame = device.capture_still(0.9, OutputFormat::Jpeg).await.unwrap();
        assert_eq!(frame.content_type(), "image/jpeg");
        assert_eq!(
            image::guess_format(&frame.data).unwrap(),
            image::ImageFormat::Jpeg
        );

        device.stop().await.unwrap();
        assert!(!device.is_active());
    }

    #[test]
    fn test_frame_file_name() {
        let frame = CapturedFrame {
            data: Bytes::from_static(b"x"),
            format: OutputFormat::WebP,
            width: 1,
            height: 1,
            captured_at: Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(),
        };
        assert_eq!(frame.file_name(), "capture-1700000000123.webp");
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        let err = StaticCaptureDevice::from_bytes("cam", b"garbage").unwrap_err();
        assert!(matches!(
            err,
            CaptureError::Encode(CompressionError::ImageLoad(_))
        ));
    }
}
