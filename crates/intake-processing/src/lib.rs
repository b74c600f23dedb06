//! Intake Processing Library
//!
//! Client-side work done on a file before it is uploaded: image
//! resizing/re-encoding against a byte budget, MIME/size validation and the
//! contract for camera-style capture devices.

pub mod capture;
pub mod compression;
pub mod validator;

// Re-export commonly used types
pub use capture::{CaptureDevice, CaptureError, CapturedFrame, LiveSource, StaticCaptureDevice};
pub use compression::{
    target_dimensions, CompressionError, CompressionOptions, CompressionResult, ImageCompressor,
    OutputFormat,
};
pub use validator::{type_matches, FileValidator, ValidationError};
