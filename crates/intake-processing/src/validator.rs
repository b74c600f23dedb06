use intake_core::models::AttachmentConfig;
use intake_core::{ClientConfig, IntakeError};
use std::path::Path;

/// Validation errors raised before a file reaches the network
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("File is empty: {0}")]
    EmptyFile(String),

    #[error("File too large: {name} is {size} bytes (max: {max} bytes)")]
    FileTooLarge { name: String, size: u64, max: u64 },

    #[error("File type not allowed: {name} ({content_type}); allowed: {allowed}")]
    TypeNotAllowed {
        name: String,
        content_type: String,
        allowed: String,
    },
}

impl From<ValidationError> for IntakeError {
    fn from(err: ValidationError) -> Self {
        IntakeError::Validation(err.to_string())
    }
}

/// Does one allowed-type entry accept this file?
///
/// Entries are an exact MIME type (`application/pdf`), a wildcard subtype
/// (`image/*`) or an extension with or without the dot (`.pdf`, `pdf`).
/// Comparison is case-insensitive.
pub fn type_matches(pattern: &str, filename: &str, content_type: &str) -> bool {
    let pattern = pattern.trim().to_lowercase();
    if pattern.is_empty() {
        return false;
    }
    let content_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();

    if let Some(prefix) = pattern.strip_suffix("/*") {
        return content_type
            .split_once('/')
            .map(|(kind, _)| kind == prefix)
            .unwrap_or(false);
    }

    if pattern.contains('/') {
        return content_type == pattern;
    }

    let wanted = pattern.trim_start_matches('.');
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(wanted))
        .unwrap_or(false)
}

/// Client-side size and type pre-check.
///
/// The server stays authoritative; this only avoids uploads that are certain
/// to be rejected.
#[derive(Debug, Clone, Default)]
pub struct FileValidator {
    max_file_size: Option<u64>,
    allowed_types: Vec<String>,
}

impl FileValidator {
    pub fn new(max_file_size: Option<u64>, allowed_types: Vec<String>) -> Self {
        Self {
            max_file_size,
            allowed_types,
        }
    }

    /// Accepts any non-empty file
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn max_file_size(&self) -> Option<u64> {
        self.max_file_size
    }

    pub fn allowed_types(&self) -> &[String] {
        &self.allowed_types
    }

    pub fn validate_file_size(&self, name: &str, size: u64) -> Result<(), ValidationError> {
        if size == 0 {
            return Err(ValidationError::EmptyFile(name.to_string()));
        }

        if let Some(max) = self.max_file_size {
            if size > max {
                return Err(ValidationError::FileTooLarge {
                    name: name.to_string(),
                    size,
                    max,
                });
            }
        }

        Ok(())
    }

    pub fn is_type_allowed(&self, name: &str, content_type: &str) -> bool {
        self.allowed_types.is_empty()
            || self
                .allowed_types
                .iter()
                .any(|pattern| type_matches(pattern, name, content_type))
    }

    pub fn validate_type(&self, name: &str, content_type: &str) -> Result<(), ValidationError> {
        if self.is_type_allowed(name, content_type) {
            return Ok(());
        }

        Err(ValidationError::TypeNotAllowed {
            name: name.to_string(),
            content_type: content_type.to_string(),
            allowed: self.allowed_types.join(", "),
        })
    }

    /// Size first, then type
    pub fn validate(&self, name: &str, content_type: &str, size: u64) -> Result<(), ValidationError> {
        self.validate_file_size(name, size)?;
        self.validate_type(name, content_type)
    }
}

impl From<&AttachmentConfig> for FileValidator {
    fn from(config: &AttachmentConfig) -> Self {
        Self::new(config.max_file_size, config.allowed_mime_types.clone())
    }
}

impl From<&ClientConfig> for FileValidator {
    fn from(config: &ClientConfig) -> Self {
        Self::new(
            Some(config.max_file_size_bytes),
            config.allowed_types.clone(),
        )
    }
}
