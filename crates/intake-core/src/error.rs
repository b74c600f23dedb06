//! Error types module
//!
//! All intake failures are unified under `IntakeError`. The variants follow the
//! taxonomy callers render differently: validation problems that never reached
//! the network, missing resources ("already deleted"), transport failures
//! ("network problem") and image load/encode failures.

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata describing how an error should be presented to a user.
pub trait ErrorMetadata {
    /// Machine-readable error code (e.g., "TRANSPORT_ERROR")
    fn error_code(&self) -> &'static str;

    /// Whether retrying the same operation may succeed.
    /// This engine never retries on its own; the flag is for callers.
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the user
    fn suggested_action(&self) -> Option<&'static str>;

    /// Short, specific user-facing message
    fn client_message(&self) -> String;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IntakeError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transport error: {message}")]
    Transport {
        status: Option<u16>,
        message: String,
    },

    #[error("Image load error: {0}")]
    ImageLoad(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type IntakeResult<T> = Result<T, IntakeError>;

impl IntakeError {
    pub fn transport(message: impl Into<String>) -> Self {
        IntakeError::Transport {
            status: None,
            message: message.into(),
        }
    }

    /// Classify a failed server response by its HTTP status.
    ///
    /// 404 is a missing resource, 400 and 422 are validation rejections,
    /// everything else is a transport failure carrying the status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            404 => IntakeError::NotFound(message),
            400 | 422 => IntakeError::Validation(message),
            _ => IntakeError::Transport {
                status: Some(status),
                message,
            },
        }
    }

    /// HTTP status carried by the error, if it came from a server response.
    pub fn status(&self) -> Option<u16> {
        match self {
            IntakeError::Transport { status, .. } => *status,
            IntakeError::NotFound(_) => Some(404),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, IntakeError::NotFound(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, IntakeError::Validation(_))
    }

    /// Get the error type name for detailed reporting
    pub fn error_type(&self) -> &'static str {
        match self {
            IntakeError::Validation(_) => "Validation",
            IntakeError::NotFound(_) => "NotFound",
            IntakeError::Transport { .. } => "Transport",
            IntakeError::ImageLoad(_) => "ImageLoad",
            IntakeError::Compression(_) => "Compression",
            IntakeError::Config(_) => "Config",
            IntakeError::Serialization(_) => "Serialization",
        }
    }
}

impl From<serde_json::Error> for IntakeError {
    fn from(err: serde_json::Error) -> Self {
        IntakeError::Serialization(format!("JSON error: {}", err))
    }
}

impl From<validator::ValidationErrors> for IntakeError {
    fn from(err: validator::ValidationErrors) -> Self {
        IntakeError::Validation(err.to_string())
    }
}

/// Static metadata for each variant: (error_code, recoverable, suggested_action, log_level).
fn intake_error_static_metadata(
    err: &IntakeError,
) -> (&'static str, bool, Option<&'static str>, LogLevel) {
    match err {
        IntakeError::Validation(_) => (
            "VALIDATION_ERROR",
            false,
            Some("Check the file type, size and request parameters"),
            LogLevel::Debug,
        ),
        IntakeError::NotFound(_) => (
            "NOT_FOUND",
            false,
            Some("The item may already have been deleted; refresh and try again"),
            LogLevel::Debug,
        ),
        IntakeError::Transport { status, .. } => match status {
            Some(code) if (400..500).contains(code) => (
                "TRANSPORT_ERROR",
                false,
                Some("Check the request and your credentials"),
                LogLevel::Warn,
            ),
            _ => (
                "TRANSPORT_ERROR",
                true,
                Some("Check your connection and retry"),
                LogLevel::Warn,
            ),
        },
        IntakeError::ImageLoad(_) => (
            "IMAGE_LOAD_ERROR",
            false,
            Some("Check image format and try a different file"),
            LogLevel::Warn,
        ),
        IntakeError::Compression(_) => (
            "COMPRESSION_ERROR",
            false,
            Some("Upload the original file without compression"),
            LogLevel::Warn,
        ),
        IntakeError::Config(_) => (
            "CONFIG_ERROR",
            false,
            Some("Fix the client configuration"),
            LogLevel::Error,
        ),
        IntakeError::Serialization(_) => (
            "SERIALIZATION_ERROR",
            false,
            Some("Contact support if this error persists"),
            LogLevel::Error,
        ),
    }
}

impl ErrorMetadata for IntakeError {
    fn error_code(&self) -> &'static str {
        intake_error_static_metadata(self).0
    }

    fn is_recoverable(&self) -> bool {
        intake_error_static_metadata(self).1
    }

    fn suggested_action(&self) -> Option<&'static str> {
        intake_error_static_metadata(self).2
    }

    fn log_level(&self) -> LogLevel {
        intake_error_static_metadata(self).3
    }

    fn client_message(&self) -> String {
        match self {
            IntakeError::Validation(msg)
            | IntakeError::NotFound(msg)
            | IntakeError::ImageLoad(msg)
            | IntakeError::Compression(msg)
            | IntakeError::Config(msg) => msg.clone(),
            IntakeError::Transport { message, .. } => message.clone(),
            IntakeError::Serialization(_) => "Unexpected response from server".to_string(),
        }
    }
}
