//! Intake Core Library
//!
//! This crate provides the domain models, error types and configuration
//! shared by every intake component: stored files, entity attachments,
//! the server response envelope and the client configuration.

pub mod config;
pub mod error;
pub mod models;

// Re-export commonly used types
pub use config::{AuthScheme, ClientConfig};
pub use error::{ErrorMetadata, IntakeError, IntakeResult, LogLevel};
