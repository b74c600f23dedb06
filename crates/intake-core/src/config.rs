//! Configuration module
//!
//! Client configuration loaded from the environment (and an optional `.env`
//! file): API location and credentials, upload limits and batch concurrency.

use std::env;

use crate::error::IntakeError;

const API_URL: &str = "http://localhost:3000";
const TIMEOUT_SECS: u64 = 60;
const UPLOAD_CONCURRENCY: usize = 3;
const MAX_FILE_SIZE_MB: u64 = 10;
const ALLOWED_TYPES: &str = "image/*,application/pdf";
const UPLOAD_PATH: &str = "/files/upload";
const DEFAULT_CATEGORY: &str = "general";

/// How the API key is presented to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthScheme {
    /// `X-API-Key: {key}`
    #[default]
    ApiKey,
    /// `Authorization: Bearer {token}`
    Bearer,
}

impl AuthScheme {
    pub fn parse(s: &str) -> Result<Self, IntakeError> {
        match s.trim().to_lowercase().as_str() {
            "api-key" | "apikey" | "x-api-key" => Ok(AuthScheme::ApiKey),
            "bearer" | "jwt" => Ok(AuthScheme::Bearer),
            other => Err(IntakeError::Config(format!(
                "Invalid auth scheme: {} (expected api-key or bearer)",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub auth_scheme: AuthScheme,
    pub timeout_secs: u64,
    pub upload_concurrency: usize,
    pub max_file_size_bytes: u64,
    /// Exact MIME types, wildcard subtypes (`image/*`) or extensions (`.pdf`).
    pub allowed_types: Vec<String>,
    pub upload_path: String,
    pub default_category: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: API_URL.to_string(),
            api_key: None,
            auth_scheme: AuthScheme::default(),
            timeout_secs: TIMEOUT_SECS,
            upload_concurrency: UPLOAD_CONCURRENCY,
            max_file_size_bytes: MAX_FILE_SIZE_MB * 1024 * 1024,
            allowed_types: parse_list(ALLOWED_TYPES),
            upload_path: UPLOAD_PATH.to_string(),
            default_category: DEFAULT_CATEGORY.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let auth_scheme = match env::var("INTAKE_AUTH_SCHEME") {
            Ok(s) => AuthScheme::parse(&s)?,
            Err(_) => AuthScheme::default(),
        };

        let max_file_size_mb = env::var("INTAKE_MAX_FILE_SIZE_MB")
            .unwrap_or_else(|_| MAX_FILE_SIZE_MB.to_string())
            .parse::<u64>()
            .unwrap_or(MAX_FILE_SIZE_MB);

        let config = ClientConfig {
            api_url: env::var("INTAKE_API_URL")
                .or_else(|_| env::var("API_URL"))
                .unwrap_or_else(|_| API_URL.to_string()),
            api_key: env::var("INTAKE_API_KEY").ok().filter(|k| !k.is_empty()),
            auth_scheme,
            timeout_secs: env::var("INTAKE_TIMEOUT_SECS")
                .unwrap_or_else(|_| TIMEOUT_SECS.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("INTAKE_TIMEOUT_SECS must be a valid number"))?,
            upload_concurrency: env::var("INTAKE_UPLOAD_CONCURRENCY")
                .unwrap_or_else(|_| UPLOAD_CONCURRENCY.to_string())
                .parse()
                .map_err(|_| {
                    anyhow::anyhow!("INTAKE_UPLOAD_CONCURRENCY must be a valid number")
                })?,
            max_file_size_bytes: max_file_size_mb * 1024 * 1024,
            allowed_types: parse_list(
                &env::var("INTAKE_ALLOWED_TYPES").unwrap_or_else(|_| ALLOWED_TYPES.to_string()),
            ),
            upload_path: env::var("INTAKE_UPLOAD_PATH").unwrap_or_else(|_| UPLOAD_PATH.to_string()),
            default_category: env::var("INTAKE_DEFAULT_CATEGORY")
                .unwrap_or_else(|_| DEFAULT_CATEGORY.to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), IntakeError> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(IntakeError::Config(format!(
                "API URL must start with http:// or https://, got {}",
                self.api_url
            )));
        }
        if self.timeout_secs == 0 {
            return Err(IntakeError::Config(
                "Timeout must be greater than zero".to_string(),
            ));
        }
        if self.upload_concurrency == 0 {
            return Err(IntakeError::Config(
                "Upload concurrency must be at least 1".to_string(),
            ));
        }
        if !self.upload_path.starts_with('/') {
            return Err(IntakeError::Config(format!(
                "Upload path must start with '/', got {}",
                self.upload_path
            )));
        }
        Ok(())
    }
}

/// Split a comma-separated list, trimming and lowercasing entries.
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
