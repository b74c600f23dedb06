use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-side processing status of a stored file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    #[default]
    Uploaded,
    Processing,
    Completed,
    Failed,
}

/// Time-limited access URLs issued by the server
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUrls {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Read-only projection of an uploaded binary.
///
/// The server owns the record; the client never mutates it after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub id: String,
    pub original_name: String,
    pub mime_type: String,
    pub size: u64,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub is_temporary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urls: Option<FileUrls>,
    #[serde(default)]
    pub status: FileStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl StoredFile {
    pub fn is_image(&self) -> bool {
        self.mime_type.to_lowercase().starts_with("image/")
    }

    /// Signed URLs are only usable until their own expiry.
    pub fn urls_expired(&self, now: DateTime<Utc>) -> bool {
        self.urls
            .as_ref()
            .and_then(|u| u.expires_at)
            .map(|expires_at| expires_at <= now)
            .unwrap_or(false)
    }
}
