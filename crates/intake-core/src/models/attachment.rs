use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use validator::Validate;

use super::file::StoredFile;

/// Join record linking a stored file to an application entity.
///
/// `display_order` is dense and zero-based within one
/// `(entity_type, entity_id)` scope after any reorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub file_id: String,
    pub attachment_type: String,
    pub display_order: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

/// Attachment joined with the projection of the file it references
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentWithFile {
    #[serde(flatten)]
    pub attachment: Attachment,
    pub file: StoredFile,
}

/// Request to attach one file to an entity
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AttachRequest {
    #[validate(length(min = 1, max = 100, message = "Entity type must be between 1 and 100 characters"))]
    pub entity_type: String,
    #[validate(length(min = 1, max = 255, message = "Entity id must be between 1 and 255 characters"))]
    pub entity_id: String,
    #[validate(length(min = 1, max = 255, message = "File id must be between 1 and 255 characters"))]
    pub file_id: String,
    #[validate(length(min = 1, max = 100, message = "Attachment type must be between 1 and 100 characters"))]
    pub attachment_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonValue>,
}

/// One file in a bulk attach request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BulkAttachItem {
    #[validate(length(min = 1, max = 255, message = "File id must be between 1 and 255 characters"))]
    pub file_id: String,
    #[validate(length(min = 1, max = 100, message = "Attachment type must be between 1 and 100 characters"))]
    pub attachment_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonValue>,
}

impl BulkAttachItem {
    pub fn new(file_id: impl Into<String>, attachment_type: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            attachment_type: attachment_type.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Request to attach several files in one all-or-nothing operation
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BulkAttachRequest {
    #[validate(length(min = 1, max = 100, message = "Entity type must be between 1 and 100 characters"))]
    pub entity_type: String,
    #[validate(length(min = 1, max = 255, message = "Entity id must be between 1 and 255 characters"))]
    pub entity_id: String,
    #[validate(length(min = 1, message = "At least one file is required"))]
    pub files: Vec<BulkAttachItem>,
}

/// Complete new ordering, by file id, of an entity's attachments
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReorderRequest {
    #[validate(length(min = 1, message = "Reorder requires at least one file id"))]
    pub file_ids: Vec<String>,
}

/// Mutable attachment fields
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAttachmentRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_order: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonValue>,
}

impl UpdateAttachmentRequest {
    pub fn is_empty(&self) -> bool {
        self.attachment_type.is_none() && self.display_order.is_none() && self.metadata.is_none()
    }
}

/// Per entity-type attachment policy.
///
/// Fetched once per entity type and used for client-side pre-validation only;
/// the server stays authoritative.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentConfig {
    pub entity_type: String,
    /// Allowed attachment type tags (empty = any)
    #[serde(default)]
    pub allowed_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_files: Option<u32>,
    /// Allowed MIME types, wildcards or extensions (empty = any)
    #[serde(default)]
    pub allowed_mime_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_file_size: Option<u64>,
    #[serde(default)]
    pub required_metadata: Vec<String>,
    #[serde(default)]
    pub optional_metadata: Vec<String>,
}

impl AttachmentConfig {
    pub fn allows_attachment_type(&self, attachment_type: &str) -> bool {
        self.allowed_types.is_empty() || self.allowed_types.iter().any(|t| t == attachment_type)
    }

    /// Required metadata keys absent from `metadata`
    pub fn missing_metadata_keys(&self, metadata: Option<&JsonValue>) -> Vec<String> {
        let object = metadata.and_then(|m| m.as_object());
        self.required_metadata
            .iter()
            .filter(|key| {
                object
                    .and_then(|o| o.get(key.as_str()))
                    .map(|v| v.is_null())
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    /// Remaining attachment slots given the current count, if the type is capped.
    pub fn remaining_slots(&self, current: usize) -> Option<usize> {
        self.max_files
            .map(|max| (max as usize).saturating_sub(current))
    }
}
