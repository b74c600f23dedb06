use serde::{Deserialize, Serialize};

use crate::error::{IntakeError, IntakeResult};

const DEFAULT_FAILURE: &str = "Request failed";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u32,
}

/// Wrapper around every file and attachment response:
/// `{ success, data?, error?, pagination? }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            pagination: None,
        }
    }

    pub fn empty() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
            pagination: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            pagination: None,
        }
    }

    /// `success: false` is a failure exactly like a rejected request.
    /// Returns the optional payload of a successful response.
    pub fn into_result(self) -> IntakeResult<Option<T>> {
        self.into_result_or(DEFAULT_FAILURE)
    }

    /// Like `into_result`, with `fallback` as the message when the server gave none.
    pub fn into_result_or(self, fallback: &str) -> IntakeResult<Option<T>> {
        if self.success {
            Ok(self.data)
        } else {
            Err(IntakeError::transport(
                self.error
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| fallback.to_string()),
            ))
        }
    }

    /// Like `into_result`, but a successful response without data is an error.
    pub fn into_data(self) -> IntakeResult<T> {
        self.into_data_or(DEFAULT_FAILURE)
    }

    pub fn into_data_or(self, fallback: &str) -> IntakeResult<T> {
        self.into_result_or(fallback)?
            .ok_or_else(|| IntakeError::transport("Response contained no data"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_with_data() {
        let envelope: ApiEnvelope<u32> =
            serde_json::from_value(json!({ "success": true, "data": 7 })).unwrap();
        assert_eq!(envelope.into_data().unwrap(), 7);
    }

    #[test]
    fn test_failure_uses_error_message() {
        let envelope: ApiEnvelope<u32> =
            serde_json::from_value(json!({ "success": false, "error": "Quota exceeded" }))
                .unwrap();
        let err = envelope.into_result().unwrap_err();
        assert_eq!(err, IntakeError::transport("Quota exceeded"));
    }

    #[test]
    fn test_failure_without_message() {
        let envelope: ApiEnvelope<u32> =
            serde_json::from_value(json!({ "success": false, "error": "" })).unwrap();
        assert_eq!(
            envelope.into_result().unwrap_err(),
            IntakeError::transport("Request failed")
        );
    }

    #[test]
    fn test_failure_uses_caller_fallback() {
        let envelope: ApiEnvelope<u32> =
            serde_json::from_value(json!({ "success": false })).unwrap();
        assert_eq!(
            envelope.into_data_or("Upload failed").unwrap_err(),
            IntakeError::transport("Upload failed")
        );

        let envelope: ApiEnvelope<u32> =
            serde_json::from_value(json!({ "success": false, "error": "Quota exceeded" }))
                .unwrap();
        assert_eq!(
            envelope.into_data_or("Upload failed").unwrap_err(),
            IntakeError::transport("Quota exceeded")
        );
    }

    #[test]
    fn test_missing_data() {
        let envelope: ApiEnvelope<u32> = ApiEnvelope::empty();
        assert!(envelope.clone().into_result().unwrap().is_none());
        assert!(envelope.into_data().is_err());
    }

    #[test]
    fn test_pagination_roundtrip_shape() {
        let envelope: ApiEnvelope<Vec<u32>> = serde_json::from_value(json!({
            "success": true,
            "data": [1, 2],
            "pagination": { "page": 1, "limit": 20, "total": 2, "totalPages": 1 }
        }))
        .unwrap();
        assert_eq!(envelope.pagination.unwrap().total_pages, 1);
    }
}
