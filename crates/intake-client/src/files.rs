//! Direct access to stored files.
//!
//! Deleting a file here is separate from removing an attachment; attachment
//! removal never deletes the file it references.

use std::sync::Arc;

use crate::transport::{send_empty, send_json, Transport, TransportRequest};
use intake_core::models::StoredFile;
use intake_core::{IntakeError, IntakeResult};

#[derive(Clone)]
pub struct FileClient {
    transport: Arc<dyn Transport>,
}

impl FileClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    #[tracing::instrument(skip(self))]
    pub async fn get(&self, file_id: &str) -> IntakeResult<StoredFile> {
        send_json(self.transport.as_ref(), TransportRequest::get(file_path(file_id)?)).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, file_id: &str) -> IntakeResult<()> {
        send_empty(
            self.transport.as_ref(),
            TransportRequest::delete(file_path(file_id)?),
        )
        .await
    }
}

fn file_path(file_id: &str) -> IntakeResult<String> {
    if file_id.trim().is_empty() {
        return Err(IntakeError::Validation("File id must not be empty".to_string()));
    }
    Ok(format!("/files/{}", urlencoding::encode(file_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::InMemoryBackend;

    #[tokio::test]
    async fn test_get_and_delete() {
        let backend = Arc::new(InMemoryBackend::new());
        let stored = backend.insert_file("scan.pdf", "application/pdf", 2048);
        let client = FileClient::new(backend.clone());

        let fetched = client.get(&stored.id).await.unwrap();
        assert_eq!(fetched, stored);

        client.delete(&stored.id).await.unwrap();
        assert!(client.get(&stored.id).await.unwrap_err().is_not_found());
        assert!(client.delete(&stored.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_empty_id_rejected_locally() {
        let backend = Arc::new(InMemoryBackend::new());
        let client = FileClient::new(backend.clone());
        assert!(client.get(" ").await.unwrap_err().is_validation());
        assert!(backend.requests().is_empty());
    }
}
