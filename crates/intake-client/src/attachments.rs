//! Attachment association store
//!
//! Links stored files to application entities. The server owns ordering and
//! completeness rules; the client only rejects requests that can never succeed.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use validator::Validate;

use crate::transport::{send_empty, send_json, Transport, TransportRequest};
use intake_core::models::{
    AttachRequest, Attachment, AttachmentConfig, AttachmentWithFile, BulkAttachItem,
    BulkAttachRequest, ReorderRequest, UpdateAttachmentRequest,
};
use intake_core::{IntakeError, IntakeResult};

#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn attach(
        &self,
        entity_type: &str,
        entity_id: &str,
        file_id: &str,
        attachment_type: &str,
        metadata: Option<JsonValue>,
    ) -> IntakeResult<Attachment>;

    /// All-or-nothing: either every item is attached or none is.
    async fn bulk_attach(
        &self,
        entity_type: &str,
        entity_id: &str,
        files: Vec<BulkAttachItem>,
    ) -> IntakeResult<Vec<Attachment>>;

    /// Attachments ordered by display order, always read fresh
    async fn list(
        &self,
        entity_type: &str,
        entity_id: &str,
        attachment_type: Option<&str>,
    ) -> IntakeResult<Vec<AttachmentWithFile>>;

    async fn update(
        &self,
        attachment_id: &str,
        update: UpdateAttachmentRequest,
    ) -> IntakeResult<Attachment>;

    /// Replace the entity's ordering. `file_ids` must name every attached file exactly once.
    async fn reorder(
        &self,
        entity_type: &str,
        entity_id: &str,
        file_ids: Vec<String>,
    ) -> IntakeResult<()>;

    /// Remove one attachment. The stored file is never deleted.
    async fn remove(&self, attachment_id: &str) -> IntakeResult<()>;

    /// Remove every attachment of one entity, leaving stored files intact.
    async fn cleanup_entity(&self, entity_type: &str, entity_id: &str) -> IntakeResult<()>;

    async fn count(
        &self,
        entity_type: &str,
        entity_id: &str,
        attachment_type: Option<&str>,
    ) -> IntakeResult<usize> {
        Ok(self
            .list(entity_type, entity_id, attachment_type)
            .await?
            .len())
    }

    async fn config(&self, entity_type: &str) -> IntakeResult<AttachmentConfig>;
}

fn require(field: &str, value: &str) -> IntakeResult<()> {
    if value.trim().is_empty() {
        return Err(IntakeError::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

fn encode(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

/// `AttachmentStore` over any `Transport`
#[derive(Clone)]
pub struct HttpAttachmentStore {
    transport: Arc<dyn Transport>,
}

impl HttpAttachmentStore {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl AttachmentStore for HttpAttachmentStore {
    #[tracing::instrument(skip(self, metadata))]
    async fn attach(
        &self,
        entity_type: &str,
        entity_id: &str,
        file_id: &str,
        attachment_type: &str,
        metadata: Option<JsonValue>,
    ) -> IntakeResult<Attachment> {
        let request = AttachRequest {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            file_id: file_id.to_string(),
            attachment_type: attachment_type.to_string(),
            metadata,
        };
        request.validate()?;

        send_json(
            self.transport.as_ref(),
            TransportRequest::post_json("/attachments", &request)?,
        )
        .await
    }

    #[tracing::instrument(skip(self, files), fields(count = files.len()))]
    async fn bulk_attach(
        &self,
        entity_type: &str,
        entity_id: &str,
        files: Vec<BulkAttachItem>,
    ) -> IntakeResult<Vec<Attachment>> {
        let request = BulkAttachRequest {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            files,
        };
        request.validate()?;
        for item in &request.files {
            item.validate()?;
        }

        let attachments: Vec<Attachment> = send_json(
            self.transport.as_ref(),
            TransportRequest::post_json("/attachments/bulk", &request)?,
        )
        .await?;

        tracing::info!(attached = attachments.len(), "Bulk attach completed");
        Ok(attachments)
    }

    #[tracing::instrument(skip(self))]
    async fn list(
        &self,
        entity_type: &str,
        entity_id: &str,
        attachment_type: Option<&str>,
    ) -> IntakeResult<Vec<AttachmentWithFile>> {
        require("Entity type", entity_type)?;
        require("Entity id", entity_id)?;

        let mut request = TransportRequest::get(format!(
            "/attachments/{}/{}",
            encode(entity_type),
            encode(entity_id)
        ));
        if let Some(attachment_type) = attachment_type {
            request = request.with_query("attachmentType", attachment_type);
        }

        let mut items: Vec<AttachmentWithFile> =
            send_json(self.transport.as_ref(), request).await?;
        items.sort_by_key(|item| item.attachment.display_order);
        Ok(items)
    }

    #[tracing::instrument(skip(self, update))]
    async fn update(
        &self,
        attachment_id: &str,
        update: UpdateAttachmentRequest,
    ) -> IntakeResult<Attachment> {
        require("Attachment id", attachment_id)?;
        if update.is_empty() {
            return Err(IntakeError::Validation(
                "Update must change at least one field".to_string(),
            ));
        }

        send_json(
            self.transport.as_ref(),
            TransportRequest::put_json(format!("/attachments/{}", encode(attachment_id)), &update)?,
        )
        .await
    }

    #[tracing::instrument(skip(self, file_ids), fields(count = file_ids.len()))]
    async fn reorder(
        &self,
        entity_type: &str,
        entity_id: &str,
        file_ids: Vec<String>,
    ) -> IntakeResult<()> {
        require("Entity type", entity_type)?;
        require("Entity id", entity_id)?;

        let request = ReorderRequest { file_ids };
        request.validate()?;

        let mut seen = HashSet::new();
        for file_id in &request.file_ids {
            require("File id", file_id)?;
            if !seen.insert(file_id.as_str()) {
                return Err(IntakeError::Validation(format!(
                    "Duplicate file id in reorder: {}",
                    file_id
                )));
            }
        }

        send_empty(
            self.transport.as_ref(),
            TransportRequest::put_json(
                format!(
                    "/attachments/{}/{}/reorder",
                    encode(entity_type),
                    encode(entity_id)
                ),
                &request,
            )?,
        )
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn remove(&self, attachment_id: &str) -> IntakeResult<()> {
        require("Attachment id", attachment_id)?;
        send_empty(
            self.transport.as_ref(),
            TransportRequest::delete(format!("/attachments/{}", encode(attachment_id))),
        )
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn cleanup_entity(&self, entity_type: &str, entity_id: &str) -> IntakeResult<()> {
        require("Entity type", entity_type)?;
        require("Entity id", entity_id)?;
        send_empty(
            self.transport.as_ref(),
            TransportRequest::delete(format!(
                "/attachments/entity/{}/{}",
                encode(entity_type),
                encode(entity_id)
            )),
        )
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn config(&self, entity_type: &str) -> IntakeResult<AttachmentConfig> {
        require("Entity type", entity_type)?;
        send_json(
            self.transport.as_ref(),
            TransportRequest::get(format!("/attachments/config/{}", encode(entity_type))),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::InMemoryBackend;

    fn store() -> (Arc<InMemoryBackend>, HttpAttachmentStore) {
        let backend = Arc::new(InMemoryBackend::new());
        let store = HttpAttachmentStore::new(backend.clone());
        (backend, store)
    }

    #[tokio::test]
    async fn test_pre_validation_never_reaches_network() {
        let (backend, store) = store();

        assert!(store
            .attach("product", "", "F1", "image", None)
            .await
            .unwrap_err()
            .is_validation());
        assert!(store
            .bulk_attach("product", "P1", vec![])
            .await
            .unwrap_err()
            .is_validation());
        assert!(store
            .reorder("product", "P1", vec![])
            .await
            .unwrap_err()
            .is_validation());
        assert!(store
            .reorder("product", "P1", vec!["F1".into(), "F1".into()])
            .await
            .unwrap_err()
            .is_validation());
        assert!(store
            .update("A1", UpdateAttachmentRequest::default())
            .await
            .unwrap_err()
            .is_validation());

        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn test_list_encodes_path_and_filters_type() {
        let (backend, store) = store();
        let file = backend.insert_file("photo.jpg", "image/jpeg", 10);
        store
            .attach("product line", "P/1", &file.id, "image", None)
            .await
            .unwrap();

        let items = store.list("product line", "P/1", Some("image")).await.unwrap();
        assert_eq!(items.len(), 1);
        assert!(store
            .list("product line", "P/1", Some("manual"))
            .await
            .unwrap()
            .is_empty());

        let paths: Vec<String> = backend.requests().into_iter().map(|r| r.path).collect();
        assert!(paths.contains(&"/attachments/product%20line/P%2F1".to_string()));
    }

    /// Answers every request with the same successful body.
    struct FixedResponse(bytes::Bytes);

    impl Transport for FixedResponse {
        fn execute(&self, _request: TransportRequest) -> crate::transport::TransportStream {
            use futures::StreamExt;
            futures::stream::iter(vec![crate::transport::TransportEvent::Response {
                status: 200,
                body: self.0.clone(),
            }])
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_list_sorts_by_display_order() {
        let item = |id: &str, order: u32| {
            serde_json::json!({
                "id": id,
                "entityType": "product",
                "entityId": "P1",
                "fileId": format!("F-{}", id),
                "attachmentType": "image",
                "displayOrder": order,
                "createdAt": "2026-01-01T00:00:00Z",
                "file": {
                    "id": format!("F-{}", id),
                    "originalName": format!("{}.jpg", id),
                    "mimeType": "image/jpeg",
                    "size": 10
                }
            })
        };
        let body = serde_json::json!({
            "success": true,
            "data": [item("c", 2), item("a", 0), item("b", 1)]
        });
        let store = HttpAttachmentStore::new(Arc::new(FixedResponse(body.to_string().into())));

        let items = store.list("product", "P1", None).await.unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.attachment.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_remove_unknown_attachment_is_not_found() {
        let (_backend, store) = store();
        let err = store.remove("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_update_metadata() {
        let (backend, store) = store();
        let file = backend.insert_file("front.jpg", "image/jpeg", 10);
        let attachment = store
            .attach("product", "P1", &file.id, "image", None)
            .await
            .unwrap();

        let updated = store
            .update(
                &attachment.id,
                UpdateAttachmentRequest {
                    metadata: Some(serde_json::json!({ "caption": "Front" })),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.metadata.unwrap()["caption"], "Front");
        assert_eq!(updated.attachment_type, "image");
    }

    #[tokio::test]
    async fn test_count_uses_list() {
        let (backend, store) = store();
        let a = backend.insert_file("a.jpg", "image/jpeg", 10);
        let b = backend.insert_file("b.pdf", "application/pdf", 10);
        store
            .bulk_attach(
                "product",
                "P1",
                vec![
                    BulkAttachItem::new(&a.id, "image"),
                    BulkAttachItem::new(&b.id, "manual"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(store.count("product", "P1", None).await.unwrap(), 2);
        assert_eq!(store.count("product", "P1", Some("manual")).await.unwrap(), 1);
        assert_eq!(store.count("product", "P2", None).await.unwrap(), 0);
    }
}
