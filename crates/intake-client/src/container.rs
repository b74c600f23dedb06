//! Entity attachment container
//!
//! Binds an upload orchestrator and an attachment store to a single
//! `(entity_type, entity_id)`. Every mutation re-fetches the list, and the
//! latest list is published through a `watch` channel.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tokio::sync::{watch, OnceCell};

use crate::attachments::AttachmentStore;
use crate::upload::{BatchUploadResult, UploadFailure, UploadFile, UploadOptions, UploadOrchestrator};
use intake_core::models::{AttachmentConfig, AttachmentWithFile, BulkAttachItem};
use intake_core::{IntakeError, IntakeResult};
use intake_processing::FileValidator;

#[derive(Debug, Clone, Default)]
pub struct AttachOptions {
    pub upload: UploadOptions,
    /// Attachment metadata applied to every attached file
    pub metadata: Option<JsonValue>,
}

impl AttachOptions {
    pub fn with_upload(mut self, upload: UploadOptions) -> Self {
        self.upload = upload;
        self
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ContainerOutcome {
    /// Per-file upload results, including files rejected before upload
    pub batch: BatchUploadResult,
    /// The entity's attachments after the operation
    pub attachments: Vec<AttachmentWithFile>,
}

pub struct EntityAttachmentContainer {
    entity_type: String,
    entity_id: String,
    orchestrator: Arc<UploadOrchestrator>,
    store: Arc<dyn AttachmentStore>,
    config: OnceCell<AttachmentConfig>,
    attachments: watch::Sender<Vec<AttachmentWithFile>>,
}

impl EntityAttachmentContainer {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        orchestrator: Arc<UploadOrchestrator>,
        store: Arc<dyn AttachmentStore>,
    ) -> Self {
        let (attachments, _) = watch::channel(Vec::new());
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            orchestrator,
            store,
            config: OnceCell::new(),
            attachments,
        }
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<AttachmentWithFile>> {
        self.attachments.subscribe()
    }

    /// Last fetched attachment list
    pub fn snapshot(&self) -> Vec<AttachmentWithFile> {
        self.attachments.borrow().clone()
    }

    /// Fetch the entity type's policy once and cache it.
    pub async fn load_config(&self) -> IntakeResult<&AttachmentConfig> {
        self.config
            .get_or_try_init(|| self.store.config(&self.entity_type))
            .await
    }

    pub async fn refresh(&self) -> IntakeResult<Vec<AttachmentWithFile>> {
        let list = self
            .store
            .list(&self.entity_type, &self.entity_id, None)
            .await?;
        self.attachments.send_replace(list.clone());
        Ok(list)
    }

    /// Upload `files` and attach the successful ones as `attachment_type`.
    ///
    /// Files the entity type's policy rejects are reported as failures without
    /// being uploaded. A failed bulk attach is returned as an error; the files
    /// already uploaded stay stored.
    pub async fn upload_and_attach(
        &self,
        files: Vec<UploadFile>,
        attachment_type: &str,
        options: &AttachOptions,
    ) -> IntakeResult<ContainerOutcome> {
        let config = self.load_config().await?.clone();

        if !config.allows_attachment_type(attachment_type) {
            return Err(IntakeError::Validation(format!(
                "Attachment type '{}' is not allowed for {} (allowed: {})",
                attachment_type,
                self.entity_type,
                config.allowed_types.join(", ")
            )));
        }

        let missing = config.missing_metadata_keys(options.metadata.as_ref());
        if !missing.is_empty() {
            return Err(IntakeError::Validation(format!(
                "Missing required metadata: {}",
                missing.join(", ")
            )));
        }

        let existing = match config.max_files {
            Some(_) => self.store.count(&self.entity_type, &self.entity_id, None).await?,
            None => 0,
        };
        let (accepted, rejected) = self.pre_validate(&config, files, existing);

        let mut batch = self
            .orchestrator
            .upload_many(accepted, &options.upload)
            .await;

        if !batch.uploaded.is_empty() {
            let items: Vec<BulkAttachItem> = batch
                .uploaded
                .iter()
                .map(|file| {
                    let item = BulkAttachItem::new(&file.id, attachment_type);
                    match &options.metadata {
                        Some(metadata) => item.with_metadata(metadata.clone()),
                        None => item,
                    }
                })
                .collect();

            if let Err(e) = self
                .store
                .bulk_attach(&self.entity_type, &self.entity_id, items)
                .await
            {
                let file_ids: Vec<&str> = batch.uploaded.iter().map(|f| f.id.as_str()).collect();
                tracing::error!(
                    entity_type = %self.entity_type,
                    entity_id = %self.entity_id,
                    file_ids = ?file_ids,
                    error = %e,
                    "Bulk attach failed after upload"
                );
                return Err(e);
            }
        }

        let mut failed = rejected;
        failed.append(&mut batch.failed);
        batch.failed = failed;

        let attachments = self.refresh().await?;

        Ok(ContainerOutcome { batch, attachments })
    }

    pub async fn reorder(&self, file_ids: Vec<String>) -> IntakeResult<Vec<AttachmentWithFile>> {
        self.store
            .reorder(&self.entity_type, &self.entity_id, file_ids)
            .await?;
        self.refresh().await
    }

    pub async fn remove(&self, attachment_id: &str) -> IntakeResult<Vec<AttachmentWithFile>> {
        self.store.remove(attachment_id).await?;
        self.refresh().await
    }

    pub async fn cleanup(&self) -> IntakeResult<Vec<AttachmentWithFile>> {
        self.store
            .cleanup_entity(&self.entity_type, &self.entity_id)
            .await?;
        self.refresh().await
    }

    fn pre_validate(
        &self,
        config: &AttachmentConfig,
        files: Vec<UploadFile>,
        existing: usize,
    ) -> (Vec<UploadFile>, Vec<UploadFailure>) {
        let validator = FileValidator::from(config);
        let mut remaining = config.remaining_slots(existing);
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();

        for file in files {
            if let Err(e) = validator.validate(&file.name, &file.content_type, file.size()) {
                rejected.push(UploadFailure::rejected(&file.name, e.into()));
                continue;
            }

            match remaining {
                Some(0) => {
                    let max = config.max_files.unwrap_or_default();
                    rejected.push(UploadFailure::rejected(
                        &file.name,
                        IntakeError::Validation(format!(
                            "Maximum of {} files reached for {}",
                            max, self.entity_type
                        )),
                    ));
                }
                Some(ref mut slots) => {
                    *slots -= 1;
                    accepted.push(file);
                }
                None => accepted.push(file),
            }
        }

        if !rejected.is_empty() {
            tracing::debug!(
                entity_type = %self.entity_type,
                rejected = rejected.len(),
                "Files rejected by attachment policy"
            );
        }

        (accepted, rejected)
    }
}
