//! Upload orchestration
//!
//! Per file: validate, optionally compress, multipart POST with progress, then
//! record the stored file or the failure. Batches run under a concurrency
//! policy and one file's failure never affects its siblings.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use futures::future::join_all;
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::progress::{progress_percent, ProgressTracker, UploadStatus};
use crate::transport::{decode_envelope, MultipartBody, Transport, TransportEvent, TransportRequest};
use intake_core::models::StoredFile;
use intake_core::{ClientConfig, IntakeError, IntakeResult};
use intake_processing::{
    CaptureDevice, CapturedFrame, CompressionOptions, FileValidator, ImageCompressor, OutputFormat,
};

const DEFAULT_UPLOAD_PATH: &str = "/files/upload";
const DEFAULT_CATEGORY: &str = "general";
const UPLOAD_FAILED: &str = "Upload failed";

/// A file selected or captured for upload
#[derive(Debug, Clone, PartialEq)]
pub struct UploadFile {
    pub name: String,
    pub content_type: String,
    pub data: Bytes,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, data: Bytes) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            data,
        }
    }

    /// Read a local file, guessing its content type from the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> IntakeResult<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await.map_err(|e| {
            IntakeError::Validation(format!("Failed to read file {}: {}", path.display(), e))
        })?;

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.bin")
            .to_string();
        let content_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Ok(Self::new(name, content_type, Bytes::from(data)))
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_image(&self) -> bool {
        self.content_type.to_lowercase().starts_with("image/")
    }
}

impl From<CapturedFrame> for UploadFile {
    fn from(frame: CapturedFrame) -> Self {
        Self::new(frame.file_name(), frame.content_type(), frame.data)
    }
}

/// Grab a still from a running device as an upload-ready file.
pub async fn capture_upload_file(
    device: &mut dyn CaptureDevice,
    quality: f32,
    format: OutputFormat,
) -> IntakeResult<UploadFile> {
    let frame = device.capture_still(quality, format).await?;
    Ok(frame.into())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOptions {
    pub category: String,
    pub context: Option<String>,
    pub is_public: Option<bool>,
    pub is_temporary: Option<bool>,
    /// Seconds until a temporary file expires
    pub expires_in: Option<u64>,
    pub allow_duplicates: Option<bool>,
    pub metadata: Option<JsonValue>,
    #[serde(skip)]
    pub compression: Option<CompressionOptions>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            category: DEFAULT_CATEGORY.to_string(),
            context: None,
            is_public: None,
            is_temporary: None,
            expires_in: None,
            allow_duplicates: None,
            metadata: None,
            compression: None,
        }
    }
}

impl UploadOptions {
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn public(mut self, is_public: bool) -> Self {
        self.is_public = Some(is_public);
        self
    }

    pub fn temporary(mut self, expires_in: Option<u64>) -> Self {
        self.is_temporary = Some(true);
        self.expires_in = expires_in;
        self
    }

    pub fn with_allow_duplicates(mut self, allow: bool) -> Self {
        self.allow_duplicates = Some(allow);
        self
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_compression(mut self, compression: CompressionOptions) -> Self {
        self.compression = Some(compression);
        self
    }

    fn to_form(&self, file: &UploadFile) -> MultipartBody {
        let mut form = MultipartBody::new()
            .file("file", &file.name, &file.content_type, file.data.clone())
            .text("category", &self.category);

        if let Some(context) = &self.context {
            form = form.text("context", context);
        }
        if let Some(is_public) = self.is_public {
            form = form.text("isPublic", is_public.to_string());
        }
        if let Some(is_temporary) = self.is_temporary {
            form = form.text("isTemporary", is_temporary.to_string());
        }
        if let Some(expires_in) = self.expires_in {
            form = form.text("expiresIn", expires_in.to_string());
        }
        if let Some(allow) = self.allow_duplicates {
            form = form.text("allowDuplicates", allow.to_string());
        }
        if let Some(metadata) = &self.metadata {
            form = form.text("metadata", metadata.to_string());
        }
        form
    }
}

/// How many uploads of a batch run at once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyPolicy {
    /// Groups of `n`, each group finished before the next starts
    Bounded(usize),
    Unbounded,
}

impl Default for ConcurrencyPolicy {
    fn default() -> Self {
        ConcurrencyPolicy::Bounded(3)
    }
}

/// One file in flight, owned by the call that created it
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub key: String,
    pub file: UploadFile,
    pub status: UploadStatus,
    pub percent: u8,
    pub result: Option<StoredFile>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{file_name}: {message}")]
pub struct UploadFailure {
    pub key: String,
    pub file_name: String,
    pub message: String,
    pub error: IntakeError,
}

impl UploadFailure {
    /// Failure for a file rejected before any upload was attempted.
    pub fn rejected(file_name: impl Into<String>, error: IntakeError) -> Self {
        let message = match &error {
            IntakeError::Validation(msg) => msg.clone(),
            other => other.to_string(),
        };
        Self {
            key: String::new(),
            file_name: file_name.into(),
            message,
            error,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchUploadResult {
    pub uploaded: Vec<StoredFile>,
    pub failed: Vec<UploadFailure>,
}

impl BatchUploadResult {
    pub fn success_count(&self) -> usize {
        self.uploaded.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn summary(&self) -> String {
        let total = self.success_count() + self.failure_count();
        if self.failed.is_empty() {
            format!("Uploaded {} of {} files", self.success_count(), total)
        } else {
            format!(
                "Uploaded {} of {} files, {} failed",
                self.success_count(),
                total,
                self.failure_count()
            )
        }
    }
}

pub struct UploadOrchestrator {
    transport: Arc<dyn Transport>,
    tracker: ProgressTracker,
    validator: FileValidator,
    compressor: ImageCompressor,
    policy: ConcurrencyPolicy,
    upload_path: String,
    sequence: AtomicU64,
}

impl UploadOrchestrator {
    pub fn new(transport: Arc<dyn Transport>, tracker: ProgressTracker) -> Self {
        Self {
            transport,
            tracker,
            validator: FileValidator::unrestricted(),
            compressor: ImageCompressor::new(),
            policy: ConcurrencyPolicy::default(),
            upload_path: DEFAULT_UPLOAD_PATH.to_string(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn from_config(
        transport: Arc<dyn Transport>,
        tracker: ProgressTracker,
        config: &ClientConfig,
    ) -> Self {
        Self::new(transport, tracker)
            .with_validator(FileValidator::from(config))
            .with_policy(ConcurrencyPolicy::Bounded(config.upload_concurrency))
            .with_upload_path(config.upload_path.clone())
    }

    pub fn with_validator(mut self, validator: FileValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_compressor(mut self, compressor: ImageCompressor) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn with_policy(mut self, policy: ConcurrencyPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_upload_path(mut self, upload_path: impl Into<String>) -> Self {
        self.upload_path = upload_path.into();
        self
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    pub fn policy(&self) -> ConcurrencyPolicy {
        self.policy
    }

    /// Create a pending task and start tracking it.
    pub fn enqueue(&self, file: UploadFile) -> UploadTask {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let key = format!(
            "{}-{}-{}-{}",
            file.name,
            file.size(),
            Utc::now().timestamp_millis(),
            sequence
        );
        self.tracker.track(&key, &file.name);

        UploadTask {
            key,
            file,
            status: UploadStatus::Pending,
            percent: 0,
            result: None,
            error: None,
        }
    }

    /// Abandon a task. Events arriving for it afterwards are ignored.
    pub fn discard(&self, key: &str) {
        self.tracker.remove(key);
    }

    /// Upload a single file. Its tracker entry lives only for the call.
    pub async fn upload_one(
        &self,
        file: UploadFile,
        options: &UploadOptions,
    ) -> Result<StoredFile, UploadFailure> {
        let mut task = self.enqueue(file);
        let _scope = TrackedKeys::new(&self.tracker, vec![task.key.clone()]);
        self.run_task(&mut task, options).await
    }

    /// Upload every file; returns once all of them are terminal.
    ///
    /// The batch's tracker entries are removed when the call returns or is
    /// dropped, so overall progress only ever covers batches in flight.
    pub async fn upload_many(
        &self,
        files: Vec<UploadFile>,
        options: &UploadOptions,
    ) -> BatchUploadResult {
        let mut tasks: Vec<UploadTask> = files.into_iter().map(|f| self.enqueue(f)).collect();
        let _scope = TrackedKeys::new(
            &self.tracker,
            tasks.iter().map(|task| task.key.clone()).collect(),
        );
        let mut outcomes = Vec::with_capacity(tasks.len());

        match self.policy {
            ConcurrencyPolicy::Bounded(limit) => {
                for group in tasks.chunks_mut(limit.max(1)) {
                    let results =
                        join_all(group.iter_mut().map(|task| self.run_task(task, options))).await;
                    outcomes.extend(results);
                }
            }
            ConcurrencyPolicy::Unbounded => {
                let results =
                    join_all(tasks.iter_mut().map(|task| self.run_task(task, options))).await;
                outcomes.extend(results);
            }
        }

        let mut batch = BatchUploadResult::default();
        for outcome in outcomes {
            match outcome {
                Ok(file) => batch.uploaded.push(file),
                Err(failure) => batch.failed.push(failure),
            }
        }

        tracing::info!(
            uploaded = batch.success_count(),
            failed = batch.failure_count(),
            "{}",
            batch.summary()
        );
        batch
    }

    /// Drive one task to a terminal state.
    pub async fn run_task(
        &self,
        task: &mut UploadTask,
        options: &UploadOptions,
    ) -> Result<StoredFile, UploadFailure> {
        if let Err(e) = self.validator.validate(
            &task.file.name,
            &task.file.content_type,
            task.file.size(),
        ) {
            return Err(self.fail(task, e.into()));
        }

        task.status = UploadStatus::Uploading;
        self.tracker.start(&task.key);

        let file = match &options.compression {
            Some(compression) if task.file.is_image() => {
                self.compress_or_original(&task.file, compression).await
            }
            _ => task.file.clone(),
        };

        let request = TransportRequest::upload(self.upload_path.clone(), options.to_form(&file));
        let mut events = self.transport.execute(request);

        while let Some(event) = events.next().await {
            match event {
                TransportEvent::Progress { loaded, total } => {
                    let percent = progress_percent(loaded, total);
                    if percent > task.percent {
                        task.percent = percent;
                        self.tracker.update(&task.key, percent);
                    }
                }
                TransportEvent::Response { body, .. } => {
                    return match decode_envelope::<StoredFile>(&body)
                        .and_then(|envelope| envelope.into_data_or(UPLOAD_FAILED))
                    {
                        Ok(stored) => {
                            task.status = UploadStatus::Completed;
                            task.percent = 100;
                            task.result = Some(stored.clone());
                            self.tracker.complete(&task.key);
                            tracing::debug!(
                                file_name = %task.file.name,
                                file_id = %stored.id,
                                "Upload completed"
                            );
                            Ok(stored)
                        }
                        Err(e) => Err(self.fail(task, e)),
                    };
                }
                TransportEvent::Error(err) => {
                    let message = err.preferred_message(UPLOAD_FAILED);
                    let error = match IntakeError::from(err) {
                        IntakeError::Transport { status, .. } => {
                            IntakeError::Transport { status, message }
                        }
                        other => other,
                    };
                    return Err(self.fail(task, error));
                }
            }
        }

        Err(self.fail(task, IntakeError::transport(UPLOAD_FAILED)))
    }

    async fn compress_or_original(
        &self,
        file: &UploadFile,
        compression: &CompressionOptions,
    ) -> UploadFile {
        match self
            .compressor
            .compress_async(file.data.clone(), compression.clone())
            .await
        {
            Ok(result) => {
                tracing::debug!(
                    file_name = %file.name,
                    original_size = result.original_size,
                    compressed_size = result.compressed_size,
                    width = result.width,
                    height = result.height,
                    quality = result.quality,
                    "Image compressed before upload"
                );
                UploadFile::new(
                    rename_extension(&file.name, result.format.extension()),
                    result.format.to_mime_type(),
                    result.data,
                )
            }
            Err(e) => {
                tracing::warn!(
                    file_name = %file.name,
                    error = %e,
                    "Compression failed, uploading original"
                );
                file.clone()
            }
        }
    }

    fn fail(&self, task: &mut UploadTask, error: IntakeError) -> UploadFailure {
        let message = failure_message(&error);
        tracing::error!(
            file_name = %task.file.name,
            error_type = error.error_type(),
            "Upload failed: {}",
            message
        );

        task.status = UploadStatus::Failed;
        task.error = Some(message.clone());
        self.tracker.fail(&task.key, &message);

        UploadFailure {
            key: task.key.clone(),
            file_name: task.file.name.clone(),
            message,
            error,
        }
    }
}

/// Tracker entries owned by one orchestrator call.
struct TrackedKeys<'a> {
    tracker: &'a ProgressTracker,
    keys: Vec<String>,
}

impl<'a> TrackedKeys<'a> {
    fn new(tracker: &'a ProgressTracker, keys: Vec<String>) -> Self {
        Self { tracker, keys }
    }
}

impl Drop for TrackedKeys<'_> {
    fn drop(&mut self) {
        self.tracker.remove_all(&self.keys);
    }
}

fn failure_message(error: &IntakeError) -> String {
    let message = match error {
        IntakeError::Validation(msg)
        | IntakeError::NotFound(msg)
        | IntakeError::ImageLoad(msg)
        | IntakeError::Compression(msg)
        | IntakeError::Config(msg)
        | IntakeError::Serialization(msg) => msg.as_str(),
        IntakeError::Transport { message, .. } => message.as_str(),
    };
    if message.trim().is_empty() {
        UPLOAD_FAILED.to_string()
    } else {
        message.to_string()
    }
}

fn rename_extension(name: &str, extension: &str) -> String {
    let path = Path::new(name);
    let current = path.extension().and_then(|e| e.to_str());
    match current {
        Some(ext) if ext.eq_ignore_ascii_case(extension) => name.to_string(),
        Some(ext) if ext.eq_ignore_ascii_case("jpeg") && extension == "jpg" => name.to_string(),
        _ => path.with_extension(extension).to_string_lossy().into_owned(),
    }
}
