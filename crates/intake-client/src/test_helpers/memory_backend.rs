//! In-memory file service implementing `Transport`
//!
//! Serves the upload, file and attachment routes from shared state so the
//! orchestrator, stores and container can be tested without a server.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use futures::{stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use validator::Validate;

use crate::transport::{
    Method, MultipartBody, PartValue, RequestBody, Transport, TransportError, TransportEvent,
    TransportRequest, TransportStream,
};
use intake_core::models::{
    ApiEnvelope, AttachRequest, Attachment, AttachmentConfig, AttachmentWithFile,
    BulkAttachRequest, FileStatus, FileUrls, ReorderRequest, StoredFile, UpdateAttachmentRequest,
};

/// Failure returned instead of handling a request
#[derive(Debug, Clone)]
pub enum InjectedFailure {
    Status { status: u16, message: Option<String> },
    Network(String),
    /// 200 response carrying `success: false` and an optional `error`
    Envelope(Option<String>),
}

impl InjectedFailure {
    pub fn server(message: &str) -> Self {
        InjectedFailure::Status {
            status: 500,
            message: Some(message.to_string()),
        }
    }

    fn into_event(self) -> TransportEvent {
        match self {
            InjectedFailure::Status { status, message } => {
                TransportEvent::Error(TransportError::status(status, message))
            }
            InjectedFailure::Network(message) => {
                TransportEvent::Error(TransportError::network(message))
            }
            InjectedFailure::Envelope(error) => {
                let envelope = ApiEnvelope::<()> {
                    success: false,
                    data: None,
                    error,
                    pagination: None,
                };
                TransportEvent::Response {
                    status: 200,
                    body: Bytes::from(serde_json::to_vec(&envelope).unwrap_or_default()),
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

#[derive(Default)]
struct BackendState {
    files: HashMap<String, StoredFile>,
    attachments: Vec<Attachment>,
    configs: HashMap<String, AttachmentConfig>,
    next_file: u64,
    next_attachment: u64,
    requests: Vec<RecordedRequest>,
    upload_failures: HashMap<String, InjectedFailure>,
    route_failures: HashMap<(Method, String), InjectedFailure>,
    in_flight: usize,
    peak_in_flight: usize,
}

impl BackendState {
    fn scope(&self, entity_type: &str, entity_id: &str) -> Vec<&Attachment> {
        let mut items: Vec<&Attachment> = self
            .attachments
            .iter()
            .filter(|a| a.entity_type == entity_type && a.entity_id == entity_id)
            .collect();
        items.sort_by_key(|a| a.display_order);
        items
    }

    fn new_file(&mut self, name: &str, mime_type: &str, size: u64) -> StoredFile {
        self.next_file += 1;
        let id = format!("F{}", self.next_file);
        let now = Utc::now();
        let file = StoredFile {
            id: id.clone(),
            original_name: name.to_string(),
            mime_type: mime_type.to_string(),
            size,
            category: "general".to_string(),
            is_public: false,
            is_temporary: false,
            expires_at: None,
            urls: Some(FileUrls {
                view: Some(format!("https://files.test/{}/view", id)),
                download: Some(format!("https://files.test/{}/download", id)),
                thumbnail: mime_type
                    .starts_with("image/")
                    .then(|| format!("https://files.test/{}/thumbnail", id)),
                expires_at: Some(now + chrono::Duration::hours(1)),
            }),
            status: FileStatus::Completed,
            created_at: Some(now),
        };
        self.files.insert(id, file.clone());
        file
    }

    fn new_attachment(
        &mut self,
        entity_type: &str,
        entity_id: &str,
        file_id: &str,
        attachment_type: &str,
        metadata: Option<serde_json::Value>,
    ) -> Attachment {
        self.next_attachment += 1;
        let display_order = self
            .scope(entity_type, entity_id)
            .last()
            .map(|a| a.display_order + 1)
            .unwrap_or(0);
        let attachment = Attachment {
            id: format!("A{}", self.next_attachment),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            file_id: file_id.to_string(),
            attachment_type: attachment_type.to_string(),
            display_order,
            metadata,
            created_at: Utc::now(),
            created_by: Some("test-user".to_string()),
        };
        self.attachments.push(attachment.clone());
        attachment
    }

    /// Attachment type and max file checks from the entity type's config
    fn check_policy(
        &self,
        entity_type: &str,
        entity_id: &str,
        attachment_types: &[&str],
    ) -> Result<(), TransportEvent> {
        let Some(config) = self.configs.get(entity_type) else {
            return Ok(());
        };
        if let Some(bad) = attachment_types
            .iter()
            .find(|t| !config.allows_attachment_type(t))
        {
            return Err(rejection(
                400,
                &format!("Attachment type '{}' is not allowed", bad),
            ));
        }
        if let Some(max) = config.max_files {
            let existing = self.scope(entity_type, entity_id).len();
            if existing + attachment_types.len() > max as usize {
                return Err(rejection(
                    400,
                    &format!("Entity can have at most {} attachments", max),
                ));
            }
        }
        Ok(())
    }
}

/// Decrements the in-flight counter even when the request is abandoned.
struct InFlightGuard {
    state: Arc<Mutex<BackendState>>,
}

impl InFlightGuard {
    fn enter(state: Arc<Mutex<BackendState>>) -> Self {
        {
            let mut guard = lock(&state);
            guard.in_flight += 1;
            guard.peak_in_flight = guard.peak_in_flight.max(guard.in_flight);
        }
        Self { state }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.state).in_flight -= 1;
    }
}

fn lock(state: &Mutex<BackendState>) -> MutexGuard<'_, BackendState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn respond<T: Serialize>(status: u16, data: T) -> TransportEvent {
    TransportEvent::Response {
        status,
        body: Bytes::from(serde_json::to_vec(&ApiEnvelope::ok(data)).unwrap_or_default()),
    }
}

fn rejection(status: u16, message: &str) -> TransportEvent {
    TransportEvent::Error(TransportError::status(status, Some(message.to_string())))
}

fn parse_json<T: DeserializeOwned + Validate>(body: &RequestBody) -> Result<T, TransportEvent> {
    let RequestBody::Json(value) = body else {
        return Err(rejection(400, "Expected a JSON body"));
    };
    let parsed: T = serde_json::from_value(value.clone())
        .map_err(|e| rejection(400, &format!("Invalid request body: {}", e)))?;
    parsed
        .validate()
        .map_err(|e| rejection(400, &e.to_string()))?;
    Ok(parsed)
}

#[derive(Clone)]
pub struct InMemoryBackend {
    state: Arc<Mutex<BackendState>>,
    latency: Option<Duration>,
    progress_steps: u64,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            latency: None,
            progress_steps: 4,
        }
    }

    /// Delay every request, keeping uploads in flight long enough to overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_progress_steps(mut self, steps: u64) -> Self {
        self.progress_steps = steps;
        self
    }

    pub fn set_config(&self, config: AttachmentConfig) {
        lock(&self.state)
            .configs
            .insert(config.entity_type.clone(), config);
    }

    /// Fail uploads of files named `file_name`.
    pub fn fail_upload(&self, file_name: &str, failure: InjectedFailure) {
        lock(&self.state)
            .upload_failures
            .insert(file_name.to_string(), failure);
    }

    /// Fail every request to exactly `method path`.
    pub fn fail_route(&self, method: Method, path: &str, failure: InjectedFailure) {
        lock(&self.state)
            .route_failures
            .insert((method, path.to_string()), failure);
    }

    /// Store a file directly, as if it had been uploaded earlier.
    pub fn insert_file(&self, name: &str, mime_type: &str, size: u64) -> StoredFile {
        lock(&self.state).new_file(name, mime_type, size)
    }

    pub fn file(&self, file_id: &str) -> Option<StoredFile> {
        lock(&self.state).files.get(file_id).cloned()
    }

    pub fn file_count(&self) -> usize {
        lock(&self.state).files.len()
    }

    /// Attachments of one entity in display order
    pub fn attachments(&self, entity_type: &str, entity_id: &str) -> Vec<Attachment> {
        lock(&self.state)
            .scope(entity_type, entity_id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.state).requests.clone()
    }

    pub fn upload_count(&self) -> usize {
        lock(&self.state)
            .requests
            .iter()
            .filter(|r| r.method == Method::Post && r.path == "/files/upload")
            .count()
    }

    /// Most uploads observed in flight at once
    pub fn peak_in_flight(&self) -> usize {
        lock(&self.state).peak_in_flight
    }

    async fn handle(self, request: TransportRequest) -> Vec<TransportEvent> {
        let injected = {
            let mut state = lock(&self.state);
            state.requests.push(RecordedRequest {
                method: request.method,
                path: request.path.clone(),
                query: request.query.clone(),
                body: request.body.clone(),
            });
            state
                .route_failures
                .get(&(request.method, request.path.clone()))
                .cloned()
        };

        let segments: Vec<String> = request
            .path
            .trim_start_matches('/')
            .split('/')
            .map(|s| {
                urlencoding::decode(s)
                    .map(|d| d.into_owned())
                    .unwrap_or_else(|_| s.to_string())
            })
            .collect();
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();

        if request.method == Method::Post && segments.as_slice() == ["files", "upload"] {
            return self.upload(request, injected).await;
        }

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(failure) = injected {
            return vec![failure.into_event()];
        }

        let mut state = lock(&self.state);
        let event = match (request.method, segments.as_slice()) {
            (Method::Get, ["files", id]) => match state.files.get(*id) {
                Some(file) => respond(200, file),
                None => rejection(404, &format!("File not found: {}", id)),
            },
            (Method::Delete, ["files", id]) => match state.files.remove(*id) {
                Some(_) => respond(200, json!({ "deleted": id })),
                None => rejection(404, &format!("File not found: {}", id)),
            },
            (Method::Post, ["attachments"]) => Self::attach(&mut state, &request.body),
            (Method::Post, ["attachments", "bulk"]) => {
                Self::bulk_attach(&mut state, &request.body)
            }
            (Method::Get, ["attachments", "config", entity_type]) => {
                let config = state
                    .configs
                    .get(*entity_type)
                    .cloned()
                    .unwrap_or_else(|| AttachmentConfig {
                        entity_type: entity_type.to_string(),
                        ..AttachmentConfig::default()
                    });
                respond(200, config)
            }
            (Method::Get, ["attachments", entity_type, entity_id]) => {
                let attachment_type = request
                    .query
                    .iter()
                    .find(|(k, _)| k == "attachmentType")
                    .map(|(_, v)| v.as_str());
                Self::list(&state, entity_type, entity_id, attachment_type)
            }
            (Method::Put, ["attachments", entity_type, entity_id, "reorder"]) => {
                Self::reorder(&mut state, entity_type, entity_id, &request.body)
            }
            (Method::Put, ["attachments", id]) => Self::update(&mut state, id, &request.body),
            (Method::Delete, ["attachments", "entity", entity_type, entity_id]) => {
                let before = state.attachments.len();
                state
                    .attachments
                    .retain(|a| !(a.entity_type == *entity_type && a.entity_id == *entity_id));
                respond(200, json!({ "deleted": before - state.attachments.len() }))
            }
            (Method::Delete, ["attachments", id]) => {
                match state.attachments.iter().position(|a| a.id == *id) {
                    Some(index) => {
                        state.attachments.remove(index);
                        TransportEvent::Response {
                            status: 200,
                            body: Bytes::from_static(br#"{"success":true}"#),
                        }
                    }
                    None => rejection(404, &format!("Attachment not found: {}", id)),
                }
            }
            _ => rejection(404, &format!("Route not found: {}", request.path)),
        };

        vec![event]
    }

    async fn upload(
        &self,
        request: TransportRequest,
        injected: Option<InjectedFailure>,
    ) -> Vec<TransportEvent> {
        let _in_flight = InFlightGuard::enter(self.state.clone());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let RequestBody::Multipart(form) = request.body else {
            return vec![rejection(400, "Expected a multipart body")];
        };
        let Some((name, content_type, data)) = file_part(&form) else {
            return vec![rejection(400, "Missing file field")];
        };

        let total = data.len() as u64;
        let steps = self.progress_steps.max(1);
        let mut events: Vec<TransportEvent> = if request.report_progress {
            (1..=steps)
                .map(|step| TransportEvent::Progress {
                    loaded: total * step / steps,
                    total,
                })
                .collect()
        } else {
            Vec::new()
        };

        let mut state = lock(&self.state);
        let failure = injected.or_else(|| state.upload_failures.get(&name).cloned());
        if let Some(failure) = failure {
            // Fail partway through the body
            events.truncate(events.len() / 2);
            events.push(failure.into_event());
            return events;
        }

        let mut file = state.new_file(&name, &content_type, total);
        file.category = form.text_value("category").unwrap_or("general").to_string();
        file.is_public = form.text_value("isPublic") == Some("true");
        file.is_temporary = form.text_value("isTemporary") == Some("true");
        file.expires_at = form
            .text_value("expiresIn")
            .and_then(|s| s.parse::<i64>().ok())
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs));
        state.files.insert(file.id.clone(), file.clone());

        events.push(respond(201, file));
        events
    }

    fn attach(state: &mut BackendState, body: &RequestBody) -> TransportEvent {
        let request: AttachRequest = match parse_json(body) {
            Ok(request) => request,
            Err(event) => return event,
        };
        if !state.files.contains_key(&request.file_id) {
            return rejection(404, &format!("File not found: {}", request.file_id));
        }
        if let Err(event) = state.check_policy(
            &request.entity_type,
            &request.entity_id,
            &[request.attachment_type.as_str()],
        ) {
            return event;
        }

        let attachment = state.new_attachment(
            &request.entity_type,
            &request.entity_id,
            &request.file_id,
            &request.attachment_type,
            request.metadata,
        );
        respond(201, attachment)
    }

    fn bulk_attach(state: &mut BackendState, body: &RequestBody) -> TransportEvent {
        let request: BulkAttachRequest = match parse_json(body) {
            Ok(request) => request,
            Err(event) => return event,
        };
        if let Some(missing) = request
            .files
            .iter()
            .find(|item| !state.files.contains_key(&item.file_id))
        {
            return rejection(404, &format!("File not found: {}", missing.file_id));
        }
        let types: Vec<&str> = request
            .files
            .iter()
            .map(|item| item.attachment_type.as_str())
            .collect();
        if let Err(event) = state.check_policy(&request.entity_type, &request.entity_id, &types) {
            return event;
        }

        let created: Vec<Attachment> = request
            .files
            .into_iter()
            .map(|item| {
                state.new_attachment(
                    &request.entity_type,
                    &request.entity_id,
                    &item.file_id,
                    &item.attachment_type,
                    item.metadata,
                )
            })
            .collect();
        respond(201, created)
    }

    fn list(
        state: &BackendState,
        entity_type: &str,
        entity_id: &str,
        attachment_type: Option<&str>,
    ) -> TransportEvent {
        let items: Vec<AttachmentWithFile> = state
            .scope(entity_type, entity_id)
            .into_iter()
            .filter(|a| attachment_type.map_or(true, |t| a.attachment_type == t))
            .filter_map(|a| {
                state.files.get(&a.file_id).map(|file| AttachmentWithFile {
                    attachment: a.clone(),
                    file: file.clone(),
                })
            })
            .collect();
        respond(200, items)
    }

    fn update(state: &mut BackendState, id: &str, body: &RequestBody) -> TransportEvent {
        let RequestBody::Json(value) = body else {
            return rejection(400, "Expected a JSON body");
        };
        let update: UpdateAttachmentRequest = match serde_json::from_value(value.clone()) {
            Ok(update) => update,
            Err(e) => return rejection(400, &format!("Invalid request body: {}", e)),
        };
        let Some(attachment) = state.attachments.iter_mut().find(|a| a.id == id) else {
            return rejection(404, &format!("Attachment not found: {}", id));
        };

        if let Some(attachment_type) = update.attachment_type {
            attachment.attachment_type = attachment_type;
        }
        if let Some(display_order) = update.display_order {
            attachment.display_order = display_order;
        }
        if let Some(metadata) = update.metadata {
            attachment.metadata = Some(metadata);
        }
        respond(200, attachment.clone())
    }

    fn reorder(
        state: &mut BackendState,
        entity_type: &str,
        entity_id: &str,
        body: &RequestBody,
    ) -> TransportEvent {
        let request: ReorderRequest = match parse_json(body) {
            Ok(request) => request,
            Err(event) => return event,
        };

        let current: Vec<(String, String)> = state
            .scope(entity_type, entity_id)
            .into_iter()
            .map(|a| (a.id.clone(), a.file_id.clone()))
            .collect();
        let attached: HashSet<&str> = current.iter().map(|(_, f)| f.as_str()).collect();
        let requested: HashSet<&str> = request.file_ids.iter().map(String::as_str).collect();

        if requested.len() != request.file_ids.len() || requested != attached {
            return rejection(
                400,
                "Reorder must list every attached file exactly once",
            );
        }

        let mut order = 0;
        for file_id in &request.file_ids {
            for (attachment_id, _) in current.iter().filter(|(_, f)| f == file_id) {
                if let Some(attachment) = state
                    .attachments
                    .iter_mut()
                    .find(|a| &a.id == attachment_id)
                {
                    attachment.display_order = order;
                    order += 1;
                }
            }
        }

        let reordered: Vec<Attachment> = state
            .scope(entity_type, entity_id)
            .into_iter()
            .cloned()
            .collect();
        respond(200, reordered)
    }
}

fn file_part(form: &MultipartBody) -> Option<(String, String, Bytes)> {
    form.parts.iter().find_map(|part| match &part.value {
        PartValue::File {
            file_name,
            content_type,
            data,
        } if part.name == "file" => Some((file_name.clone(), content_type.clone(), data.clone())),
        _ => None,
    })
}

impl Transport for InMemoryBackend {
    fn execute(&self, request: TransportRequest) -> TransportStream {
        let backend = self.clone();
        stream::once(backend.handle(request))
            .flat_map(stream::iter)
            .boxed()
    }
}
