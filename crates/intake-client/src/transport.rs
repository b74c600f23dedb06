//! Transport contract
//!
//! A transport executes one request and reports it as a stream of events:
//! zero or more `Progress` events followed by exactly one terminal `Response`
//! or `Error`. Everything above this layer (uploads, attachments, files) is
//! written against the trait, so the HTTP implementation and the in-memory
//! test backend are interchangeable.

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;

use intake_core::models::ApiEnvelope;
use intake_core::{IntakeError, IntakeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PartValue {
    Text(String),
    File {
        file_name: String,
        content_type: String,
        data: Bytes,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultipartPart {
    pub name: String,
    pub value: PartValue,
}

/// Ordered multipart form fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultipartBody {
    pub parts: Vec<MultipartPart>,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(MultipartPart {
            name: name.into(),
            value: PartValue::Text(value.into()),
        });
        self
    }

    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        data: Bytes,
    ) -> Self {
        self.parts.push(MultipartPart {
            name: name.into(),
            value: PartValue::File {
                file_name: file_name.into(),
                content_type: content_type.into(),
                data,
            },
        });
        self
    }

    pub fn text_value(&self, name: &str) -> Option<&str> {
        self.parts.iter().find_map(|part| match &part.value {
            PartValue::Text(value) if part.name == name => Some(value.as_str()),
            _ => None,
        })
    }

    /// Bytes of all file parts; the denominator for upload progress.
    pub fn file_bytes(&self) -> u64 {
        self.parts
            .iter()
            .map(|part| match &part.value {
                PartValue::File { data, .. } => data.len() as u64,
                PartValue::Text(_) => 0,
            })
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(JsonValue),
    Multipart(MultipartBody),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: Method,
    /// Path relative to the transport's base URL, starting with '/'
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    /// Emit `Progress` events while the body is sent
    pub report_progress: bool,
}

impl TransportRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
            report_progress: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn post_json<B: Serialize>(path: impl Into<String>, body: &B) -> IntakeResult<Self> {
        Ok(Self::new(Method::Post, path).with_body(RequestBody::Json(serde_json::to_value(body)?)))
    }

    pub fn put_json<B: Serialize>(path: impl Into<String>, body: &B) -> IntakeResult<Self> {
        Ok(Self::new(Method::Put, path).with_body(RequestBody::Json(serde_json::to_value(body)?)))
    }

    /// Multipart POST with progress reporting
    pub fn upload(path: impl Into<String>, form: MultipartBody) -> Self {
        let mut request = Self::new(Method::Post, path).with_body(RequestBody::Multipart(form));
        request.report_progress = true;
        request
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Network,
    Timeout,
    /// Server answered with a non-success status
    Status(u16),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
    /// `error`/`message` field of the server's JSON body, when present
    pub server_message: Option<String>,
}

impl TransportError {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Network,
            message: message.into(),
            server_message: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Timeout,
            message: message.into(),
            server_message: None,
        }
    }

    pub fn status(status: u16, server_message: Option<String>) -> Self {
        Self {
            kind: TransportErrorKind::Status(status),
            message: format!("Request failed with status {}", status),
            server_message,
        }
    }

    /// Server message, then transport message, then `fallback`.
    pub fn preferred_message(&self, fallback: &str) -> String {
        self.server_message
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .or_else(|| Some(self.message.as_str()).filter(|m| !m.trim().is_empty()))
            .unwrap_or(fallback)
            .to_string()
    }

    /// Extract a human readable message from an error body.
    pub fn server_message_from_body(body: &[u8]) -> Option<String> {
        let value: JsonValue = serde_json::from_slice(body).ok()?;
        ["error", "message"]
            .iter()
            .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
            .filter(|m| !m.trim().is_empty())
            .map(str::to_string)
    }
}

impl From<TransportError> for IntakeError {
    fn from(err: TransportError) -> Self {
        match err.kind {
            TransportErrorKind::Status(status) => {
                let message = err.preferred_message("Request failed");
                IntakeError::from_status(status, message)
            }
            TransportErrorKind::Network | TransportErrorKind::Timeout => IntakeError::Transport {
                status: None,
                message: err.message,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Progress { loaded: u64, total: u64 },
    Response { status: u16, body: Bytes },
    Error(TransportError),
}

impl TransportEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransportEvent::Progress { .. })
    }
}

pub type TransportStream = BoxStream<'static, TransportEvent>;

/// Executes requests against the file service.
///
/// Dropping the returned stream abandons the request.
pub trait Transport: Send + Sync {
    fn execute(&self, request: TransportRequest) -> TransportStream;
}

/// Drain a request to its terminal event, discarding progress.
pub async fn send(
    transport: &dyn Transport,
    request: TransportRequest,
) -> Result<(u16, Bytes), TransportError> {
    let mut events = transport.execute(request);
    while let Some(event) = events.next().await {
        match event {
            TransportEvent::Progress { .. } => continue,
            TransportEvent::Response { status, body } => return Ok((status, body)),
            TransportEvent::Error(err) => return Err(err),
        }
    }
    Err(TransportError::network("Connection closed without a response"))
}

/// Decode a successful response body. An empty body is an empty envelope.
pub fn decode_envelope<T: DeserializeOwned>(body: &[u8]) -> IntakeResult<ApiEnvelope<T>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ApiEnvelope::empty());
    }
    Ok(serde_json::from_slice(body)?)
}

pub async fn send_envelope<T: DeserializeOwned>(
    transport: &dyn Transport,
    request: TransportRequest,
) -> IntakeResult<ApiEnvelope<T>> {
    let (_, body) = send(transport, request).await?;
    decode_envelope(&body)
}

/// Send a request and return the envelope's `data`.
pub async fn send_json<T: DeserializeOwned>(
    transport: &dyn Transport,
    request: TransportRequest,
) -> IntakeResult<T> {
    send_envelope::<T>(transport, request).await?.into_data()
}

/// Send a request whose response carries no data worth decoding.
pub async fn send_empty(transport: &dyn Transport, request: TransportRequest) -> IntakeResult<()> {
    send_envelope::<JsonValue>(transport, request)
        .await?
        .into_result()
        .map(|_| ())
}
