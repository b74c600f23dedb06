//! HTTP transport over `reqwest`.
//!
//! Auth is a Bearer token or an `X-API-Key` header. Multipart file parts are
//! sent as chunked streams so progress can be reported while the body is
//! handed to the connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::channel::mpsc;
use futures::stream::{self, PollNext};
use futures::{future, StreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};

use crate::transport::{
    Method, MultipartBody, PartValue, RequestBody, Transport, TransportError, TransportEvent,
    TransportRequest, TransportStream,
};
use intake_core::{AuthScheme, ClientConfig, IntakeError, IntakeResult};

const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Authentication strategy for the API.
#[derive(Clone, Debug)]
pub enum Auth {
    /// `Authorization: Bearer {token}`
    Bearer(String),
    /// `X-API-Key: {key}`
    XApiKey(String),
}

#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    auth: Option<Auth>,
}

impl HttpTransport {
    pub fn new(base_url: &str, auth: Option<Auth>, timeout: Duration) -> IntakeResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IntakeError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        })
    }

    pub fn from_config(config: &ClientConfig) -> IntakeResult<Self> {
        let auth = config.api_key.clone().map(|key| match config.auth_scheme {
            AuthScheme::ApiKey => Auth::XApiKey(key),
            AuthScheme::Bearer => Auth::Bearer(key),
        });
        Self::new(
            &config.api_url,
            auth,
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Some(Auth::Bearer(token)) => {
                request.header("Authorization", format!("Bearer {}", token))
            }
            Some(Auth::XApiKey(key)) => request.header("X-API-Key", key.as_str()),
            None => request,
        }
    }

    async fn dispatch(
        &self,
        request: TransportRequest,
        progress: Option<mpsc::UnboundedSender<TransportEvent>>,
    ) -> TransportEvent {
        let url = self.build_url(&request.path);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Put => self.client.put(&url),
            Method::Delete => self.client.delete(&url),
        };
        builder = self.apply_auth(builder);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Multipart(form) => match build_form(form, progress) {
                Ok(form) => builder.multipart(form),
                Err(e) => return TransportEvent::Error(e),
            },
        };

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return TransportEvent::Error(classify(e)),
        };

        let status = response.status().as_u16();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return TransportEvent::Error(classify(e)),
        };

        if (200..300).contains(&status) {
            TransportEvent::Response { status, body }
        } else {
            tracing::debug!(
                method = request.method.as_str(),
                path = %request.path,
                status,
                "Request rejected by server"
            );
            TransportEvent::Error(TransportError::status(
                status,
                TransportError::server_message_from_body(&body),
            ))
        }
    }
}

impl Transport for HttpTransport {
    fn execute(&self, request: TransportRequest) -> TransportStream {
        let (tx, rx) = mpsc::unbounded();
        let progress = if request.report_progress {
            Some(tx)
        } else {
            None
        };

        let this = self.clone();
        let terminal = stream::once(async move { this.dispatch(request, progress).await });

        // Queued progress drains before the terminal event; nothing follows it.
        stream::select_with_strategy(rx, terminal, |_: &mut ()| PollNext::Left)
            .scan(false, |finished, event| {
                if *finished {
                    return future::ready(None);
                }
                *finished = event.is_terminal();
                future::ready(Some(event))
            })
            .boxed()
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::timeout(format!("Request timed out: {}", err))
    } else {
        TransportError::network(format!("Failed to send request: {}", err))
    }
}

fn build_form(
    body: MultipartBody,
    progress: Option<mpsc::UnboundedSender<TransportEvent>>,
) -> Result<Form, TransportError> {
    let total = body.file_bytes();
    let loaded = Arc::new(AtomicU64::new(0));
    let mut form = Form::new();

    for part in body.parts {
        form = match part.value {
            PartValue::Text(value) => form.text(part.name, value),
            PartValue::File {
                file_name,
                content_type,
                data,
            } => {
                let file_part = match &progress {
                    Some(tx) => {
                        let length = data.len() as u64;
                        let body = Body::wrap_stream(progress_chunks(
                            data,
                            tx.clone(),
                            loaded.clone(),
                            total,
                        ));
                        Part::stream_with_length(body, length)
                    }
                    None => Part::bytes(data.to_vec()),
                };
                let file_part = file_part
                    .file_name(file_name)
                    .mime_str(&content_type)
                    .map_err(|e| {
                        TransportError::network(format!(
                            "Invalid content type {}: {}",
                            content_type, e
                        ))
                    })?;
                form.part(part.name, file_part)
            }
        };
    }

    Ok(form)
}

fn progress_chunks(
    data: Bytes,
    tx: mpsc::UnboundedSender<TransportEvent>,
    loaded: Arc<AtomicU64>,
    total: u64,
) -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    let chunks: Vec<Bytes> = (0..data.len())
        .step_by(UPLOAD_CHUNK_SIZE)
        .map(|start| data.slice(start..(start + UPLOAD_CHUNK_SIZE).min(data.len())))
        .collect();

    stream::iter(chunks).map(move |chunk| {
        let sent = chunk.len() as u64;
        let now = loaded.fetch_add(sent, Ordering::Relaxed) + sent;
        // Receiver gone means the caller abandoned the request.
        let _ = tx.unbounded_send(TransportEvent::Progress { loaded: now, total });
        Ok(chunk)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{send, send_json, TransportErrorKind};
    use intake_core::models::StoredFile;
    use mockito::Matcher;

    fn stored_file_body(id: &str) -> String {
        serde_json::json!({
            "success": true,
            "data": {
                "id": id,
                "originalName": "report.pdf",
                "mimeType": "application/pdf",
                "size": 200000,
                "category": "general"
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_get_with_api_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/files/F1")
            .match_header("x-api-key", "secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(stored_file_body("F1"))
            .create_async()
            .await;

        let transport = HttpTransport::new(
            &server.url(),
            Some(Auth::XApiKey("secret".to_string())),
            Duration::from_secs(5),
        )
        .unwrap();

        let file: StoredFile = send_json(&transport, TransportRequest::get("/files/F1"))
            .await
            .unwrap();
        assert_eq!(file.id, "F1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_bearer_auth_and_query() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/attachments/product/P1")
            .match_header("authorization", "Bearer token-1")
            .match_query(Matcher::UrlEncoded(
                "attachmentType".into(),
                "image".into(),
            ))
            .with_status(200)
            .with_body(r#"{"success":true,"data":[]}"#)
            .create_async()
            .await;

        let transport = HttpTransport::new(
            &format!("{}/", server.url()),
            Some(Auth::Bearer("token-1".to_string())),
            Duration::from_secs(5),
        )
        .unwrap();

        let items: Vec<serde_json::Value> = send_json(
            &transport,
            TransportRequest::get("/attachments/product/P1").with_query("attachmentType", "image"),
        )
        .await
        .unwrap();
        assert!(items.is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_carries_server_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("DELETE", "/attachments/A9")
            .with_status(404)
            .with_body(r#"{"success":false,"error":"Attachment not found"}"#)
            .create_async()
            .await;

        let transport = HttpTransport::new(&server.url(), None, Duration::from_secs(5)).unwrap();
        let err = send(&transport, TransportRequest::delete("/attachments/A9"))
            .await
            .unwrap_err();

        assert_eq!(err.kind, TransportErrorKind::Status(404));
        assert_eq!(err.server_message.as_deref(), Some("Attachment not found"));
        let intake: IntakeError = err.into();
        assert!(intake.is_not_found());
    }

    #[tokio::test]
    async fn test_multipart_upload_reports_progress() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/files/upload")
            .match_header(
                "content-type",
                Matcher::Regex("multipart/form-data; boundary=.*".to_string()),
            )
            .match_body(Matcher::Regex(r#"name="category""#.to_string()))
            .with_status(201)
            .with_body(stored_file_body("F7"))
            .create_async()
            .await;

        let transport = HttpTransport::new(&server.url(), None, Duration::from_secs(5)).unwrap();
        let data = Bytes::from(vec![7u8; 200_000]);
        let form = MultipartBody::new()
            .file("file", "report.pdf", "application/pdf", data)
            .text("category", "general");

        let events: Vec<TransportEvent> = transport
            .execute(TransportRequest::upload("/files/upload", form))
            .collect()
            .await;

        let (last, progress) = events.split_last().unwrap();
        assert!(matches!(last, TransportEvent::Response { status: 201, .. }));
        assert!(!progress.is_empty());

        let mut previous = 0;
        for event in progress {
            match event {
                TransportEvent::Progress { loaded, total } => {
                    assert_eq!(*total, 200_000);
                    assert!(*loaded >= previous);
                    previous = *loaded;
                }
                other => panic!("unexpected event before terminal: {:?}", other),
            }
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let transport =
            HttpTransport::new("http://127.0.0.1:1", None, Duration::from_secs(5)).unwrap();
        let events: Vec<TransportEvent> = transport
            .execute(TransportRequest::get("/files/F1"))
            .collect()
            .await;

        assert_eq!(events.len(), 1);
        match &events[0] {
            TransportEvent::Error(err) => assert_eq!(err.kind, TransportErrorKind::Network),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_from_config_selects_auth() {
        let config = ClientConfig {
            api_key: Some("k".to_string()),
            auth_scheme: AuthScheme::Bearer,
            ..ClientConfig::default()
        };
        let transport = HttpTransport::from_config(&config).unwrap();
        assert!(matches!(transport.auth, Some(Auth::Bearer(_))));
        assert_eq!(transport.build_url("/files/1"), "http://localhost:3000/files/1");
    }
}
