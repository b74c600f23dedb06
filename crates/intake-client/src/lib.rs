//! Intake Client Library
//!
//! Moves files from the user's machine to the file service and links them to
//! application entities:
//!
//! - `transport`: the request/event-stream contract and its `reqwest` implementation
//! - `progress`: observable per-file and aggregate upload progress
//! - `upload`: validation, optional compression and bounded-concurrency batches
//! - `attachments`: the entity attachment association store
//! - `container`: one entity's attachments, upload-and-attach in one call
//! - `files`: direct stored file access

pub mod attachments;
pub mod container;
pub mod files;
pub mod http;
pub mod progress;
pub mod transport;
pub mod upload;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

// Re-export commonly used types
pub use attachments::{AttachmentStore, HttpAttachmentStore};
pub use container::{AttachOptions, ContainerOutcome, EntityAttachmentContainer};
pub use files::FileClient;
pub use http::{Auth, HttpTransport};
pub use progress::{progress_percent, FileProgress, ProgressSnapshot, ProgressTracker, UploadStatus};
pub use transport::{
    send, send_empty, send_envelope, send_json, MultipartBody, RequestBody, Transport,
    TransportError, TransportErrorKind, TransportEvent, TransportRequest, TransportStream,
};
pub use upload::{
    capture_upload_file, BatchUploadResult, ConcurrencyPolicy, UploadFailure, UploadFile,
    UploadOptions, UploadOrchestrator, UploadTask,
};
