//! Test helpers for client tests
//!
//! An in-memory file service implementing `Transport`, plus fixtures for
//! building upload files. No server is needed.

pub mod fixtures;
pub mod memory_backend;

pub use fixtures::*;
pub use memory_backend::{InMemoryBackend, InjectedFailure, RecordedRequest};

use std::sync::Arc;

use crate::attachments::HttpAttachmentStore;
use crate::container::EntityAttachmentContainer;
use crate::progress::ProgressTracker;
use crate::upload::UploadOrchestrator;

/// Orchestrator, store and container for one entity, all backed by `backend`.
pub fn container_for(
    backend: &Arc<InMemoryBackend>,
    entity_type: &str,
    entity_id: &str,
) -> EntityAttachmentContainer {
    let orchestrator = Arc::new(UploadOrchestrator::new(
        backend.clone(),
        ProgressTracker::new(),
    ));
    let store = Arc::new(HttpAttachmentStore::new(backend.clone()));
    EntityAttachmentContainer::new(entity_type, entity_id, orchestrator, store)
}
