pub mod attachment;
pub mod envelope;
pub mod file;

pub use attachment::{
    AttachRequest, Attachment, AttachmentConfig, AttachmentWithFile, BulkAttachItem,
    BulkAttachRequest, ReorderRequest, UpdateAttachmentRequest,
};
pub use envelope::{ApiEnvelope, Pagination};
pub use file::{FileStatus, FileUrls, StoredFile};
