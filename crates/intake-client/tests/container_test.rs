//! Entity attachment container integration tests.
//!
//! Run with: `cargo test -p intake-client --test container_test`

use std::sync::Arc;

use intake_client::test_helpers::{container_for, jpeg_file, pdf_file, text_file, InMemoryBackend, InjectedFailure};
use intake_client::transport::Method;
use intake_client::AttachOptions;
use intake_core::models::AttachmentConfig;
use serde_json::json;

fn product_config() -> AttachmentConfig {
    AttachmentConfig {
        entity_type: "product".to_string(),
        allowed_types: vec!["image".to_string(), "manual".to_string()],
        max_files: Some(3),
        allowed_mime_types: vec!["image/*".to_string(), "application/pdf".to_string()],
        max_file_size: Some(1024 * 1024),
        required_metadata: vec![],
        optional_metadata: vec!["caption".to_string()],
    }
}

#[tokio::test]
async fn test_upload_and_attach_end_to_end() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.set_config(product_config());
    let container = container_for(&backend, "product", "P1");
    let mut rx = container.subscribe();

    let outcome = container
        .upload_and_attach(
            vec![jpeg_file("front.jpg", 64, 64), jpeg_file("back.jpg", 64, 64)],
            "image",
            &AttachOptions::default().with_metadata(json!({ "caption": "Catalog" })),
        )
        .await
        .unwrap();

    assert_eq!(outcome.batch.success_count(), 2);
    assert!(outcome.batch.is_success());
    assert_eq!(outcome.attachments.len(), 2);
    assert_eq!(outcome.attachments[0].file.original_name, "front.jpg");
    assert_eq!(
        outcome.attachments[1].attachment.metadata,
        Some(json!({ "caption": "Catalog" }))
    );

    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().len(), 2);
    assert_eq!(container.snapshot().len(), 2);
}

#[tokio::test]
async fn test_policy_rejections_skip_upload() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.set_config(product_config());
    let container = container_for(&backend, "product", "P1");

    let outcome = container
        .upload_and_attach(
            vec![
                text_file("notes.txt", "not allowed"),
                pdf_file("huge.pdf", 2 * 1024 * 1024),
                pdf_file("manual.pdf", 2048),
            ],
            "manual",
            &AttachOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.batch.success_count(), 1);
    assert_eq!(outcome.batch.failure_count(), 2);
    let rejected: Vec<&str> = outcome
        .batch
        .failed
        .iter()
        .map(|f| f.file_name.as_str())
        .collect();
    assert_eq!(rejected, vec!["notes.txt", "huge.pdf"]);
    assert_eq!(backend.upload_count(), 1);
    assert_eq!(outcome.attachments.len(), 1);
}

#[tokio::test]
async fn test_max_files_counts_existing_attachments() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.set_config(product_config());
    let container = container_for(&backend, "product", "P1");

    container
        .upload_and_attach(
            vec![jpeg_file("a.jpg", 8, 8), jpeg_file("b.jpg", 8, 8)],
            "image",
            &AttachOptions::default(),
        )
        .await
        .unwrap();

    let outcome = container
        .upload_and_attach(
            vec![jpeg_file("c.jpg", 8, 8), jpeg_file("d.jpg", 8, 8)],
            "image",
            &AttachOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.batch.success_count(), 1);
    assert_eq!(outcome.batch.failed[0].file_name, "d.jpg");
    assert!(outcome.batch.failed[0].message.contains("Maximum of 3 files"));
    assert_eq!(outcome.attachments.len(), 3);
}

#[tokio::test]
async fn test_disallowed_attachment_type_and_missing_metadata() {
    let backend = Arc::new(InMemoryBackend::new());
    let mut config = product_config();
    config.required_metadata = vec!["caption".to_string()];
    backend.set_config(config);
    let container = container_for(&backend, "product", "P1");

    let wrong_type = container
        .upload_and_attach(
            vec![jpeg_file("a.jpg", 8, 8)],
            "invoice",
            &AttachOptions::default().with_metadata(json!({ "caption": "x" })),
        )
        .await
        .unwrap_err();
    assert!(wrong_type.is_validation());

    let missing = container
        .upload_and_attach(vec![jpeg_file("a.jpg", 8, 8)], "image", &AttachOptions::default())
        .await
        .unwrap_err();
    assert!(missing.to_string().contains("caption"));
    assert_eq!(backend.upload_count(), 0);
}

#[tokio::test]
async fn test_bulk_attach_failure_propagates_and_keeps_files() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.fail_route(
        Method::Post,
        "/attachments/bulk",
        InjectedFailure::server("Attachment service unavailable"),
    );
    let container = container_for(&backend, "ticket", "T1");

    let err = container
        .upload_and_attach(vec![pdf_file("log.pdf", 100)], "log", &AttachOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(500));
    assert!(err.to_string().contains("Attachment service unavailable"));
    assert_eq!(backend.file_count(), 1);
    assert!(backend.attachments("ticket", "T1").is_empty());
}

#[tokio::test]
async fn test_mutations_refetch() {
    let backend = Arc::new(InMemoryBackend::new());
    let container = container_for(&backend, "product", "P1");

    let outcome = container
        .upload_and_attach(
            vec![
                pdf_file("one.pdf", 10),
                pdf_file("two.pdf", 10),
                pdf_file("three.pdf", 10),
            ],
            "manual",
            &AttachOptions::default(),
        )
        .await
        .unwrap();
    let file_ids: Vec<String> = outcome
        .attachments
        .iter()
        .map(|a| a.attachment.file_id.clone())
        .collect();

    let reordered = container
        .reorder(vec![
            file_ids[2].clone(),
            file_ids[1].clone(),
            file_ids[0].clone(),
        ])
        .await
        .unwrap();
    assert_eq!(reordered[0].file.original_name, "three.pdf");
    assert_eq!(container.snapshot()[0].file.original_name, "three.pdf");

    let first = reordered[0].attachment.id.clone();
    let remaining = container.remove(&first).await.unwrap();
    assert_eq!(remaining.len(), 2);
    assert!(backend.file(&file_ids[2]).is_some());

    let cleared = container.cleanup().await.unwrap();
    assert!(cleared.is_empty());
    assert!(container.snapshot().is_empty());
    assert_eq!(backend.file_count(), 3);
}

#[tokio::test]
async fn test_config_is_fetched_once() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.set_config(product_config());
    let container = container_for(&backend, "product", "P1");

    container.load_config().await.unwrap();
    container.load_config().await.unwrap();
    container
        .upload_and_attach(vec![jpeg_file("a.jpg", 8, 8)], "image", &AttachOptions::default())
        .await
        .unwrap();

    let config_requests = backend
        .requests()
        .iter()
        .filter(|r| r.path == "/attachments/config/product")
        .count();
    assert_eq!(config_requests, 1);
}
