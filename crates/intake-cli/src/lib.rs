use anyhow::Context;
use intake_client::BatchUploadResult;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};

/// Initialize tracing for CLI binaries.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

pub fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize response")?;
    println!("{}", out);
    Ok(())
}

/// Parse a `--metadata` argument, which must be a JSON object.
pub fn parse_metadata(raw: Option<&str>) -> anyhow::Result<Option<JsonValue>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value: JsonValue = serde_json::from_str(raw).context("Metadata must be valid JSON")?;
    if !value.is_object() {
        anyhow::bail!("Metadata must be a JSON object");
    }
    Ok(Some(value))
}

/// JSON report of a batch: summary line, stored files and per-file failures.
pub fn batch_report(batch: &BatchUploadResult) -> JsonValue {
    json!({
        "success": batch.is_success(),
        "summary": batch.summary(),
        "uploaded": batch.uploaded,
        "failed": batch
            .failed
            .iter()
            .map(|f| json!({
                "fileName": f.file_name,
                "error": f.message,
                "errorType": f.error.error_type(),
            }))
            .collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use intake_client::UploadFailure;
    use intake_core::IntakeError;

    #[test]
    fn parse_metadata_accepts_objects_only() {
        assert_eq!(parse_metadata(None).unwrap(), None);
        assert_eq!(
            parse_metadata(Some(r#"{"caption":"Front"}"#)).unwrap(),
            Some(json!({ "caption": "Front" }))
        );
        assert!(parse_metadata(Some("[1,2]")).is_err());
        assert!(parse_metadata(Some("{not json")).is_err());
    }

    #[test]
    fn batch_report_lists_failures() {
        let batch = BatchUploadResult {
            uploaded: vec![],
            failed: vec![UploadFailure::rejected(
                "a.exe",
                IntakeError::Validation("File type not allowed".to_string()),
            )],
        };

        let report = batch_report(&batch);
        assert_eq!(report["success"], false);
        assert_eq!(report["summary"], "Uploaded 0 of 1 files, 1 failed");
        assert_eq!(report["failed"][0]["fileName"], "a.exe");
        assert_eq!(report["failed"][0]["errorType"], "Validation");
    }
}
