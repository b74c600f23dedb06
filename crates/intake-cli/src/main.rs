//! Intake CLI: upload files and manage entity attachments.
//!
//! Reads INTAKE_* settings from the environment (and `.env`). Uses X-API-Key
//! auth unless INTAKE_AUTH_SCHEME=bearer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use intake_cli::{batch_report, init_tracing, parse_metadata, print_json};
use intake_client::{
    capture_upload_file, AttachOptions, AttachmentStore, ConcurrencyPolicy,
    EntityAttachmentContainer, FileClient, HttpAttachmentStore, HttpTransport, ProgressTracker,
    Transport, UploadFile, UploadOptions, UploadOrchestrator,
};
use intake_core::models::BulkAttachItem;
use intake_core::ClientConfig;
use intake_processing::{
    CaptureDevice, CompressionOptions, ImageCompressor, OutputFormat, StaticCaptureDevice,
};
use serde_json::json;

#[derive(Parser)]
#[command(name = "intake", about = "File intake and attachment CLI")]
struct Cli {
    /// Override INTAKE_API_URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone)]
struct CompressArgs {
    /// Maximum output width in pixels
    #[arg(long)]
    max_width: Option<u32>,
    /// Maximum output height in pixels
    #[arg(long)]
    max_height: Option<u32>,
    /// Encoding quality between 0 and 1
    #[arg(long)]
    quality: Option<f32>,
    /// Byte budget for the encoded image
    #[arg(long)]
    max_size: Option<u64>,
    /// Output format: jpeg, png or webp
    #[arg(long)]
    format: Option<String>,
}

impl CompressArgs {
    fn requested(&self) -> bool {
        self.max_width.is_some()
            || self.max_height.is_some()
            || self.quality.is_some()
            || self.max_size.is_some()
            || self.format.is_some()
    }

    fn to_options(&self) -> anyhow::Result<CompressionOptions> {
        let mut options = CompressionOptions::default()
            .with_max_dimensions(self.max_width, self.max_height);
        if let Some(quality) = self.quality {
            if !(0.0..=1.0).contains(&quality) {
                anyhow::bail!("Quality must be between 0 and 1, got {}", quality);
            }
            options = options.with_quality(quality);
        }
        if let Some(max_size) = self.max_size {
            options = options.with_max_size_bytes(max_size);
        }
        if let Some(format) = &self.format {
            options = options.with_format(OutputFormat::parse(format)?);
        }
        Ok(options)
    }
}

#[derive(clap::Args, Clone)]
struct UploadArgs {
    /// Storage category (defaults to INTAKE_DEFAULT_CATEGORY)
    #[arg(long)]
    category: Option<String>,
    /// Free-form upload context
    #[arg(long)]
    context: Option<String>,
    /// Make the stored files public
    #[arg(long)]
    public: bool,
    /// Mark files temporary, expiring after this many seconds
    #[arg(long)]
    expires_in: Option<u64>,
    /// Allow uploading a file the server already has
    #[arg(long)]
    allow_duplicates: bool,
    /// Upload concurrency (defaults to INTAKE_UPLOAD_CONCURRENCY)
    #[arg(long)]
    concurrency: Option<usize>,
    /// Upload every file at once
    #[arg(long, conflicts_with = "concurrency")]
    unbounded: bool,
    #[command(flatten)]
    compress: CompressArgs,
}

impl UploadArgs {
    fn to_options(&self, config: &ClientConfig) -> anyhow::Result<UploadOptions> {
        let mut options = UploadOptions::default()
            .with_category(
                self.category
                    .clone()
                    .unwrap_or_else(|| config.default_category.clone()),
            )
            .with_allow_duplicates(self.allow_duplicates);
        if let Some(context) = &self.context {
            options = options.with_context(context.clone());
        }
        if self.public {
            options = options.public(true);
        }
        if let Some(expires_in) = self.expires_in {
            options = options.temporary(Some(expires_in));
        }
        if self.compress.requested() {
            options = options.with_compression(self.compress.to_options()?);
        }
        Ok(options)
    }

    fn policy(&self, config: &ClientConfig) -> ConcurrencyPolicy {
        if self.unbounded {
            ConcurrencyPolicy::Unbounded
        } else {
            ConcurrencyPolicy::Bounded(self.concurrency.unwrap_or(config.upload_concurrency))
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Upload one or more files
    Upload {
        /// Paths of the files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[command(flatten)]
        args: UploadArgs,
    },
    /// Upload files (or link existing file ids) and attach them to an entity
    Attach {
        entity_type: String,
        entity_id: String,
        /// Paths of the files to upload
        files: Vec<PathBuf>,
        /// Attachment type tag, e.g. image or manual
        #[arg(long = "type")]
        attachment_type: String,
        /// Already stored file ids to attach
        #[arg(long = "file-id")]
        file_ids: Vec<String>,
        /// Attachment metadata as a JSON object
        #[arg(long)]
        metadata: Option<String>,
        #[command(flatten)]
        args: UploadArgs,
    },
    /// List an entity's attachments
    List {
        entity_type: String,
        entity_id: String,
        /// Only this attachment type
        #[arg(long = "type")]
        attachment_type: Option<String>,
    },
    /// Count an entity's attachments
    Count {
        entity_type: String,
        entity_id: String,
        #[arg(long = "type")]
        attachment_type: Option<String>,
    },
    /// Set the display order; every attached file id exactly once
    Reorder {
        entity_type: String,
        entity_id: String,
        #[arg(required = true)]
        file_ids: Vec<String>,
    },
    /// Remove one attachment (the stored file is kept)
    Remove { attachment_id: String },
    /// Remove every attachment of an entity (stored files are kept)
    Cleanup {
        entity_type: String,
        entity_id: String,
    },
    /// Show the attachment policy of an entity type
    Config { entity_type: String },
    /// Compress an image locally without uploading
    Compress {
        input: PathBuf,
        output: PathBuf,
        #[command(flatten)]
        args: CompressArgs,
    },
    /// Capture a still from an image source and upload it
    Capture {
        /// Image used as the capture source
        source: PathBuf,
        #[arg(long, default_value = "0.92")]
        quality: f32,
        #[arg(long, default_value = "jpeg")]
        format: String,
        #[arg(long)]
        category: Option<String>,
    },
    /// Stored file operations
    File {
        #[command(subcommand)]
        sub: FileCommands,
    },
}

#[derive(Subcommand)]
enum FileCommands {
    /// Get a stored file by id
    Get { id: String },
    /// Delete a stored file by id
    Delete { id: String },
}

struct Services {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
}

impl Services {
    fn connect(api_url: Option<String>) -> anyhow::Result<Self> {
        let mut config = ClientConfig::from_env().context("Failed to load configuration")?;
        if let Some(api_url) = api_url {
            config.api_url = api_url;
            config.validate()?;
        }
        let transport = HttpTransport::from_config(&config)
            .context("Failed to create HTTP transport")?;
        tracing::debug!(api_url = %config.api_url, "Using intake API");
        Ok(Self {
            config,
            transport: Arc::new(transport),
        })
    }

    fn orchestrator(&self, policy: ConcurrencyPolicy) -> UploadOrchestrator {
        UploadOrchestrator::from_config(self.transport.clone(), ProgressTracker::new(), &self.config)
            .with_policy(policy)
    }

    fn store(&self) -> Arc<HttpAttachmentStore> {
        Arc::new(HttpAttachmentStore::new(self.transport.clone()))
    }
}

async fn read_files(paths: &[PathBuf]) -> anyhow::Result<Vec<UploadFile>> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        files.push(
            UploadFile::from_path(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?,
        );
    }
    Ok(files)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Compress {
            input,
            output,
            args,
        } => compress(&input, &output, &args).await,
        command => run(command, Services::connect(cli.api_url)?).await,
    }
}

async fn run(command: Commands, services: Services) -> anyhow::Result<()> {
    match command {
        Commands::Upload { files, args } => {
            let options = args.to_options(&services.config)?;
            let orchestrator = services.orchestrator(args.policy(&services.config));
            let files = read_files(&files).await?;
            let batch = orchestrator.upload_many(files, &options).await;
            print_json(&batch_report(&batch))?;
            if !batch.is_success() {
                std::process::exit(1);
            }
        }
        Commands::Attach {
            entity_type,
            entity_id,
            files,
            attachment_type,
            file_ids,
            metadata,
            args,
        } => {
            if files.is_empty() && file_ids.is_empty() {
                anyhow::bail!("Nothing to attach: pass file paths or --file-id");
            }
            let metadata = parse_metadata(metadata.as_deref())?;
            let store = services.store();

            if !file_ids.is_empty() {
                let items = file_ids
                    .iter()
                    .map(|id| {
                        let item = BulkAttachItem::new(id, &attachment_type);
                        match &metadata {
                            Some(m) => item.with_metadata(m.clone()),
                            None => item,
                        }
                    })
                    .collect();
                let attachments = store.bulk_attach(&entity_type, &entity_id, items).await?;
                print_json(&json!({ "success": true, "attachments": attachments }))?;
            }

            if !files.is_empty() {
                let options = AttachOptions {
                    upload: args.to_options(&services.config)?,
                    metadata,
                };
                let orchestrator = Arc::new(services.orchestrator(args.policy(&services.config)));
                let container =
                    EntityAttachmentContainer::new(&entity_type, &entity_id, orchestrator, store);
                let files = read_files(&files).await?;
                let outcome = container
                    .upload_and_attach(files, &attachment_type, &options)
                    .await?;
                print_json(&json!({
                    "upload": batch_report(&outcome.batch),
                    "attachments": outcome.attachments,
                }))?;
            }
        }
        Commands::List {
            entity_type,
            entity_id,
            attachment_type,
        } => {
            let items = services
                .store()
                .list(&entity_type, &entity_id, attachment_type.as_deref())
                .await?;
            print_json(&items)?;
        }
        Commands::Count {
            entity_type,
            entity_id,
            attachment_type,
        } => {
            let count = services
                .store()
                .count(&entity_type, &entity_id, attachment_type.as_deref())
                .await?;
            print_json(&json!({ "entityType": entity_type, "entityId": entity_id, "count": count }))?;
        }
        Commands::Reorder {
            entity_type,
            entity_id,
            file_ids,
        } => {
            let store = services.store();
            store.reorder(&entity_type, &entity_id, file_ids).await?;
            print_json(&store.list(&entity_type, &entity_id, None).await?)?;
        }
        Commands::Remove { attachment_id } => {
            services.store().remove(&attachment_id).await?;
            print_json(&json!({
                "success": true,
                "message": format!("Attachment {} removed", attachment_id)
            }))?;
        }
        Commands::Cleanup {
            entity_type,
            entity_id,
        } => {
            services
                .store()
                .cleanup_entity(&entity_type, &entity_id)
                .await?;
            print_json(&json!({
                "success": true,
                "message": format!("Attachments of {} {} removed", entity_type, entity_id)
            }))?;
        }
        Commands::Config { entity_type } => {
            print_json(&services.store().config(&entity_type).await?)?;
        }
        Commands::Capture {
            source,
            quality,
            format,
            category,
        } => {
            let data = tokio::fs::read(&source)
                .await
                .with_context(|| format!("Failed to read {}", source.display()))?;
            let label = source.display().to_string();
            let mut device = StaticCaptureDevice::from_bytes(label, &data)?;
            device.start().await?;
            let file = capture_upload_file(&mut device, quality, OutputFormat::parse(&format)?).await;
            device.stop().await?;

            let options = UploadOptions::default().with_category(
                category.unwrap_or_else(|| services.config.default_category.clone()),
            );
            let stored = services
                .orchestrator(ConcurrencyPolicy::default())
                .upload_one(file?, &options)
                .await?;
            print_json(&stored)?;
        }
        Commands::File { sub } => {
            let files = FileClient::new(services.transport.clone());
            match sub {
                FileCommands::Get { id } => print_json(&files.get(&id).await?)?,
                FileCommands::Delete { id } => {
                    files.delete(&id).await?;
                    print_json(&json!({
                        "success": true,
                        "message": format!("File {} deleted", id)
                    }))?;
                }
            }
        }
        Commands::Compress {
            input,
            output,
            args,
        } => compress(&input, &output, &args).await?,
    }

    Ok(())
}

async fn compress(input: &Path, output: &Path, args: &CompressArgs) -> anyhow::Result<()> {
    let data = tokio::fs::read(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let options = args.to_options()?;

    let result = ImageCompressor::new()
        .compress_async(data.into(), options)
        .await?;
    tokio::fs::write(output, &result.data)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;

    print_json(&json!({
        "output": output.display().to_string(),
        "format": result.format,
        "width": result.width,
        "height": result.height,
        "quality": result.quality,
        "originalSize": result.original_size,
        "compressedSize": result.compressed_size,
        "compressionRatio": result.compression_ratio,
    }))
}
