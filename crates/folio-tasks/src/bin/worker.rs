//! Folio worker binary
//!
//! Run with: cargo run -p folio-tasks --features cli --bin folio-worker -- ocr <document-id>

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use folio_tasks::processing::Job;
use folio_tasks::providers::{CommandOcrEngine, SearchTextNormalizer};
use folio_tasks::storage::SqliteRepository;
use folio_tasks::types::{NormalizeRequest, OcrRequest};
use folio_tasks::{
    DocumentId, FolioConfig, JobQueue, JobWorker, Node, NodeKind, OcrEngine, OcrJobExecutor,
    TreeNormalizer, VersionManager,
};

#[derive(Parser)]
#[command(name = "folio-worker", version, about = "Run OCR and normalization jobs")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// OCR the current version of a document into a new version
    Ocr {
        document_id: DocumentId,
        /// Language hint (defaults to ocr.default_lang)
        #[arg(short, long)]
        lang: Option<String>,
        #[arg(short, long)]
        namespace: Option<String>,
    },
    /// Normalize every page below a document or folder
    Normalize {
        /// "document" or "folder"
        kind: String,
        id: uuid::Uuid,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "folio_tasks=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => FolioConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => FolioConfig::default(),
    };

    tracing::info!("Configuration loaded");
    tracing::info!("  - Database: {}", config.storage.database_path.display());
    tracing::info!("  - Media root: {}", config.storage.media_root.display());
    tracing::info!("  - OCR command: {}", config.ocr.command);

    let job = match cli.command {
        Command::Ocr { document_id, lang, namespace } => Job::Ocr(OcrRequest {
            document_id,
            lang: lang.unwrap_or_else(|| config.ocr.default_lang.clone()),
            namespace,
        }),
        Command::Normalize { kind, id } => {
            let kind: NodeKind = kind
                .parse()
                .map_err(|other| anyhow::anyhow!("unknown node kind '{}'", other))?;
            Job::Normalize(NormalizeRequest::new(Node::from_parts(kind.as_str(), id)))
        }
    };

    let repository = Arc::new(
        SqliteRepository::new(&config.storage.database_path).context("failed to open database")?,
    );

    let engine = Arc::new(CommandOcrEngine::from_config(&config.ocr));
    if matches!(job, Job::Ocr(_)) && !engine.is_available().await {
        tracing::warn!("OCR command '{}' is not available", config.ocr.command);
    }

    let versions = Arc::new(VersionManager::new(repository.clone()));
    let executor = Arc::new(OcrJobExecutor::from_config(
        &config,
        repository.clone(),
        engine,
        versions,
    ));
    let normalizer = Arc::new(TreeNormalizer::new(
        repository,
        Arc::new(SearchTextNormalizer::new()),
    ));

    let (queue, receiver) = JobQueue::new(config.worker.queue_capacity, config.worker.max_attempts);
    let queue = Arc::new(queue);
    let worker = JobWorker::new(executor, normalizer, queue.clone(), &config.worker);

    let job_id = queue.submit(job).await?;

    let idle = queue.clone();
    worker
        .run_until(receiver, async move { idle.wait_idle().await })
        .await;

    let progress = queue
        .get_progress(job_id)
        .context("job progress missing after run")?;
    println!("{}", serde_json::to_string_pretty(&progress)?);

    if !progress.status.is_terminal() || progress.error.is_some() {
        std::process::exit(1);
    }
    Ok(())
}
