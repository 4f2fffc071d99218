use anyhow::{Context, Result, anyhow};
use clap::Parser;
use clap_derive::{Parser, Subcommand};
use config::{PathManager, Settings, StorageSettings, load_env_file};
use flowstore_core::storage::{
    BlockId, ContentLoader, HttpChunkStore, MemoryBlockTable, StaticUser, codec, content_length, decide,
};
use flowstore_core::storage::reconcile::CleanupOutcome;
use flowstore_core::{Block, ContentType, StorageClass, StrategyConfig, SwitchOrchestrator, UserId};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "flowstore", author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[arg(long, short)]
    tracing: bool,

    /// Log level used with --tracing (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Origin of the chunk store API
    #[arg(long, env = "FLOWSTORE_API_BASE_URL")]
    api_url: Option<String>,

    /// Override the content length threshold
    #[arg(long, global = true)]
    threshold: Option<usize>,

    /// Override the chunk size in bytes
    #[arg(long, global = true)]
    chunk_size: Option<usize>,

    /// User the chunks are attributed to during cleanup
    #[arg(long, env = "FLOWSTORE_USER_ID", default_value = "local-user")]
    user: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the storage class for a content length
    Decide { length: usize },
    /// Print how a file would be chunked
    Encode {
        file: PathBuf,
        #[arg(long)]
        structured: bool,
    },
    /// Save a file as the content of a block
    Push {
        block_id: String,
        file: PathBuf,
        #[arg(long)]
        structured: bool,
    },
    /// Print the content of a block
    Pull { block_id: String },
}

fn setup_tracing(enable: bool, level: &str) -> Result<()> {
    if enable {
        let level = Level::from_str(level).map_err(|_| anyhow!("Unknown log level: {}", level))?;
        let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
        tracing::subscriber::set_global_default(subscriber).context("Setting default subscriber failed")
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(Level::ERROR)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber).context("Setting default subscriber failed")
    }
}

fn effective_settings(args: &Args) -> StorageSettings {
    let mut storage = Settings::load().storage;
    if let Some(url) = &args.api_url {
        storage.api_base_url = url.clone();
    }
    if let Some(threshold) = args.threshold {
        storage.content_length_threshold = threshold;
    }
    if let Some(chunk_size) = args.chunk_size {
        storage.chunk_size = chunk_size;
    }
    storage
}

fn block_path(block_id: &BlockId) -> Result<PathBuf> {
    PathManager::blocks_dir()
        .map(|dir| dir.join(format!("{}.json", block_id)))
        .ok_or_else(|| anyhow!("Could not determine the data directory"))
}

fn load_block(block_id: &BlockId) -> Result<Option<Block>> {
    let path = block_path(block_id)?;
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    let block = serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(block))
}

fn save_block(block: &Block) -> Result<()> {
    let path = block_path(&block.id)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(block)?)
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn read_content(file: &Path) -> Result<String> {
    std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))
}

fn content_type(structured: bool) -> ContentType {
    if structured { ContentType::Structured } else { ContentType::Text }
}

fn run_encode(settings: &StorageSettings, file: &Path, structured: bool) -> Result<()> {
    let content = read_content(file)?;
    let chunks = codec::encode(&content, content_type(structured), settings.chunk_size);
    for chunk in &chunks {
        println!("{}\t{}\t{} bytes", chunk.name, chunk.mime_type, chunk.bytes.len());
    }
    println!("{} chunk(s), {} chars", chunks.len(), content_length(&content));
    Ok(())
}

async fn run_push(settings: &StorageSettings, user: &str, block_id: BlockId, file: &Path, structured: bool) -> Result<()> {
    let content = read_content(file)?;
    let mut block = match load_block(&block_id)? {
        Some(block) => block,
        None => Block::new(block_id.clone(), content_type(structured), ""),
    };
    block.record_edit(content.clone());

    let table = Arc::new(MemoryBlockTable::new());
    table.insert(block.clone());
    let store = Arc::new(HttpChunkStore::new(&settings.api_base_url)?);
    let orchestrator = SwitchOrchestrator::new(
        store,
        table.clone(),
        Arc::new(StaticUser(UserId::from(user))),
        StrategyConfig::from_settings(settings),
    );

    let result = orchestrator.handle_switch(&block, &content).await;
    // Persist the block as the engine left it, failed or not
    if let Some(updated) = table.get(&block_id) {
        save_block(&updated)?;
    }
    let outcome = result?;

    println!(
        "{}: {:?} ({}, {:?})",
        block_id, outcome.action, outcome.block.storage_class, outcome.block.saving_status
    );
    match outcome.wait_for_cleanup().await {
        Some(CleanupOutcome::Completed(report)) if !report.orphans.is_empty() => {
            println!(
                "cleanup: {} deleted, {} failed",
                report.deleted.len(),
                report.failed.len()
            );
        }
        Some(CleanupOutcome::TimedOut) => println!("cleanup: timed out"),
        _ => {}
    }
    Ok(())
}

async fn run_pull(settings: &StorageSettings, block_id: BlockId) -> Result<()> {
    let block = load_block(&block_id)?.ok_or_else(|| anyhow!("Unknown block: {}", block_id))?;
    let content = match block.storage_class {
        StorageClass::Internal => block.content.clone(),
        StorageClass::External => {
            let store = Arc::new(HttpChunkStore::new(&settings.api_base_url)?);
            ContentLoader::new(store).load(&block).await?
        }
    };
    print!("{}", content);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env_file();
    let args = Args::parse();
    setup_tracing(args.tracing, &args.log_level)?;

    let settings = effective_settings(&args);
    match &args.command {
        Command::Decide { length } => {
            println!("{}", decide(*length, settings.content_length_threshold));
            Ok(())
        }
        Command::Encode { file, structured } => run_encode(&settings, file, *structured),
        Command::Push {
            block_id,
            file,
            structured,
        } => run_push(&settings, &args.user, BlockId::from(block_id.as_str()), file, *structured).await,
        Command::Pull { block_id } => run_pull(&settings, BlockId::from(block_id.as_str())).await,
    }
}
