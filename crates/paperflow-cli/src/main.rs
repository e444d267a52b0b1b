use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use paperflow::{ObjectStore, PaperSink, SentenceEncoder};
use paperflow_local::embed::{EmbedConfig, EmbedWorker};
use paperflow_local::encode::HashEncoder;
use paperflow_local::orchestrate::{
    Orchestrator, OrchestratorConfig, ProcessLauncher, ENV_SHARDS_PER_JOB, ENV_SHARD_OFFSET,
};
use paperflow_local::table::ParquetTableSink;
use paperflow_local::transform::{run_transform, TransformConfig};
use paperflow_local::FsStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "paperflow")]
#[command(about = "Corpus normalization and embedding ingestion pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Normalize every corpus shard into the papers table (json stats).
    Transform(TransformCmd),
    /// Embed unprocessed shards and write parquet + completion markers (json stats).
    Embed(EmbedCmd),
    /// Plan windows over unprocessed shards and launch one worker per window (json stats).
    Orchestrate(OrchestrateCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args, Debug)]
struct StoreArgs {
    /// Object store root directory.
    #[arg(long, env = "PAPERFLOW_ROOT")]
    root: PathBuf,
    /// Store prefix holding the raw corpus shards.
    #[arg(long, default_value = "works/")]
    input_prefix: String,
}

#[derive(clap::Args, Debug)]
struct TransformCmd {
    #[command(flatten)]
    store: StoreArgs,
    /// Destination directory for papers-table parquet parts
    /// (default: <root>/papers).
    #[arg(long)]
    table_dir: Option<PathBuf>,
    /// Concurrently processed shards.
    #[arg(long, default_value_t = 8)]
    concurrency: usize,
}

#[derive(clap::Args, Debug)]
struct EmbedCmd {
    #[command(flatten)]
    store: StoreArgs,
    /// Store prefix receiving parquet embedding files.
    #[arg(long, default_value = "embeddings/")]
    data_prefix: String,
    /// Store prefix holding per-shard completion markers.
    #[arg(long, default_value = "markers/")]
    marker_prefix: String,
    /// Offset into the unprocessed-shard listing.
    #[arg(long, env = "PAPERFLOW_SHARD_OFFSET", default_value_t = 0)]
    offset: usize,
    /// Shards to process from the offset (default: all remaining).
    #[arg(long, env = "PAPERFLOW_SHARDS_PER_JOB")]
    count: Option<usize>,
    /// Encoder backend. Allowed: hash, fastembed
    #[arg(long, default_value = "hash")]
    encoder: String,
    /// Vector width for the hash encoder.
    #[arg(long, default_value_t = 384)]
    dimension: usize,
    /// Texts per encoder batch.
    #[arg(long, default_value_t = 512)]
    batch_size: usize,
    /// Truncate abstracts to this many chars before encoding.
    #[arg(long, default_value_t = 2048)]
    max_chars: usize,
    /// Concurrently processed shards within this worker.
    #[arg(long, default_value_t = 2)]
    shard_concurrency: usize,
    /// Model cache directory for the fastembed backend.
    #[arg(long)]
    model_cache_dir: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct OrchestrateCmd {
    #[command(flatten)]
    store: StoreArgs,
    /// Store prefix holding per-shard completion markers.
    #[arg(long, default_value = "markers/")]
    marker_prefix: String,
    /// Shards assigned to each launched worker.
    #[arg(long, default_value_t = 10)]
    shards_per_job: usize,
    /// Workers launched between cooldowns.
    #[arg(long, default_value_t = 20)]
    dispatch_batch: usize,
    /// Cooldown between dispatch batches, in seconds.
    #[arg(long, default_value_t = 30)]
    cooldown_secs: u64,
    /// Worker executable (default: this binary, re-invoked with `embed`).
    #[arg(long)]
    worker_exe: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

fn init_tracing() {
    // Stats go to stdout; logs stay on stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn build_encoder(cmd: &EmbedCmd) -> Result<Arc<dyn SentenceEncoder>> {
    match cmd.encoder.as_str() {
        "hash" => Ok(Arc::new(HashEncoder::new(cmd.dimension))),
        #[cfg(feature = "fastembed")]
        "fastembed" => {
            let enc = paperflow_local::encode::FastEmbedEncoder::new(
                cmd.model_cache_dir.clone(),
            )
            .context("loading fastembed model")?;
            Ok(Arc::new(enc))
        }
        other => anyhow::bail!("unknown encoder backend: {other}"),
    }
}

async fn run_transform_cmd(cmd: TransformCmd) -> Result<()> {
    let table_dir = cmd
        .table_dir
        .clone()
        .unwrap_or_else(|| cmd.store.root.join("papers"));
    let store: Arc<dyn ObjectStore> = Arc::new(FsStore::new(cmd.store.root.clone()));
    let sink: Arc<dyn PaperSink> = Arc::new(ParquetTableSink::new(table_dir));
    let cfg = TransformConfig {
        input_prefix: cmd.store.input_prefix,
        worker_concurrency: cmd.concurrency,
    };
    let stats = run_transform(store, sink, &cfg).await?;
    let payload = serde_json::json!({
        "schema_version": 1,
        "kind": "transform",
        "ok": true,
        "stats": stats,
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

async fn run_embed_cmd(cmd: EmbedCmd) -> Result<()> {
    let encoder = build_encoder(&cmd)?;
    let store: Arc<dyn ObjectStore> = Arc::new(FsStore::new(cmd.store.root.clone()));
    let cfg = EmbedConfig {
        input_prefix: cmd.store.input_prefix.clone(),
        data_prefix: cmd.data_prefix.clone(),
        marker_prefix: cmd.marker_prefix.clone(),
        shard_concurrency: cmd.shard_concurrency,
        encoder: paperflow::EncoderConfig {
            batch_size: cmd.batch_size,
            max_chars: cmd.max_chars,
        },
    };
    let worker = EmbedWorker::new(store, encoder, cfg);
    let stats = worker
        .run_window(cmd.offset, cmd.count.unwrap_or(usize::MAX))
        .await?;
    let payload = serde_json::json!({
        "schema_version": 1,
        "kind": "embed",
        "ok": true,
        "offset": cmd.offset,
        "stats": stats,
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

async fn run_orchestrate_cmd(cmd: OrchestrateCmd) -> Result<()> {
    let worker_exe = match cmd.worker_exe.clone() {
        Some(p) => p,
        None => std::env::current_exe().context("resolving worker executable")?,
    };
    let launcher = ProcessLauncher::new(
        worker_exe.to_string_lossy().into_owned(),
        vec![
            "embed".to_string(),
            "--root".to_string(),
            cmd.store.root.to_string_lossy().into_owned(),
            "--input-prefix".to_string(),
            cmd.store.input_prefix.clone(),
            "--marker-prefix".to_string(),
            cmd.marker_prefix.clone(),
        ],
    );
    let store: Arc<dyn ObjectStore> = Arc::new(FsStore::new(cmd.store.root.clone()));
    let embed_cfg = EmbedConfig {
        input_prefix: cmd.store.input_prefix,
        marker_prefix: cmd.marker_prefix,
        ..EmbedConfig::default()
    };
    let orch = Orchestrator::new(
        store,
        Arc::new(launcher),
        embed_cfg,
        OrchestratorConfig {
            shards_per_job: cmd.shards_per_job,
            dispatch_batch: cmd.dispatch_batch,
            cooldown: Duration::from_secs(cmd.cooldown_secs),
        },
    );
    let stats = orch.reconcile().await?;
    let payload = serde_json::json!({
        "schema_version": 1,
        "kind": "orchestrate",
        "ok": true,
        "window_env": [ENV_SHARD_OFFSET, ENV_SHARDS_PER_JOB],
        "stats": stats,
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn run_version_cmd(cmd: VersionCmd) -> Result<()> {
    if cmd.output == "text" {
        println!("paperflow {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    let payload = serde_json::json!({
        "schema_version": 1,
        "kind": "version",
        "name": "paperflow",
        "version": env!("CARGO_PKG_VERSION"),
        "features": {
            "fastembed": cfg!(feature = "fastembed"),
        },
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Transform(cmd) => run_transform_cmd(cmd).await,
        Commands::Embed(cmd) => run_embed_cmd(cmd).await,
        Commands::Orchestrate(cmd) => run_orchestrate_cmd(cmd).await,
        Commands::Version(cmd) => run_version_cmd(cmd),
    }
}
