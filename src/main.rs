use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use ksum::consumer::{
    run_replay, FileCheckpointer, ProcessorConfig, RecordProcessorFactory, ReplaySource,
    ShardProcessorFactory, ShutdownSignal,
};
use ksum::store::{AggregateStore, InMemoryAggregateStore, StoreConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    /// Aggregate table in DynamoDB
    Dynamodb,
    /// Process-local map, printed as JSON on exit
    Memory,
}

#[derive(Parser)]
#[command(name = "ksum")]
#[command(version = ksum::VERSION)]
#[command(about = "Fold customer values from a shard into an aggregate table", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Shard the input is attributed to
    #[arg(long, default_value = "shardId-000000000000")]
    shard_id: String,

    /// Newline-delimited JSON records; stdin when omitted or `-`
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Where the last checkpointed sequence number is kept
    #[arg(long)]
    checkpoint_file: Option<PathBuf>,

    /// Records per batch, overriding the configuration file
    #[arg(long)]
    batch_size: Option<usize>,

    /// Aggregate store backend
    #[arg(long, value_enum, default_value = "dynamodb")]
    store: StoreKind,

    /// Emit logs as JSON objects
    #[arg(long)]
    json_logs: bool,

    /// Log level used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[cfg(feature = "dynamodb")]
async fn dynamodb_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn AggregateStore>> {
    Ok(Arc::new(
        ksum::store::DynamoDbAggregateStore::from_config(config).await,
    ))
}

#[cfg(not(feature = "dynamodb"))]
async fn dynamodb_store(_config: &StoreConfig) -> anyhow::Result<Arc<dyn AggregateStore>> {
    bail!("ksum was built without the `dynamodb` feature, use --store memory")
}

async fn open_input(input: Option<&PathBuf>) -> anyhow::Result<Box<dyn AsyncRead + Unpin + Send>> {
    match input {
        Some(path) if path.as_os_str() != "-" => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open input {}", path.display()))?;
            Ok(Box::new(file))
        }
        _ => Ok(Box::new(tokio::io::stdin())),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    ksum::init_tracing_with(&cli.log_level, cli.json_logs);

    let mut config = match &cli.config {
        Some(path) => ProcessorConfig::from_yaml_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => ProcessorConfig::default(),
    };
    if let Some(batch_size) = cli.batch_size {
        config.batch_size = batch_size;
    }
    config.validate().context("invalid configuration")?;

    if cli.shard_id.is_empty() {
        bail!("shard id cannot be empty");
    }

    let memory = Arc::new(InMemoryAggregateStore::new());
    let store: Arc<dyn AggregateStore> = match cli.store {
        StoreKind::Memory => memory.clone(),
        StoreKind::Dynamodb => dynamodb_store(&config.store).await?,
    };

    let shutdown = ShutdownSignal::new();
    let ctrl_c = shutdown.trigger_on_ctrl_c();

    let checkpoint_path = cli
        .checkpoint_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("{}.checkpoint", cli.shard_id)));
    let checkpointer = FileCheckpointer::new(checkpoint_path);
    let resume_after = checkpointer
        .load()
        .await
        .context("failed to read checkpoint")?;
    if let Some(sequence) = resume_after {
        info!(shard_id = %cli.shard_id, sequence, "Resuming after checkpoint");
    }

    let input = open_input(cli.input.as_ref()).await?;
    let mut source =
        ReplaySource::new(input, cli.shard_id.clone(), config.batch_size).resume_after(resume_after);

    let factory = ShardProcessorFactory::new(config, store, shutdown.clone());
    let mut processor = factory.create_processor();

    let summary = run_replay(&mut processor, &mut source, &checkpointer, &shutdown)
        .await
        .context("replay failed")?;
    ctrl_c.abort();

    info!(
        batches = summary.batches,
        records = summary.records,
        reason = %summary.reason,
        metrics = ?processor.metrics().snapshot(),
        "Done"
    );

    if cli.store == StoreKind::Memory {
        println!("{}", serde_json::to_string_pretty(&memory.snapshot())?);
    }

    Ok(())
}
