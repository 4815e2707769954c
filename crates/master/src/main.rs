//! Master service entry point

use std::sync::Arc;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use master::config::StorageBackend;
use master::{Cluster, HttpRangeServerClient, MasterConfig};
use metastore::{MemoryStore, Store};

/// Master - cluster metadata and placement engine
#[derive(Parser, Debug)]
#[command(name = "master")]
#[command(about = "Metadata and placement master for a sharded key-value store")]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Data directory (overrides storage.path)
    #[arg(short, long)]
    data_dir: Option<String>,

    /// Log level (overrides log.level)
    #[arg(long)]
    log_level: Option<String>,
}

fn open_store(config: &MasterConfig) -> anyhow::Result<Arc<dyn Store>> {
    match config.storage.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "rocksdb")]
        StorageBackend::Rocksdb => Ok(Arc::new(metastore::RocksStore::open(&config.storage.path)?)),
        #[cfg(not(feature = "rocksdb"))]
        StorageBackend::Rocksdb => {
            anyhow::bail!("rocksdb backend requested but the rocksdb feature is disabled")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => MasterConfig::from_file(path)?,
        None => MasterConfig::default(),
    };
    if let Some(dir) = args.data_dir {
        config.storage.path = dir;
    }
    if let Some(level) = args.log_level {
        config.log.level = level;
    }

    // Initialize logging
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting master...");
    info!("  Cluster: {}", config.cluster.cluster_id);
    info!("  Storage: {:?} at {}", config.storage.backend, config.storage.path);
    info!("  Alarm gateway: {}", config.alarm.gateway_addr);

    let store = open_store(&config)?;
    let client = Arc::new(HttpRangeServerClient::new(config.schedule.rpc_timeout())?);
    let cluster = Arc::new(Cluster::new(config, store, client)?);

    cluster.load_cache()?;
    cluster.start()?;
    info!("Master ready, workers: {:?}", cluster.get_all_worker());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    cluster.close().await;

    Ok(())
}
